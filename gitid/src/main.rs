use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use gitid_core::clone::{CloneOrchestrator, CloneRequest};
use gitid_core::config::{self, Config};
use gitid_core::keystore::KeyStore;
use gitid_core::probe::{self, ConnectionProbe};
use gitid_core::registry::IdentityRegistry;
use gitid_core::{KeyType, Metadata};

#[tokio::main]
async fn main() -> Result<()> {
    // Reset SIGPIPE to default so piping output to `head` etc. exits cleanly
    // instead of panicking with "broken pipe".
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str).unwrap_or("help");
    let config = load_config()?;

    match cmd {
        "list" | "ls" => cmd_list(&config),
        "generate" | "gen" => cmd_generate(&config, &args[1..]).await,
        "show" => cmd_show(&config, &args[1..]),
        "set" => cmd_set(&config, &args[1..]),
        "test" | "probe" => cmd_test(&config, &args[1..]).await,
        "clone" => cmd_clone(&config, &args[1..]).await,
        "delete" | "rm" => cmd_delete(&config, &args[1..]),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("unknown command: {other}");
            print_help();
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        "\
gitid - per-account SSH identities for git

USAGE:
    gitid <command> [args...]

COMMANDS:
    list                                List identities with metadata and probe status (alias: ls)
    generate <name> --type=<t> --email=<e> [--username=<u>]
                                        Generate a keypair + metadata sidecar (alias: gen)
                                        Types: rsa, ed25519, ecdsa
    show <name>                         Print an identity's public key
    set <name> <username> <email>       Update an identity's git author metadata
    test <name> [--host=<h> | --url=<scp-url>]
                                        Probe SSH authentication (alias: probe)
    clone <url> <identity> [--dir=<d>] [--name=<n>] [--email=<e>]
                                        Clone over SSH with this identity, then set
                                        repository-local user.name/user.email
    delete <name>                       Remove the key pair and metadata sidecar (alias: rm)
    help                                Show this help

Config file: $XDG_CONFIG_HOME/gitid/config.toml (key_dir, default_host,
timeout_secs, probe markers). Set RUST_LOG=debug for subprocess traces."
    );
}

fn load_config() -> Result<Config> {
    let Some(path) = config::config_path() else {
        return Ok(Config::default());
    };
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn loaded_registry(config: &Config) -> Result<IdentityRegistry> {
    let store = KeyStore::new(&config.key_dir, config.timeout());
    let mut registry = IdentityRegistry::new(store);
    registry
        .load()
        .with_context(|| format!("failed to scan {}", config.key_dir.display()))?;
    Ok(registry)
}

/// Pull out `--key=value` flags, returning (positional, flag lookup).
fn split_flags(args: &[String]) -> (Vec<&str>, Vec<(&str, &str)>) {
    let mut positional = Vec::new();
    let mut flags = Vec::new();
    for arg in args {
        if let Some(rest) = arg.strip_prefix("--") {
            match rest.split_once('=') {
                Some((key, value)) => flags.push((key, value)),
                None => flags.push((rest, "")),
            }
        } else {
            positional.push(arg.as_str());
        }
    }
    (positional, flags)
}

fn flag<'a>(flags: &[(&'a str, &'a str)], name: &str) -> Option<&'a str> {
    flags.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
}

fn cmd_list(config: &Config) -> Result<()> {
    let registry = loaded_registry(config)?;
    if registry.is_empty() {
        println!("no identities in {}", config.key_dir.display());
        return Ok(());
    }
    println!("{:<24} {:<24} {:<28} {}", "NAME", "USERNAME", "EMAIL", "STATUS");
    for identity in registry.iter() {
        println!(
            "{:<24} {:<24} {:<28} {}",
            identity.name, identity.username, identity.email, identity.last_status
        );
    }
    Ok(())
}

async fn cmd_generate(config: &Config, args: &[String]) -> Result<()> {
    let (positional, flags) = split_flags(args);
    let [name] = positional[..] else {
        bail!("usage: gitid generate <name> --type=<rsa|ed25519|ecdsa> --email=<e> [--username=<u>]");
    };
    let key_type = match flag(&flags, "type") {
        Some(t) => KeyType::parse(t).with_context(|| format!("unknown key type '{t}'"))?,
        None => KeyType::Ed25519,
    };
    let defaults = Metadata::defaults_for(name);
    let email = flag(&flags, "email")
        .filter(|e| !e.is_empty())
        .context("--email=<address> is required")?;
    let username = flag(&flags, "username")
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .unwrap_or(defaults.username);

    let mut registry = loaded_registry(config)?;
    let generated = registry
        .generate(name, key_type, username, email.to_string())
        .await?;

    println!(
        "generated {} key '{}' in {}",
        key_type,
        name,
        config.key_dir.display()
    );
    println!("\n{}", generated.public_key.trim_end());
    println!("\nAdd the public key above to your git host, then run: gitid test {name}");
    Ok(())
}

fn cmd_show(config: &Config, args: &[String]) -> Result<()> {
    let (positional, _) = split_flags(args);
    let [name] = positional[..] else {
        bail!("usage: gitid show <name>");
    };
    let registry = loaded_registry(config)?;
    registry.get(name)?;
    print!("{}", registry.key_store().read_public_key(name)?);
    Ok(())
}

fn cmd_set(config: &Config, args: &[String]) -> Result<()> {
    let (positional, _) = split_flags(args);
    let [name, username, email] = positional[..] else {
        bail!("usage: gitid set <name> <username> <email>");
    };
    let mut registry = loaded_registry(config)?;
    registry.update_metadata(name, username.to_string(), email.to_string())?;
    println!("metadata saved for '{name}'");
    Ok(())
}

async fn cmd_test(config: &Config, args: &[String]) -> Result<()> {
    let (positional, flags) = split_flags(args);
    let [name] = positional[..] else {
        bail!("usage: gitid test <name> [--host=<h> | --url=<scp-url>]");
    };
    let host = match (flag(&flags, "host"), flag(&flags, "url")) {
        (Some(h), _) if !h.is_empty() => h.to_string(),
        (_, Some(url)) => probe::extract_host(url)?.to_string(),
        _ => config.default_host.clone(),
    };

    let mut registry = loaded_registry(config)?;
    registry.get(name)?;
    let key_path = registry.key_store().private_key_path(name);

    let prober = ConnectionProbe::new(config.probe.clone(), config.timeout());
    let result = prober.probe(&key_path, &host).await?;

    let message = if result.success {
        format!("connected to {host}")
    } else {
        format!("connection to {host} failed; check that the key is registered")
    };
    registry.record_connection_result(name, result.success, &message)?;
    println!("{name}: {message}");
    if !result.success && !result.raw_output.trim().is_empty() {
        eprintln!("--- ssh output ---\n{}", result.raw_output.trim_end());
    }
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_clone(config: &Config, args: &[String]) -> Result<()> {
    let (positional, flags) = split_flags(args);
    let [url, identity] = positional[..] else {
        bail!("usage: gitid clone <url> <identity> [--dir=<d>] [--name=<n>] [--email=<e>]");
    };
    let destination = match flag(&flags, "dir") {
        Some(d) if !d.is_empty() => PathBuf::from(d),
        _ => std::env::current_dir().context("cannot resolve current directory")?,
    };

    let registry = loaded_registry(config)?;
    let request = CloneRequest {
        repo_url: url.to_string(),
        identity: identity.to_string(),
        username_override: flag(&flags, "name").map(str::to_string),
        email_override: flag(&flags, "email").map(str::to_string),
        destination,
    };
    let orchestrator = CloneOrchestrator::new(config.timeout());
    let report = orchestrator.clone(&registry, &request).await?;

    println!("cloned into {}", report.directory.display());
    println!(
        "local git identity: {} <{}>",
        report.user_name, report.user_email
    );
    Ok(())
}

fn cmd_delete(config: &Config, args: &[String]) -> Result<()> {
    let (positional, _) = split_flags(args);
    let [name] = positional[..] else {
        bail!("usage: gitid delete <name>");
    };
    let mut registry = loaded_registry(config)?;
    let report = registry.delete(name)?;
    println!("deleted '{name}': {}", report.summary());
    if !report.all_clear() {
        bail!("some artifacts could not be removed: {}", report.summary());
    }
    Ok(())
}
