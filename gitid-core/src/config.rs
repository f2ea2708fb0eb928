//! Tool configuration.
//!
//! Loaded from TOML at `$XDG_CONFIG_HOME/gitid/config.toml` (default
//! `~/.config/gitid/config.toml`). Every field has a default, so a missing
//! or empty file is a valid configuration. Parsing happens at the call
//! site; this module only defines the shape and the path convention.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding private keys, `.pub` files, and metadata sidecars.
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,

    /// Host probed when the caller supplies neither a host nor a URL.
    #[serde(default = "default_host")]
    pub default_host: String,

    /// Upper bound for every external-process invocation, in seconds.
    /// The child is killed when the bound is exceeded.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub probe: ProbeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_dir: default_key_dir(),
            default_host: default_host(),
            timeout_secs: default_timeout_secs(),
            probe: ProbeConfig::default(),
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Success-marker configuration for connection probes.
///
/// Hosted-git SSH endpoints reject interactive shells after a successful
/// authentication, so the probe also scans the combined output for a marker
/// string. The marker text differs between providers, hence the per-host
/// override table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Markers that indicate successful authentication regardless of the
    /// exit status. Used for hosts without an entry in `host_markers`.
    #[serde(default = "default_markers")]
    pub markers: Vec<String>,

    /// Per-host marker overrides, keyed by hostname.
    ///
    /// ```toml
    /// [probe.host_markers]
    /// "gitlab.com" = ["Welcome to GitLab"]
    /// ```
    #[serde(default)]
    pub host_markers: HashMap<String, Vec<String>>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            markers: default_markers(),
            host_markers: HashMap::new(),
        }
    }
}

impl ProbeConfig {
    /// The marker list to scan for when probing `host`.
    pub fn markers_for(&self, host: &str) -> &[String] {
        self.host_markers
            .get(host)
            .map(Vec::as_slice)
            .unwrap_or(&self.markers)
    }
}

/// Return the config file path: `$XDG_CONFIG_HOME/gitid/config.toml`
/// (default `~/.config/gitid/config.toml`).
pub fn config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("gitid").join("config.toml"))
}

fn default_key_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ssh")
}

fn default_host() -> String {
    "github.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_markers() -> Vec<String> {
    vec!["successfully authenticated".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert!(cfg.key_dir.ends_with(".ssh"));
        assert_eq!(cfg.default_host, "github.com");
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.probe.markers, vec!["successfully authenticated"]);
        assert!(cfg.probe.host_markers.is_empty());
    }

    #[test]
    fn parse_overrides() {
        let toml_str = r#"
            key_dir = "/tmp/keys"
            default_host = "gitlab.com"
            timeout_secs = 5

            [probe]
            markers = ["auth ok"]
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.key_dir, PathBuf::from("/tmp/keys"));
        assert_eq!(cfg.default_host, "gitlab.com");
        assert_eq!(cfg.timeout_secs, 5);
        assert_eq!(cfg.probe.markers, vec!["auth ok"]);
    }

    #[test]
    fn markers_for_prefers_host_entry() {
        let toml_str = r#"
            [probe.host_markers]
            "gitlab.com" = ["Welcome to GitLab"]
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.probe.markers_for("gitlab.com"), ["Welcome to GitLab"]);
        // Hosts without an override fall back to the default list.
        assert_eq!(
            cfg.probe.markers_for("github.com"),
            ["successfully authenticated"]
        );
    }

    #[test]
    fn config_roundtrip_serialize() {
        let cfg = Config::default();
        let serialized = toml::to_string(&cfg).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.default_host, cfg.default_host);
        assert_eq!(deserialized.timeout_secs, cfg.timeout_secs);
        assert_eq!(deserialized.probe.markers, cfg.probe.markers);
    }
}
