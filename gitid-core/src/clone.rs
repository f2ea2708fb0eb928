//! SSH-authenticated clone with repository-local author configuration.
//!
//! Given a repository URL and a chosen identity, the orchestrator clones
//! with the identity's private key pinned for that one `git` invocation
//! and then writes `user.name` / `user.email` into the fresh working
//! copy's local config. No global git or SSH state is touched: the SSH
//! command override travels as an environment variable on the child
//! process only.
//!
//! The steps run in order with no rollback; a failure stops the sequence
//! and the error names the step that failed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::exec::Invocation;
use crate::registry::IdentityRegistry;
use crate::{Error, Result};

/// A single clone request. Transient: built per call, never persisted.
#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub repo_url: String,
    /// Name of the identity whose key authenticates the clone.
    pub identity: String,
    /// Overrides for the identity's stored metadata; `None` or empty means
    /// "use the stored value".
    pub username_override: Option<String>,
    pub email_override: Option<String>,
    /// Directory the working copy is created inside.
    pub destination: PathBuf,
}

/// What a successful clone produced.
#[derive(Debug, Clone)]
pub struct CloneReport {
    pub directory: PathBuf,
    pub user_name: String,
    pub user_email: String,
}

pub struct CloneOrchestrator {
    git_program: String,
    ssh_program: String,
    timeout: Duration,
}

impl CloneOrchestrator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            git_program: "git".to_string(),
            ssh_program: "ssh".to_string(),
            timeout,
        }
    }

    /// Override the git client program (used by tests).
    pub fn with_git_program(mut self, program: &str) -> Self {
        self.git_program = program.to_string();
        self
    }

    /// Override the SSH program named in the transport override.
    pub fn with_ssh_program(mut self, program: &str) -> Self {
        self.ssh_program = program.to_string();
        self
    }

    /// Clone `request.repo_url` using the named identity's key, then apply
    /// repository-local `user.name` / `user.email`.
    pub async fn clone(
        &self,
        registry: &IdentityRegistry,
        request: &CloneRequest,
    ) -> Result<CloneReport> {
        // Step 1: validate before any external tool runs.
        if request.repo_url.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "repository URL must not be empty".to_string(),
            ));
        }
        if request.identity.trim().is_empty() {
            return Err(Error::InvalidRequest("no identity selected".to_string()));
        }
        let identity = registry.get(&request.identity)?;
        let key_path = registry.key_store().private_key_path(&identity.name);

        // Step 2: derive the target directory from the URL.
        let repo_name = repo_dir_name(&request.repo_url)?;
        let target = request.destination.join(repo_name);

        // Step 3: clone with the SSH transport pinned to this key.
        // IdentitiesOnly stops a running agent from substituting another key.
        let ssh_command = format!(
            "{} -i {} -o IdentitiesOnly=yes",
            self.ssh_program,
            shell_quote(&key_path.display().to_string())
        );
        info!(
            url = %request.repo_url,
            identity = %identity.name,
            target = %target.display(),
            "cloning repository"
        );
        let out = Invocation::new(&self.git_program)
            .arg("clone")
            .arg(&request.repo_url)
            .arg(&target)
            .env("GIT_SSH_COMMAND", ssh_command)
            .run(self.timeout)
            .await?;
        if !out.success() {
            return Err(Error::CommandFailed {
                step: "clone",
                program: self.git_program.clone(),
                code: out.code(),
                detail: out.output.trim().to_string(),
            });
        }

        // Step 4: resolve the effective author identity.
        let user_name = effective(request.username_override.as_deref(), &identity.username);
        let user_email = effective(request.email_override.as_deref(), &identity.email);
        let (Some(user_name), Some(user_email)) = (user_name, user_email) else {
            return Err(Error::MissingIdentityMetadata(identity.name.clone()));
        };

        // Step 5: repository-local config, scoped by the child's cwd.
        self.git_config(&target, "user.name", &user_name).await?;
        self.git_config(&target, "user.email", &user_email).await?;

        info!(target = %target.display(), user_name, user_email, "clone configured");
        Ok(CloneReport {
            directory: target,
            user_name,
            user_email,
        })
    }

    async fn git_config(&self, working_copy: &Path, key: &'static str, value: &str) -> Result<()> {
        let out = Invocation::new(&self.git_program)
            .arg("config")
            .arg(key)
            .arg(value)
            .current_dir(working_copy)
            .run(self.timeout)
            .await?;
        if !out.success() {
            return Err(Error::CommandFailed {
                step: "apply local git config",
                program: self.git_program.clone(),
                code: out.code(),
                detail: out.output.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Pick the override when it is non-empty, else the stored value; `None`
/// when both are empty.
fn effective(override_value: Option<&str>, stored: &str) -> Option<String> {
    match override_value {
        Some(v) if !v.trim().is_empty() => Some(v.to_string()),
        _ if !stored.trim().is_empty() => Some(stored.to_string()),
        _ => None,
    }
}

/// Working-copy directory name: last path component of the URL with one
/// trailing `.git` stripped.
fn repo_dir_name(url: &str) -> Result<&str> {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or("");
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() || name.contains('@') {
        return Err(Error::InvalidUrl(url.to_string()));
    }
    Ok(name)
}

/// Single-quote `s` for the one shell-parsed string we cannot avoid:
/// git tokenizes `GIT_SSH_COMMAND` with shell rules.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
