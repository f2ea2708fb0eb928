//! Core library for `gitid`: an SSH identity registry and git-clone
//! orchestrator for developers juggling several hosted-git accounts.
//!
//! An *identity* is an SSH keypair plus the git author metadata
//! (`user.name` / `user.email`) associated with it, all living under one
//! logical name in a single key directory (conventionally `~/.ssh`).
//! The crate discovers identities from that directory, tests them against
//! git hosts over SSH, and clones repositories with the chosen key pinned
//! and repository-local author configuration applied.
//!
//! All interaction with `ssh`, `ssh-keygen`, and `git` goes through
//! [`exec::Invocation`]: structured argument lists, a bounded timeout,
//! never a shell.

use serde::{Deserialize, Serialize};

pub mod clone;
pub mod config;
pub mod exec;
pub mod keystore;
pub mod probe;
pub mod registry;

/// Key algorithm selected when an identity is generated.
///
/// Immutable after creation; the registry does not attempt to recover the
/// algorithm of keys it merely discovers on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Rsa,
    Ed25519,
    Ecdsa,
}

impl KeyType {
    /// The algorithm name passed to the key-generation tool as `-t`.
    pub fn as_arg(self) -> &'static str {
        match self {
            KeyType::Rsa => "rsa",
            KeyType::Ed25519 => "ed25519",
            KeyType::Ecdsa => "ecdsa",
        }
    }

    /// Case-insensitive parse of a user-supplied algorithm name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rsa" => Some(KeyType::Rsa),
            "ed25519" => Some(KeyType::Ed25519),
            "ecdsa" => Some(KeyType::Ecdsa),
            _ => None,
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Result of the most recent connection probe for an identity.
///
/// Transient: never persisted, reset to `Untested` on every registry load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Untested,
    Success,
    Failure,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Untested => "untested",
            ConnectionStatus::Success => "ok",
            ConnectionStatus::Failure => "failed",
        })
    }
}

/// Git author metadata stored in an identity's sidecar file.
///
/// Serialized as `{"username": "...", "email": "..."}` in
/// `<name>_config.json` next to the key files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub username: String,
    pub email: String,
}

impl Metadata {
    /// Placeholder metadata used when an identity has no sidecar file.
    pub fn defaults_for(name: &str) -> Self {
        Self {
            username: format!("DefaultUserName_{name}"),
            email: format!("{name}@example.com"),
        }
    }
}

/// A known SSH identity: key name, author metadata, and transient probe state.
///
/// `name` equals the private-key filename and is the lookup key everywhere.
/// Key paths are derived from the name and the key directory on demand and
/// never stored.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    /// Known only for identities generated in this process; `None` for keys
    /// discovered on disk.
    pub key_type: Option<KeyType>,
    pub username: String,
    pub email: String,
    pub last_status: ConnectionStatus,
    pub status_message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid repository URL: {0}")]
    InvalidUrl(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("key generation failed: {0}")]
    GenerationFailed(String),

    /// Neither an override nor stored metadata supplied a non-empty
    /// `user.name` / `user.email` for the identity.
    #[error("missing user.name or user.email for identity '{0}'")]
    MissingIdentityMetadata(String),

    #[error("'{program}' did not finish within {timeout_secs}s and was killed")]
    Timeout { program: String, timeout_secs: u64 },

    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// An external tool ran to completion but reported failure.
    /// `step` names the operation that was underway.
    #[error("{step}: '{program}' exited with {code:?}: {detail}")]
    CommandFailed {
        step: &'static str,
        program: String,
        code: Option<i32>,
        detail: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
