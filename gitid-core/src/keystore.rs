//! Durable access to key material and metadata sidecars.
//!
//! Every identity lives in one key directory (conventionally `~/.ssh`):
//! the private key `<name>`, its public half `<name>.pub`, and a JSON
//! sidecar `<name>_config.json` holding the git author fields. Presence of
//! files in this directory is the sole source of truth for registry
//! membership; nothing else is persisted.
//!
//! Sidecars are one file per identity rather than a shared database so a
//! delete stays scoped to that identity and writers to different
//! identities never contend on one file.
//!
//! Key generation shells out to `ssh-keygen` with an **empty passphrase**:
//! the tool optimizes for non-interactive automation over passphrase
//! protection of the key file. This is a documented tradeoff.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::exec::Invocation;
use crate::{Error, KeyType, Metadata, Result};

/// Filenames in the key directory that are never private keys.
const NON_KEY_NAMES: &[&str] = &["known_hosts", "known_hosts.old"];

/// Suffix of metadata sidecar files, excluded from key enumeration.
const SIDECAR_SUFFIX: &str = "_config.json";

/// Paths and public key text produced by a successful key generation.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub public_key: String,
}

/// What happened to one on-disk artifact during a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactOutcome {
    Removed,
    Absent,
    Failed(String),
}

impl ArtifactOutcome {
    fn label(&self) -> &str {
        match self {
            ArtifactOutcome::Removed => "removed",
            ArtifactOutcome::Absent => "absent",
            ArtifactOutcome::Failed(_) => "FAILED",
        }
    }
}

/// Per-artifact outcome of [`KeyStore::delete_artifacts`].
///
/// Deletion is best-effort: a failure on one artifact does not stop the
/// others, and the caller receives this report instead of a bare boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub private_key: ArtifactOutcome,
    pub public_key: ArtifactOutcome,
    pub metadata: ArtifactOutcome,
}

impl DeleteReport {
    /// True when no artifact removal hit an error (absent counts as clear).
    pub fn all_clear(&self) -> bool {
        ![&self.private_key, &self.public_key, &self.metadata]
            .iter()
            .any(|o| matches!(o, ArtifactOutcome::Failed(_)))
    }

    /// One-line human summary for status messages.
    pub fn summary(&self) -> String {
        format!(
            "private key {}, public key {}, metadata {}",
            self.private_key.label(),
            self.public_key.label(),
            self.metadata.label()
        )
    }
}

/// Durable store for key files and metadata sidecars in one directory.
#[derive(Debug, Clone)]
pub struct KeyStore {
    key_dir: PathBuf,
    keygen_program: String,
    timeout: Duration,
}

impl KeyStore {
    pub fn new(key_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            key_dir: key_dir.into(),
            keygen_program: "ssh-keygen".to_string(),
            timeout,
        }
    }

    /// Override the key-generation program (used by tests and exotic setups).
    pub fn with_keygen_program(mut self, program: &str) -> Self {
        self.keygen_program = program.to_string();
        self
    }

    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    pub fn private_key_path(&self, name: &str) -> PathBuf {
        self.key_dir.join(name)
    }

    pub fn public_key_path(&self, name: &str) -> PathBuf {
        self.key_dir.join(format!("{name}.pub"))
    }

    pub fn metadata_path(&self, name: &str) -> PathBuf {
        self.key_dir.join(format!("{name}{SIDECAR_SUFFIX}"))
    }

    /// Enumerate names of plausible private keys in the key directory.
    ///
    /// A directory entry qualifies when it is a readable regular file that
    /// is not a `.pub` file, not a metadata sidecar, not a known-hosts
    /// file, and not hidden. Order follows filesystem enumeration and is
    /// not guaranteed; callers must not depend on it.
    pub fn list_private_key_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.key_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with('.')
                || name.ends_with(".pub")
                || name.ends_with(SIDECAR_SUFFIX)
                || NON_KEY_NAMES.contains(&name)
            {
                continue;
            }
            if !entry.file_type()?.is_file() {
                continue;
            }
            // Unreadable files cannot serve as `-i` arguments; skip them.
            if fs::File::open(entry.path()).is_err() {
                debug!(name, "skipping unreadable key file");
                continue;
            }
            names.push(name.to_string());
        }
        Ok(names)
    }

    /// Read the public key text for `name`.
    pub fn read_public_key(&self, name: &str) -> Result<String> {
        let path = self.public_key_path(name);
        if !path.exists() {
            return Err(Error::NotFound(format!("public key for '{name}'")));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// Generate a new keypair by invoking the key-generation tool.
    ///
    /// Creates the key directory if needed. Fails with
    /// [`Error::GenerationFailed`] when the tool exits nonzero or the
    /// expected `.pub` file does not appear afterwards.
    pub async fn generate_key_pair(
        &self,
        name: &str,
        key_type: KeyType,
        comment: &str,
    ) -> Result<GeneratedKey> {
        fs::create_dir_all(&self.key_dir)?;

        let private_key_path = self.private_key_path(name);
        let public_key_path = self.public_key_path(name);
        info!(name, r#type = %key_type, "generating key pair");

        let out = Invocation::new(&self.keygen_program)
            .arg("-t")
            .arg(key_type.as_arg())
            .arg("-C")
            .arg(comment)
            .arg("-f")
            .arg(&private_key_path)
            .arg("-N")
            .arg("")
            .arg("-q")
            .run(self.timeout)
            .await?;

        if !out.success() {
            return Err(Error::GenerationFailed(format!(
                "'{}' exited with {:?}: {}",
                self.keygen_program,
                out.code(),
                out.output.trim()
            )));
        }

        let public_key = fs::read_to_string(&public_key_path).map_err(|_| {
            Error::GenerationFailed(format!(
                "expected public key file '{}' did not appear",
                public_key_path.display()
            ))
        })?;

        Ok(GeneratedKey {
            private_key_path,
            public_key_path,
            public_key,
        })
    }

    /// Read the metadata sidecar for `name`.
    ///
    /// Absent file maps to [`Error::NotFound`]; a file that exists but
    /// does not parse is reported as invalid data.
    pub fn read_metadata(&self, name: &str) -> Result<Metadata> {
        let path = self.metadata_path(name);
        if !path.exists() {
            return Err(Error::NotFound(format!("metadata for '{name}'")));
        }
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("corrupt metadata sidecar '{}': {e}", path.display()),
            ))
        })
    }

    /// Persist the metadata sidecar for `name` (write-then-rename).
    pub fn write_metadata(&self, name: &str, metadata: &Metadata) -> Result<()> {
        fs::create_dir_all(&self.key_dir)?;
        let path = self.metadata_path(name);
        // Dot-prefixed so a crashed write never shows up in key enumeration.
        let tmp = self.key_dir.join(format!(".{name}{SIDECAR_SUFFIX}.tmp"));
        let json = serde_json::to_string(metadata)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        debug!(name, path = %path.display(), "metadata sidecar written");
        Ok(())
    }

    /// Remove the private key, public key, and sidecar for `name`.
    ///
    /// Best-effort with no rollback: every artifact is attempted and the
    /// per-artifact outcomes are returned.
    pub fn delete_artifacts(&self, name: &str) -> DeleteReport {
        let report = DeleteReport {
            private_key: remove_one(&self.private_key_path(name)),
            public_key: remove_one(&self.public_key_path(name)),
            metadata: remove_one(&self.metadata_path(name)),
        };
        info!(name, outcome = %report.summary(), "deleted identity artifacts");
        report
    }
}

fn remove_one(path: &Path) -> ArtifactOutcome {
    match fs::remove_file(path) {
        Ok(()) => ArtifactOutcome::Removed,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ArtifactOutcome::Absent,
        Err(e) => ArtifactOutcome::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_key_dir() -> PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir =
            std::env::temp_dir().join(format!("gitid-keystore-test-{}-{n}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn store(dir: &Path) -> KeyStore {
        KeyStore::new(dir, Duration::from_secs(10))
    }

    #[cfg(unix)]
    fn write_stub_keygen(dir: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;
        // Stand-in for ssh-keygen: finds the -f argument and writes both
        // halves of the keypair there.
        let script = dir.join("stub-keygen.sh");
        fs::write(
            &script,
            "#!/bin/sh\n\
             out=\"\"\n\
             while [ $# -gt 0 ]; do\n\
               if [ \"$1\" = \"-f\" ]; then shift; out=\"$1\"; fi\n\
               shift\n\
             done\n\
             printf 'PRIVATE KEY MATERIAL' > \"$out\"\n\
             printf 'ssh-ed25519 AAAATESTKEY stub' > \"$out.pub\"\n",
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script.to_str().unwrap().to_string()
    }

    #[test]
    fn listing_skips_non_key_entries() {
        let dir = tmp_key_dir();
        fs::write(dir.join("work_github"), "key").unwrap();
        fs::write(dir.join("work_github.pub"), "pub").unwrap();
        fs::write(dir.join("work_github_config.json"), "{}").unwrap();
        fs::write(dir.join("known_hosts"), "hosts").unwrap();
        fs::write(dir.join("known_hosts.old"), "hosts").unwrap();
        fs::write(dir.join(".DS_Store"), "junk").unwrap();
        fs::create_dir(dir.join("subdir")).unwrap();

        let names = store(&dir).list_private_key_names().unwrap();
        assert_eq!(names, vec!["work_github".to_string()]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn listing_missing_directory_is_io_error() {
        let dir = tmp_key_dir().join("does-not-exist");
        let err = store(&dir).list_private_key_names().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn read_public_key_absent_is_not_found() {
        let dir = tmp_key_dir();
        let err = store(&dir).read_public_key("nope").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn metadata_roundtrip() {
        let dir = tmp_key_dir();
        let s = store(&dir);
        let metadata = Metadata {
            username: "Alice Work".to_string(),
            email: "a@b.com".to_string(),
        };
        s.write_metadata("work_github", &metadata).unwrap();
        assert_eq!(s.read_metadata("work_github").unwrap(), metadata);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn metadata_absent_is_not_found() {
        let dir = tmp_key_dir();
        let err = store(&dir).read_metadata("ghost").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn corrupt_metadata_is_reported() {
        let dir = tmp_key_dir();
        fs::write(dir.join("bad_config.json"), "not json").unwrap();
        let err = store(&dir).read_metadata("bad").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn delete_reports_removed_vs_absent() {
        let dir = tmp_key_dir();
        let s = store(&dir);
        fs::write(s.private_key_path("k"), "key").unwrap();
        fs::write(s.metadata_path("k"), r#"{"username":"u","email":"e"}"#).unwrap();
        // No public key on disk.

        let report = s.delete_artifacts("k");
        assert_eq!(report.private_key, ArtifactOutcome::Removed);
        assert_eq!(report.public_key, ArtifactOutcome::Absent);
        assert_eq!(report.metadata, ArtifactOutcome::Removed);
        assert!(report.all_clear());
        assert!(!s.private_key_path("k").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn generate_writes_both_halves() {
        let dir = tmp_key_dir();
        let keygen = write_stub_keygen(&dir);
        let s = store(&dir).with_keygen_program(&keygen);

        let generated = s
            .generate_key_pair("work_github", KeyType::Ed25519, "a@b.com")
            .await
            .unwrap();
        assert!(generated.private_key_path.exists());
        assert!(!generated.public_key.is_empty());
        assert_eq!(generated.public_key_path, s.public_key_path("work_github"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn generate_fails_when_pub_file_missing() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tmp_key_dir();
        // A keygen that succeeds but produces no output files.
        let script = dir.join("noop-keygen.sh");
        fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let s = store(&dir).with_keygen_program(script.to_str().unwrap());
        let err = s
            .generate_key_pair("k", KeyType::Rsa, "c")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GenerationFailed(_)));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn generate_fails_on_nonzero_exit() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tmp_key_dir();
        let script = dir.join("failing-keygen.sh");
        fs::write(&script, "#!/bin/sh\necho boom 1>&2\nexit 1\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let s = store(&dir).with_keygen_program(script.to_str().unwrap());
        let err = s
            .generate_key_pair("k", KeyType::Rsa, "c")
            .await
            .unwrap_err();
        match err {
            Error::GenerationFailed(msg) => assert!(msg.contains("boom")),
            other => panic!("expected GenerationFailed, got {other:?}"),
        }
        fs::remove_dir_all(&dir).unwrap();
    }
}
