//! Connection-only SSH authentication probes.
//!
//! A probe answers one question: can this private key authenticate to
//! `git@<host>`? No git operation is performed.
//!
//! Hosted-git SSH endpoints accept the authentication and then refuse the
//! interactive shell, closing the connection with a **nonzero** exit. The
//! exit status alone therefore cannot distinguish "authenticated but no
//! shell" from "rejected", and the probe also scans the combined output
//! for a per-host success marker (configurable in
//! [`ProbeConfig`](crate::config::ProbeConfig), since providers word their
//! rejection banners differently).
//!
//! Host-key verification is disabled for probes (`StrictHostKeyChecking=no`):
//! a key-management tool that contacts many hosts for the first time would
//! otherwise stall on every fingerprint prompt. This weakens
//! man-in-the-middle protection on first contact and is a deliberate
//! usability tradeoff.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::config::ProbeConfig;
use crate::exec::Invocation;
use crate::{Error, Result};

/// Outcome of a single probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub success: bool,
    /// Combined stdout/stderr of the SSH client, for diagnostics.
    pub raw_output: String,
}

pub struct ConnectionProbe {
    ssh_program: String,
    config: ProbeConfig,
    timeout: Duration,
}

impl ConnectionProbe {
    pub fn new(config: ProbeConfig, timeout: Duration) -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            config,
            timeout,
        }
    }

    /// Override the SSH client program (used by tests).
    pub fn with_ssh_program(mut self, program: &str) -> Self {
        self.ssh_program = program.to_string();
        self
    }

    /// Attempt a non-interactive authentication to `git@<host>` with the
    /// given private key.
    pub async fn probe(&self, private_key_path: &Path, host: &str) -> Result<ProbeResult> {
        debug!(host, key = %private_key_path.display(), "probing connection");
        let out = Invocation::new(&self.ssh_program)
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-i")
            .arg(private_key_path)
            .arg("-T")
            .arg(format!("git@{host}"))
            .run(self.timeout)
            .await?;

        let success = classify(out.success(), &out.output, self.config.markers_for(host));
        debug!(host, success, code = ?out.code(), "probe finished");
        Ok(ProbeResult {
            success,
            raw_output: out.output,
        })
    }
}

/// Classify a finished SSH invocation.
///
/// Success iff the exit status was zero OR the combined output contains
/// any of the configured markers. A nonzero exit with the marker present
/// means the host authenticated us and then refused shell access, which is
/// the expected behavior of git hosting endpoints.
pub fn classify(exit_ok: bool, output: &str, markers: &[String]) -> bool {
    exit_ok || markers.iter().any(|m| output.contains(m.as_str()))
}

/// Extract the host from an SCP-style repository URL (`git@HOST:path`).
///
/// The host is the substring between `git@` and the first `:`. Anything
/// else, including HTTPS URLs, fails with [`Error::InvalidUrl`]; this
/// tool only clones over SSH.
pub fn extract_host(url: &str) -> Result<&str> {
    let rest = url
        .strip_prefix("git@")
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
    let (host, _path) = rest
        .split_once(':')
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
    if host.is_empty() {
        return Err(Error::InvalidUrl(url.to_string()));
    }
    Ok(host)
}
