//! Bounded execution of external tools.
//!
//! Every subprocess this crate runs (`ssh`, `ssh-keygen`, `git`) goes
//! through [`Invocation`]: a program name plus a structured argument list.
//! Nothing is ever passed through a shell, so key names, URLs, and author
//! metadata cannot smuggle shell syntax into an invocation.
//!
//! Environment overrides are applied to the child process only; the parent
//! environment is never mutated. All invocations are bounded by a timeout
//! after which the child is killed and [`Error::Timeout`] is reported.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Outcome of a subprocess that ran to completion within the timeout.
#[derive(Debug)]
pub struct CmdOutput {
    pub status: std::process::ExitStatus,
    /// Captured stdout followed by captured stderr, lossily decoded.
    /// Hosted-git SSH endpoints print their auth banner on stderr, so
    /// callers classify against the combined stream.
    pub output: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// A single external-tool invocation.
#[derive(Debug)]
pub struct Invocation {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(&'static str, OsString)>,
    cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable on the child process only.
    pub fn env(mut self, key: &'static str, value: impl Into<OsString>) -> Self {
        self.envs.push((key, value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Run the tool, capturing combined output.
    ///
    /// stdin is closed so the child can never block on interactive input.
    /// If the child outlives `timeout` it is killed and
    /// [`Error::Timeout`] is returned.
    pub async fn run(self, timeout: Duration) -> Result<CmdOutput> {
        debug!(program = %self.program, args = ?self.args, "running external tool");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|source| Error::Spawn {
            program: self.program.clone(),
            source,
        })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => {
                let out = result?;
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                output.push_str(&String::from_utf8_lossy(&out.stderr));
                debug!(
                    program = %self.program,
                    code = ?out.status.code(),
                    "external tool finished"
                );
                Ok(CmdOutput {
                    status: out.status,
                    output,
                })
            }
            // Dropping the wait future kills the child (kill_on_drop).
            Err(_) => Err(Error::Timeout {
                program: self.program,
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_combined_output() {
        let out = Invocation::new("/bin/sh")
            .arg("-c")
            .arg("echo out; echo err 1>&2")
            .run(Duration::from_secs(10))
            .await
            .unwrap();
        assert!(out.success());
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let out = Invocation::new("/bin/sh")
            .arg("-c")
            .arg("exit 3")
            .run(Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.code(), Some(3));
    }

    #[tokio::test]
    async fn kills_child_on_timeout() {
        let err = Invocation::new("/bin/sh")
            .arg("-c")
            .arg("sleep 30")
            .run(Duration::from_millis(100))
            .await
            .unwrap_err();
        match err {
            Error::Timeout { program, .. } => assert_eq!(program, "/bin/sh"),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let err = Invocation::new("/no/such/program")
            .run(Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            Error::Spawn { program, .. } => assert_eq!(program, "/no/such/program"),
            other => panic!("expected Spawn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn env_is_scoped_to_the_child() {
        let out = Invocation::new("/bin/sh")
            .arg("-c")
            .arg("printf '%s' \"$GITID_TEST_MARKER\"")
            .env("GITID_TEST_MARKER", "scoped")
            .run(Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.output, "scoped");
        assert!(std::env::var_os("GITID_TEST_MARKER").is_none());
    }
}
