//! Subprocess boundary to the external ACME client.
//!
//! The actual ACME protocol exchange is certbot's job, not ours. This module
//! wraps its invocation behind a trait so the signing pipeline can be tested
//! without spawning real processes.

use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::io;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Command name of the external ACME client.
pub const DEFAULT_ACME_COMMAND: &str = "certbot";

/// What a finished external client invocation looks like to the pipeline.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Process exit code; zero means success. -1 if terminated by a signal.
    pub exit_code: i32,
    /// Captured standard output, which carries the client's diagnostics.
    pub stdout: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs the external ACME client with a prepared argument list.
///
/// Implementations suspend the calling task until the process exits; they must
/// not block the runtime thread.
#[async_trait]
pub trait AcmeClientRunner: Send + Sync {
    async fn run(&self, args: &[OsString]) -> io::Result<ProcessOutput>;
}

/// Production runner spawning the real client executable.
#[derive(Debug, Clone)]
pub struct CertbotRunner {
    command: OsString,
}

impl CertbotRunner {
    pub fn new<S: AsRef<OsStr>>(command: S) -> Self {
        Self {
            command: command.as_ref().to_os_string(),
        }
    }
}

impl Default for CertbotRunner {
    fn default() -> Self {
        Self::new(DEFAULT_ACME_COMMAND)
    }
}

#[async_trait]
impl AcmeClientRunner for CertbotRunner {
    async fn run(&self, args: &[OsString]) -> io::Result<ProcessOutput> {
        debug!("Executing {:?} with arguments {:?}", self.command, args);
        let mut cmd = Command::new(&self.command);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        let child = cmd.spawn()?;
        let output = child.wait_with_output().await?;
        let exit_code = output.status.code().unwrap_or(-1);
        debug!("Command exited with code {exit_code}");
        Ok(ProcessOutput {
            exit_code,
            stdout: output.stdout,
        })
    }
}
