//! Shared plumbing for CLI-backed providers.
//!
//! Backends describe the process they want as a [`CliCommand`] and hand it to a
//! [`CommandRunner`]. [`ProcessRunner`] spawns the real executable; tests
//! swap in a recording runner.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::io::process::{ExecFailure, ExecLimits, run_command};

/// A fully described backend process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Empty means inherit the current directory.
    pub work_dir: PathBuf,
    pub stdin: Option<String>,
    pub timeout: Option<std::time::Duration>,
}

/// Runs a [`CliCommand`] and returns its combined output on success.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        cancel: &CancellationToken,
        command: &CliCommand,
    ) -> Result<String, ExecFailure>;
}

/// Runner that spawns the executable on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    #[instrument(skip_all, fields(program = %command.program, workdir = %command.work_dir.display()))]
    async fn run(
        &self,
        cancel: &CancellationToken,
        command: &CliCommand,
    ) -> Result<String, ExecFailure> {
        info!(args = command.args.len(), "starting backend process");
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if !command.work_dir.as_os_str().is_empty() {
            cmd.current_dir(&command.work_dir);
        }
        let limits = ExecLimits {
            timeout: command.timeout,
            ..ExecLimits::default()
        };
        let output = run_command(
            cmd,
            &command.program,
            command.stdin.as_deref().map(str::as_bytes),
            limits,
            cancel,
        )
        .await?;
        debug!("backend process completed successfully");
        Ok(output.combined())
    }
}

/// Runtime value, else configured value, else `fallback` (all trimmed).
pub fn resolve_policy(runtime: &str, configured: &str, fallback: &str) -> String {
    [runtime, configured]
        .into_iter()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Model to pass to the backend, or `None` to let it pick its own default.
///
/// A runtime value of `default` defers to the configured model.
pub fn resolve_model(runtime: &str, configured: &str) -> Option<String> {
    [runtime, configured]
        .into_iter()
        .map(str::trim)
        .find(|model| !model.is_empty() && *model != "default")
        .map(str::to_string)
}
