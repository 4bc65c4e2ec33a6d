//! Helpers for running backend child processes with cancellation, an optional
//! deadline, and bounded output capture.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl CommandOutput {
    /// Trimmed stdout followed by trimmed stderr, skipping empty streams.
    pub fn combined(&self) -> String {
        [&self.stdout, &self.stderr]
            .into_iter()
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Why a child process run did not produce a successful exit.
#[derive(Debug, Error)]
pub enum ExecFailure {
    #[error("cancelled")]
    Cancelled,
    #[error("{program} deadline exceeded after {timeout:?}")]
    DeadlineExceeded { program: String, timeout: Duration },
    #[error("{program}: executable file not found")]
    NotFound {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {}{}", exit_label(.code), output_suffix(.output))]
    Exit {
        program: String,
        code: Option<i32>,
        output: String,
    },
    #[error("{program} i/o: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

fn output_suffix(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(": {output}")
    }
}

/// Limits applied to a single child process run.
#[derive(Debug, Clone, Copy)]
pub struct ExecLimits {
    /// Kill the child once this much wall-clock time has elapsed.
    pub timeout: Option<Duration>,
    /// Bytes of stdout/stderr kept in memory; the rest is drained and counted.
    pub output_limit_bytes: usize,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            timeout: None,
            output_limit_bytes: 100_000,
        }
    }
}

enum Waited {
    Exited(io::Result<ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

/// Run `cmd` to completion and capture its output.
///
/// The child is killed when `cancel` fires or the deadline passes. A non-zero
/// exit is reported as [`ExecFailure::Exit`] carrying the combined output.
#[instrument(skip_all, fields(program = %program, output_limit_bytes = limits.output_limit_bytes))]
pub async fn run_command(
    mut cmd: Command,
    program: &str,
    stdin: Option<&[u8]>,
    limits: ExecLimits,
    cancel: &CancellationToken,
) -> Result<CommandOutput, ExecFailure> {
    if cancel.is_cancelled() {
        return Err(ExecFailure::Cancelled);
    }
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("spawning child process");
    let mut child = cmd.spawn().map_err(|source| {
        error!(err = %source, "failed to spawn command");
        if source.kind() == io::ErrorKind::NotFound {
            ExecFailure::NotFound {
                program: program.to_string(),
                source,
            }
        } else {
            ExecFailure::Spawn {
                program: program.to_string(),
                source,
            }
        }
    })?;

    let io_failure = |source: io::Error| ExecFailure::Io {
        program: program.to_string(),
        source,
    };

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| io_failure(io::Error::other("stdin was not piped")))?;
            let input = input.to_vec();
            Some(tokio::spawn(async move {
                child_stdin.write_all(&input).await?;
                child_stdin.shutdown().await
            }))
        }
        None => None,
    };
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io_failure(io::Error::other("stdout was not piped")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io_failure(io::Error::other("stderr was not piped")))?;
    let stdout_handle = tokio::spawn(read_stream_limited(stdout, limits.output_limit_bytes));
    let stderr_handle = tokio::spawn(read_stream_limited(stderr, limits.output_limit_bytes));

    let waited = tokio::select! {
        biased;
        _ = cancel.cancelled() => Waited::Cancelled,
        waited = wait_with_deadline(&mut child, limits.timeout) => waited,
    };

    let status = match waited {
        Waited::Exited(status) => status.map_err(io_failure)?,
        Waited::Cancelled => {
            warn!("cancellation requested, killing child");
            kill_quietly(&mut child).await;
            return Err(ExecFailure::Cancelled);
        }
        Waited::TimedOut(timeout) => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            kill_quietly(&mut child).await;
            return Err(ExecFailure::DeadlineExceeded {
                program: program.to_string(),
                timeout,
            });
        }
    };

    if let Some(handle) = stdin_handle {
        // A child that exits without draining stdin yields a broken pipe; the
        // exit status is what matters.
        if let Ok(Err(err)) = handle.await {
            debug!(err = %err, "stdin write did not complete");
        }
    }
    let (stdout, stdout_truncated) = join_output(stdout_handle).await.map_err(io_failure)?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).await.map_err(io_failure)?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let output = CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
    };
    debug!(exit_code = ?status.code(), "command finished");
    if !status.success() {
        return Err(ExecFailure::Exit {
            program: program.to_string(),
            code: status.code(),
            output: output.combined(),
        });
    }
    Ok(output)
}

async fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> Waited {
    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => Waited::Exited(status),
            Err(_) => Waited::TimedOut(timeout),
        },
        None => Waited::Exited(child.wait().await),
    }
}

async fn kill_quietly(child: &mut Child) {
    if let Err(err) = child.kill().await {
        warn!(err = %err, "failed to kill child");
    }
}

async fn join_output(handle: JoinHandle<io::Result<(Vec<u8>, usize)>>) -> io::Result<(Vec<u8>, usize)> {
    match handle.await {
        Ok(result) => result,
        Err(_) => Err(io::Error::other("output reader task panicked")),
    }
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
