//! Cancellable subprocess execution

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::deploy::stream::LineSink;
use crate::errors::{OrchestratorError, Result};

/// Output of a completed command
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

fn describe(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    std::iter::once(std_cmd.get_program())
        .chain(std_cmd.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn spawn(cmd: &mut Command, stdin_null: bool) -> Result<Child> {
    if stdin_null {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            OrchestratorError::RuntimeOperationFailed(format!(
                "failed to run {}: {}",
                describe(cmd),
                e
            ))
        })
}

async fn kill(child: &mut Child, what: &str) {
    debug!(command = what, "canceled, killing subprocess");
    if let Err(e) = child.kill().await {
        warn!(command = what, "failed to kill subprocess: {}", e);
    }
}

fn check_status(status: ExitStatus, what: &str, stderr: &str) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let detail = stderr.trim();
    Err(OrchestratorError::RuntimeOperationFailed(if detail.is_empty() {
        format!("{} exited with {}", what, status)
    } else {
        format!("{} exited with {}: {}", what, status, detail)
    }))
}

/// Run `cmd`, forwarding stdout and stderr lines to `sink` as they arrive.
/// The child is killed if `cancel` fires.
pub async fn run_streaming(
    mut cmd: Command,
    sink: &dyn LineSink,
    cancel: &CancellationToken,
) -> Result<()> {
    let what = describe(&cmd);
    debug!(command = %what, "running");
    let mut child = spawn(&mut cmd, true)?;

    let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
    let mut last_stderr = String::new();

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            _ = cancel.cancelled() => {
                kill(&mut child, &what).await;
                return Err(OrchestratorError::OperationCanceled);
            }
            line = async { stdout.as_mut()?.next_line().await.transpose() }, if stdout.is_some() => {
                match line {
                    Some(Ok(line)) => sink.line(line).await,
                    Some(Err(e)) => {
                        warn!(command = %what, "stdout read failed: {}", e);
                        stdout = None;
                    }
                    None => stdout = None,
                }
            }
            line = async { stderr.as_mut()?.next_line().await.transpose() }, if stderr.is_some() => {
                match line {
                    Some(Ok(line)) => {
                        last_stderr.clone_from(&line);
                        sink.line(line).await;
                    }
                    Some(Err(e)) => {
                        warn!(command = %what, "stderr read failed: {}", e);
                        stderr = None;
                    }
                    None => stderr = None,
                }
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            kill(&mut child, &what).await;
            return Err(OrchestratorError::OperationCanceled);
        }
        status = child.wait() => status?,
    };
    check_status(status, &what, &last_stderr)
}

/// Run `cmd` to completion and capture its output. The child is killed if
/// `cancel` fires.
pub async fn run_captured(mut cmd: Command, cancel: &CancellationToken) -> Result<Captured> {
    let what = describe(&cmd);
    debug!(command = %what, "running");
    let mut child = spawn(&mut cmd, true)?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let collect = async {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let read_stdout = async {
            match stdout_pipe.as_mut() {
                Some(pipe) => pipe.read_to_string(&mut stdout).await.map(|_| ()),
                None => Ok(()),
            }
        };
        let read_stderr = async {
            match stderr_pipe.as_mut() {
                Some(pipe) => pipe.read_to_string(&mut stderr).await.map(|_| ()),
                None => Ok(()),
            }
        };
        let (out, err) = tokio::join!(read_stdout, read_stderr);
        out?;
        err?;
        Ok::<_, std::io::Error>(Captured { stdout, stderr })
    };

    let captured = tokio::select! {
        _ = cancel.cancelled() => None,
        captured = collect => Some(captured?),
    };
    let Some(captured) = captured else {
        kill(&mut child, &what).await;
        return Err(OrchestratorError::OperationCanceled);
    };

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            kill(&mut child, &what).await;
            return Err(OrchestratorError::OperationCanceled);
        }
        status = child.wait() => status?,
    };
    check_status(status, &what, &captured.stderr)?;
    Ok(captured)
}
