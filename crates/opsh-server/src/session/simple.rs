//! Batch execution with captured output.
//!
//! The command runs through the shell with stderr folded into the same sink
//! as stdout. One drain task moves lines into the sink, waits for the exit
//! code, writes the footer, notifies the transport, and removes the
//! registry entry.

use crate::session::registry::SessionRegistry;
use crate::session::sink::OutputSink;
use opsh_core::{OpshError, OpshResult, SessionNotifier};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, error, info};

/// A spawned batch command, not yet draining.
pub struct SpawnedSimple {
    child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    pub pid: u32,
}

impl SpawnedSimple {
    /// Kill the child after a launch that fails post-spawn. The runtime
    /// reaps the dropped child in the background.
    pub fn abort(mut self) {
        let _ = self.child.start_kill();
    }
}

/// Spawn `command` through the shell with both output streams piped.
///
/// Failure surfaces here, synchronously; nothing is registered yet.
pub fn spawn(command: &str) -> OpshResult<SpawnedSimple> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| OpshError::SpawnFailed(e.to_string()))?;

    let pid = child
        .id()
        .ok_or_else(|| OpshError::SpawnFailed("child exited during startup".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| OpshError::SpawnFailed("stdout pipe missing".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| OpshError::SpawnFailed("stderr pipe missing".into()))?;

    info!(pid, command, "batch command spawned");
    Ok(SpawnedSimple {
        child,
        stdout,
        stderr,
        pid,
    })
}

/// Start the drain routine for a spawned batch command.
///
/// Runs until both streams hit end-of-stream, then reaps the child for its
/// exit code, appends the footer, removes `owner` from the registry, and
/// fires `session_finished`. The removal is the authoritative "session
/// ended" signal; a stop may have raced it, and both sides tolerate that.
///
/// Stdout and stderr are separate pipes interleaved in read order here,
/// which can differ from the order a single merged descriptor would
/// preserve; within each stream, order is exact.
pub fn drain(
    spawned: SpawnedSimple,
    sink: OutputSink,
    owner: String,
    registry: Arc<SessionRegistry>,
    notifier: Arc<dyn SessionNotifier>,
) {
    tokio::spawn(async move {
        let SpawnedSimple {
            mut child,
            stdout,
            stderr,
            pid,
        } = spawned;
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let (mut out_done, mut err_done) = (false, false);

        // Both streams funnel through this one task, so sink appends stay
        // strictly ordered (single writer).
        while !(out_done && err_done) {
            tokio::select! {
                line = out_lines.next_line(), if !out_done => match line {
                    Ok(Some(line)) => sink.append_line(&line).await,
                    Ok(None) => out_done = true,
                    Err(e) => {
                        debug!(pid, error = %e, "stdout stream ended");
                        out_done = true;
                    }
                },
                line = err_lines.next_line(), if !err_done => match line {
                    Ok(Some(line)) => sink.append_line(&line).await,
                    Ok(None) => err_done = true,
                    Err(e) => {
                        debug!(pid, error = %e, "stderr stream ended");
                        err_done = true;
                    }
                },
            }
        }

        let code = match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                error!(pid, error = %e, "wait for batch command failed");
                -1
            }
        };

        sink.append_footer(code).await;
        info!(owner = %owner, pid, exit_code = code, "batch command finished");

        registry.remove_matching(&owner, pid).await;
        notifier.session_finished(code);
    });
}
