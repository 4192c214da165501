//! Pseudo-terminal execution.
//!
//! Commands that expect a live terminal get a portable-pty master/slave
//! pair: the child owns the slave for all three standard streams, the
//! parent keeps only the master. A dedicated thread performs the blocking
//! master reads and forwards chunks over a channel; the async drain loop
//! waits on that channel with a bounded timeout so it observes child exit
//! within one interval even when no output arrives.

use crate::session::registry::SessionRegistry;
use crate::session::sink::OutputSink;
use opsh_core::{OpshError, OpshResult};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Read granularity for the master end.
pub const READ_CHUNK: usize = 4096;

/// A spawned interactive command, not yet draining.
pub struct SpawnedPty {
    child: Box<dyn Child + Send + Sync>,
    master: Box<dyn MasterPty + Send>,
    reader: Box<dyn Read + Send>,
    pub pid: u32,
}

impl SpawnedPty {
    /// Kill the child and reap it off the async path.
    ///
    /// For launches that fail after the spawn already happened: with no
    /// drain routine to wait on the child, dropping the handle alone would
    /// leave it unreaped for the daemon's lifetime.
    pub fn abort(self) {
        let mut child = self.child;
        tokio::task::spawn_blocking(move || {
            let _ = child.kill();
            let _ = child.wait();
        });
    }
}

/// Allocate a PTY and spawn `command` through the shell on its slave end.
///
/// The parent's copy of the slave closes on return; the child owns it from
/// then on, and the parent retains only the master.
pub fn spawn(command: &str, rows: u16, cols: u16) -> OpshResult<SpawnedPty> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| OpshError::SpawnFailed(format!("failed to open PTY: {e}")))?;

    let mut cmd = CommandBuilder::new("sh");
    cmd.arg("-c");
    cmd.arg(command);
    cmd.env("TERM", "xterm-256color");

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| OpshError::SpawnFailed(format!("failed to spawn command: {e}")))?;
    drop(pair.slave);

    let pid = child
        .process_id()
        .ok_or_else(|| OpshError::SpawnFailed("PTY child has no pid".into()))?;

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| OpshError::SpawnFailed(format!("failed to clone PTY reader: {e}")))?;

    info!(pid, command, "interactive command spawned on PTY");
    Ok(SpawnedPty {
        child,
        master: pair.master,
        reader,
        pid,
    })
}

/// Start the drain routine for a spawned interactive command.
///
/// The loop ends on a zero-length read (far end closed) or when a quiet
/// poll interval finds the child exited. It then closes the master end and
/// removes `owner` from the registry. No exit-code footer in this mode:
/// interactive targets are usually killed rather than exiting cleanly.
pub fn drain(
    spawned: SpawnedPty,
    sink: OutputSink,
    owner: String,
    poll_interval: Duration,
    registry: Arc<SessionRegistry>,
) {
    tokio::spawn(async move {
        let SpawnedPty {
            mut child,
            master,
            reader,
            pid,
        } = spawned;

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(32);

        // Blocking reads live on their own thread; chunks cross back over
        // the channel. An empty chunk marks end-of-stream. The master read
        // fails with EIO once the child side closes, which counts too.
        std::thread::spawn(move || {
            let mut reader = reader;
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        let _ = tx.blocking_send(Vec::new());
                        break;
                    }
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(pid, error = %e, "PTY master read ended");
                        let _ = tx.blocking_send(Vec::new());
                        break;
                    }
                }
            }
        });

        loop {
            match timeout(poll_interval, rx.recv()).await {
                Ok(Some(chunk)) if chunk.is_empty() => {
                    debug!(pid, "PTY stream closed");
                    break;
                }
                Ok(Some(chunk)) => {
                    // Raw terminal bytes; undecodable sequences are
                    // replaced, never fatal.
                    let text = String::from_utf8_lossy(&chunk);
                    sink.append(text.as_bytes()).await;
                }
                Ok(None) => break,
                Err(_) => {
                    // Quiet interval: probe for child exit.
                    match child.try_wait() {
                        Ok(Some(status)) => {
                            debug!(pid, code = status.exit_code(), "PTY child exited");
                            break;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(pid, error = %e, "PTY child status check failed");
                            break;
                        }
                    }
                }
            }
        }

        // Close our end of the terminal, then reap without blocking the
        // cleanup path (the child may outlive its closed output stream).
        drop(master);
        drop(rx);
        tokio::task::spawn_blocking(move || {
            let _ = child.wait();
        });

        info!(owner = %owner, pid, "interactive session ended");
        registry.remove_matching(&owner, pid).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::process::ProcessHandle;

    #[tokio::test]
    async fn abort_kills_and_reaps_the_child() {
        let spawned = spawn("sleep 30", 24, 80).unwrap();
        let handle = ProcessHandle::new(spawned.pid);
        assert!(handle.is_alive());

        spawned.abort();

        // A killed-but-unreaped child would still probe alive as a zombie;
        // only the reap makes the pid go away.
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.is_alive() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("PTY child was not reaped");
    }
}
