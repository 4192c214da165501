//! The four operator-facing control operations.
//!
//! Thin orchestration over the registry and the two executors. None of
//! these block on a drain routine, and the registry lock is never held
//! across a spawn, a read, or a process wait.

use crate::config::DaemonConfig;
use crate::session::process::ProcessHandle;
use crate::session::registry::{Session, SessionRegistry};
use crate::session::sink::{self, OutputSink};
use crate::session::{pty, simple};
use opsh_core::{Classifier, CommandKind, OpshError, OpshResult, SessionNotifier};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

/// Snapshot returned by `status`.
#[derive(Debug, Clone, Copy)]
pub struct SessionStatus {
    pub pid: u32,
    pub alive: bool,
}

/// Result of a successful `launch`.
#[derive(Debug, Clone)]
pub struct Launched {
    pub pid: u32,
    pub mode: CommandKind,
    pub output_path: PathBuf,
}

pub struct SessionControl {
    registry: Arc<SessionRegistry>,
    classifier: Classifier,
    config: DaemonConfig,
}

impl SessionControl {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            classifier: Classifier::new(config.interactive_keywords.clone()),
            config,
        }
    }

    /// Launch `command` for `owner`.
    ///
    /// Returns as soon as the child is spawned and registered; streaming
    /// happens in the background. A second launch while one is active is
    /// rejected, never queued.
    pub async fn launch(
        &self,
        owner: &str,
        command: &str,
        notifier: Arc<dyn SessionNotifier>,
    ) -> OpshResult<Launched> {
        if !self.registry.try_acquire(owner).await {
            return Err(OpshError::AlreadyActive);
        }

        match self.launch_acquired(owner, command, notifier).await {
            Ok(launched) => Ok(launched),
            Err(e) => {
                self.registry.release(owner).await;
                Err(e)
            }
        }
    }

    /// `status(owner)`: pid and a non-blocking liveness probe.
    pub async fn status(&self, owner: &str) -> OpshResult<SessionStatus> {
        let session = self.registry.get(owner).await.ok_or(OpshError::NoSession)?;
        Ok(SessionStatus {
            pid: session.handle.pid(),
            alive: session.handle.is_alive(),
        })
    }

    /// `fetch_output(owner)`: full current contents of the owner's most
    /// recent sink, readable even after the session ended.
    pub async fn fetch_output(&self, owner: &str) -> OpshResult<Vec<u8>> {
        let path = self
            .registry
            .last_output(owner)
            .await
            .ok_or(OpshError::NoOutput)?;
        if !path.exists() {
            return Err(OpshError::NoOutput);
        }
        Ok(sink::read_output(&path).await?)
    }

    /// `stop(owner)`: SIGTERM, a short grace period, then SIGKILL if the
    /// process is still alive. The registry entry goes away here no matter
    /// what the drain routine does later, so the next launch is never gated
    /// on a slow-to-notice drain.
    pub async fn stop(&self, owner: &str) -> OpshResult<()> {
        let session = self.registry.get(owner).await.ok_or(OpshError::NoSession)?;
        let handle = session.handle;

        handle.terminate();
        tokio::time::sleep(self.config.grace_period).await;
        if handle.is_alive() {
            warn!(owner = %owner, pid = handle.pid(), "graceful stop timed out, killing");
            handle.kill();
        }

        self.registry.remove(owner).await;
        let uptime = session
            .started_at
            .elapsed()
            .map(|d| d.as_secs())
            .unwrap_or(0);
        info!(owner = %owner, pid = handle.pid(), uptime_secs = uptime, "session stopped");
        Ok(())
    }

    async fn launch_acquired(
        &self,
        owner: &str,
        command: &str,
        notifier: Arc<dyn SessionNotifier>,
    ) -> OpshResult<Launched> {
        let mode = self.classifier.classify(command);
        let output_path = self.config.next_output_path()?;

        match mode {
            CommandKind::Simple => {
                let spawned = simple::spawn(command)?;
                let pid = spawned.pid;
                // With the child already running and nothing to drain it, a
                // failed sink means the launch dies here and the child with it.
                let sink = match OutputSink::create(output_path.clone(), "EXECUTION", pid).await {
                    Ok(sink) => sink,
                    Err(e) => {
                        spawned.abort();
                        return Err(OpshError::Io(e));
                    }
                };
                self.register(owner, pid, mode, output_path.clone()).await;
                simple::drain(
                    spawned,
                    sink,
                    owner.to_string(),
                    self.registry.clone(),
                    notifier,
                );
                Ok(Launched {
                    pid,
                    mode,
                    output_path,
                })
            }
            CommandKind::Interactive => {
                let spawned = pty::spawn(command, self.config.pty_rows, self.config.pty_cols)?;
                let pid = spawned.pid;
                let sink = match OutputSink::create(output_path.clone(), "INTERACTIVE", pid).await
                {
                    Ok(sink) => sink,
                    Err(e) => {
                        spawned.abort();
                        return Err(OpshError::Io(e));
                    }
                };
                self.register(owner, pid, mode, output_path.clone()).await;
                // "Session started" goes out before any output can arrive.
                notifier.session_started(pid);
                pty::drain(
                    spawned,
                    sink,
                    owner.to_string(),
                    self.config.poll_interval,
                    self.registry.clone(),
                );
                Ok(Launched {
                    pid,
                    mode,
                    output_path,
                })
            }
        }
    }

    async fn register(&self, owner: &str, pid: u32, mode: CommandKind, output_path: PathBuf) {
        self.registry
            .put(Session {
                owner: owner.to_string(),
                handle: ProcessHandle::new(pid),
                mode,
                output_path,
                started_at: SystemTime::now(),
            })
            .await;
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, PartialEq)]
    enum Event {
        Started(u32),
        Finished(i32),
    }

    struct RecordingNotifier {
        tx: mpsc::UnboundedSender<Event>,
    }

    impl SessionNotifier for RecordingNotifier {
        fn session_started(&self, pid: u32) {
            let _ = self.tx.send(Event::Started(pid));
        }
        fn session_finished(&self, exit_code: i32) {
            let _ = self.tx.send(Event::Finished(exit_code));
        }
    }

    fn test_control(dir: &tempfile::TempDir) -> SessionControl {
        SessionControl::new(DaemonConfig {
            output_dir: dir.path().to_path_buf(),
            poll_interval: Duration::from_millis(100),
            grace_period: Duration::from_millis(200),
            ..DaemonConfig::default()
        })
    }

    fn make_notifier() -> (Arc<dyn SessionNotifier>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(RecordingNotifier { tx }), rx)
    }

    async fn wait_for_no_session(control: &SessionControl, owner: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if matches!(control.status(owner).await, Err(OpshError::NoSession)) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("session did not end in time");
    }

    #[tokio::test]
    async fn batch_command_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let control = test_control(&dir);
        let (notifier, mut events) = make_notifier();

        let launched = control.launch("op", "echo hi", notifier).await.unwrap();
        assert_eq!(launched.mode, CommandKind::Simple);

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, Event::Finished(0));

        // Completion notification arrives after registry cleanup.
        assert!(matches!(
            control.status("op").await,
            Err(OpshError::NoSession)
        ));

        // Output survives the session's end.
        let output = String::from_utf8(control.fetch_output("op").await.unwrap()).unwrap();
        assert!(output.contains("hi\n"));
        assert!(output.contains("Exit Code: 0"));
    }

    #[tokio::test]
    async fn batch_command_merges_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let control = test_control(&dir);
        let (notifier, mut events) = make_notifier();

        control
            .launch("op", "echo out; echo err >&2; exit 3", notifier)
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, Event::Finished(3));

        let output = String::from_utf8(control.fetch_output("op").await.unwrap()).unwrap();
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
        assert!(output.contains("Exit Code: 3"));
    }

    #[tokio::test]
    async fn second_launch_is_rejected_while_active() {
        let dir = tempfile::tempdir().unwrap();
        let control = test_control(&dir);
        let (notifier, _events) = make_notifier();

        let first = control
            .launch("op", "sleep 30", notifier.clone())
            .await
            .unwrap();
        let second = control.launch("op", "echo hi", notifier).await;
        assert!(matches!(second, Err(OpshError::AlreadyActive)));

        // The first session is unaffected.
        let status = control.status("op").await.unwrap();
        assert_eq!(status.pid, first.pid);
        assert!(status.alive);

        control.stop("op").await.unwrap();
    }

    #[tokio::test]
    async fn stop_then_status_reports_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let control = test_control(&dir);
        let (notifier, _events) = make_notifier();

        control.launch("op", "sleep 30", notifier).await.unwrap();
        control.stop("op").await.unwrap();

        assert!(matches!(
            control.status("op").await,
            Err(OpshError::NoSession)
        ));
        // And the slot is free for the next launch.
        let (notifier, mut events) = make_notifier();
        control.launch("op", "echo again", notifier).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, Event::Finished(0));
    }

    #[tokio::test]
    async fn stop_without_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let control = test_control(&dir);
        assert!(matches!(
            control.stop("op").await,
            Err(OpshError::NoSession)
        ));
    }

    #[tokio::test]
    async fn fetch_output_without_launch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let control = test_control(&dir);
        assert!(matches!(
            control.fetch_output("op").await,
            Err(OpshError::NoOutput)
        ));
    }

    #[tokio::test]
    async fn interactive_command_streams_without_footer() {
        let dir = tempfile::tempdir().unwrap();
        let control = test_control(&dir);
        let (notifier, mut events) = make_notifier();

        // "watching" contains the "watch" keyword, so this takes the PTY
        // path even though it is a finite command.
        let launched = control
            .launch("op", "echo watching", notifier)
            .await
            .unwrap();
        assert_eq!(launched.mode, CommandKind::Interactive);

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, Event::Started(launched.pid));

        wait_for_no_session(&control, "op").await;

        let output = String::from_utf8(control.fetch_output("op").await.unwrap()).unwrap();
        assert!(output.starts_with("=== INTERACTIVE ===\n"));
        assert!(output.contains("watching"));
        // Deliberate asymmetry with batch mode.
        assert!(!output.contains("Exit Code"));
    }

    #[tokio::test]
    async fn interactive_output_is_fetchable_before_session_ends() {
        let dir = tempfile::tempdir().unwrap();
        let control = test_control(&dir);
        let (notifier, _events) = make_notifier();

        control
            .launch("op", "echo watching; sleep 30", notifier)
            .await
            .unwrap();

        // The header is written at launch, so output is non-empty while the
        // session is still running.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let output = control.fetch_output("op").await.unwrap();
                if String::from_utf8_lossy(&output).contains("watching") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("no output streamed while session was live");

        let status = control.status("op").await.unwrap();
        assert!(status.alive);

        control.stop("op").await.unwrap();
        wait_for_no_session(&control, "op").await;
    }

    #[tokio::test]
    async fn failed_launch_releases_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        // The output directory sits under a regular file, so it cannot be
        // created and the launch fails synchronously, registering nothing.
        let control = SessionControl::new(DaemonConfig {
            output_dir: blocker.join("out"),
            ..DaemonConfig::default()
        });
        let (notifier, _events) = make_notifier();
        let result = control.launch("op", "echo hi", notifier).await;
        assert!(matches!(result, Err(OpshError::Io(_))));
        assert!(matches!(
            control.status("op").await,
            Err(OpshError::NoSession)
        ));

        // The reservation is gone: once the directory is creatable, the
        // next launch goes through instead of hitting AlreadyActive.
        std::fs::remove_file(&blocker).unwrap();
        let (notifier, mut events) = make_notifier();
        control.launch("op", "echo hi", notifier).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, Event::Finished(0));
    }

    #[tokio::test]
    async fn sink_write_failure_does_not_kill_the_drain() {
        let dir = tempfile::tempdir().unwrap();
        let control = test_control(&dir);
        let (notifier, mut events) = make_notifier();

        let launched = control
            .launch("op", "sleep 1; echo hi", notifier)
            .await
            .unwrap();

        // Make every later append fail: a directory now sits where the
        // sink file was.
        std::fs::remove_file(&launched.output_path).unwrap();
        std::fs::create_dir(&launched.output_path).unwrap();

        // The drain routine logs the write failures but still obtains the
        // exit code, notifies, and cleans up.
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, Event::Finished(0));
        assert!(matches!(
            control.status("op").await,
            Err(OpshError::NoSession)
        ));
    }

    #[tokio::test]
    async fn stop_kills_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let control = test_control(&dir);
        let (notifier, _events) = make_notifier();

        let launched = control.launch("op", "sleep 30", notifier).await.unwrap();
        let handle = ProcessHandle::new(launched.pid);
        control.stop("op").await.unwrap();

        // The drain routine reaps the child shortly after the kill.
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.is_alive() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("process survived stop");
    }
}
