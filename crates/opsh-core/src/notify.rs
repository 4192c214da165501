//! Callbacks into the control-channel transport.

/// Receives session lifecycle notifications.
///
/// Implemented by the transport layer that talks to the operator. Both
/// callbacks must tolerate arriving for a session the operator already
/// stopped: implementations are free to drop them.
pub trait SessionNotifier: Send + Sync + 'static {
    /// An interactive session spawned; streaming is about to begin.
    fn session_started(&self, pid: u32);

    /// A batch session ran to completion with the given exit code.
    fn session_finished(&self, exit_code: i32);
}

/// Notifier that drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl SessionNotifier for NullNotifier {
    fn session_started(&self, _pid: u32) {}
    fn session_finished(&self, _exit_code: i32) {}
}
