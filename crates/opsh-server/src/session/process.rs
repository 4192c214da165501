//! Signal-level handle to a spawned child.
//!
//! Each drain routine keeps ownership of its real child handle; control
//! operations only ever need the pid: a signal-0 probe for liveness and
//! SIGTERM/SIGKILL for the stop escalation.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

#[derive(Debug, Clone, Copy)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Non-blocking liveness probe (signal 0).
    ///
    /// A child that exited but has not been reaped by its drain routine yet
    /// still probes alive; the drain notices within one poll interval.
    pub fn is_alive(&self) -> bool {
        kill(self.as_pid(), None).is_ok()
    }

    /// Ask the process to exit (SIGTERM). Returns false if it was already
    /// gone.
    pub fn terminate(&self) -> bool {
        kill(self.as_pid(), Signal::SIGTERM).is_ok()
    }

    /// Force-kill the process (SIGKILL).
    pub fn kill(&self) -> bool {
        kill(self.as_pid(), Signal::SIGKILL).is_ok()
    }

    fn as_pid(&self) -> Pid {
        Pid::from_raw(self.pid as i32)
    }
}
