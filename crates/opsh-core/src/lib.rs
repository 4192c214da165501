//! opsh-core: shared types for the opsh session daemon.
//!
//! Holds the error taxonomy, the command-classification policy, and the
//! notifier trait that the control-channel transport implements to receive
//! session lifecycle callbacks.

pub mod classify;
pub mod error;
pub mod notify;

// Re-export commonly used items at crate root.
pub use classify::{Classifier, CommandKind, DEFAULT_INTERACTIVE_KEYWORDS};
pub use error::{OpshError, OpshResult};
pub use notify::{NullNotifier, SessionNotifier};
