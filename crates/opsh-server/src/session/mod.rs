//! Process session management.
//!
//! Registry of live sessions, the two execution strategies (batch capture
//! and pseudo-terminal), and the per-launch output sinks they stream into.

pub mod process;
pub mod pty;
pub mod registry;
pub mod simple;
pub mod sink;
