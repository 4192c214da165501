//! Session bookkeeping.
//!
//! One mutual-exclusion domain guarding the operator -> session map. The
//! lock is held only across map operations, never across a spawn, a read,
//! or a process wait. `try_acquire` reserves the operator's slot before the
//! spawn happens, so two racing launches can never both get past the gate;
//! the slot is upgraded by `put` once the child is running, or dropped
//! again by `release` if the spawn fails.

use crate::session::process::ProcessHandle;
use opsh_core::CommandKind;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// One live (or just-ended, not-yet-cleaned) command execution.
#[derive(Debug, Clone)]
pub struct Session {
    pub owner: String,
    pub handle: ProcessHandle,
    pub mode: CommandKind,
    pub output_path: PathBuf,
    pub started_at: SystemTime,
}

enum Slot {
    /// Owner passed the launch gate; the child is not spawned yet.
    Reserved,
    Active(Session),
}

/// Registry of live sessions, at most one per operator.
#[derive(Default)]
pub struct SessionRegistry {
    slots: RwLock<HashMap<String, Slot>>,
    /// Last sink path per operator. Survives session removal so output
    /// stays retrievable until the next launch replaces it.
    last_output: RwLock<HashMap<String, PathBuf>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the owner's slot. Returns false if a session (or an
    /// in-flight launch) already holds it.
    pub async fn try_acquire(&self, owner: &str) -> bool {
        let mut slots = self.slots.write().await;
        match slots.entry(owner.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(Slot::Reserved);
                true
            }
        }
    }

    /// Fill a reserved slot with the running session.
    pub async fn put(&self, session: Session) {
        let owner = session.owner.clone();
        self.last_output
            .write()
            .await
            .insert(owner.clone(), session.output_path.clone());
        let mut slots = self.slots.write().await;
        info!(
            owner = %owner,
            pid = session.handle.pid(),
            mode = %session.mode,
            "session registered"
        );
        slots.insert(owner, Slot::Active(session));
    }

    /// Snapshot of the owner's live session, if any.
    pub async fn get(&self, owner: &str) -> Option<Session> {
        let slots = self.slots.read().await;
        match slots.get(owner) {
            Some(Slot::Active(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Remove the owner's entry. Idempotent: the stop path and the drain
    /// routine may both get here, and the loser must be a no-op.
    pub async fn remove(&self, owner: &str) {
        let mut slots = self.slots.write().await;
        if slots.remove(owner).is_some() {
            info!(owner = %owner, "session removed");
        } else {
            debug!(owner = %owner, "session already cleaned up");
        }
    }

    /// Remove the owner's entry only if it still belongs to the given pid.
    ///
    /// Drain routines clean up through this, so a stale cleanup racing a
    /// stop-then-relaunch can never evict the successor session.
    pub async fn remove_matching(&self, owner: &str, pid: u32) {
        let mut slots = self.slots.write().await;
        match slots.get(owner) {
            Some(Slot::Active(s)) if s.handle.pid() == pid => {
                slots.remove(owner);
                info!(owner = %owner, pid, "session removed");
            }
            _ => debug!(owner = %owner, pid, "session already cleaned up"),
        }
    }

    /// Drop a reservation after a failed spawn.
    pub async fn release(&self, owner: &str) {
        self.slots.write().await.remove(owner);
    }

    /// Path of the most recent launch's sink for this owner, live or not.
    pub async fn last_output(&self, owner: &str) -> Option<PathBuf> {
        self.last_output.read().await.get(owner).cloned()
    }
}
