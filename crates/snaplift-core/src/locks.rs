//! Keyed exclusive locking over local snapshot paths.
//!
//! Multiple cluster jobs can target the same tablet, so every loader
//! operation takes the path lock before reading, mutating, or deleting a
//! local snapshot directory. This registry is the only synchronization the
//! transfer engine owns; it is injected rather than global so tests stay
//! isolated.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};

#[derive(Default)]
pub struct LocalSnapshotLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LocalSnapshotLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block until the exclusive lock on `path` is available, then take it.
    ///
    /// Distinct paths do not contend. The returned guard releases on drop,
    /// including during unwind.
    pub fn acquire(self: &Arc<Self>, path: &str) -> SnapshotPathGuard {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while !held.insert(path.to_owned()) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        SnapshotPathGuard {
            registry: Arc::clone(self),
            path: path.to_owned(),
        }
    }
}

/// Exclusive hold on one local snapshot path.
pub struct SnapshotPathGuard {
    registry: Arc<LocalSnapshotLocks>,
    path: String,
}

impl Drop for SnapshotPathGuard {
    fn drop(&mut self) {
        let mut held = self
            .registry
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        held.remove(&self.path);
        self.registry.released.notify_all();
    }
}
