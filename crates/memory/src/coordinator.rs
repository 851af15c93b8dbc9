//! Background task exclusivity.
//!
//! Persistence and persona refresh run as detached tasks after a stream
//! completes. At most one such task may be in flight per key (user id) —
//! otherwise overlapping requests would double-write the same
//! conversation to the store. The key is released on every exit path,
//! including panics.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Clone, Default)]
pub struct TaskCoordinator {
    busy: Arc<Mutex<HashSet<String>>>,
}

/// Removes the key when the task finishes, aborts, or panics.
struct ReleaseGuard {
    busy: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl TaskCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` detached, unless a task for `key` is already in
    /// flight. Returns the join handle when spawned, `None` when the key
    /// was busy — callers treat `None` as "already being handled".
    pub fn run_exclusive<F>(&self, key: &str, task: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
            if !busy.insert(key.to_string()) {
                debug!(key, "Background task already in flight, skipping");
                return None;
            }
        }
        let guard = ReleaseGuard {
            busy: Arc::clone(&self.busy),
            key: key.to_string(),
        };
        Some(tokio::spawn(async move {
            let _guard = guard;
            task.await;
        }))
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}
