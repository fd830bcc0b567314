//! Per-key mutual exclusion for logical resources.
//!
//! A [`LockManager`] hands out [`ScopedLock`]s keyed by
//! `(project_id, resource)`. Holding a lock excludes every other holder of
//! the same key; distinct keys never contend. The lock is released when the
//! [`ScopedLock`] is dropped, which covers success, error, and cancellation
//! alike.
//!
//! The manager is explicit process state: build one at startup, share it as
//! `Arc<LockManager>`, and drop it at shutdown. Idle keys are evicted from
//! the table as soon as nobody holds or waits on them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Identifies a lockable, persistable document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey {
    pub project_id: String,
    pub resource: String,
}

impl LockKey {
    pub fn new(project_id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.resource)
    }
}

/// Errors from lock acquisition.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock on {key}")]
    Timeout { key: LockKey, waited: Duration },
}

type LockTable = Arc<StdMutex<HashMap<LockKey, Arc<Mutex<()>>>>>;

/// Table of per-key async mutexes.
#[derive(Debug, Default)]
pub struct LockManager {
    table: LockTable,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`.
    ///
    /// With `timeout = None` this waits indefinitely. Otherwise it fails
    /// with [`LockError::Timeout`] once `timeout` elapses. Acquiring a key
    /// the caller already holds deadlocks; callers must not nest.
    pub async fn acquire(
        &self,
        key: LockKey,
        timeout: Option<Duration>,
    ) -> Result<ScopedLock, LockError> {
        let mutex = {
            let mut table = lock_table(&self.table);
            evict_idle(&mut table);
            Arc::clone(table.entry(key.clone()).or_default())
        };

        let guard = match timeout {
            None => mutex.lock_owned().await,
            Some(limit) => match tokio::time::timeout(limit, mutex.lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    evict_idle(&mut lock_table(&self.table));
                    return Err(LockError::Timeout { key, waited: limit });
                }
            },
        };

        trace!(%key, "lock acquired");
        Ok(ScopedLock {
            guard: Some(guard),
            key,
            table: Arc::clone(&self.table),
        })
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        let mut table = lock_table(&self.table);
        evict_idle(&mut table);
        table.len()
    }

    /// Return `true` if no key is held or waited on.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proof of exclusive access to one key. Releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ScopedLock {
    guard: Option<OwnedMutexGuard<()>>,
    key: LockKey,
    table: LockTable,
}

impl ScopedLock {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl fmt::Debug for ScopedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedLock").field("key", &self.key).finish()
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = lock_table(&self.table);
        // Only the table still references the mutex: no holder, no waiter.
        if table
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            table.remove(&self.key);
        }
        trace!(key = %self.key, "lock released");
    }
}

fn lock_table(
    table: &StdMutex<HashMap<LockKey, Arc<Mutex<()>>>>,
) -> StdMutexGuard<'_, HashMap<LockKey, Arc<Mutex<()>>>> {
    // The table is never left half-updated, so a poisoned guard is still usable.
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drop entries left behind by waiters that gave up (timeout or cancellation).
fn evict_idle(table: &mut HashMap<LockKey, Arc<Mutex<()>>>) {
    table.retain(|_, mutex| Arc::strong_count(mutex) > 1);
}
