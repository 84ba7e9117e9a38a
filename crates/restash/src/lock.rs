// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Distributed mutual exclusion built on the backend's `add` primitive.
//!
//! A lock is an ordinary cache record under a reserved key
//! (`"{key}-lock"`) whose TTL is the lease. Whoever wins the atomic
//! insert-if-absent holds the lock; the lease bounds how long a crashed or
//! stalled holder can keep it.
//!
//! Losing callers do not spin against the backend. They make their one `add`
//! attempt, then park on an in-process notification until the holder releases
//! (or the lease runs out), and proceed *without* ownership — the caller's
//! double-checked read inside the critical section is what preserves
//! correctness. Cross-process waiters see no notification and simply wait out
//! the lease, the same bound a crashed holder decays under.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use restash_backend::{BackendOps, CacheBackend, Error};

/// Reserved suffix appended to the protected key to name its lock record.
///
/// Application keys ending in this suffix would share the lock's keyspace;
/// the convention is documented rather than enforced.
pub const LOCK_SUFFIX: &str = "-lock";

type WaiterMap = Arc<Mutex<HashMap<String, Arc<Notify>>>>;

/// A distributed lock over one backend.
///
/// One instance serves any number of keys; per-key state lives in the backend
/// (the lock record) and in an in-process waiter registry used to wake
/// parked losers early on release.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use restash::{MemoryBackend, RedLock};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let lock = RedLock::new(MemoryBackend::new());
///
/// let guard = lock.acquire("report", Duration::from_secs(2)).await;
/// assert!(guard.is_owned());
/// // ... critical section ...
/// let released = guard.release().await;
/// assert!(released);
/// # }
/// ```
#[derive(Debug)]
pub struct RedLock<B> {
    backend: B,
    waiters: WaiterMap,
}

impl<B> RedLock<B>
where
    B: CacheBackend + Clone + Send + Sync + 'static,
{
    /// Creates a lock manager over the given backend.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            waiters: Arc::default(),
        }
    }

    /// Renders the lock record's key for a protected key.
    #[must_use]
    pub fn lock_key(key: &str) -> String {
        format!("{key}{LOCK_SUFFIX}")
    }

    /// Attempts to take the lock for `key`, waiting at most `lease` when it is
    /// contended.
    ///
    /// Always returns a guard. [`LockGuard::is_owned`] distinguishes the
    /// winner from callers that waited and proceeded without ownership.
    /// Backend failures (other than the collision signal) degrade to an
    /// unowned guard: mutual exclusion is best-effort and must not make the
    /// caller less available.
    pub async fn acquire(&self, key: &str, lease: Duration) -> LockGuard<B> {
        let lock_key = Self::lock_key(key);
        let token = Uuid::new_v4().to_string();

        let attempt = async {
            let mut conn = self.backend.acquire().await?;
            conn.add(&lock_key, Bytes::from(token.clone()), Some(lease)).await
        }
        .await;

        let owned = match attempt {
            Ok(()) => {
                self.waiters
                    .lock()
                    .entry(lock_key.clone())
                    .or_insert_with(|| Arc::new(Notify::new()));
                true
            }
            Err(Error::KeyAlreadyExists { .. }) => {
                let notify = self.waiters.lock().get(&lock_key).cloned();
                if let Some(notify) = notify {
                    let _ = tokio::time::timeout(lease, notify.notified()).await;
                }
                false
            }
            Err(error) => {
                tracing::warn!(key = lock_key.as_str(), %error, "lock acquire failed; proceeding without mutual exclusion");
                false
            }
        };

        LockGuard {
            backend: self.backend.clone(),
            waiters: Arc::clone(&self.waiters),
            key: lock_key,
            token,
            owned,
            released: false,
        }
    }
}

/// Deletes the lock record if it is still ours, and wakes parked waiters.
///
/// The ownership check is read-then-delete through one leased connection:
/// best-effort, not atomic. A record that expired and was re-acquired by
/// someone else carries their token and survives.
async fn release_record<B>(backend: &B, waiters: &WaiterMap, key: &str, token: &str) -> bool
where
    B: CacheBackend,
{
    let outcome = async {
        let mut conn = backend.acquire().await?;
        match conn.get(key).await? {
            Some(current) if current.as_ref() == token.as_bytes() => conn.delete(key).await,
            _ => Ok(false),
        }
    }
    .await;

    match outcome {
        Ok(true) => {
            if let Some(notify) = waiters.lock().remove(key) {
                notify.notify_waiters();
            }
            true
        }
        Ok(false) => false,
        Err(error) => {
            tracing::warn!(key, %error, "lock release failed; the lease will reclaim the record");
            false
        }
    }
}

/// Guard for one acquisition attempt.
///
/// Release it explicitly to observe the outcome. A guard dropped without an
/// explicit release (a cancelled caller, an early return) spawns the release
/// as a detached task, so an owned lock never waits out its full lease just
/// because the holder went away.
#[derive(Debug)]
pub struct LockGuard<B>
where
    B: CacheBackend + Clone + Send + Sync + 'static,
{
    backend: B,
    waiters: WaiterMap,
    key: String,
    token: String,
    owned: bool,
    released: bool,
}

impl<B> LockGuard<B>
where
    B: CacheBackend + Clone + Send + Sync + 'static,
{
    /// Returns whether this caller actually holds the lock.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Releases the lock record if still owned.
    ///
    /// Returns whether a record was removed. Unowned guards go through the
    /// same ownership check and report `false`; a lock whose lease already
    /// expired is simply gone and also reports `false`.
    pub async fn release(mut self) -> bool {
        self.released = true;
        release_record(&self.backend, &self.waiters, &self.key, &self.token).await
    }
}

impl<B> Drop for LockGuard<B>
where
    B: CacheBackend + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.released || !self.owned {
            return;
        }
        let backend = self.backend.clone();
        let waiters = Arc::clone(&self.waiters);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let _task = handle.spawn(async move {
                release_record(&backend, &waiters, &key, &token).await;
            });
        }
    }
}
