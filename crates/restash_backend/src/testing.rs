// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock backend for testing.
//!
//! This module provides [`MockBackend`], an in-memory backend that records
//! every operation and supports failure injection for exercising error paths.
//! Expiration is tracked with [`tokio::time::Instant`], so tests running under
//! a paused Tokio clock get deterministic lease and TTL behavior.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    backend::{BackendOps, CacheBackend},
    error::{Error, Result},
};

/// Recorded backend operation with full context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOp {
    /// A connection was leased.
    Acquire,
    /// A get was performed for the given key.
    Get(String),
    /// A set was performed.
    Set {
        /// The key that was written.
        key: String,
        /// The value that was written.
        value: Bytes,
        /// The time-to-live, if any.
        ttl: Option<Duration>,
    },
    /// A batch get was performed for the given keys.
    MultiGet(Vec<String>),
    /// A batch set was performed.
    MultiSet {
        /// The keys that were written, in order.
        keys: Vec<String>,
        /// The shared time-to-live, if any.
        ttl: Option<Duration>,
    },
    /// An insert-if-absent was attempted.
    Add {
        /// The key that was targeted.
        key: String,
        /// The value offered.
        value: Bytes,
        /// The time-to-live, if any.
        ttl: Option<Duration>,
    },
    /// A delete was performed for the given key.
    Delete(String),
    /// An existence check was performed for the given key.
    Exists(String),
    /// A time-to-live replacement was performed.
    Expire {
        /// The key that was targeted.
        key: String,
        /// The new time-to-live.
        ttl: Duration,
    },
    /// An increment was performed.
    Increment {
        /// The key that was targeted.
        key: String,
        /// The amount added.
        delta: i64,
    },
    /// A bulk delete was performed, optionally scoped to a key prefix.
    Clear(Option<String>),
    /// The backend was closed.
    Close,
}

type FailPredicate = Box<dyn Fn(&BackendOp) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

#[derive(Default)]
struct Shared {
    data: Mutex<HashMap<String, StoredEntry>>,
    operations: Mutex<Vec<BackendOp>>,
    fail_when: Mutex<Option<FailPredicate>>,
}

/// A configurable mock backend for testing.
///
/// Stores values in memory, records every operation for later verification,
/// and can be configured to fail operations on demand.
///
/// # Examples
///
/// ```
/// use restash_backend::{
///     testing::{BackendOp, MockBackend},
///     BackendOps, CacheBackend,
/// };
/// use bytes::Bytes;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> restash_backend::Result<()> {
/// let backend = MockBackend::new();
/// let mut conn = backend.acquire().await?;
///
/// conn.set("key", Bytes::from_static(b"42"), None).await?;
/// assert_eq!(conn.get("key").await?, Some(Bytes::from_static(b"42")));
///
/// // Every operation is recorded, including the lease itself.
/// assert!(matches!(backend.operations()[0], BackendOp::Acquire));
/// # Ok(())
/// # }
/// ```
///
/// # Failure injection
///
/// ```
/// use restash_backend::{
///     testing::{BackendOp, MockBackend},
///     BackendOps, CacheBackend,
/// };
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> restash_backend::Result<()> {
/// let backend = MockBackend::new();
/// backend.fail_when(|op| matches!(op, BackendOp::Get(_)));
///
/// let mut conn = backend.acquire().await?;
/// assert!(conn.get("key").await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("entries", &self.shared.data.lock().len())
            .field("operations", &self.shared.operations.lock().len())
            .field("fail_when", &self.shared.fail_when.lock().is_some())
            .finish()
    }
}

impl MockBackend {
    /// Creates a new empty mock backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock backend pre-populated with unexpiring raw values.
    #[must_use]
    pub fn with_data(data: impl IntoIterator<Item = (String, Bytes)>) -> Self {
        let backend = Self::new();
        {
            let mut map = backend.shared.data.lock();
            for (key, value) in data {
                map.insert(key, StoredEntry { value, expires_at: None });
            }
        }
        backend
    }

    /// Sets a predicate that determines which operations should fail.
    ///
    /// A failing operation is still recorded before the error is returned.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&BackendOp) -> bool + Send + Sync + 'static,
    {
        *self.shared.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate, allowing all operations to succeed.
    pub fn clear_failures(&self) {
        *self.shared.fail_when.lock() = None;
    }

    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<BackendOp> {
        self.shared.operations.lock().clone()
    }

    /// Clears all recorded operations.
    pub fn clear_operations(&self) {
        self.shared.operations.lock().clear();
    }

    /// Returns the number of stored records, counting expired ones not yet
    /// pruned.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.shared.data.lock().len()
    }

    /// Returns whether a live record exists under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.shared.data.lock().get(key).is_some_and(StoredEntry::live)
    }

    fn run(&self, op: BackendOp) -> Result<()> {
        let fail = self.shared.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        self.shared.operations.lock().push(op);
        if fail {
            return Err(Error::backend("mock: injected failure"));
        }
        Ok(())
    }

    fn live_value(&self, key: &str) -> Option<Bytes> {
        let mut map = self.shared.data.lock();
        match map.get(key) {
            Some(entry) if entry.live() => Some(entry.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }
}

fn deadline(ttl: Option<Duration>) -> Option<Instant> {
    match ttl {
        None | Some(Duration::ZERO) => None,
        Some(ttl) => Some(Instant::now() + ttl),
    }
}

impl CacheBackend for MockBackend {
    type Conn = MockConn;

    async fn acquire(&self) -> Result<Self::Conn> {
        self.run(BackendOp::Acquire)?;
        Ok(MockConn { backend: self.clone() })
    }

    async fn close(&self) -> Result<()> {
        self.run(BackendOp::Close)
    }
}

/// Leased connection handle of a [`MockBackend`].
///
/// The mock has no real pool; the handle shares the backend's storage.
#[derive(Debug)]
pub struct MockConn {
    backend: MockBackend,
}

impl BackendOps for MockConn {
    async fn get(&mut self, key: &str) -> Result<Option<Bytes>> {
        self.backend.run(BackendOp::Get(key.to_owned()))?;
        Ok(self.backend.live_value(key))
    }

    async fn set(&mut self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.backend.run(BackendOp::Set {
            key: key.to_owned(),
            value: value.clone(),
            ttl,
        })?;
        let entry = StoredEntry { value, expires_at: deadline(ttl) };
        self.backend.shared.data.lock().insert(key.to_owned(), entry);
        Ok(())
    }

    async fn multi_get(&mut self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        self.backend.run(BackendOp::MultiGet(keys.to_vec()))?;
        Ok(keys.iter().map(|key| self.backend.live_value(key)).collect())
    }

    async fn multi_set(&mut self, pairs: Vec<(String, Bytes)>, ttl: Option<Duration>) -> Result<()> {
        self.backend.run(BackendOp::MultiSet {
            keys: pairs.iter().map(|(key, _)| key.clone()).collect(),
            ttl,
        })?;
        let expires_at = deadline(ttl);
        let mut map = self.backend.shared.data.lock();
        for (key, value) in pairs {
            map.insert(key, StoredEntry { value, expires_at });
        }
        Ok(())
    }

    async fn add(&mut self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.backend.run(BackendOp::Add {
            key: key.to_owned(),
            value: value.clone(),
            ttl,
        })?;
        if self.backend.live_value(key).is_some() {
            return Err(Error::key_already_exists(key));
        }
        let entry = StoredEntry { value, expires_at: deadline(ttl) };
        self.backend.shared.data.lock().insert(key.to_owned(), entry);
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<bool> {
        self.backend.run(BackendOp::Delete(key.to_owned()))?;
        let removed = self.backend.shared.data.lock().remove(key);
        Ok(removed.is_some_and(|entry| entry.live()))
    }

    async fn exists(&mut self, key: &str) -> Result<bool> {
        self.backend.run(BackendOp::Exists(key.to_owned()))?;
        Ok(self.backend.live_value(key).is_some())
    }

    async fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        self.backend.run(BackendOp::Expire { key: key.to_owned(), ttl })?;
        let mut map = self.backend.shared.data.lock();
        match map.get_mut(key) {
            Some(entry) if entry.live() => {
                entry.expires_at = deadline(Some(ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment(&mut self, key: &str, delta: i64) -> Result<i64> {
        self.backend.run(BackendOp::Increment { key: key.to_owned(), delta })?;
        let mut map = self.backend.shared.data.lock();
        match map.get_mut(key).filter(|entry| entry.live()) {
            Some(entry) => {
                let current: i64 = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|text| text.trim().parse().ok())
                    .ok_or_else(|| Error::not_a_number(key))?;
                let next = current + delta;
                entry.value = Bytes::from(next.to_string());
                Ok(next)
            }
            None => {
                let entry = StoredEntry {
                    value: Bytes::from(delta.to_string()),
                    expires_at: None,
                };
                map.insert(key.to_owned(), entry);
                Ok(delta)
            }
        }
    }

    async fn clear(&mut self, namespace: Option<&str>) -> Result<()> {
        self.backend.run(BackendOp::Clear(namespace.map(str::to_owned)))?;
        let mut map = self.backend.shared.data.lock();
        match namespace {
            Some(prefix) => map.retain(|key, _| !key.starts_with(prefix)),
            None => map.clear(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_operations_in_order() -> Result<()> {
        let backend = MockBackend::new();
        let mut conn = backend.acquire().await?;
        conn.set("a", Bytes::from_static(b"1"), None).await?;
        let _ = conn.get("a").await?;

        let ops = backend.operations();
        assert!(matches!(ops[0], BackendOp::Acquire));
        assert!(matches!(ops[1], BackendOp::Set { ref key, .. } if key == "a"));
        assert!(matches!(ops[2], BackendOp::Get(ref key) if key == "a"));
        Ok(())
    }

    #[tokio::test]
    async fn add_collides_on_live_record() -> Result<()> {
        let backend = MockBackend::new();
        let mut conn = backend.acquire().await?;
        conn.add("k", Bytes::from_static(b"x"), None).await?;

        let err = conn
            .add("k", Bytes::from_static(b"y"), None)
            .await
            .expect_err("second add should collide");
        assert!(matches!(err, Error::KeyAlreadyExists { .. }));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn add_succeeds_after_record_expires() -> Result<()> {
        let backend = MockBackend::new();
        let mut conn = backend.acquire().await?;
        conn.add("k", Bytes::from_static(b"x"), Some(Duration::from_secs(1))).await?;

        tokio::time::sleep(Duration::from_millis(1100)).await;
        conn.add("k", Bytes::from_static(b"y"), None).await?;
        assert_eq!(conn.get("k").await?, Some(Bytes::from_static(b"y")));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_means_no_expiration() -> Result<()> {
        let backend = MockBackend::new();
        let mut conn = backend.acquire().await?;
        conn.set("k", Bytes::from_static(b"v"), Some(Duration::ZERO)).await?;

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(conn.get("k").await?, Some(Bytes::from_static(b"v")));
        Ok(())
    }

    #[tokio::test]
    async fn increment_rejects_non_numeric_values() -> Result<()> {
        let backend = MockBackend::new();
        let mut conn = backend.acquire().await?;
        conn.set("k", Bytes::from_static(b"not a number"), None).await?;

        let err = conn.increment("k", 1).await.expect_err("should reject");
        assert!(matches!(err, Error::NotANumber { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn injected_failures_are_scoped_to_matching_ops() -> Result<()> {
        let backend = MockBackend::new();
        backend.fail_when(|op| matches!(op, BackendOp::Get(key) if key == "bad"));

        let mut conn = backend.acquire().await?;
        assert!(conn.get("bad").await.is_err());
        assert!(conn.get("good").await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn clear_with_prefix_spares_other_namespaces() -> Result<()> {
        let backend = MockBackend::new();
        let mut conn = backend.acquire().await?;
        conn.set("ns:a", Bytes::from_static(b"1"), None).await?;
        conn.set("other:b", Bytes::from_static(b"2"), None).await?;

        conn.clear(Some("ns:")).await?;
        assert!(!backend.contains_key("ns:a"));
        assert!(backend.contains_key("other:b"));
        Ok(())
    }
}
