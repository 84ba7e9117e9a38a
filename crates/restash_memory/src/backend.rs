// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-process backend implementation using moka.

use std::time::{Duration, Instant};

use bytes::Bytes;
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};

use restash_backend::{BackendOps, CacheBackend, Error, Result};

use crate::builder::MemoryBackendBuilder;

/// A stored record: the raw value plus its absolute expiration deadline.
///
/// Deadlines are absolute so that updates which keep a record (such as
/// `increment`) preserve the remaining lifetime instead of restarting it.
#[derive(Clone, Debug)]
pub(crate) struct Stored {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Stored {
    fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        Self { value, expires_at: deadline(ttl) }
    }

    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// A zero TTL means no expiration, matching the contract pinned in
/// `restash_backend`.
fn deadline(ttl: Option<Duration>) -> Option<Instant> {
    match ttl {
        None | Some(Duration::ZERO) => None,
        Some(ttl) => Some(Instant::now() + ttl),
    }
}

/// Expiry policy reading each record's own deadline.
struct DeadlineExpiry;

impl Expiry<String, Stored> for DeadlineExpiry {
    fn expire_after_create(&self, _key: &String, value: &Stored, created_at: Instant) -> Option<Duration> {
        value.expires_at.map(|at| at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Stored,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.expires_at.map(|at| at.saturating_duration_since(updated_at))
    }
}

/// An in-process backend backed by moka.
///
/// Cloning is cheap and clones share storage, so one backend instance can be
/// handed to many decorators or concurrent callers. There is no real
/// connection pool behind this backend; leasing hands out a handle onto the
/// shared store, and `close` is a no-op that keeps the data intact.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use restash_backend::{BackendOps, CacheBackend};
/// use restash_memory::MemoryBackend;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> restash_backend::Result<()> {
/// let backend = MemoryBackend::new();
/// let mut conn = backend.acquire().await?;
///
/// conn.set("key", Bytes::from_static(b"42"), None).await?;
/// assert_eq!(conn.get("key").await?, Some(Bytes::from_static(b"42")));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct MemoryBackend {
    inner: Cache<String, Stored>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates a new unbounded in-process backend.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a new in-process backend with a maximum capacity.
    ///
    /// Once the capacity is reached, records are evicted using moka's
    /// `TinyLFU` policy.
    #[must_use]
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self::builder().max_capacity(max_capacity).build()
    }

    /// Creates a new builder for configuring an in-process backend.
    #[must_use]
    pub fn builder() -> MemoryBackendBuilder {
        MemoryBackendBuilder::new()
    }

    pub(crate) fn from_builder(builder: &MemoryBackendBuilder) -> Self {
        let mut moka_builder = Cache::builder()
            .expire_after(DeadlineExpiry)
            .support_invalidation_closures();

        if let Some(capacity) = builder.max_capacity {
            moka_builder = moka_builder.max_capacity(capacity);
        }

        if let Some(capacity) = builder.initial_capacity {
            moka_builder = moka_builder.initial_capacity(capacity);
        }

        if let Some(name) = builder.name.as_deref() {
            moka_builder = moka_builder.name(name);
        }

        Self { inner: moka_builder.build() }
    }

    async fn live_value(&self, key: &str) -> Option<Bytes> {
        self.inner
            .get(key)
            .await
            .filter(Stored::live)
            .map(|stored| stored.value)
    }

    fn parse_int(key: &str, value: &Bytes) -> Result<i64> {
        std::str::from_utf8(value)
            .ok()
            .and_then(|text| text.trim().parse().ok())
            .ok_or_else(|| Error::not_a_number(key))
    }
}

impl CacheBackend for MemoryBackend {
    type Conn = MemoryConn;

    async fn acquire(&self) -> Result<Self::Conn> {
        Ok(MemoryConn { backend: self.clone() })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Leased handle onto a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryConn {
    backend: MemoryBackend,
}

impl BackendOps for MemoryConn {
    async fn get(&mut self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.backend.live_value(key).await)
    }

    async fn set(&mut self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.backend.inner.insert(key.to_owned(), Stored::new(value, ttl)).await;
        Ok(())
    }

    async fn multi_get(&mut self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.backend.live_value(key).await);
        }
        Ok(values)
    }

    async fn multi_set(&mut self, pairs: Vec<(String, Bytes)>, ttl: Option<Duration>) -> Result<()> {
        for (key, value) in pairs {
            self.backend.inner.insert(key, Stored::new(value, ttl)).await;
        }
        Ok(())
    }

    async fn add(&mut self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.backend
            .inner
            .entry(key.to_owned())
            .and_try_compute_with(|existing| {
                let occupied = existing.is_some_and(|entry| entry.value().live());
                let stored = Stored::new(value.clone(), ttl);
                async move {
                    if occupied {
                        Err(Error::key_already_exists(key))
                    } else {
                        Ok(Op::Put(stored))
                    }
                }
            })
            .await?;
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<bool> {
        Ok(self.backend.inner.remove(key).await.is_some_and(|stored| stored.live()))
    }

    async fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.backend.live_value(key).await.is_some())
    }

    async fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        let result = self
            .backend
            .inner
            .entry(key.to_owned())
            .and_compute_with(|existing| {
                let refreshed = existing
                    .filter(|entry| entry.value().live())
                    .map(|entry| Stored::new(entry.value().value.clone(), Some(ttl)));
                async move {
                    match refreshed {
                        Some(stored) => Op::Put(stored),
                        None => Op::Nop,
                    }
                }
            })
            .await;
        Ok(matches!(result, CompResult::ReplacedWith(_)))
    }

    async fn increment(&mut self, key: &str, delta: i64) -> Result<i64> {
        let result = self
            .backend
            .inner
            .entry(key.to_owned())
            .and_try_compute_with(|existing| {
                let current = existing.filter(|entry| entry.value().live()).map(|entry| entry.value().clone());
                async move {
                    let (base, expires_at) = match &current {
                        Some(stored) => (MemoryBackend::parse_int(key, &stored.value)?, stored.expires_at),
                        None => (0, None),
                    };
                    let next = base + delta;
                    Ok(Op::Put(Stored {
                        value: Bytes::from(next.to_string()),
                        expires_at,
                    }))
                }
            })
            .await?;
        match result {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => {
                MemoryBackend::parse_int(key, &entry.value().value)
            }
            CompResult::StillNone(_) | CompResult::Unchanged(_) | CompResult::Removed(_) => {
                unreachable!("increment always stores a value")
            }
        }
    }

    async fn clear(&mut self, namespace: Option<&str>) -> Result<()> {
        match namespace {
            Some(prefix) => {
                let prefix = prefix.to_owned();
                self.backend
                    .inner
                    .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
                    .map_err(Error::backend)?;
            }
            None => self.backend.inner.invalidate_all(),
        }
        Ok(())
    }
}
