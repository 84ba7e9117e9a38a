// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The core traits for cache storage backends.
//!
//! [`CacheBackend`] is the client half of the contract: a long-lived, cheaply
//! cloneable handle to a storage system that can lease connections. The leased
//! handle implements [`BackendOps`], the capability set every backend must
//! provide. Operations issued through one leased handle are routed to the same
//! underlying connection, which is what lets a read followed by a write share
//! one round-trip-optimized connection.

use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// A storage backend that can lease scoped connections.
///
/// The backend instance is shared by every concurrent caller of a decorated
/// function, so implementations must tolerate concurrent outstanding
/// operations. The leased connection is *not* shared: each logical call
/// acquires its own handle and releases it by dropping it.
pub trait CacheBackend: Send + Sync {
    /// Handle to a leased connection.
    ///
    /// Dropping the handle returns the underlying connection to the pool;
    /// implementations must make that release happen on every exit path.
    type Conn: BackendOps + Send;

    /// Leases a connection for a bounded sequence of operations.
    fn acquire(&self) -> impl Future<Output = Result<Self::Conn>> + Send;

    /// Releases pooled resources.
    ///
    /// Operations issued afterwards must transparently re-establish whatever
    /// `close` tore down.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// The capability set of a leased backend connection.
///
/// Keys are opaque strings; values are opaque byte strings — serialization is
/// the caller's concern. A `ttl` of `None` means no expiration. A zero `ttl`
/// also means no expiration for the backends shipped in this workspace; the
/// behavior is pinned per backend because storage systems disagree on it.
pub trait BackendOps: Send {
    /// Gets the value stored under `key`, or `None` if absent or expired.
    fn get(&mut self, key: &str) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Upserts `value` under `key` with an optional time-to-live.
    fn set(&mut self, key: &str, value: Bytes, ttl: Option<Duration>) -> impl Future<Output = Result<()>> + Send;

    /// Gets many values at once; the result is positionally aligned with `keys`.
    fn multi_get(&mut self, keys: &[String]) -> impl Future<Output = Result<Vec<Option<Bytes>>>> + Send;

    /// Upserts many pairs at once with a shared time-to-live.
    fn multi_set(&mut self, pairs: Vec<(String, Bytes)>, ttl: Option<Duration>) -> impl Future<Output = Result<()>> + Send;

    /// Atomically inserts `value` under `key` only if the key is absent.
    ///
    /// Fails with [`Error::KeyAlreadyExists`](crate::Error::KeyAlreadyExists)
    /// when a live record is already present. This is the mutual-exclusion
    /// primitive the distributed lock is built on.
    fn add(&mut self, key: &str, value: Bytes, ttl: Option<Duration>) -> impl Future<Output = Result<()>> + Send;

    /// Deletes the record under `key`; returns whether one was removed.
    fn delete(&mut self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Returns whether a live record exists under `key`.
    fn exists(&mut self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Replaces the time-to-live of an existing record.
    ///
    /// Returns `false` if the key is absent. A zero `ttl` removes the
    /// expiration entirely.
    fn expire(&mut self, key: &str, ttl: Duration) -> impl Future<Output = Result<bool>> + Send;

    /// Adds `delta` to the integer stored under `key`, creating it at `delta`
    /// when absent; returns the new value.
    ///
    /// Fails with [`Error::NotANumber`](crate::Error::NotANumber) when the
    /// existing value does not parse as an integer.
    fn increment(&mut self, key: &str, delta: i64) -> impl Future<Output = Result<i64>> + Send;

    /// Bulk-deletes records.
    ///
    /// When `namespace` is given it is matched as a key prefix and only
    /// matching records are removed; otherwise everything goes.
    fn clear(&mut self, namespace: Option<&str>) -> impl Future<Output = Result<()>> + Send;
}
