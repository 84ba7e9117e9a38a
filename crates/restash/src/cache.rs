// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The cache front: typed operations over a backend.
//!
//! [`Cache`] bundles a backend with a serializer and an optional namespace.
//! One-shot operations lease a connection per call; [`Cache::connection`]
//! leases one explicitly so a bounded sequence of operations shares it.

use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};

use restash_backend::{BackendOps, CacheBackend, Result};

use crate::serializers::{JsonSerializer, Serializer};

/// Typed cache operations over a storage backend.
///
/// The backend instance is owned here, created once and shared by every
/// caller; it is closed only through [`Cache::close`], never per operation.
/// Keys are prefixed with the configured namespace before they reach the
/// backend.
///
/// # Examples
///
/// ```
/// use restash::{Cache, MemoryBackend};
///
/// # futures::executor::block_on(async {
/// let cache = Cache::builder(MemoryBackend::new()).namespace("users").build();
///
/// cache.set("42", &"Ada".to_string(), None).await?;
/// let name: Option<String> = cache.get("42").await?;
/// assert_eq!(name.as_deref(), Some("Ada"));
/// # Ok::<(), restash::Error>(())
/// # });
/// ```
#[derive(Debug)]
pub struct Cache<B, S = JsonSerializer> {
    backend: B,
    serializer: S,
    namespace: Option<String>,
}

impl Cache<(), ()> {
    /// Creates a new cache builder over the given backend.
    ///
    /// The builder defaults to [`JsonSerializer`] and no namespace.
    #[must_use]
    pub fn builder<B: CacheBackend>(backend: B) -> CacheBuilder<B, JsonSerializer> {
        CacheBuilder {
            backend,
            serializer: JsonSerializer,
            namespace: None,
        }
    }
}

impl<B, S> Cache<B, S> {
    /// Returns a reference to the backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns a reference to the serializer.
    #[must_use]
    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Returns the configured namespace, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Renders the full backend key for `key`, applying the namespace prefix.
    #[must_use]
    pub fn build_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}:{key}"),
            None => key.to_owned(),
        }
    }
}

impl<B, S> Cache<B, S>
where
    B: CacheBackend,
    S: Serializer,
{
    /// Leases a connection scope.
    ///
    /// Operations issued through the returned handle share one underlying
    /// connection; dropping the handle returns it to the backend on every
    /// exit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot lease a connection.
    pub async fn connection(&self) -> Result<CacheConnection<'_, B, S>> {
        Ok(CacheConnection {
            cache: self,
            conn: self.backend.acquire().await?,
        })
    }

    /// Gets and deserializes the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation or deserialization fails.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.connection().await?.get(key).await
    }

    /// Serializes and upserts `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the backend operation fails.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        self.connection().await?.set(key, value, ttl).await
    }

    /// Atomically inserts `value` under `key` only if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyAlreadyExists`](restash_backend::Error::KeyAlreadyExists)
    /// on a collision, or an error if serialization or the backend operation
    /// fails.
    pub async fn add<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        self.connection().await?.add(key, value, ttl).await
    }

    /// Gets and deserializes many values; the result aligns with `keys`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation or any deserialization fails.
    pub async fn multi_get<T: DeserializeOwned>(&self, keys: &[String]) -> Result<Vec<Option<T>>> {
        self.connection().await?.multi_get(keys).await
    }

    /// Serializes and upserts many pairs with a shared TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the backend operation fails.
    pub async fn multi_set<T: Serialize>(&self, pairs: &[(&str, &T)], ttl: Option<Duration>) -> Result<()> {
        self.connection().await?.multi_set(pairs, ttl).await
    }

    /// Deletes the record under `key`; returns whether one was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.connection().await?.delete(key).await
    }

    /// Returns whether a live record exists under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.connection().await?.exists(key).await
    }

    /// Replaces the TTL of an existing record; `false` if the key is absent.
    ///
    /// A zero `ttl` removes the expiration.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.connection().await?.expire(key, ttl).await
    }

    /// Adds `delta` to the integer under `key`, creating it at `delta` when
    /// absent; returns the new value.
    ///
    /// The raw stored form is the decimal text of the number, independent of
    /// the configured serializer, so backends can apply their native atomic
    /// increment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotANumber`](restash_backend::Error::NotANumber) if
    /// the existing value is not an integer, or an error if the backend
    /// operation fails.
    pub async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        self.connection().await?.increment(key, delta).await
    }

    /// Bulk-deletes records.
    ///
    /// With `Some(namespace)`, only that namespace's records are removed
    /// (matched by key prefix); with `None`, everything goes, including other
    /// namespaces sharing the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    pub async fn clear(&self, namespace: Option<&str>) -> Result<()> {
        let mut scope = self.connection().await?;
        match namespace {
            Some(namespace) => scope.conn.clear(Some(&format!("{namespace}:"))).await,
            None => scope.conn.clear(None).await,
        }
    }

    /// Closes the backend, releasing pooled resources.
    ///
    /// Later operations re-establish them transparently.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses to close.
    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }
}

/// A leased connection scope with the cache's typed operations.
///
/// Created by [`Cache::connection`]. All operations share the one underlying
/// connection leased at creation.
pub struct CacheConnection<'a, B: CacheBackend, S> {
    cache: &'a Cache<B, S>,
    conn: B::Conn,
}

impl<B: CacheBackend, S> std::fmt::Debug for CacheConnection<'_, B, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConnection").finish_non_exhaustive()
    }
}

impl<B, S> CacheConnection<'_, B, S>
where
    B: CacheBackend,
    S: Serializer,
{
    /// Gets and deserializes the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation or deserialization fails.
    pub async fn get<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        let built = self.cache.build_key(key);
        match self.conn.get(&built).await? {
            Some(raw) => Ok(Some(self.cache.serializer.loads(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serializes and upserts `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the backend operation fails.
    pub async fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let built = self.cache.build_key(key);
        let raw = self.cache.serializer.dumps(value)?;
        self.conn.set(&built, raw, ttl).await
    }

    /// Atomically inserts `value` under `key` only if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyAlreadyExists`](restash_backend::Error::KeyAlreadyExists)
    /// on a collision, or an error if serialization or the backend operation
    /// fails.
    pub async fn add<T: Serialize + ?Sized>(&mut self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let built = self.cache.build_key(key);
        let raw = self.cache.serializer.dumps(value)?;
        self.conn.add(&built, raw, ttl).await
    }

    /// Gets and deserializes many values; the result aligns with `keys`.
    ///
    /// An empty `keys` never touches the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation or any deserialization fails.
    pub async fn multi_get<T: DeserializeOwned>(&mut self, keys: &[String]) -> Result<Vec<Option<T>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let built: Vec<String> = keys.iter().map(|key| self.cache.build_key(key)).collect();
        self.conn
            .multi_get(&built)
            .await?
            .into_iter()
            .map(|raw| raw.map(|raw| self.cache.serializer.loads(&raw)).transpose())
            .collect()
    }

    /// Serializes and upserts many pairs with a shared TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the backend operation fails.
    pub async fn multi_set<T: Serialize>(&mut self, pairs: &[(&str, &T)], ttl: Option<Duration>) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut encoded = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            encoded.push((self.cache.build_key(key), self.cache.serializer.dumps(*value)?));
        }
        self.conn.multi_set(encoded, ttl).await
    }

    /// Deletes the record under `key`; returns whether one was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    pub async fn delete(&mut self, key: &str) -> Result<bool> {
        let built = self.cache.build_key(key);
        self.conn.delete(&built).await
    }

    /// Returns whether a live record exists under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    pub async fn exists(&mut self, key: &str) -> Result<bool> {
        let built = self.cache.build_key(key);
        self.conn.exists(&built).await
    }

    /// Replaces the TTL of an existing record; `false` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    pub async fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        let built = self.cache.build_key(key);
        self.conn.expire(&built, ttl).await
    }

    /// Adds `delta` to the integer under `key`; returns the new value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotANumber`](restash_backend::Error::NotANumber) if
    /// the existing value is not an integer, or an error if the backend
    /// operation fails.
    pub async fn increment(&mut self, key: &str, delta: i64) -> Result<i64> {
        let built = self.cache.build_key(key);
        self.conn.increment(&built, delta).await
    }
}

/// Builder for a [`Cache`].
///
/// Created by [`Cache::builder`].
///
/// # Examples
///
/// ```
/// use restash::{Cache, MemoryBackend, StringSerializer};
///
/// let cache = Cache::builder(MemoryBackend::new())
///     .serializer(StringSerializer)
///     .namespace("sessions")
///     .build();
/// ```
#[derive(Debug)]
pub struct CacheBuilder<B, S> {
    backend: B,
    serializer: S,
    namespace: Option<String>,
}

impl<B: CacheBackend, S: Serializer> CacheBuilder<B, S> {
    /// Replaces the serializer.
    #[must_use]
    pub fn serializer<S2: Serializer>(self, serializer: S2) -> CacheBuilder<B, S2> {
        CacheBuilder {
            backend: self.backend,
            serializer,
            namespace: self.namespace,
        }
    }

    /// Sets the namespace prefixed onto every key.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Builds the configured [`Cache`].
    #[must_use]
    pub fn build(self) -> Cache<B, S> {
        Cache {
            backend: self.backend,
            serializer: self.serializer,
            namespace: self.namespace,
        }
    }
}
