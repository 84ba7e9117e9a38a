// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Multi-key memoization with partial-hit reconciliation.

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};

use restash_backend::CacheBackend;

use crate::cache::{Cache, CacheConnection};
use crate::call::CallSite;
use crate::serializers::{JsonSerializer, Serializer};

type KeyTransform = Box<dyn for<'a> Fn(&str, &CallSite<'a>) -> String + Send + Sync>;

/// Memoizes a mapping-valued computation across a batch of keys.
///
/// The wrapped computation takes a key list and returns a map from those keys
/// to values. Per invocation, the decorator batch-reads the whole requested
/// batch, invokes the computation for the missing subset only, merges, writes
/// back the freshly computed entries, and returns the merged map keyed by the
/// original keys.
///
/// An optional key transform rewrites each raw key before it touches the
/// cache (namespacing by another argument, say); the transform never leaks
/// into the returned map or the computation's input.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use restash::{Cache, CallSite, MemoryBackend, MultiCached};
///
/// # futures::executor::block_on(async {
/// let cached = MultiCached::builder(Cache::builder(MemoryBackend::new()).build(), "ids").build();
///
/// let ids = vec!["a".to_owned(), "b".to_owned()];
/// let call = CallSite::new(module_path!(), "load_names").arg("ids", ids);
///
/// let names = cached
///     .apply(&call, |missing| async move {
///         missing.into_iter().map(|id| (id.clone(), format!("name-of-{id}"))).collect::<HashMap<_, _>>()
///     })
///     .await;
/// assert_eq!(names.len(), 2);
/// # });
/// ```
pub struct MultiCached<B, S = JsonSerializer> {
    cache: Cache<B, S>,
    ttl: Option<Duration>,
    keys_arg: &'static str,
    key_builder: Option<KeyTransform>,
}

impl<B: std::fmt::Debug, S: std::fmt::Debug> std::fmt::Debug for MultiCached<B, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiCached")
            .field("cache", &self.cache)
            .field("ttl", &self.ttl)
            .field("keys_arg", &self.keys_arg)
            .field("key_builder", &self.key_builder.is_some())
            .finish()
    }
}

impl<B, S> MultiCached<B, S>
where
    B: CacheBackend,
    S: Serializer,
{
    /// Creates a builder over the given cache.
    ///
    /// `keys_arg` names the call-site argument carrying the requested key
    /// list.
    #[must_use]
    pub fn builder(cache: Cache<B, S>, keys_arg: &'static str) -> MultiCachedBuilder<B, S> {
        MultiCachedBuilder {
            cache,
            ttl: None,
            keys_arg,
            key_builder: None,
        }
    }

    /// Returns a reference to the underlying cache.
    #[must_use]
    pub fn cache(&self) -> &Cache<B, S> {
        &self.cache
    }

    /// Runs an infallible batch computation through the cache.
    ///
    /// See [`try_apply`](Self::try_apply) for the full protocol.
    ///
    /// # Panics
    ///
    /// Panics if the call's bindings lack the configured key-list argument.
    pub async fn apply<T, F, Fut>(&self, call: &CallSite<'_>, f: F) -> HashMap<String, T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = HashMap<String, T>>,
    {
        let wrapped = |missing| async move { Ok(f(missing).await) };
        match self.try_apply::<T, Infallible, _, _>(call, wrapped).await {
            Ok(merged) => merged,
            Err(infallible) => match infallible {},
        }
    }

    /// Runs a fallible batch computation through the cache.
    ///
    /// Protocol per invocation:
    /// 1. Read the requested key list from the call's bindings; transform
    ///    each key for cache use.
    /// 2. Batch-read all transformed keys through one connection scope. An
    ///    empty request skips the backend read entirely; a failed read
    ///    degrades to all-missing.
    /// 3. Zero misses on a non-empty read: return the hits without invoking
    ///    `f`.
    /// 4. Otherwise invoke `f` with only the missing original keys, merge
    ///    with the hits, and batch-write just the freshly computed entries
    ///    with the configured TTL. A failed write is logged and dropped.
    /// 5. Return the merged map, keyed by the original keys.
    ///
    /// # Errors
    ///
    /// Returns whatever error `f` returns, unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the call's bindings lack the configured key-list argument —
    /// a mismatch between decorator configuration and call description.
    pub async fn try_apply<T, E, F, Fut>(&self, call: &CallSite<'_>, f: F) -> Result<HashMap<String, T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<HashMap<String, T>, E>>,
    {
        let requested: Vec<String> = call
            .key_list(self.keys_arg)
            .unwrap_or_else(|| {
                panic!(
                    "cached call {}.{} has no key-list argument named {:?}",
                    call.module(),
                    call.function(),
                    self.keys_arg
                )
            })
            .clone();
        let cache_keys: Vec<String> = requested.iter().map(|key| self.transform(key, call)).collect();

        let mut scope: Option<CacheConnection<'_, B, S>> = match self.cache.connection().await {
            Ok(scope) => Some(scope),
            Err(error) => {
                tracing::warn!(%error, "cache unavailable; calling through");
                None
            }
        };

        let values: Vec<Option<T>> = if requested.is_empty() {
            Vec::new()
        } else if let Some(scope) = scope.as_mut() {
            match scope.multi_get::<T>(&cache_keys).await {
                Ok(values) => values,
                Err(error) => {
                    tracing::warn!(%error, "cache batch read failed; treating all keys as missing");
                    (0..requested.len()).map(|_| None).collect()
                }
            }
        } else {
            (0..requested.len()).map(|_| None).collect()
        };

        let mut merged: HashMap<String, T> = HashMap::with_capacity(requested.len());
        let mut missing: Vec<String> = Vec::new();
        for (original, value) in requested.iter().zip(values) {
            match value {
                Some(value) => {
                    merged.insert(original.clone(), value);
                }
                None => missing.push(original.clone()),
            }
        }

        if !requested.is_empty() && missing.is_empty() {
            return Ok(merged);
        }

        let computed = f(missing).await?;

        if !computed.is_empty() {
            if let Some(scope) = scope.as_mut() {
                let built: Vec<(String, &T)> = computed
                    .iter()
                    .map(|(original, value)| (self.transform(original, call), value))
                    .collect();
                let pairs: Vec<(&str, &T)> = built.iter().map(|(key, value)| (key.as_str(), *value)).collect();
                if let Err(error) = scope.multi_set(&pairs, self.ttl).await {
                    tracing::warn!(%error, "cache batch write failed; dropping the write");
                }
            }
        }

        merged.extend(computed);
        Ok(merged)
    }

    fn transform(&self, key: &str, call: &CallSite<'_>) -> String {
        match &self.key_builder {
            Some(build) => build(key, call),
            None => key.to_owned(),
        }
    }
}

/// Builder for [`MultiCached`].
pub struct MultiCachedBuilder<B, S> {
    cache: Cache<B, S>,
    ttl: Option<Duration>,
    keys_arg: &'static str,
    key_builder: Option<KeyTransform>,
}

impl<B: std::fmt::Debug, S: std::fmt::Debug> std::fmt::Debug for MultiCachedBuilder<B, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiCachedBuilder")
            .field("cache", &self.cache)
            .field("ttl", &self.ttl)
            .field("keys_arg", &self.keys_arg)
            .field("key_builder", &self.key_builder.is_some())
            .finish()
    }
}

impl<B, S> MultiCachedBuilder<B, S>
where
    B: CacheBackend,
    S: Serializer,
{
    /// Sets the time-to-live for stored values. Unset means no expiration.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Transforms each raw key before it touches the cache.
    ///
    /// The transform receives the raw key and the full call description, so
    /// keys can be derived from other arguments. Returned maps and the
    /// wrapped computation always see the raw keys.
    #[must_use]
    pub fn key_builder<F>(mut self, build: F) -> Self
    where
        F: for<'a> Fn(&str, &CallSite<'a>) -> String + Send + Sync + 'static,
    {
        self.key_builder = Some(Box::new(build));
        self
    }

    /// Builds the configured [`MultiCached`].
    #[must_use]
    pub fn build(self) -> MultiCached<B, S> {
        MultiCached {
            cache: self.cache,
            ttl: self.ttl,
            keys_arg: self.keys_arg,
            key_builder: self.key_builder,
        }
    }
}
