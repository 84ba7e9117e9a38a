// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Single-value memoization: read-through, miss-compute-write.

use std::convert::Infallible;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};

use restash_backend::CacheBackend;

use crate::cache::{Cache, CacheConnection};
use crate::call::CallSite;
use crate::key::KeySpec;
use crate::serializers::{JsonSerializer, Serializer};

/// Memoizes a single return value under one derived key.
///
/// Constructed once at decoration time; the backend it owns (through the
/// [`Cache`]) lives as long as the decorator and is shared by every
/// invocation. Per-call state — the derived key, the leased connection —
/// is created and dropped inside each call.
///
/// Cache failures never surface: a failed read is a miss, a failed write
/// still returns the freshly computed value. Failures of the wrapped
/// computation itself propagate unchanged.
///
/// # Examples
///
/// ```
/// use restash::{Cache, Cached, CallSite, MemoryBackend};
///
/// # futures::executor::block_on(async {
/// let cached = Cached::builder(Cache::builder(MemoryBackend::new()).build()).build();
///
/// let call = CallSite::new(module_path!(), "double").arg("n", "21");
/// let value = cached.apply(&call, || async { 21 * 2 }).await;
/// assert_eq!(value, 42);
///
/// // The second identical call is served from the cache.
/// let value: i32 = cached.apply(&call, || async { unreachable!("cached") }).await;
/// assert_eq!(value, 42);
/// # });
/// ```
#[derive(Debug)]
pub struct Cached<B, S = JsonSerializer> {
    cache: Cache<B, S>,
    ttl: Option<Duration>,
    key: KeySpec,
}

impl<B, S> Cached<B, S>
where
    B: CacheBackend,
    S: Serializer,
{
    /// Creates a builder over the given cache.
    #[must_use]
    pub fn builder(cache: Cache<B, S>) -> CachedBuilder<B, S> {
        CachedBuilder {
            cache,
            ttl: None,
            explicit_key: None,
            key_from_arg: None,
            skip_receiver: false,
        }
    }

    /// Returns a reference to the underlying cache.
    #[must_use]
    pub fn cache(&self) -> &Cache<B, S> {
        &self.cache
    }

    /// Runs an infallible computation through the cache.
    ///
    /// See [`try_apply`](Self::try_apply) for the full protocol.
    ///
    /// # Panics
    ///
    /// Panics if the configured key strategy cannot resolve against `call`
    /// (see [`KeySpec::key_for`]).
    pub async fn apply<T, F, Fut>(&self, call: &CallSite<'_>, f: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.try_apply::<T, Infallible, _, _>(call, || async move { Ok(f().await) }).await {
            Ok(value) => value,
            Err(infallible) => match infallible {},
        }
    }

    /// Runs a fallible computation through the cache.
    ///
    /// Protocol per invocation: derive the key, lease one connection scope,
    /// read through it; on a hit return the cached value without invoking
    /// `f`; on a miss invoke `f`, write the result through the same scope,
    /// and return it. `f` runs at most once per invocation.
    ///
    /// A read failure (backend or deserialization) is logged and treated as
    /// a miss; a write failure is logged and ignored; a failure to lease the
    /// connection at all degrades to calling straight through. Only errors
    /// from `f` itself reach the caller.
    ///
    /// # Errors
    ///
    /// Returns whatever error `f` returns, unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the configured key strategy cannot resolve against `call`
    /// (see [`KeySpec::key_for`]).
    pub async fn try_apply<T, E, F, Fut>(&self, call: &CallSite<'_>, f: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.key.key_for(call);

        let mut scope: Option<CacheConnection<'_, B, S>> = match self.cache.connection().await {
            Ok(scope) => Some(scope),
            Err(error) => {
                tracing::warn!(key = key.as_str(), %error, "cache unavailable; calling through");
                None
            }
        };

        if let Some(scope) = scope.as_mut() {
            match scope.get::<T>(&key).await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(key = key.as_str(), %error, "cache read failed; treating as a miss");
                }
            }
        }

        let value = f().await?;

        if let Some(scope) = scope.as_mut() {
            if let Err(error) = scope.set(&key, &value, self.ttl).await {
                tracing::warn!(key = key.as_str(), %error, "cache write failed; returning the computed value");
            }
        }

        Ok(value)
    }
}

/// Builder for [`Cached`].
///
/// When several key strategies are configured, an explicit key wins over a
/// key-from-argument, which wins over derivation.
#[derive(Debug)]
pub struct CachedBuilder<B, S> {
    cache: Cache<B, S>,
    ttl: Option<Duration>,
    explicit_key: Option<String>,
    key_from_arg: Option<&'static str>,
    skip_receiver: bool,
}

impl<B, S> CachedBuilder<B, S>
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

    /// Uses this key for every invocation, ignoring the call description.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.explicit_key = Some(key.into());
        self
    }

    /// Uses the value bound to the named argument as the key.
    #[must_use]
    pub fn key_from_arg(mut self, name: &'static str) -> Self {
        self.key_from_arg = Some(name);
        self
    }

    /// Excludes the first positional argument (a receiver such as `self`)
    /// from derived keys, so calls on different instances share one key.
    #[must_use]
    pub fn skip_receiver(mut self) -> Self {
        self.skip_receiver = true;
        self
    }

    /// Builds the configured [`Cached`].
    #[must_use]
    pub fn build(self) -> Cached<B, S> {
        Cached {
            cache: self.cache,
            ttl: self.ttl,
            key: resolve_key_spec(self.explicit_key, self.key_from_arg, self.skip_receiver),
        }
    }
}

pub(crate) fn resolve_key_spec(
    explicit_key: Option<String>,
    key_from_arg: Option<&'static str>,
    skip_receiver: bool,
) -> KeySpec {
    if let Some(key) = explicit_key {
        KeySpec::Explicit(key)
    } else if let Some(name) = key_from_arg {
        KeySpec::FromArg(name)
    } else {
        KeySpec::Derived { skip_receiver }
    }
}
