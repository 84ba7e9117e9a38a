// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Stampede-guarded memoization.
//!
//! Extends the single-value protocol with a distributed lock so that when many
//! concurrent callers miss the same key, recomputation is serialized
//! best-effort: one caller computes while the rest wait and then find the
//! stored value at their double-checked read.

use std::convert::Infallible;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};

use restash_backend::CacheBackend;

use crate::cache::Cache;
use crate::cached::resolve_key_spec;
use crate::call::CallSite;
use crate::key::KeySpec;
use crate::lock::RedLock;
use crate::serializers::{JsonSerializer, Serializer};

/// Default lock lease: generous for a cache fill, short enough that a crashed
/// holder does not stall waiters noticeably.
const DEFAULT_LEASE: Duration = Duration::from_secs(2);

/// Memoizes a single return value with dogpile protection.
///
/// Unlike [`Cached`](crate::Cached), no connection scope is held across the
/// lock wait: every read and write leases its own connection. Holding one for
/// the duration of a contended wait would starve the pool for unrelated
/// callers.
///
/// The guarantee is bounded by the lease: with a critical section no longer
/// than the lease, exactly one concurrent caller per key computes. A critical
/// section that outlives its lease lets another caller start computing
/// concurrently — the accepted trade-off for surviving crashed holders.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use restash::{Cache, CachedStampede, CallSite, MemoryBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cached = CachedStampede::builder(Cache::builder(MemoryBackend::new()).build())
///     .lease(Duration::from_secs(5))
///     .build();
///
/// let call = CallSite::new(module_path!(), "report").arg("day", "2024-06-01");
/// let value = cached.apply(&call, || async { "expensive".to_string() }).await;
/// assert_eq!(value, "expensive");
/// # }
/// ```
#[derive(Debug)]
pub struct CachedStampede<B, S = JsonSerializer>
where
    B: CacheBackend + Clone + Send + Sync + 'static,
{
    cache: Cache<B, S>,
    lock: RedLock<B>,
    ttl: Option<Duration>,
    key: KeySpec,
    lease: Duration,
}

impl<B, S> CachedStampede<B, S>
where
    B: CacheBackend + Clone + Send + Sync + 'static,
    S: Serializer,
{
    /// Creates a builder over the given cache.
    #[must_use]
    pub fn builder(cache: Cache<B, S>) -> CachedStampedeBuilder<B, S> {
        CachedStampedeBuilder {
            cache,
            ttl: None,
            explicit_key: None,
            key_from_arg: None,
            skip_receiver: false,
            lease: DEFAULT_LEASE,
        }
    }

    /// Returns a reference to the underlying cache.
    #[must_use]
    pub fn cache(&self) -> &Cache<B, S> {
        &self.cache
    }

    /// Runs an infallible computation through the guarded cache.
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

    /// Runs a fallible computation through the guarded cache.
    ///
    /// Protocol per invocation:
    /// 1. Read the key; a hit returns immediately, without contending.
    /// 2. Acquire the distributed lock with the configured lease.
    /// 3. Read again inside the lock — another caller may have stored the
    ///    value while this one waited.
    /// 4. Still a miss: invoke `f`, store the result with the configured TTL.
    /// 5. Release the lock on every exit path; a cancelled caller releases
    ///    through the guard's drop.
    ///
    /// Error containment matches [`Cached`](crate::Cached): cache and lock
    /// failures degrade, only errors from `f` reach the caller.
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

        if let Some(value) = self.read::<T>(&key).await {
            return Ok(value);
        }

        let guard = self.lock.acquire(&self.cache.build_key(&key), self.lease).await;
        let result = self.locked_section(&key, f).await;
        guard.release().await;
        result
    }

    async fn locked_section<T, E, F, Fut>(&self, key: &str, f: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.read::<T>(key).await {
            return Ok(value);
        }

        let value = f().await?;
        if let Err(error) = self.cache.set(key, &value, self.ttl).await {
            tracing::warn!(key, %error, "cache write failed; returning the computed value");
        }
        Ok(value)
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get::<T>(key).await {
            Ok(found) => found,
            Err(error) => {
                tracing::warn!(key, %error, "cache read failed; treating as a miss");
                None
            }
        }
    }
}

/// Builder for [`CachedStampede`].
///
/// Key strategy precedence matches [`CachedBuilder`](crate::CachedBuilder):
/// explicit key, then key-from-argument, then derivation.
#[derive(Debug)]
pub struct CachedStampedeBuilder<B, S> {
    cache: Cache<B, S>,
    ttl: Option<Duration>,
    explicit_key: Option<String>,
    key_from_arg: Option<&'static str>,
    skip_receiver: bool,
    lease: Duration,
}

impl<B, S> CachedStampedeBuilder<B, S>
where
    B: CacheBackend + Clone + Send + Sync + 'static,
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

    /// Excludes the first positional argument from derived keys.
    #[must_use]
    pub fn skip_receiver(mut self) -> Self {
        self.skip_receiver = true;
        self
    }

    /// Sets the lock lease.
    ///
    /// Pick a lease at least as long as the worst-case computation; a shorter
    /// one re-admits concurrent computation once it expires.
    #[must_use]
    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Builds the configured [`CachedStampede`].
    ///
    /// The lock shares the cache's backend client.
    #[must_use]
    pub fn build(self) -> CachedStampede<B, S> {
        let lock = RedLock::new(self.cache.backend().clone());
        CachedStampede {
            cache: self.cache,
            lock,
            ttl: self.ttl,
            key: resolve_key_spec(self.explicit_key, self.key_from_arg, self.skip_receiver),
            lease: self.lease,
        }
    }
}
