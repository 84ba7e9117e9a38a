// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Memoize async computations behind a uniform key/value cache.
//!
//! This crate turns arbitrary async computations into cached computations,
//! independent of which storage backend actually holds the data:
//!
//! - [`Cached`] memoizes a single return value under a derived key:
//!   read-through, miss-compute-write.
//! - [`CachedStampede`] extends it with a distributed lock ([`RedLock`]) so
//!   that under concurrent misses for one key, recomputation is serialized
//!   best-effort (the "dogpile effect" guard).
//! - [`MultiCached`] memoizes a mapping-valued result across a batch of keys,
//!   invoking the computation for the missing subset only.
//!
//! Backends implement the capability contract in `restash_backend`; the
//! in-process moka backend ships behind the default `memory` feature and a
//! Redis backend behind `redis`. Values cross the backend boundary as bytes
//! through a pluggable [`Serializer`].
//!
//! A caching layer must never make a system less available than having no
//! cache: backend failures during decorator-issued reads and writes are
//! logged and degraded (a failed read is a miss, a failed write is dropped),
//! while failures of the wrapped computation always propagate unchanged.
//!
//! # Examples
//!
//! ## Read-through memoization
//!
//! ```
//! use restash::{Cache, Cached, CallSite, MemoryBackend};
//! use std::time::Duration;
//!
//! # futures::executor::block_on(async {
//! let cached = Cached::builder(Cache::builder(MemoryBackend::new()).build())
//!     .ttl(Duration::from_secs(60))
//!     .build();
//!
//! let call = CallSite::new(module_path!(), "load_user").arg("user_id", "42");
//! let user: String = cached.apply(&call, || async { "Ada".to_string() }).await;
//! assert_eq!(user, "Ada");
//! # });
//! ```
//!
//! ## Batch memoization with partial hits
//!
//! ```
//! use restash::{Cache, CallSite, MemoryBackend, MultiCached};
//! use std::collections::HashMap;
//!
//! # futures::executor::block_on(async {
//! let cached = MultiCached::builder(Cache::builder(MemoryBackend::new()).build(), "ids").build();
//!
//! let call = CallSite::new(module_path!(), "load").arg("ids", vec!["a".to_owned(), "b".to_owned()]);
//! let loaded = cached
//!     .apply(&call, |missing| async move {
//!         // Only the keys the cache could not resolve arrive here.
//!         missing.into_iter().map(|id| (id, 1_u64)).collect::<HashMap<_, _>>()
//!     })
//!     .await;
//! assert_eq!(loaded.len(), 2);
//! # });
//! ```

pub mod cache;
mod cached;
mod call;
mod key;
mod lock;
mod multi_cached;
mod serializers;
mod stampede;

#[doc(inline)]
pub use cache::{Cache, CacheBuilder, CacheConnection};
#[doc(inline)]
pub use cached::{Cached, CachedBuilder};
#[doc(inline)]
pub use call::{ArgValue, CallSite};
#[doc(inline)]
pub use key::KeySpec;
#[doc(inline)]
pub use lock::{LOCK_SUFFIX, LockGuard, RedLock};
#[doc(inline)]
pub use multi_cached::{MultiCached, MultiCachedBuilder};
#[doc(inline)]
pub use serializers::{JsonSerializer, Serializer, StringSerializer};
#[doc(inline)]
pub use stampede::{CachedStampede, CachedStampedeBuilder};

#[doc(inline)]
pub use restash_backend::{BackendOps, CacheBackend, Error, Result};

#[cfg(feature = "memory")]
#[doc(inline)]
pub use restash_memory::MemoryBackend;

#[cfg(feature = "redis")]
#[doc(inline)]
pub use restash_redis::RedisBackend;
