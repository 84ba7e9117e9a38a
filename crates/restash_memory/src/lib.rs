// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-process cache backend for the restash caching library.
//!
//! [`MemoryBackend`] implements the `restash_backend` capability contract on
//! top of moka, which provides high-performance concurrent storage with
//! eviction. Per-record TTLs are honored through a moka expiry policy that
//! reads each record's own deadline, so records written with different TTLs
//! through one backend expire independently.

mod backend;
mod builder;

#[doc(inline)]
pub use backend::{MemoryBackend, MemoryConn};
#[doc(inline)]
pub use builder::MemoryBackendBuilder;
