// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring in-process backends.
//!
//! The builder abstracts the underlying moka configuration, providing a
//! stable surface without exposing moka's types.

use crate::backend::MemoryBackend;

/// Builder for configuring a [`MemoryBackend`].
///
/// # Examples
///
/// ```
/// use restash_memory::MemoryBackend;
///
/// let backend = MemoryBackend::builder()
///     .max_capacity(10_000)
///     .initial_capacity(100)
///     .name("user-cache")
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackendBuilder {
    pub(crate) max_capacity: Option<u64>,
    pub(crate) initial_capacity: Option<usize>,
    pub(crate) name: Option<String>,
}

impl MemoryBackendBuilder {
    /// Creates a new builder with default settings: an unbounded store with
    /// `TinyLFU` eviction and no blanket expiration (records expire only
    /// through per-record TTLs).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum capacity of the store.
    ///
    /// Once reached, records are evicted using moka's `TinyLFU` policy. If
    /// not set, the store is bounded only by available memory.
    #[must_use]
    pub fn max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = Some(capacity);
        self
    }

    /// Sets the initial capacity (pre-allocation hint).
    #[must_use]
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    /// Sets a name for the store; it may appear in logs from the underlying
    /// implementation.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds the configured [`MemoryBackend`].
    #[must_use]
    pub fn build(self) -> MemoryBackend {
        MemoryBackend::from_builder(&self)
    }
}
