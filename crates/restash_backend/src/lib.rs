// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Core backend abstractions for the restash caching library.
//!
//! This crate defines the [`CacheBackend`] and [`BackendOps`] traits that all
//! storage backends must satisfy, along with the shared [`Error`] type.
//!
//! # Overview
//!
//! The backend abstraction separates storage from caching semantics. A backend
//! stores opaque byte strings under opaque string keys and leases scoped
//! connections; the `restash` crate layers key derivation, serialization,
//! stampede protection, and the decorator API on top.
//!
//! # Implementing a backend
//!
//! Implement [`CacheBackend`] for the client type and [`BackendOps`] for its
//! leased connection handle. The handle is the unit of connection scoping: a
//! caller that acquires one issues a bounded sequence of operations against the
//! same underlying connection and releases it by dropping the handle.
//!
//! # Testing
//!
//! Enable the `test-util` feature for [`testing::MockBackend`], an in-memory
//! backend with operation recording and failure injection.

mod backend;
pub mod error;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use backend::{BackendOps, CacheBackend};
#[doc(inline)]
pub use error::{BoxError, Error, Result};
