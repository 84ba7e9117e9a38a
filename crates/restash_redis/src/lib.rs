// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Redis-backed cache backend for the restash caching library.
//!
//! [`RedisBackend`] implements the `restash_backend` capability contract on
//! top of [redis-rs](https://github.com/redis-rs/redis-rs), using a managed
//! multiplexed connection shared by all leased handles. The wire protocol,
//! reconnection, and pipelining are the redis crate's concern; this crate maps
//! the capability set onto Redis commands:
//!
//! | Capability | Command |
//! |---|---|
//! | `get` / `set` | `GET` / `SET [PX ms]` |
//! | `multi_get` / `multi_set` | `MGET` / `MSET` or a `SET PX` pipeline |
//! | `add` | `SET NX [PX ms]` |
//! | `delete` / `exists` | `DEL` / `EXISTS` |
//! | `expire` | `PEXPIRE`, or `PERSIST` for a zero TTL |
//! | `increment` | `INCRBY` |
//! | `clear` | `FLUSHDB`, or `SCAN`+`DEL` when namespace-scoped |

mod backend;

#[doc(inline)]
pub use backend::{RedisBackend, RedisConn};
