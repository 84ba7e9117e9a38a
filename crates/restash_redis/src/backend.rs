// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Redis backend implementation.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;

use restash_backend::{BackendOps, CacheBackend, Error, Result};

/// A Redis-backed cache backend.
///
/// Backed by [`ConnectionManager`], which multiplexes all leased handles over
/// one managed connection and transparently reconnects after failures. The
/// connection is established lazily on the first lease; [`CacheBackend::close`]
/// drops it and a later lease re-establishes it.
///
/// TTLs are applied in milliseconds (`PX`), so sub-second durations round-trip.
/// A zero TTL stores without expiry, and `expire(key, 0)` maps to `PERSIST`.
///
/// # Examples
///
/// ```no_run
/// use restash_redis::RedisBackend;
///
/// # fn main() -> restash_backend::Result<()> {
/// let backend = RedisBackend::new("redis://127.0.0.1:6379/0")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    client: redis::Client,
    manager: Arc<Mutex<Option<ConnectionManager>>>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("connection_info", &self.client.get_connection_info())
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Creates a backend for the given connection URL.
    ///
    /// No connection is made here; the first lease establishes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse as Redis connection info.
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(Error::backend)?;
        Ok(Self {
            client,
            manager: Arc::new(Mutex::new(None)),
        })
    }

    async fn managed_connection(&self) -> Result<ConnectionManager> {
        let mut slot = self.manager.lock().await;
        if let Some(manager) = slot.as_ref() {
            return Ok(manager.clone());
        }
        let manager = self.client.get_connection_manager().await.map_err(Error::backend)?;
        *slot = Some(manager.clone());
        Ok(manager)
    }
}

impl CacheBackend for RedisBackend {
    type Conn = RedisConn;

    async fn acquire(&self) -> Result<Self::Conn> {
        Ok(RedisConn {
            conn: self.managed_connection().await?,
        })
    }

    async fn close(&self) -> Result<()> {
        *self.manager.lock().await = None;
        Ok(())
    }
}

fn ttl_millis(ttl: Option<Duration>) -> Option<u64> {
    match ttl {
        None | Some(Duration::ZERO) => None,
        Some(ttl) => Some(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
    }
}

/// Leased handle onto a [`RedisBackend`].
///
/// Every operation issued through one handle runs on the backend's managed
/// connection.
pub struct RedisConn {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConn").finish_non_exhaustive()
    }
}

impl BackendOps for RedisConn {
    async fn get(&mut self, key: &str) -> Result<Option<Bytes>> {
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn)
            .await
            .map_err(Error::backend)?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&mut self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());
        if let Some(millis) = ttl_millis(ttl) {
            cmd.arg("PX").arg(millis);
        }
        cmd.query_async::<()>(&mut self.conn).await.map_err(Error::backend)
    }

    async fn multi_get(&mut self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.conn)
            .await
            .map_err(Error::backend)?;
        Ok(values.into_iter().map(|value| value.map(Bytes::from)).collect())
    }

    async fn multi_set(&mut self, pairs: Vec<(String, Bytes)>, ttl: Option<Duration>) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        match ttl_millis(ttl) {
            None => {
                let mut cmd = redis::cmd("MSET");
                for (key, value) in &pairs {
                    cmd.arg(key).arg(value.as_ref());
                }
                cmd.query_async::<()>(&mut self.conn).await.map_err(Error::backend)
            }
            Some(millis) => {
                let mut pipe = redis::pipe();
                for (key, value) in &pairs {
                    pipe.cmd("SET").arg(key).arg(value.as_ref()).arg("PX").arg(millis).ignore();
                }
                pipe.query_async::<()>(&mut self.conn).await.map_err(Error::backend)
            }
        }
    }

    async fn add(&mut self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref()).arg("NX");
        if let Some(millis) = ttl_millis(ttl) {
            cmd.arg("PX").arg(millis);
        }
        let reply: Option<String> = cmd.query_async(&mut self.conn).await.map_err(Error::backend)?;
        match reply {
            Some(_) => Ok(()),
            None => Err(Error::key_already_exists(key)),
        }
    }

    async fn delete(&mut self, key: &str) -> Result<bool> {
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn)
            .await
            .map_err(Error::backend)?;
        Ok(removed > 0)
    }

    async fn exists(&mut self, key: &str) -> Result<bool> {
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn)
            .await
            .map_err(Error::backend)
    }

    async fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        match ttl_millis(Some(ttl)) {
            None => redis::cmd("PERSIST")
                .arg(key)
                .query_async(&mut self.conn)
                .await
                .map_err(Error::backend),
            Some(millis) => redis::cmd("PEXPIRE")
                .arg(key)
                .arg(millis)
                .query_async(&mut self.conn)
                .await
                .map_err(Error::backend),
        }
    }

    async fn increment(&mut self, key: &str, delta: i64) -> Result<i64> {
        redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut self.conn)
            .await
            .map_err(|error| {
                if error.to_string().contains("not an integer") {
                    Error::not_a_number(key)
                } else {
                    Error::backend(error)
                }
            })
    }

    async fn clear(&mut self, namespace: Option<&str>) -> Result<()> {
        let Some(prefix) = namespace else {
            return redis::cmd("FLUSHDB")
                .query_async(&mut self.conn)
                .await
                .map_err(Error::backend);
        };

        let pattern = format!("{}*", prefix.replace('*', "\\*").replace('?', "\\?"));
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut self.conn)
                .await
                .map_err(Error::backend)?;
            if !keys.is_empty() {
                redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<()>(&mut self.conn)
                    .await
                    .map_err(Error::backend)?;
            }
            if next == 0 {
                return Ok(());
            }
            cursor = next;
        }
    }
}
