// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Pluggable value serialization.
//!
//! Backends store opaque byte strings; a [`Serializer`] decides how typed
//! values become those bytes and come back. Swap it per cache through
//! [`CacheBuilder::serializer`](crate::cache::CacheBuilder::serializer).

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use restash_backend::{Error, Result};

/// Converts values to and from backend-transportable bytes.
///
/// Serialization failures are classified as transient by the decorator layer:
/// a value that fails to decode reads as a cache miss, and a value that fails
/// to encode is simply not written.
pub trait Serializer: Send + Sync {
    /// Serializes a value into bytes.
    fn dumps<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes>;

    /// Deserializes a value from bytes.
    fn loads<T: DeserializeOwned>(&self, raw: &[u8]) -> Result<T>;
}

/// The default serializer: values as JSON documents.
///
/// # Examples
///
/// ```
/// use restash::{JsonSerializer, Serializer};
///
/// let bytes = JsonSerializer.dumps(&vec![1, 2, 3])?;
/// let back: Vec<i32> = JsonSerializer.loads(&bytes)?;
/// assert_eq!(back, vec![1, 2, 3]);
/// # Ok::<(), restash::Error>(())
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn dumps<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        serde_json::to_vec(value).map(Bytes::from).map_err(Error::serde)
    }

    fn loads<T: DeserializeOwned>(&self, raw: &[u8]) -> Result<T> {
        serde_json::from_slice(raw).map_err(Error::serde)
    }
}

/// A passthrough serializer for string-valued caches.
///
/// Values must serialize to plain strings; the stored bytes are the raw UTF-8
/// text with no framing, which keeps entries readable from other tooling and
/// lets `increment` interoperate with values written through the cache front.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringSerializer;

impl Serializer for StringSerializer {
    fn dumps<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        match serde_json::to_value(value).map_err(Error::serde)? {
            serde_json::Value::String(text) => Ok(Bytes::from(text)),
            other => Err(Error::serde(format!("StringSerializer requires string values, got {other}"))),
        }
    }

    fn loads<T: DeserializeOwned>(&self, raw: &[u8]) -> Result<T> {
        let text = std::str::from_utf8(raw).map_err(Error::serde)?;
        serde_json::from_value(serde_json::Value::String(text.to_owned())).map_err(Error::serde)
    }
}
