// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Conformance tests for the in-process backend.
//!
//! TTL tests use real sleeps in the 100-200ms range because moka runs on its
//! own clock; keep the margins generous enough for slow CI machines.

use std::time::Duration;

use bytes::Bytes;
use restash_backend::{BackendOps, CacheBackend, Error, Result};
use restash_memory::MemoryBackend;

fn value(text: &'static str) -> Bytes {
    Bytes::from_static(text.as_bytes())
}

#[tokio::test]
async fn get_missing_returns_none() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    assert_eq!(conn.get("missing").await?, None);
    Ok(())
}

#[tokio::test]
async fn read_after_write() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.set("key", value("value"), None).await?;
    assert_eq!(conn.get("key").await?, Some(value("value")));
    Ok(())
}

#[tokio::test]
async fn set_with_ttl_expires() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.set("key", value("value"), Some(Duration::from_millis(100))).await?;
    assert_eq!(conn.get("key").await?, Some(value("value")));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(conn.get("key").await?, None);
    Ok(())
}

#[tokio::test]
async fn zero_ttl_means_no_expiration() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.set("key", value("value"), Some(Duration::ZERO)).await?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(conn.get("key").await?, Some(value("value")));
    Ok(())
}

#[tokio::test]
async fn multi_get_aligns_with_keys() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.set("a", value("1"), None).await?;
    let values = conn.multi_get(&["a".to_owned(), "b".to_owned()]).await?;
    assert_eq!(values, vec![Some(value("1")), None]);
    Ok(())
}

#[tokio::test]
async fn multi_set_with_ttl_expires_all() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    let pairs = vec![("a".to_owned(), value("1")), ("b".to_owned(), value("2"))];
    conn.multi_set(pairs, Some(Duration::from_millis(100))).await?;

    let values = conn.multi_get(&["a".to_owned(), "b".to_owned()]).await?;
    assert_eq!(values, vec![Some(value("1")), Some(value("2"))]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let values = conn.multi_get(&["a".to_owned(), "b".to_owned()]).await?;
    assert_eq!(values, vec![None, None]);
    Ok(())
}

#[tokio::test]
async fn add_missing_succeeds() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.add("key", value("value"), None).await?;
    assert_eq!(conn.get("key").await?, Some(value("value")));
    Ok(())
}

#[tokio::test]
async fn add_existing_collides() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.set("key", value("value"), None).await?;
    let err = conn.add("key", value("other"), None).await.expect_err("add should collide");
    assert!(matches!(err, Error::KeyAlreadyExists { .. }));

    // The original value survives the failed add.
    assert_eq!(conn.get("key").await?, Some(value("value")));
    Ok(())
}

#[tokio::test]
async fn add_succeeds_after_expiry() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.add("key", value("old"), Some(Duration::from_millis(100))).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    conn.add("key", value("new"), None).await?;
    assert_eq!(conn.get("key").await?, Some(value("new")));
    Ok(())
}

#[tokio::test]
async fn delete_reports_presence() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    assert!(!conn.delete("key").await?);

    conn.set("key", value("value"), None).await?;
    assert!(conn.delete("key").await?);
    assert_eq!(conn.get("key").await?, None);
    Ok(())
}

#[tokio::test]
async fn exists_tracks_liveness() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    assert!(!conn.exists("key").await?);
    conn.set("key", value("value"), None).await?;
    assert!(conn.exists("key").await?);
    Ok(())
}

#[tokio::test]
async fn expire_replaces_ttl() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.set("key", value("value"), None).await?;
    assert!(conn.expire("key", Duration::from_millis(100)).await?);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!conn.exists("key").await?);
    Ok(())
}

#[tokio::test]
async fn expire_with_zero_persists() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.set("key", value("value"), Some(Duration::from_millis(100))).await?;
    assert!(conn.expire("key", Duration::ZERO).await?);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(conn.exists("key").await?);
    Ok(())
}

#[tokio::test]
async fn expire_missing_returns_false() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    assert!(!conn.expire("key", Duration::from_secs(1)).await?);
    Ok(())
}

#[tokio::test]
async fn increment_creates_and_accumulates() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    assert_eq!(conn.increment("counter", 2).await?, 2);
    assert_eq!(conn.increment("counter", 2).await?, 4);
    assert_eq!(conn.increment("counter", -3).await?, 1);
    assert_eq!(conn.increment("negative", -2).await?, -2);
    Ok(())
}

#[tokio::test]
async fn increment_rejects_non_numeric() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.set("key", value("value"), None).await?;
    let err = conn.increment("key", 1).await.expect_err("should reject");
    assert!(matches!(err, Error::NotANumber { .. }));
    Ok(())
}

#[tokio::test]
async fn increment_preserves_remaining_ttl() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.set("counter", value("1"), Some(Duration::from_millis(150))).await?;
    assert_eq!(conn.increment("counter", 1).await?, 2);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(conn.get("counter").await?, None);
    Ok(())
}

#[tokio::test]
async fn clear_removes_everything() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.set("a", value("1"), None).await?;
    conn.set("b", value("2"), None).await?;
    conn.clear(None).await?;

    assert!(!conn.exists("a").await?);
    assert!(!conn.exists("b").await?);
    Ok(())
}

#[tokio::test]
async fn clear_with_namespace_spares_others() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;

    conn.set("test:a", value("1"), None).await?;
    conn.set("other:b", value("2"), None).await?;
    conn.clear(Some("test:")).await?;

    assert!(!conn.exists("test:a").await?);
    assert!(conn.exists("other:b").await?);
    Ok(())
}

#[tokio::test]
async fn close_keeps_data_and_reopens() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut conn = backend.acquire().await?;
    conn.set("key", value("value"), None).await?;

    backend.close().await?;

    let mut conn = backend.acquire().await?;
    conn.set("key", value("value"), None).await?;
    assert_eq!(conn.get("key").await?, Some(value("value")));
    Ok(())
}

#[tokio::test]
async fn clones_share_storage() -> Result<()> {
    let backend = MemoryBackend::new();
    let clone = backend.clone();

    let mut conn = backend.acquire().await?;
    conn.set("key", value("value"), None).await?;

    let mut other = clone.acquire().await?;
    assert_eq!(other.get("key").await?, Some(value("value")));
    Ok(())
}
