// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the distributed lock.
//!
//! All timing runs under a paused Tokio clock; lease expiry in the mock
//! backend follows the same virtual clock.

use std::sync::Arc;
use std::time::Duration;

use restash::RedLock;
use restash_backend::testing::{BackendOp, MockBackend};

const LEASE: Duration = Duration::from_secs(2);

fn lock_key() -> String {
    RedLock::<MockBackend>::lock_key("report")
}

#[tokio::test(start_paused = true)]
async fn acquire_then_release_removes_the_record() {
    let backend = MockBackend::new();
    let lock = RedLock::new(backend.clone());

    let guard = lock.acquire("report", LEASE).await;
    assert!(guard.is_owned());
    assert!(backend.contains_key(&lock_key()));

    assert!(guard.release().await, "the owner's release removes the record");
    assert!(!backend.contains_key(&lock_key()));
}

#[tokio::test(start_paused = true)]
async fn the_record_carries_the_lease_as_ttl() {
    let backend = MockBackend::new();
    let lock = RedLock::new(backend.clone());

    let _guard = lock.acquire("report", LEASE).await;
    assert!(
        backend
            .operations()
            .iter()
            .any(|op| matches!(op, BackendOp::Add { key, ttl: Some(ttl), .. } if *key == lock_key() && *ttl == LEASE))
    );
}

#[tokio::test(start_paused = true)]
async fn contended_acquire_wakes_on_release() {
    let backend = MockBackend::new();
    let lock = Arc::new(RedLock::new(backend.clone()));

    let holder = lock.acquire("report", LEASE).await;
    assert!(holder.is_owned());

    let waiter = tokio::spawn({
        let lock = Arc::clone(&lock);
        async move {
            let started = tokio::time::Instant::now();
            let guard = lock.acquire("report", LEASE).await;
            (guard.is_owned(), started.elapsed())
        }
    });

    // Park the waiter, then release after 100ms of virtual time.
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(holder.release().await);

    let (owned, waited) = waiter.await.expect("waiter should not panic");
    assert!(!owned, "a waiter proceeds without ownership");
    assert!(
        waited < LEASE,
        "the release notification should wake the waiter before the lease runs out, waited {waited:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn waiter_without_release_waits_out_the_lease() {
    let backend = MockBackend::new();
    let lock = RedLock::new(backend.clone());

    let holder = lock.acquire("report", LEASE).await;
    assert!(holder.is_owned());

    let started = tokio::time::Instant::now();
    let waiter = lock.acquire("report", LEASE).await;
    assert!(!waiter.is_owned());
    assert!(started.elapsed() >= LEASE, "no release signal means waiting out the lease");
}

#[tokio::test(start_paused = true)]
async fn each_caller_attempts_add_once() {
    let backend = MockBackend::new();
    let lock = RedLock::new(backend.clone());

    // The holder's lease outlives the waiter's, so its record is still live
    // when both release below.
    let holder = lock.acquire("report", Duration::from_secs(30)).await;
    let waiter = lock.acquire("report", LEASE).await;

    let adds = backend
        .operations()
        .iter()
        .filter(|op| matches!(op, BackendOp::Add { key, .. } if *key == lock_key()))
        .count();
    assert_eq!(adds, 2, "contention must not spin against the backend");

    assert!(!waiter.release().await, "a non-owner's release removes nothing");
    assert!(holder.release().await);
}

#[tokio::test(start_paused = true)]
async fn expired_lease_frees_the_lock_for_the_next_caller() {
    let backend = MockBackend::new();
    let lock = RedLock::new(backend.clone());

    let crashed = lock.acquire("report", Duration::from_millis(100)).await;
    // Simulate a crashed holder: the guard never releases, not even on drop.
    std::mem::forget(crashed);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let next = lock.acquire("report", LEASE).await;
    assert!(next.is_owned(), "an expired record must not block new holders");
}

#[tokio::test(start_paused = true)]
async fn release_after_reacquisition_spares_the_new_holder() {
    let backend = MockBackend::new();
    let lock = RedLock::new(backend.clone());

    let stale = lock.acquire("report", Duration::from_millis(100)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Someone else holds the lock now, under a different token.
    let fresh = lock.acquire("report", LEASE).await;
    assert!(fresh.is_owned());

    let stale_released = stale.release().await;
    assert!(!stale_released, "an expired lock is simply gone for its old holder");
    assert!(backend.contains_key(&lock_key()), "the stale release must not remove the new holder's record");
    assert!(fresh.release().await);
}

#[tokio::test(start_paused = true)]
async fn dropped_guard_releases_in_the_background() {
    let backend = MockBackend::new();
    let lock = RedLock::new(backend.clone());

    let guard = lock.acquire("report", LEASE).await;
    assert!(backend.contains_key(&lock_key()));
    drop(guard);

    // The spawned release runs on the next scheduler turn.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!backend.contains_key(&lock_key()));
}

#[tokio::test(start_paused = true)]
async fn backend_failure_degrades_to_unowned() {
    let backend = MockBackend::new();
    backend.fail_when(|op| matches!(op, BackendOp::Add { .. }));
    let lock = RedLock::new(backend.clone());

    let started = tokio::time::Instant::now();
    let guard = lock.acquire("report", LEASE).await;
    assert!(!guard.is_owned(), "a broken backend must not fake ownership");
    assert!(started.elapsed() < Duration::from_millis(1), "failure must not stall the caller");
}
