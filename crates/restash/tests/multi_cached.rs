// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the multi-key decorator.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use restash::{Cache, CallSite, JsonSerializer, MemoryBackend, MultiCached};
use restash_backend::testing::{BackendOp, MockBackend};

fn mock_multi(backend: &MockBackend) -> MultiCached<MockBackend, JsonSerializer> {
    MultiCached::builder(Cache::builder(backend.clone()).build(), "ids").build()
}

fn call_with(ids: &[&str]) -> CallSite<'static> {
    let ids: Vec<String> = ids.iter().map(|id| (*id).to_owned()).collect();
    CallSite::new("app.users", "load_many").arg("ids", ids)
}

fn echo(missing: Vec<String>) -> HashMap<String, u64> {
    missing
        .into_iter()
        .map(|id| {
            let value = 100 + id.len() as u64;
            (id, value)
        })
        .collect()
}

#[tokio::test]
async fn partial_hit_computes_only_the_missing_subset() {
    let backend = MockBackend::new();
    let multi = mock_multi(&backend);

    // Warm "a" only.
    multi.cache().set("a", &1_u64, None).await.expect("warm write should succeed");
    backend.clear_operations();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let merged = multi
        .apply(&call_with(&["a", "b"]), |missing| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().expect("no poisoning").clone_from(&missing);
                missing.into_iter().map(|id| (id, 2_u64)).collect::<HashMap<_, _>>()
            }
        })
        .await;

    assert_eq!(merged, HashMap::from([("a".to_owned(), 1), ("b".to_owned(), 2)]));
    assert_eq!(*seen.lock().expect("no poisoning"), vec!["b".to_owned()], "only the miss reaches the computation");

    // One batch read for both keys, one batch write for the computed key only.
    let ops = backend.operations();
    assert!(ops.contains(&BackendOp::MultiGet(vec!["a".to_owned(), "b".to_owned()])));
    assert!(
        ops.iter()
            .any(|op| matches!(op, BackendOp::MultiSet { keys, .. } if *keys == vec!["b".to_owned()])),
        "hits must not be rewritten"
    );
}

#[tokio::test]
async fn full_hit_skips_the_computation() {
    let backend = MockBackend::new();
    let multi = mock_multi(&backend);

    multi.cache().set("a", &1_u64, None).await.expect("warm write should succeed");
    multi.cache().set("b", &2_u64, None).await.expect("warm write should succeed");

    let merged = multi
        .apply(&call_with(&["a", "b"]), |_| async { unreachable!("fully cached") })
        .await;
    assert_eq!(merged, HashMap::from([("a".to_owned(), 1_u64), ("b".to_owned(), 2)]));
}

#[tokio::test]
async fn empty_key_list_short_circuits_the_read() {
    let backend = MockBackend::new();
    let multi = mock_multi(&backend);
    let invocations = Arc::new(AtomicUsize::new(0));

    let merged: HashMap<String, u64> = multi
        .apply(&call_with(&[]), |missing| {
            let invocations = Arc::clone(&invocations);
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                assert!(missing.is_empty());
                HashMap::new()
            }
        })
        .await;

    assert!(merged.is_empty());
    assert_eq!(invocations.load(Ordering::SeqCst), 1, "the computation still runs once");
    assert!(
        !backend.operations().iter().any(|op| matches!(op, BackendOp::MultiGet(_))),
        "an empty batch must never touch the backend read"
    );
}

#[tokio::test]
async fn read_failure_degrades_to_all_missing() {
    let backend = MockBackend::new();
    let multi = mock_multi(&backend);

    multi.cache().set("a", &1_u64, None).await.expect("warm write should succeed");
    backend.fail_when(|op| matches!(op, BackendOp::MultiGet(_)));

    let merged = multi.apply(&call_with(&["a", "b"]), |missing| async move { echo(missing) }).await;

    // With the read gone, both keys were recomputed.
    assert_eq!(merged.len(), 2);
    assert_eq!(merged["a"], 101);
    assert_eq!(merged["b"], 101);
}

#[tokio::test]
async fn write_failure_is_dropped_silently() {
    let backend = MockBackend::new();
    backend.fail_when(|op| matches!(op, BackendOp::MultiSet { .. }));
    let multi = mock_multi(&backend);

    let merged = multi.apply(&call_with(&["a", "b"]), |missing| async move { echo(missing) }).await;
    assert_eq!(merged.len(), 2);

    // Nothing was cached, so the next call recomputes both.
    let invocations = Arc::new(AtomicUsize::new(0));
    let merged = multi
        .apply(&call_with(&["a", "b"]), |missing| {
            let invocations = Arc::clone(&invocations);
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                echo(missing)
            }
        })
        .await;
    assert_eq!(merged.len(), 2);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn computation_errors_propagate_unchanged() {
    let backend = MockBackend::new();
    let multi = mock_multi(&backend);

    let result: Result<HashMap<String, u64>, &str> =
        multi.try_apply(&call_with(&["a"]), |_| async { Err("load failed") }).await;
    assert_eq!(result, Err("load failed"));
}

#[tokio::test]
async fn key_transform_applies_to_cache_keys_only() {
    let backend = MockBackend::new();
    let multi = MultiCached::builder(Cache::builder(backend.clone()).build(), "ids")
        .key_builder(|key, call| format!("{}:{key}", call.function()))
        .build();

    let merged = multi.apply(&call_with(&["a"]), |missing| async move { echo(missing) }).await;

    // The result and the computation see raw keys; the backend sees
    // transformed ones.
    assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["a"]);
    let ops = backend.operations();
    assert!(ops.contains(&BackendOp::MultiGet(vec!["load_many:a".to_owned()])));
    assert!(
        ops.iter()
            .any(|op| matches!(op, BackendOp::MultiSet { keys, .. } if *keys == vec!["load_many:a".to_owned()]))
    );
}

#[tokio::test]
async fn transformed_hits_resolve_on_the_second_call() {
    let multi = MultiCached::builder(Cache::builder(MemoryBackend::new()).build(), "ids")
        .key_builder(|key, _| format!("v2:{key}"))
        .build();

    let first = multi.apply(&call_with(&["a"]), |missing| async move { echo(missing) }).await;
    let second = multi.apply(&call_with(&["a"]), |_| async { unreachable!("cached") }).await;
    assert_eq!(first, second);
}

#[tokio::test]
#[should_panic(expected = "no key-list argument")]
async fn missing_keys_argument_panics() {
    let multi = mock_multi(&MockBackend::new());
    let call = CallSite::new("app", "f").arg("other", "text");

    let _ = multi.apply(&call, |missing| async move { echo(missing) }).await;
}
