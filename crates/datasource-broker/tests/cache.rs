// crates/datasource-broker/tests/cache.rs
// ============================================================================
// Module: Resolution Cache Tests
// Description: Coalescing, failure handling, and cancellation of the cache.
// Purpose: Ensure each key is computed at most once per render.
// Dependencies: datasource-broker, tokio, url
// ============================================================================
//! ## Overview
//! Drives [`datasource_broker::ResolutionCache`] with concurrent callers.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use datasource_broker::CacheKey;
use datasource_broker::CacheStatus;
use datasource_broker::CancellationToken;
use datasource_broker::HeaderSet;
use datasource_broker::ResolutionCache;
use datasource_broker::ResolveError;
use datasource_broker::SourceError;
use tokio::sync::Notify;
use url::Url;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a header-less cache key for `uri`.
fn key(uri: &str) -> CacheKey {
    CacheKey::new(&Url::parse(uri).unwrap(), &HeaderSet::new())
}

/// Counts the call, sleeps for `delay`, and yields `value`.
async fn slow_value(
    calls: &AtomicUsize,
    delay: Duration,
    value: u32,
) -> Result<u32, ResolveError> {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(delay).await;
    Ok(value)
}

/// Counts the call, sleeps for `delay`, and fails with a network error.
async fn slow_failure(calls: &AtomicUsize, delay: Duration) -> Result<u32, ResolveError> {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(delay).await;
    Err(ResolveError::fetch_failed(
        "http://example.com/flaky",
        SourceError::Network("connection reset".to_string()),
    ))
}

// ============================================================================
// SECTION: Coalescing
// ============================================================================

#[tokio::test]
async fn concurrent_callers_share_one_computation() {
    let cache: ResolutionCache<u32> = ResolutionCache::new();
    let cancel = CancellationToken::new();
    let calls = AtomicUsize::new(0);
    let key = key("http://example.com/shared");
    let delay = Duration::from_millis(50);

    let (first, second, third) = tokio::join!(
        cache.get_or_compute_with_status(&key, &cancel, || slow_value(&calls, delay, 1)),
        cache.get_or_compute_with_status(&key, &cancel, || slow_value(&calls, delay, 2)),
        cache.get_or_compute_with_status(&key, &cancel, || slow_value(&calls, delay, 3)),
    );

    assert_eq!(first.unwrap(), (1, CacheStatus::Miss));
    assert_eq!(second.unwrap(), (1, CacheStatus::Coalesced));
    assert_eq!(third.unwrap(), (1, CacheStatus::Coalesced));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn distinct_keys_compute_independently() {
    let cache: ResolutionCache<u32> = ResolutionCache::new();
    let cancel = CancellationToken::new();
    let calls = AtomicUsize::new(0);
    let delay = Duration::from_millis(10);
    let url = Url::parse("http://example.com/data").unwrap();
    let plain = CacheKey::new(&url, &HeaderSet::new());
    let authed = CacheKey::new(&url, &HeaderSet::new().with("Authorization", ["token"]));

    let (first, second) = tokio::join!(
        cache.get_or_compute(&plain, &cancel, || slow_value(&calls, delay, 1)),
        cache.get_or_compute(&authed, &cancel, || slow_value(&calls, delay, 2)),
    );

    assert_eq!((first.unwrap(), second.unwrap()), (1, 2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 2);
}

// ============================================================================
// SECTION: Failures
// ============================================================================

#[tokio::test]
async fn waiters_share_failure_and_next_caller_retries() {
    let cache: ResolutionCache<u32> = ResolutionCache::new();
    let cancel = CancellationToken::new();
    let calls = AtomicUsize::new(0);
    let key = key("http://example.com/flaky");
    let delay = Duration::from_millis(30);

    let (leader, waiter) = tokio::join!(
        cache.get_or_compute(&key, &cancel, || slow_failure(&calls, delay)),
        cache.get_or_compute(&key, &cancel, || slow_value(&calls, delay, 9)),
    );

    let leader_err = leader.unwrap_err();
    assert_eq!(leader_err.kind(), "network");
    assert_eq!(waiter.unwrap_err(), leader_err);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!cache.contains(&key));

    let (value, status) = cache
        .get_or_compute_with_status(&key, &cancel, || slow_value(&calls, Duration::ZERO, 5))
        .await
        .unwrap();
    assert_eq!((value, status), (5, CacheStatus::Miss));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// SECTION: Cancellation
// ============================================================================

#[tokio::test]
async fn cancelled_waiter_leaves_leader_running() {
    let cache: ResolutionCache<u32> = ResolutionCache::new();
    let leader_cancel = CancellationToken::new();
    let waiter_cancel = CancellationToken::new();
    let calls = AtomicUsize::new(0);
    let key = key("http://example.com/slow");
    let delay = Duration::from_millis(150);

    let (leader, waiter, ()) = tokio::join!(
        cache.get_or_compute(&key, &leader_cancel, || slow_value(&calls, delay, 4)),
        cache.get_or_compute(&key, &waiter_cancel, || slow_value(&calls, delay, 5)),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waiter_cancel.cancel();
        },
    );

    assert_eq!(leader.unwrap(), 4);
    assert_eq!(waiter.unwrap_err(), ResolveError::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get(&key), Some(4));
}

#[tokio::test]
async fn cancelled_leader_is_not_cached() {
    let cache: ResolutionCache<u32> = ResolutionCache::new();
    let cancel = CancellationToken::new();
    let calls = AtomicUsize::new(0);
    let key = key("http://example.com/abandoned");

    let (result, ()) = tokio::join!(
        cache.get_or_compute(&key, &cancel, || slow_value(&calls, Duration::from_secs(5), 1)),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        },
    );

    assert_eq!(result.unwrap_err(), ResolveError::Cancelled);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn dropped_leader_hands_over_to_waiter() {
    let cache: ResolutionCache<u32> = ResolutionCache::new();
    let cancel = CancellationToken::new();
    let calls = AtomicUsize::new(0);
    let key = key("http://example.com/handover");

    let (leader, waiter) = tokio::join!(
        tokio::time::timeout(
            Duration::from_millis(30),
            cache.get_or_compute(&key, &cancel, || slow_value(&calls, Duration::from_secs(5), 1)),
        ),
        cache.get_or_compute_with_status(&key, &cancel, || {
            slow_value(&calls, Duration::from_millis(10), 2)
        }),
    );

    assert!(leader.is_err());
    assert_eq!(waiter.unwrap(), (2, CacheStatus::Miss));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.get(&key), Some(2));
}

#[tokio::test]
async fn cancelled_leader_does_not_fail_live_waiter() {
    let cache: ResolutionCache<u32> = ResolutionCache::new();
    let leader_cancel = CancellationToken::new();
    let waiter_cancel = CancellationToken::new();
    let calls = AtomicUsize::new(0);
    let key = key("http://example.com/two-renders");

    let (leader, waiter, ()) = tokio::join!(
        cache.get_or_compute(&key, &leader_cancel, || {
            slow_value(&calls, Duration::from_secs(5), 1)
        }),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache
                .get_or_compute_with_status(&key, &waiter_cancel, || {
                    slow_value(&calls, Duration::from_millis(10), 2)
                })
                .await
        },
        async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            leader_cancel.cancel();
        },
    );

    assert_eq!(leader.unwrap_err(), ResolveError::Cancelled);
    assert_eq!(waiter.unwrap(), (2, CacheStatus::Miss));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.get(&key), Some(2));
}

#[tokio::test]
async fn completed_computation_wins_over_simultaneous_cancel() {
    for _ in 0..32 {
        let cache: ResolutionCache<u32> = ResolutionCache::new();
        let cancel = CancellationToken::new();
        let gate = Notify::new();
        let key = key("http://example.com/raced");

        let (result, ()) = tokio::join!(
            cache.get_or_compute(&key, &cancel, || async {
                gate.notified().await;
                Ok(7)
            }),
            async {
                tokio::task::yield_now().await;
                gate.notify_one();
                cancel.cancel();
            },
        );

        assert_eq!(result.unwrap(), 7);
        assert_eq!(cache.get(&key), Some(7));
    }
}
