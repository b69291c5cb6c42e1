mod common;

use common::test_helpers::{channel_messages, key, limiter, ok, response};
use http::StatusCode;
use paceline::{RatelimitResponse, Release, WaitContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn same_key_is_never_held_twice() {
    let limiter = limiter();
    let key = key(&limiter, 1);
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let limiter = limiter.clone();
        let key = key.clone();
        let inside = inside.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            let permit = limiter.wait_bucket(&WaitContext::new(), &key).await.unwrap();
            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            inside.fetch_sub(1, Ordering::SeqCst);
            limiter.unlock_bucket(permit, None).await.unwrap();
        }));
    }
    for handle in futures::future::join_all(handles).await {
        handle.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn distinct_major_parameters_do_not_block_each_other() {
    let limiter = limiter();
    let a = key(&limiter, 1);
    let b = key(&limiter, 2);
    assert_ne!(a, b);

    let held = limiter.wait_bucket(&WaitContext::new(), &a).await.unwrap();
    let start = Instant::now();
    let other = tokio::time::timeout(
        Duration::from_millis(10),
        limiter.wait_bucket(&WaitContext::new(), &b),
    )
    .await
    .expect("independent bucket must not wait")
    .unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(limiter.is_locked(&a));
    assert!(limiter.is_locked(&b));

    drop(other);
    drop(held);
}

#[tokio::test(start_paused = true)]
async fn exhausted_bucket_waits_for_reset() {
    let limiter = limiter();
    let key = key(&limiter, 1);

    let permit = limiter.wait_bucket(&WaitContext::new(), &key).await.unwrap();
    let exhausted = ok(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset-after", "0.2")]);
    limiter.unlock_bucket(permit, Some(exhausted.meta())).await.unwrap();

    let start = Instant::now();
    let permit = limiter.wait_bucket(&WaitContext::new(), &key).await.unwrap();
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(200), "waited {waited:?}");
    assert!(waited < Duration::from_millis(210), "waited {waited:?}");
    drop(permit);
}

#[tokio::test(start_paused = true)]
async fn global_429_delays_other_buckets() {
    let limiter = limiter();
    let a = key(&limiter, 1);
    let b = key(&limiter, 2);

    // B has a healthy window of its own.
    let permit = limiter.wait_bucket(&WaitContext::new(), &b).await.unwrap();
    let healthy = ok(&[("x-ratelimit-remaining", "9"), ("x-ratelimit-reset-after", "60")]);
    limiter.unlock_bucket(permit, Some(healthy.meta())).await.unwrap();
    let b_before = limiter.bucket_snapshot(&b).unwrap();

    let permit = limiter.wait_bucket(&WaitContext::new(), &a).await.unwrap();
    let global = response(
        StatusCode::TOO_MANY_REQUESTS,
        &[("retry-after", "0.5"), ("x-ratelimit-global", "true"), ("via", "1.1 google")],
    );
    let released = limiter.unlock_bucket(permit, Some(global.meta())).await.unwrap();
    assert!(released.is_exceeded());

    let start = Instant::now();
    let permit = limiter.wait_bucket(&WaitContext::new(), &b).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert_eq!(permit.state(), &b_before);
}

#[tokio::test(start_paused = true)]
async fn first_acquire_of_unseen_key_is_immediate() {
    let limiter = limiter();
    let key = key(&limiter, 99);
    assert!(!limiter.contains(&key));

    let start = Instant::now();
    let permit = limiter.wait_bucket(&WaitContext::new(), &key).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(permit.state().limit(), None);
    assert_eq!(permit.state().reset_at(), None);
}

#[tokio::test(start_paused = true)]
async fn applying_same_response_twice_is_idempotent() {
    let limiter = limiter();
    let key = key(&limiter, 1);
    let resp = ok(&[
        ("x-ratelimit-bucket", "abc"),
        ("x-ratelimit-limit", "5"),
        ("x-ratelimit-remaining", "3"),
        ("x-ratelimit-reset-after", "1.5"),
    ]);

    let permit = limiter.wait_bucket(&WaitContext::new(), &key).await.unwrap();
    limiter.unlock_bucket(permit, Some(resp.meta())).await.unwrap();
    let once = limiter.bucket_snapshot(&key).unwrap();

    let permit = limiter.wait_bucket(&WaitContext::new(), &key).await.unwrap();
    limiter.unlock_bucket(permit, Some(resp.meta())).await.unwrap();
    let twice = limiter.bucket_snapshot(&key).unwrap();

    assert_eq!(once, twice);
}

#[tokio::test(start_paused = true)]
async fn bucket_429_leaves_other_buckets_alone() {
    let limiter = limiter();
    let a = key(&limiter, 1);
    let b = key(&limiter, 2);

    let permit = limiter.wait_bucket(&WaitContext::new(), &a).await.unwrap();
    let limited = response(StatusCode::TOO_MANY_REQUESTS, &[("retry-after", "5"), ("via", "1.1 google")]);
    let released = limiter.unlock_bucket(permit, Some(limited.meta())).await.unwrap();
    assert!(matches!(released, Release::Exceeded { .. }));

    let start = Instant::now();
    drop(limiter.wait_bucket(&WaitContext::new(), &b).await.unwrap());
    assert_eq!(start.elapsed(), Duration::ZERO);

    let route = channel_messages(1);
    assert_eq!(limiter.resolve(&route), a);
}
