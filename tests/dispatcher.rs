use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use inkgrade::server::error::GradeError;
use inkgrade::services::dispatcher::Dispatcher;
use inkgrade::services::keypool::{KeyPool, MemoryKeyPool};
use inkgrade::services::rate_limit::SlidingWindowRateLimiter;

async fn setup(
    keys: &[&str],
    max_concurrent: usize,
    retry_count: u32,
    window: Duration,
    max_requests: usize,
    borrow_timeout: Duration,
) -> (Dispatcher, Arc<MemoryKeyPool>) {
    let pool = Arc::new(MemoryKeyPool::new(borrow_timeout));
    pool.add_keys(keys.iter().map(|k| k.to_string()).collect())
        .await;
    let limiter = Arc::new(SlidingWindowRateLimiter::new(window, max_requests));
    let dispatcher = Dispatcher::new(pool.clone(), limiter, max_concurrent, 30, retry_count);
    (dispatcher, pool)
}

#[tokio::test]
async fn test_serial_batch_rotates_keys_fairly() {
    let (dispatcher, pool) = setup(
        &["k1", "k2"],
        1,
        0,
        Duration::from_secs(60),
        50,
        Duration::from_secs(1),
    )
    .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_runner = seen.clone();
    let results = dispatcher
        .dispatch_all(vec![1, 2, 3, 4], move |item: i32, key: String| {
            let seen = seen_in_runner.clone();
            async move {
                seen.lock().unwrap().push(key.clone());
                Ok::<String, GradeError>(format!("{item}:{key}"))
            }
        })
        .await;

    assert_eq!(results.iter().flatten().count(), 4);
    assert_eq!(pool.available_count().await, 2);
    assert_eq!(*seen.lock().unwrap(), vec!["k1", "k2", "k1", "k2"]);
}

#[tokio::test]
async fn test_results_keep_input_order() {
    let (dispatcher, _pool) = setup(
        &["k1", "k2"],
        2,
        0,
        Duration::from_secs(60),
        50,
        Duration::from_secs(2),
    )
    .await;

    let results = dispatcher
        .dispatch_all(vec![1u64, 2, 3, 4, 5], |item: u64, _key: String| async move {
            // Later items finish first to exercise re-ordering.
            tokio::time::sleep(Duration::from_millis(60 - item * 10)).await;
            Ok::<u64, GradeError>(item * 10)
        })
        .await;

    assert_eq!(
        results,
        vec![Some(10), Some(20), Some(30), Some(40), Some(50)]
    );
}

#[tokio::test]
async fn test_batch_is_truncated_to_fanout_bound() {
    let pool = Arc::new(MemoryKeyPool::new(Duration::from_secs(1)));
    pool.add_keys(vec!["k1".to_string()]).await;
    let limiter = Arc::new(SlidingWindowRateLimiter::new(Duration::from_secs(60), 50));
    let dispatcher = Dispatcher::new(pool, limiter, 1, 2, 0);

    let results = dispatcher
        .dispatch_all(vec![1, 2, 3, 4], |item: i32, _key: String| async move {
            Ok::<i32, GradeError>(item)
        })
        .await;
    assert_eq!(results, vec![Some(1), Some(2)]);
}

// A single key with a 2-admission budget and a moving 1-second window: the
// third task sees one admission denial and succeeds after the window slides.
#[tokio::test]
async fn test_admission_denial_recovers_after_window() {
    let (dispatcher, pool) = setup(
        &["k1"],
        1,
        3,
        Duration::from_secs(1),
        2,
        Duration::from_secs(1),
    )
    .await;

    let started = Instant::now();
    let results = dispatcher
        .dispatch_all(vec![1, 2, 3], |item: i32, _key: String| async move {
            Ok::<i32, GradeError>(item)
        })
        .await;

    assert_eq!(results, vec![Some(1), Some(2), Some(3)]);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(pool.available_count().await, 1);
}

// Failing upstream path: the key is retired, the empty pool turns later
// borrows into EXHAUSTED, retries run out, and recovery brings the key back.
#[tokio::test]
async fn test_failure_retires_key_until_recovery() {
    let (dispatcher, pool) = setup(
        &["k1"],
        1,
        1,
        Duration::from_secs(60),
        50,
        Duration::from_millis(300),
    )
    .await;

    let outcome = dispatcher
        .execute_with_retry(0, |_item: i32, _key: String| async move {
            Err::<(), GradeError>(GradeError::Upstream("HTTP 500".to_string()))
        })
        .await;

    let err = outcome.expect_err("retries must be exhausted");
    assert_eq!(err.code(), "AI_ERROR");
    assert_eq!(pool.available_count().await, 0);
    assert_eq!(pool.failed_count().await, 1);

    assert_eq!(pool.recover_failed_keys().await, 1);
    assert_eq!(pool.borrow().await.unwrap(), "k1");
}

#[tokio::test]
async fn test_borrow_with_rate_gives_up_after_three_denials() {
    let (dispatcher, pool) = setup(
        &["k1"],
        1,
        0,
        Duration::from_secs(60),
        1,
        Duration::from_millis(300),
    )
    .await;

    assert!(dispatcher.borrow_with_rate().await.is_ok());
    dispatcher.pool().give_back("k1".to_string()).await;

    let started = Instant::now();
    let denied = dispatcher.borrow_with_rate().await;
    assert!(matches!(denied, Err(GradeError::Exhausted)));
    // Three borrow rounds with two 1-second waits in between.
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(pool.available_count().await, 1);
}
