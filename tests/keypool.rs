use std::sync::Arc;
use std::time::{Duration, Instant};

use inkgrade::server::error::GradeError;
use inkgrade::services::keypool::{mask_key, KeyPool, MemoryKeyPool};

async fn pool_with(keys: &[&str], timeout_ms: u64) -> MemoryKeyPool {
    let pool = MemoryKeyPool::new(Duration::from_millis(timeout_ms));
    let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    pool.add_keys(keys).await;
    pool
}

#[tokio::test]
async fn test_borrow_is_fifo_and_rotation_goes_to_tail() {
    let pool = pool_with(&["k1", "k2"], 500).await;

    let first = pool.borrow().await.unwrap();
    assert_eq!(first, "k1");
    pool.give_back(first).await;

    // k1 went to the tail, so the longest-idle key comes out next.
    assert_eq!(pool.borrow().await.unwrap(), "k2");
    assert_eq!(pool.borrow().await.unwrap(), "k1");
}

#[tokio::test]
async fn test_add_keys_is_idempotent() {
    let pool = pool_with(&["k1", "k2"], 500).await;
    pool.add_keys(vec!["k1".to_string(), "k3".to_string()]).await;
    assert_eq!(pool.available_count().await, 3);
}

#[tokio::test]
async fn test_borrow_times_out_with_exhausted() {
    let pool = MemoryKeyPool::new(Duration::from_millis(200));
    let started = Instant::now();
    let result = pool.borrow().await;
    assert!(matches!(result, Err(GradeError::Exhausted)));
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_mark_failed_and_recover_round_trip() {
    let pool = pool_with(&["k1"], 200).await;

    let key = pool.borrow().await.unwrap();
    pool.mark_failed(key).await;
    assert_eq!(pool.available_count().await, 0);
    assert_eq!(pool.failed_count().await, 1);

    // Nothing to borrow until recovery runs.
    assert!(matches!(pool.borrow().await, Err(GradeError::Exhausted)));

    assert_eq!(pool.recover_failed_keys().await, 1);
    assert_eq!(pool.failed_count().await, 0);
    assert_eq!(pool.borrow().await.unwrap(), "k1");
}

#[tokio::test]
async fn test_counts_account_for_every_key() {
    let pool = pool_with(&["k1", "k2", "k3"], 500).await;

    let leased = pool.borrow().await.unwrap();
    let failed = pool.borrow().await.unwrap();
    pool.mark_failed(failed).await;

    // available + failed + leased covers all keys added.
    assert_eq!(
        pool.available_count().await + pool.failed_count().await + 1,
        3
    );
    pool.give_back(leased).await;
    assert_eq!(pool.available_count().await + pool.failed_count().await, 3);
}

#[tokio::test]
async fn test_concurrent_borrowers_serialize_over_two_keys() {
    let pool = Arc::new(pool_with(&["k1", "k2"], 2_000).await);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let key = pool.borrow().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            pool.give_back(key).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(pool.available_count().await, 2);
}

#[test]
fn test_mask_key_keeps_only_leading_chars() {
    assert_eq!(mask_key("sk-abcdef1234567890"), "sk-abcde***");
    assert_eq!(mask_key("short"), "short***");
}
