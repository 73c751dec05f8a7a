mod memory;
mod redis;

pub use memory::MemoryKeyPool;
pub use redis::RedisKeyPool;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::server::error::GradeError;
use crate::server::services::rate_limit::SlidingWindowRateLimiter;

/// Pool of upstream API credentials. A key is in exactly one of the available
/// or failed queues, or leased to a running task. Every successful `borrow`
/// must be balanced by exactly one `give_back` or `mark_failed`.
#[async_trait::async_trait]
pub trait KeyPool: Send + Sync {
    /// Takes the longest-idle key, waiting up to the configured borrow
    /// timeout. Fails with `EXHAUSTED` when nothing frees up in time.
    async fn borrow(&self) -> Result<String, GradeError>;

    /// Re-queues a healthy key at the tail, so rotation spreads load.
    async fn give_back(&self, key: String);

    /// Retires a key to the failed queue until the next recovery tick.
    async fn mark_failed(&self, key: String);

    /// Idempotent batch append; keys already known to the pool are skipped.
    async fn add_keys(&self, keys: Vec<String>);

    /// Best-effort size; callers must not rely on it for correctness.
    async fn available_count(&self) -> usize;

    async fn failed_count(&self) -> usize;

    /// Drains the failed queue back into the available queue, one key at a
    /// time, and returns how many were recovered.
    async fn recover_failed_keys(&self) -> usize;
}

/// The only sanctioned way to render a credential in logs.
pub fn mask_key(key: &str) -> String {
    let head: String = key.chars().take(8).collect();
    format!("{head}***")
}

/// Periodically returns cooled-down keys to the available queue and sweeps
/// idle rate windows.
pub fn spawn_recovery_ticker(
    pool: Arc<dyn KeyPool>,
    limiter: Arc<SlidingWindowRateLimiter>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately once; skip that tick so the first
        // recovery happens a full cooldown after startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let recovered = pool.recover_failed_keys().await;
            if recovered > 0 {
                info!(recovered, "recovered keys after cooldown");
            }
            let swept = limiter.sweep_idle();
            if swept > 0 {
                debug!(swept, "dropped idle rate windows");
            }
        }
    })
}
