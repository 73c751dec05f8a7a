use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::server::error::GradeError;
use crate::server::services::keypool::{mask_key, KeyPool};
use crate::server::services::rate_limit::SlidingWindowRateLimiter;

/// Runs tasks against the key pool with bounded concurrency, leasing one
/// credential per attempt and retrying with back-off on failure.
#[derive(Clone)]
pub struct Dispatcher {
    pool: Arc<dyn KeyPool>,
    limiter: Arc<SlidingWindowRateLimiter>,
    max_concurrent: usize,
    max_batch: usize,
    retry_count: u32,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<dyn KeyPool>,
        limiter: Arc<SlidingWindowRateLimiter>,
        max_concurrent: usize,
        max_batch: usize,
        retry_count: u32,
    ) -> Self {
        Self {
            pool,
            limiter,
            max_concurrent: max_concurrent.max(1),
            max_batch: max_batch.max(1),
            retry_count,
        }
    }

    /// Executes `runner(item, key)` for every item concurrently. The output
    /// preserves input order; failed items come back as `None`.
    pub async fn dispatch_all<T, R, F, Fut>(&self, mut items: Vec<T>, runner: F) -> Vec<Option<R>>
    where
        T: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(T, String) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<R, GradeError>> + Send + 'static,
    {
        if items.len() > self.max_batch {
            warn!(
                dropped = items.len() - self.max_batch,
                "batch exceeds fan-out bound, truncating"
            );
            items.truncate(self.max_batch);
        }
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let concurrency = self
            .pool
            .available_count()
            .await
            .min(self.max_concurrent)
            .min(total)
            .max(1);
        debug!(total, concurrency, "dispatching batch");

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(total);

        for (index, item) in items.into_iter().enumerate() {
            let dispatcher = self.clone();
            let runner = runner.clone();
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("dispatch semaphore closed");
                let outcome = dispatcher.execute_with_retry(item, runner).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if done % 5 == 0 || done == total {
                    info!(done, total, "batch progress");
                }
                (index, outcome)
            }));
        }

        let mut results: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
        for handle in handles {
            match handle.await {
                Ok((index, Ok(result))) => results[index] = Some(result),
                Ok((index, Err(e))) => {
                    warn!(index, error = %e, "batch item failed");
                }
                Err(e) => warn!(error = %e, "batch task panicked"),
            }
        }
        results
    }

    /// One item with up to `retry_count + 1` attempts. Admission exhaustion
    /// backs off without retiring anything; any other failure retires the
    /// leased key before the next attempt. The pool stays balanced either way.
    pub async fn execute_with_retry<T, R, F, Fut>(&self, item: T, runner: F) -> Result<R, GradeError>
    where
        T: Clone,
        F: Fn(T, String) -> Fut,
        Fut: Future<Output = Result<R, GradeError>>,
    {
        let attempts = self.retry_count + 1;
        for attempt in 1..=attempts {
            let key = match self.borrow_with_rate().await {
                Ok(key) => key,
                Err(GradeError::Exhausted) => {
                    warn!(attempt, "no key admitted, backing off");
                    if attempt < attempts {
                        sleep(Duration::from_millis(2000 * u64::from(attempt))).await;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };
            match runner(item.clone(), key.clone()).await {
                Ok(result) => {
                    self.pool.give_back(key).await;
                    return Ok(result);
                }
                Err(e) => {
                    warn!(key = %mask_key(&key), attempt, error = %e, "attempt failed, retiring key");
                    self.pool.mark_failed(key).await;
                    if attempt < attempts {
                        sleep(Duration::from_millis(1000 * u64::from(attempt))).await;
                    }
                }
            }
        }
        Err(GradeError::Upstream("AI 服务持续失败，已放弃重试".to_string()))
    }

    /// Borrow plus rate admission. A denied key goes straight back to the
    /// tail; after three denied rounds the caller sees `EXHAUSTED`.
    pub async fn borrow_with_rate(&self) -> Result<String, GradeError> {
        for round in 0..3 {
            let key = self.pool.borrow().await?;
            if self.limiter.try_acquire(&key) {
                return Ok(key);
            }
            debug!(key = %mask_key(&key), "rate budget spent, rotating");
            self.pool.give_back(key).await;
            if round < 2 {
                sleep(Duration::from_secs(1)).await;
            }
        }
        Err(GradeError::Exhausted)
    }

    pub fn pool(&self) -> Arc<dyn KeyPool> {
        self.pool.clone()
    }
}
