use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, error};

use super::{mask_key, KeyPool};
use crate::server::error::GradeError;

/// Shared pool for multi-instance deployments. Both queues live in Redis
/// lists; `BLPOP` gives the blocking borrow and `RPUSH` the tail rotation, so
/// cooperating dispatchers see one FIFO.
pub struct RedisKeyPool {
    conn: ConnectionManager,
    available_key: String,
    failed_key: String,
    known_key: String,
    borrow_timeout: Duration,
}

impl RedisKeyPool {
    pub async fn connect(url: &str, borrow_timeout: Duration) -> Result<Self, GradeError> {
        let client = redis::Client::open(url)
            .map_err(|e| GradeError::Fatal(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| GradeError::Fatal(format!("redis connect failed: {e}")))?;
        Ok(Self {
            conn,
            available_key: "inkgrade:keys:available".to_string(),
            failed_key: "inkgrade:keys:failed".to_string(),
            known_key: "inkgrade:keys:known".to_string(),
            borrow_timeout,
        })
    }
}

#[async_trait::async_trait]
impl KeyPool for RedisKeyPool {
    async fn borrow(&self) -> Result<String, GradeError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn
            .blpop(&self.available_key, self.borrow_timeout.as_secs_f64())
            .await
            .map_err(|e| {
                error!(error = %e, "redis BLPOP failed");
                GradeError::Exhausted
            })?;
        match popped {
            Some((_, key)) => {
                debug!(key = %mask_key(&key), "borrowed key");
                Ok(key)
            }
            None => Err(GradeError::Exhausted),
        }
    }

    async fn give_back(&self, key: String) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.rpush::<_, _, ()>(&self.available_key, &key).await {
            error!(key = %mask_key(&key), error = %e, "failed to return key");
        }
    }

    async fn mark_failed(&self, key: String) {
        let mut conn = self.conn.clone();
        debug!(key = %mask_key(&key), "retired key to failed queue");
        if let Err(e) = conn.rpush::<_, _, ()>(&self.failed_key, &key).await {
            error!(key = %mask_key(&key), error = %e, "failed to retire key");
        }
    }

    async fn add_keys(&self, keys: Vec<String>) {
        let mut conn = self.conn.clone();
        for key in keys {
            let added: i64 = match conn.sadd(&self.known_key, &key).await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "failed to register key");
                    continue;
                }
            };
            if added == 1 {
                if let Err(e) = conn.rpush::<_, _, ()>(&self.available_key, &key).await {
                    error!(key = %mask_key(&key), error = %e, "failed to seed key");
                }
            }
        }
    }

    async fn available_count(&self) -> usize {
        let mut conn = self.conn.clone();
        conn.llen::<_, usize>(&self.available_key).await.unwrap_or(0)
    }

    async fn failed_count(&self) -> usize {
        let mut conn = self.conn.clone();
        conn.llen::<_, usize>(&self.failed_key).await.unwrap_or(0)
    }

    async fn recover_failed_keys(&self) -> usize {
        let mut conn = self.conn.clone();
        let mut recovered = 0;
        loop {
            let popped: Option<String> = match conn.lpop(&self.failed_key, None).await {
                Ok(v) => v,
                Err(e) => {
                    error!(error = %e, "redis LPOP failed during recovery");
                    break;
                }
            };
            let Some(key) = popped else { break };
            if let Err(e) = conn.rpush::<_, _, ()>(&self.available_key, &key).await {
                error!(key = %mask_key(&key), error = %e, "failed to requeue recovered key");
                break;
            }
            recovered += 1;
        }
        recovered
    }
}
