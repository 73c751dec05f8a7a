use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use super::{mask_key, KeyPool};
use crate::server::error::GradeError;

/// In-process pool: the available queue is an unbounded channel (FIFO, one
/// receiver guarded by an async mutex so concurrent borrowers serialize), the
/// failed queue a plain deque.
pub struct MemoryKeyPool {
    tx: mpsc::UnboundedSender<String>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    available: AtomicUsize,
    failed: Mutex<VecDeque<String>>,
    known: Mutex<HashSet<String>>,
    borrow_timeout: Duration,
}

impl MemoryKeyPool {
    pub fn new(borrow_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            available: AtomicUsize::new(0),
            failed: Mutex::new(VecDeque::new()),
            known: Mutex::new(HashSet::new()),
            borrow_timeout,
        }
    }

    fn enqueue(&self, key: String) {
        // The receiver lives as long as self, so the send cannot fail.
        if self.tx.send(key).is_ok() {
            self.available.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait::async_trait]
impl KeyPool for MemoryKeyPool {
    async fn borrow(&self) -> Result<String, GradeError> {
        // One deadline covers both waiting for the receiver and waiting for a
        // key, so a queued borrower cannot wait longer than the timeout.
        let deadline = Instant::now() + self.borrow_timeout;
        let Ok(mut rx) = timeout_at(deadline, self.rx.lock()).await else {
            return Err(GradeError::Exhausted);
        };
        match timeout_at(deadline, rx.recv()).await {
            Ok(Some(key)) => {
                self.available.fetch_sub(1, Ordering::SeqCst);
                debug!(key = %mask_key(&key), "borrowed key");
                Ok(key)
            }
            _ => Err(GradeError::Exhausted),
        }
    }

    async fn give_back(&self, key: String) {
        debug!(key = %mask_key(&key), "returned key");
        self.enqueue(key);
    }

    async fn mark_failed(&self, key: String) {
        debug!(key = %mask_key(&key), "retired key to failed queue");
        self.failed.lock().expect("failed queue poisoned").push_back(key);
    }

    async fn add_keys(&self, keys: Vec<String>) {
        let mut known = self.known.lock().expect("known set poisoned");
        for key in keys {
            if known.insert(key.clone()) {
                self.enqueue(key);
            }
        }
    }

    async fn available_count(&self) -> usize {
        self.available.load(Ordering::SeqCst)
    }

    async fn failed_count(&self) -> usize {
        self.failed.lock().expect("failed queue poisoned").len()
    }

    async fn recover_failed_keys(&self) -> usize {
        let drained: Vec<String> = {
            let mut failed = self.failed.lock().expect("failed queue poisoned");
            failed.drain(..).collect()
        };
        let count = drained.len();
        for key in drained {
            self.enqueue(key);
        }
        count
    }
}
