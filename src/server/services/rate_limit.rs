use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Per-credential sliding-window admission. Windows are keyed by a stable
/// fingerprint so the plaintext credential is never retained here.
pub struct SlidingWindowRateLimiter {
    windows: DashMap<u64, VecDeque<Instant>>,
    window: Duration,
    max_requests: usize,
}

impl SlidingWindowRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            max_requests,
        }
    }

    pub fn fingerprint(key: &str) -> u64 {
        let digest = Sha256::digest(key.as_bytes());
        u64::from_be_bytes(digest[..8].try_into().expect("digest shorter than 8 bytes"))
    }

    /// Admits the credential if fewer than `max_requests` admissions fall in
    /// the trailing window, recording the admission atomically with the
    /// decision. Stale entries are discarded on the way in, which amortizes
    /// cleanup over admissions.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(Self::fingerprint(key)).or_default();
        let window = entry.value_mut();
        Self::evict(window, now, self.window);
        if window.len() >= self.max_requests {
            return false;
        }
        window.push_back(now);
        true
    }

    pub fn remaining_quota(&self, key: &str) -> usize {
        let now = Instant::now();
        let mut entry = self.windows.entry(Self::fingerprint(key)).or_default();
        let window = entry.value_mut();
        Self::evict(window, now, self.window);
        self.max_requests.saturating_sub(window.len())
    }

    /// Drops windows whose newest entry aged past `window + 10s`, so idle
    /// credentials do not pin memory. Returns how many were dropped.
    pub fn sweep_idle(&self) -> usize {
        let before = self.windows.len();
        let grace = self.window + Duration::from_secs(10);
        self.windows
            .retain(|_, window| window.back().is_some_and(|t| t.elapsed() < grace));
        before - self.windows.len()
    }

    fn evict(window: &mut VecDeque<Instant>, now: Instant, length: Duration) {
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= length)
        {
            window.pop_front();
        }
    }
}
