use std::sync::Arc;

use tracing::{info, warn};

use crate::server::error::GradeError;
use crate::server::services::store::ResultStore;

const MAX_CALLS: u32 = 20;
const WINDOW_MINUTES: u32 = 5;

/// Per-user admission over the persisted call log: at most 20 grading calls
/// in the trailing 5 minutes. Anonymous requests pass.
pub struct FloodLimiter {
    store: Arc<dyn ResultStore>,
}

impl FloodLimiter {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    pub async fn check(&self, user_id: Option<i64>) -> Result<(), GradeError> {
        let Some(user_id) = user_id else {
            return Ok(());
        };
        match self.store.count_recent_calls(user_id, WINDOW_MINUTES).await {
            Ok(calls) if calls >= MAX_CALLS => {
                info!(user_id, calls, "flood limit hit");
                Err(GradeError::RateLimited)
            }
            Ok(_) => Ok(()),
            Err(e) => {
                // The counter is advisory; a broken store must not block
                // grading.
                warn!(user_id, error = %e, "flood check unavailable, admitting");
                Ok(())
            }
        }
    }
}
