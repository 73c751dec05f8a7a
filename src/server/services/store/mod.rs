mod memory;
mod postgres;

pub use memory::InMemoryResultStore;
pub use postgres::PostgresResultStore;

use anyhow::Result;
use serde::Serialize;

use crate::server::models::{BatchResult, SingleCharResult, Template};

/// One row of a user's grading history listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub task_id: String,
    pub total_characters: u32,
    pub avg_overall_score: i32,
    pub summary_comment: String,
    pub created_at: String,
}

/// One past grading of a specific character, for growth-curve queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthPoint {
    pub task_id: String,
    pub recognized_char: String,
    pub structure_score: i32,
    pub stroke_score: i32,
    pub overall_score: i32,
    pub created_at: String,
}

/// Persistence collaborator. Write failures are the caller's to log and
/// swallow; a lost record never fails a successful grading.
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_result(
        &self,
        result: &BatchResult,
        file_name: &str,
        user_id: Option<i64>,
        copybook_id: Option<i64>,
    ) -> Result<()>;

    async fn save_single_result(&self, result: &SingleCharResult, user_id: Option<i64>)
        -> Result<()>;

    async fn log_key_usage(
        &self,
        key_masked: &str,
        task_id: &str,
        success: bool,
        latency_ms: u64,
    ) -> Result<()>;

    async fn find_by_task_id(&self, task_id: &str) -> Result<Option<BatchResult>>;

    /// Grading calls (whole-page and single-char) by this user within the
    /// trailing `minutes`.
    async fn count_recent_calls(&self, user_id: i64, minutes: u32) -> Result<u32>;

    async fn history(&self, user_id: i64, limit: u32) -> Result<Vec<HistoryEntry>>;

    async fn growth_curve(&self, user_id: i64, character: &str) -> Result<Vec<GrowthPoint>>;

    async fn list_templates(&self) -> Result<Vec<Template>>;

    async fn find_template(&self, id: i64) -> Result<Option<Template>>;
}

/// Cutoff in storage format for "within the trailing `minutes`" queries. The
/// `YYYY-MM-DD HH:MM:SS` format compares correctly as a string.
pub(crate) fn cutoff_timestamp(minutes: u32) -> String {
    (chrono::Local::now() - chrono::Duration::minutes(i64::from(minutes)))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
