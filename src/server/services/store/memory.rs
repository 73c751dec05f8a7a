use std::sync::Mutex;

use anyhow::Result;

use super::{cutoff_timestamp, GrowthPoint, HistoryEntry, ResultStore};
use crate::server::models::{default_templates, BatchResult, SingleCharResult, Template};

struct StoredBatch {
    result: BatchResult,
    user_id: Option<i64>,
}

struct StoredSingle {
    created_at: String,
    user_id: Option<i64>,
}

/// Volatile store used in tests and database-less deployments.
pub struct InMemoryResultStore {
    batches: Mutex<Vec<StoredBatch>>,
    singles: Mutex<Vec<StoredSingle>>,
    key_logs: Mutex<Vec<(String, String, bool, u64)>>,
    templates: Vec<Template>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            singles: Mutex::new(Vec::new()),
            key_logs: Mutex::new(Vec::new()),
            templates: default_templates(),
        }
    }

    pub fn key_log_count(&self) -> usize {
        self.key_logs.lock().expect("key log poisoned").len()
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save_result(
        &self,
        result: &BatchResult,
        _file_name: &str,
        user_id: Option<i64>,
        _copybook_id: Option<i64>,
    ) -> Result<()> {
        self.batches
            .lock()
            .expect("batch store poisoned")
            .push(StoredBatch {
                result: result.clone(),
                user_id,
            });
        Ok(())
    }

    async fn save_single_result(
        &self,
        result: &SingleCharResult,
        user_id: Option<i64>,
    ) -> Result<()> {
        self.singles
            .lock()
            .expect("single store poisoned")
            .push(StoredSingle {
                created_at: result.created_at.clone(),
                user_id,
            });
        Ok(())
    }

    async fn log_key_usage(
        &self,
        key_masked: &str,
        task_id: &str,
        success: bool,
        latency_ms: u64,
    ) -> Result<()> {
        self.key_logs.lock().expect("key log poisoned").push((
            key_masked.to_string(),
            task_id.to_string(),
            success,
            latency_ms,
        ));
        Ok(())
    }

    async fn find_by_task_id(&self, task_id: &str) -> Result<Option<BatchResult>> {
        Ok(self
            .batches
            .lock()
            .expect("batch store poisoned")
            .iter()
            .find(|stored| stored.result.task_id == task_id)
            .map(|stored| stored.result.clone()))
    }

    async fn count_recent_calls(&self, user_id: i64, minutes: u32) -> Result<u32> {
        let cutoff = cutoff_timestamp(minutes);
        let batches = self
            .batches
            .lock()
            .expect("batch store poisoned")
            .iter()
            .filter(|stored| stored.user_id == Some(user_id) && stored.result.created_at >= cutoff)
            .count();
        let singles = self
            .singles
            .lock()
            .expect("single store poisoned")
            .iter()
            .filter(|stored| stored.user_id == Some(user_id) && stored.created_at >= cutoff)
            .count();
        Ok((batches + singles) as u32)
    }

    async fn history(&self, user_id: i64, limit: u32) -> Result<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = self
            .batches
            .lock()
            .expect("batch store poisoned")
            .iter()
            .filter(|stored| stored.user_id == Some(user_id))
            .map(|stored| HistoryEntry {
                task_id: stored.result.task_id.clone(),
                total_characters: stored.result.total_characters,
                avg_overall_score: stored.result.avg_overall_score,
                summary_comment: stored.result.summary_comment.clone(),
                created_at: stored.result.created_at.clone(),
            })
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn growth_curve(&self, user_id: i64, character: &str) -> Result<Vec<GrowthPoint>> {
        let mut points: Vec<GrowthPoint> = self
            .batches
            .lock()
            .expect("batch store poisoned")
            .iter()
            .filter(|stored| stored.user_id == Some(user_id))
            .flat_map(|stored| {
                stored
                    .result
                    .analyses
                    .iter()
                    .filter(|analysis| analysis.recognized_char == character)
                    .map(|analysis| GrowthPoint {
                        task_id: stored.result.task_id.clone(),
                        recognized_char: analysis.recognized_char.clone(),
                        structure_score: analysis.structure_score,
                        stroke_score: analysis.stroke_score,
                        overall_score: analysis.overall_score,
                        created_at: stored.result.created_at.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        points.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(points)
    }

    async fn list_templates(&self) -> Result<Vec<Template>> {
        Ok(self.templates.clone())
    }

    async fn find_template(&self, id: i64) -> Result<Option<Template>> {
        Ok(self.templates.iter().find(|t| t.id == id).cloned())
    }
}
