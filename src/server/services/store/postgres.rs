use anyhow::{Context, Result};
use sqlx::{PgPool, Row};

use super::{cutoff_timestamp, GrowthPoint, HistoryEntry, ResultStore};
use crate::server::models::{BatchResult, CharAnalysis, GridType, SingleCharResult, Template};

/// Relational store over the six grading tables. Queries are runtime-checked
/// so the crate builds without a live database.
pub struct PostgresResultStore {
    pool: PgPool,
}

impl PostgresResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn grid_type_from_str(value: &str) -> GridType {
    match value {
        "MI" => GridType::Mi,
        "HUI" => GridType::Hui,
        "PLAIN" => GridType::Plain,
        _ => GridType::Tian,
    }
}

#[async_trait::async_trait]
impl ResultStore for PostgresResultStore {
    async fn save_result(
        &self,
        result: &BatchResult,
        file_name: &str,
        user_id: Option<i64>,
        copybook_id: Option<i64>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin save_result")?;

        sqlx::query(
            r#"
            INSERT INTO t_homework
                (task_id, image_id, file_name, user_id, copybook_id,
                 total_characters, grid_rows, grid_cols,
                 avg_structure_score, avg_stroke_score, avg_overall_score,
                 summary_comment, processing_time_ms, create_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&result.task_id)
        .bind(&result.image_id)
        .bind(file_name)
        .bind(user_id)
        .bind(copybook_id)
        .bind(result.total_characters as i32)
        .bind(result.grid_rows as i32)
        .bind(result.grid_cols as i32)
        .bind(result.avg_structure_score)
        .bind(result.avg_stroke_score)
        .bind(result.avg_overall_score)
        .bind(&result.summary_comment)
        .bind(result.processing_time_ms as i64)
        .bind(&result.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert homework record")?;

        for analysis in &result.analyses {
            sqlx::query(
                r#"
                INSERT INTO t_analysis
                    (task_id, char_index, recognized_char, grid_row, grid_col,
                     structure_score, structure_comment, stroke_score, stroke_comment,
                     overall_score, overall_comment, suggestion, char_image, create_time)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(&result.task_id)
            .bind(analysis.char_index as i32)
            .bind(&analysis.recognized_char)
            .bind(analysis.row as i32)
            .bind(analysis.column as i32)
            .bind(analysis.structure_score)
            .bind(&analysis.structure_comment)
            .bind(analysis.stroke_score)
            .bind(&analysis.stroke_comment)
            .bind(analysis.overall_score)
            .bind(&analysis.overall_comment)
            .bind(&analysis.suggestion)
            .bind(&analysis.char_image_base64)
            .bind(&result.created_at)
            .execute(&mut *tx)
            .await
            .context("Failed to insert analysis record")?;
        }

        tx.commit().await.context("commit save_result")
    }

    async fn save_single_result(
        &self,
        result: &SingleCharResult,
        user_id: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO t_single_analysis
                (task_id, user_id, recognized_char,
                 structure_score, structure_detail, stroke_score, stroke_detail,
                 balance_score, balance_detail, spacing_score, spacing_detail,
                 overall_score, overall_comment, suggestion, processing_time_ms, create_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(&result.task_id)
        .bind(user_id)
        .bind(&result.recognized_char)
        .bind(result.structure_score)
        .bind(&result.structure_detail)
        .bind(result.stroke_score)
        .bind(&result.stroke_detail)
        .bind(result.balance_score)
        .bind(&result.balance_detail)
        .bind(result.spacing_score)
        .bind(&result.spacing_detail)
        .bind(result.overall_score)
        .bind(&result.overall_comment)
        .bind(&result.suggestion)
        .bind(result.processing_time_ms as i64)
        .bind(&result.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert single analysis record")?;
        Ok(())
    }

    async fn log_key_usage(
        &self,
        key_masked: &str,
        task_id: &str,
        success: bool,
        latency_ms: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO t_key_log (key_masked, task_id, success, latency_ms, create_time)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(key_masked)
        .bind(task_id)
        .bind(success)
        .bind(latency_ms as i64)
        .bind(crate::server::models::now_timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert key usage record")?;
        Ok(())
    }

    async fn find_by_task_id(&self, task_id: &str) -> Result<Option<BatchResult>> {
        let row = sqlx::query(
            r#"
            SELECT task_id, image_id, total_characters, grid_rows, grid_cols,
                   avg_structure_score, avg_stroke_score, avg_overall_score,
                   summary_comment, processing_time_ms, create_time
            FROM t_homework
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch homework record")?;

        let Some(row) = row else { return Ok(None) };

        let analysis_rows = sqlx::query(
            r#"
            SELECT char_index, recognized_char, grid_row, grid_col,
                   structure_score, structure_comment, stroke_score, stroke_comment,
                   overall_score, overall_comment, suggestion, char_image
            FROM t_analysis
            WHERE task_id = $1
            ORDER BY char_index ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch analysis records")?;

        let analyses = analysis_rows
            .into_iter()
            .map(|row| CharAnalysis {
                char_index: row.get::<i32, _>("char_index") as u32,
                recognized_char: row.get("recognized_char"),
                row: row.get::<i32, _>("grid_row") as u32,
                column: row.get::<i32, _>("grid_col") as u32,
                structure_score: row.get("structure_score"),
                structure_comment: row.get("structure_comment"),
                stroke_score: row.get("stroke_score"),
                stroke_comment: row.get("stroke_comment"),
                overall_score: row.get("overall_score"),
                overall_comment: row.get("overall_comment"),
                suggestion: row.get("suggestion"),
                char_image_base64: row.get("char_image"),
            })
            .collect();

        Ok(Some(BatchResult {
            task_id: row.get("task_id"),
            image_id: row.get("image_id"),
            total_characters: row.get::<i32, _>("total_characters") as u32,
            grid_rows: row.get::<i32, _>("grid_rows") as u32,
            grid_cols: row.get::<i32, _>("grid_cols") as u32,
            analyses,
            avg_structure_score: row.get("avg_structure_score"),
            avg_stroke_score: row.get("avg_stroke_score"),
            avg_overall_score: row.get("avg_overall_score"),
            summary_comment: row.get("summary_comment"),
            processing_time_ms: row.get::<i64, _>("processing_time_ms") as u64,
            created_at: row.get("create_time"),
        }))
    }

    async fn count_recent_calls(&self, user_id: i64, minutes: u32) -> Result<u32> {
        let cutoff = cutoff_timestamp(minutes);
        let homework: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM t_homework WHERE user_id = $1 AND create_time >= $2",
        )
        .bind(user_id)
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count homework calls")?;

        let singles: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM t_single_analysis WHERE user_id = $1 AND create_time >= $2",
        )
        .bind(user_id)
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count single-char calls")?;

        Ok((homework + singles) as u32)
    }

    async fn history(&self, user_id: i64, limit: u32) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, total_characters, avg_overall_score, summary_comment, create_time
            FROM t_homework
            WHERE user_id = $1
            ORDER BY create_time DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch history")?;

        Ok(rows
            .into_iter()
            .map(|row| HistoryEntry {
                task_id: row.get("task_id"),
                total_characters: row.get::<i32, _>("total_characters") as u32,
                avg_overall_score: row.get("avg_overall_score"),
                summary_comment: row.get("summary_comment"),
                created_at: row.get("create_time"),
            })
            .collect())
    }

    async fn growth_curve(&self, user_id: i64, character: &str) -> Result<Vec<GrowthPoint>> {
        let rows = sqlx::query(
            r#"
            SELECT a.task_id, a.recognized_char, a.structure_score, a.stroke_score,
                   a.overall_score, a.create_time
            FROM t_analysis a
            JOIN t_homework h ON h.task_id = a.task_id
            WHERE h.user_id = $1 AND a.recognized_char = $2
            ORDER BY a.create_time ASC
            "#,
        )
        .bind(user_id)
        .bind(character)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch growth curve")?;

        Ok(rows
            .into_iter()
            .map(|row| GrowthPoint {
                task_id: row.get("task_id"),
                recognized_char: row.get("recognized_char"),
                structure_score: row.get("structure_score"),
                stroke_score: row.get("stroke_score"),
                overall_score: row.get("overall_score"),
                created_at: row.get("create_time"),
            })
            .collect())
    }

    async fn list_templates(&self) -> Result<Vec<Template>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, grid_type, grid_rows, grid_cols, header_ratio
            FROM t_copybook_template
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch templates")?;

        Ok(rows
            .into_iter()
            .map(|row| Template {
                id: row.get("id"),
                name: row.get("name"),
                grid_type: grid_type_from_str(row.get::<String, _>("grid_type").as_str()),
                grid_rows: row.get::<i32, _>("grid_rows") as u32,
                grid_cols: row.get::<i32, _>("grid_cols") as u32,
                header_ratio: row.get::<f32, _>("header_ratio"),
            })
            .collect())
    }

    async fn find_template(&self, id: i64) -> Result<Option<Template>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, grid_type, grid_rows, grid_cols, header_ratio
            FROM t_copybook_template
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch template")?;

        Ok(row.map(|row| Template {
            id: row.get("id"),
            name: row.get("name"),
            grid_type: grid_type_from_str(row.get::<String, _>("grid_type").as_str()),
            grid_rows: row.get::<i32, _>("grid_rows") as u32,
            grid_cols: row.get::<i32, _>("grid_cols") as u32,
            header_ratio: row.get::<f32, _>("header_ratio"),
        }))
    }
}
