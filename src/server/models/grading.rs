use serde::{Deserialize, Serialize};

use super::short_id;

/// Cell layout of a practice sheet, used to crop graded characters out of the
/// uploaded photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GridType {
    Tian,
    Mi,
    Hui,
    Plain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub grid_type: GridType,
    pub grid_rows: u32,
    pub grid_cols: u32,
    /// Fraction of the image height taken by a header strip above the grid.
    /// Valid range is 0.0..=0.3; consumers clamp.
    pub header_ratio: f32,
}

impl Template {
    pub fn clamped_header_ratio(&self) -> f32 {
        self.header_ratio.clamp(0.0, 0.3)
    }
}

/// Built-in sheet layouts served when the template table is empty, so a fresh
/// deployment can grade without seeding the database first.
pub fn default_templates() -> Vec<Template> {
    vec![
        Template {
            id: 1,
            name: "田字格 4行5列".to_string(),
            grid_type: GridType::Tian,
            grid_rows: 4,
            grid_cols: 5,
            header_ratio: 0.0,
        },
        Template {
            id: 2,
            name: "米字格 6行8列".to_string(),
            grid_type: GridType::Mi,
            grid_rows: 6,
            grid_cols: 8,
            header_ratio: 0.0,
        },
        Template {
            id: 3,
            name: "回宫格 8行10列（带标题栏）".to_string(),
            grid_type: GridType::Hui,
            grid_rows: 8,
            grid_cols: 10,
            header_ratio: 0.05,
        },
        Template {
            id: 4,
            name: "无格线".to_string(),
            grid_type: GridType::Plain,
            grid_rows: 1,
            grid_cols: 1,
            header_ratio: 0.0,
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzeMode {
    WholePage,
    SingleChar,
}

/// One grading request, created at entry and dropped after the result has been
/// delivered.
#[derive(Debug, Clone)]
pub struct GradingTask {
    pub task_id: String,
    pub user_id: Option<i64>,
    pub copybook_id: Option<i64>,
    pub template_id: Option<i64>,
    pub file_name: String,
    pub image: Vec<u8>,
    pub mode: AnalyzeMode,
}

impl GradingTask {
    pub fn whole_page(
        image: Vec<u8>,
        file_name: String,
        user_id: Option<i64>,
        copybook_id: Option<i64>,
        template_id: Option<i64>,
    ) -> Self {
        Self {
            task_id: format!("task-{}", short_id(12)),
            user_id,
            copybook_id,
            template_id,
            file_name,
            image,
            mode: AnalyzeMode::WholePage,
        }
    }

    pub fn single_char(image: Vec<u8>, file_name: String, user_id: Option<i64>) -> Self {
        Self {
            task_id: format!("single-{}", short_id(12)),
            user_id,
            copybook_id: None,
            template_id: None,
            file_name,
            image,
            mode: AnalyzeMode::SingleChar,
        }
    }
}

/// Critique of one problem character on a whole-page sheet. Row and column are
/// 1-based; 0 means the model did not locate the character on the grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharAnalysis {
    pub char_index: u32,
    pub recognized_char: String,
    pub row: u32,
    pub column: u32,
    pub structure_score: i32,
    pub structure_comment: String,
    pub stroke_score: i32,
    pub stroke_comment: String,
    pub overall_score: i32,
    pub overall_comment: String,
    pub suggestion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub char_image_base64: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub task_id: String,
    pub image_id: String,
    pub total_characters: u32,
    pub grid_rows: u32,
    pub grid_cols: u32,
    pub analyses: Vec<CharAnalysis>,
    pub avg_structure_score: i32,
    pub avg_stroke_score: i32,
    pub avg_overall_score: i32,
    pub summary_comment: String,
    pub processing_time_ms: u64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleCharResult {
    pub task_id: String,
    pub recognized_char: String,
    pub structure_score: i32,
    pub structure_detail: String,
    pub stroke_score: i32,
    pub stroke_detail: String,
    pub balance_score: i32,
    pub balance_detail: String,
    pub spacing_score: i32,
    pub spacing_detail: String,
    pub overall_score: i32,
    pub overall_comment: String,
    pub suggestion: String,
    pub processing_time_ms: u64,
    pub created_at: String,
}
