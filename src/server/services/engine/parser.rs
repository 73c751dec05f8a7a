use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use super::json_repair;
use crate::server::models::{BatchResult, CharAnalysis, SingleCharResult};

const DEFAULT_SCORE: i64 = 60;
const DEFAULT_SUMMARY: &str = "继续加油练习！";
const DEFAULT_DETAIL: &str = "暂无分析";
const DEFAULT_SUGGESTION: &str = "多加练习";
const SUMMARY_MAX_CHARS: usize = 200;
const SECTION_MAX_CHARS: usize = 500;

lazy_static! {
    static ref OVERVIEW_GRID: Regex = Regex::new(
        r"共识别\s*(\d+)\s*个汉字\s*[（(]\s*(\d+)\s*行\s*(\d+)\s*列\s*[）)]\s*[：:]?"
    )
    .unwrap();
    static ref OVERVIEW: Regex = Regex::new(r"共识别\s*(\d+)\s*个汉字\s*[：:]").unwrap();
    static ref PAGE_SCORES: Regex = Regex::new(
        r"结构\s*[：:]\s*(\d+)\s*分\s*[|│丨]\s*笔画\s*[：:]\s*(\d+)\s*分\s*[|│丨]\s*综合\s*[：:]\s*(\d+)\s*分"
    )
    .unwrap();
    static ref SUMMARY: Regex = Regex::new(r"【总评】\s*([^【]*)").unwrap();
    static ref CHAR_HEADER: Regex =
        Regex::new(r"(?m)^\s*(\d+)\s*[.、．]\s*「([^」]+)」[^\n]*?综合\s*(\d+)\s*分").unwrap();
    static ref CHAR_POSITION: Regex = Regex::new(r"第\s*(\d+)\s*行\s*第\s*(\d+)\s*列").unwrap();
    static ref STRUCTURE_DETAIL: Regex =
        Regex::new(r"结构\s*[（(]\s*(\d+)\s*分\s*[）)]\s*[：:]\s*([^\n]+)").unwrap();
    static ref STROKE_DETAIL: Regex =
        Regex::new(r"笔画\s*[（(]\s*(\d+)\s*分\s*[）)]\s*[：:]\s*([^\n]+)").unwrap();
    static ref SUGGESTION: Regex = Regex::new(r"建议\s*[：:]\s*([^\n]+)").unwrap();
    static ref SINGLE_CHAR: Regex = Regex::new(r"(?m)^\s*字\s*[：:]\s*(\S)").unwrap();
    static ref SINGLE_SCORES: Regex = Regex::new(
        r"结构\s*[：:]\s*(\d+)\s*分\s*[|│丨]\s*笔画\s*[：:]\s*(\d+)\s*分\s*[|│丨]\s*重心\s*[：:]\s*(\d+)\s*分\s*[|│丨]\s*间架\s*[：:]\s*(\d+)\s*分\s*[|│丨]\s*综合\s*[：:]\s*(\d+)\s*分"
    )
    .unwrap();
}

/// Scores are clamped here, at the DTO boundary; matching accepts whatever
/// integer the model wrote.
fn clamp_score(value: i64) -> i32 {
    value.clamp(0, 100) as i32
}

fn parse_num(text: &str) -> i64 {
    text.parse().unwrap_or(DEFAULT_SCORE)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Parses a whole-page critique. Never fails: every field has a default, and
/// a legacy JSON reply is routed through the repair path first.
pub fn parse_batch_reply(task_id: &str, text: &str) -> BatchResult {
    if let Some(result) = try_parse_legacy_json(task_id, text) {
        return result;
    }

    let (total_characters, grid_rows, grid_cols) =
        if let Some(captures) = OVERVIEW_GRID.captures(text) {
            (
                captures[1].parse().unwrap_or(0),
                captures[2].parse().unwrap_or(0),
                captures[3].parse().unwrap_or(0),
            )
        } else if let Some(captures) = OVERVIEW.captures(text) {
            (captures[1].parse().unwrap_or(0), 0, 0)
        } else {
            (0, 0, 0)
        };

    let (avg_structure, avg_stroke, avg_overall) = PAGE_SCORES
        .captures(text)
        .map(|captures| {
            (
                parse_num(&captures[1]),
                parse_num(&captures[2]),
                parse_num(&captures[3]),
            )
        })
        .unwrap_or((DEFAULT_SCORE, DEFAULT_SCORE, DEFAULT_SCORE));

    let summary_comment = SUMMARY
        .captures(text)
        .map(|captures| truncate_chars(captures[1].trim(), SUMMARY_MAX_CHARS))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SUMMARY.to_string());

    BatchResult {
        task_id: task_id.to_string(),
        image_id: String::new(),
        total_characters,
        grid_rows,
        grid_cols,
        analyses: parse_problem_chars(text),
        avg_structure_score: clamp_score(avg_structure),
        avg_stroke_score: clamp_score(avg_stroke),
        avg_overall_score: clamp_score(avg_overall),
        summary_comment,
        processing_time_ms: 0,
        created_at: String::new(),
    }
}

/// Problem characters in discovery order. A block runs from its header line
/// to the next header or the 【总评】 marker.
fn parse_problem_chars(text: &str) -> Vec<CharAnalysis> {
    let headers: Vec<regex::Captures> = CHAR_HEADER.captures_iter(text).collect();
    let summary_start = text.find("【总评】").unwrap_or(text.len());
    let mut analyses = Vec::new();

    for (i, captures) in headers.iter().enumerate() {
        let whole = captures.get(0).expect("capture 0 always present");
        let block_start = whole.start();
        if block_start >= summary_start {
            continue;
        }
        let block_end = headers
            .get(i + 1)
            .map(|next| next.get(0).expect("capture 0 always present").start())
            .unwrap_or(text.len())
            .min(summary_start);
        let block = &text[block_start..block_end];

        let (row, column) = CHAR_POSITION
            .captures(whole.as_str())
            .map(|pos| (pos[1].parse().unwrap_or(0), pos[2].parse().unwrap_or(0)))
            .unwrap_or((0, 0));

        let (structure_score, structure_comment) = STRUCTURE_DETAIL
            .captures(block)
            .map(|detail| (parse_num(&detail[1]), detail[2].trim().to_string()))
            .unwrap_or((DEFAULT_SCORE, DEFAULT_DETAIL.to_string()));
        let (stroke_score, stroke_comment) = STROKE_DETAIL
            .captures(block)
            .map(|detail| (parse_num(&detail[1]), detail[2].trim().to_string()))
            .unwrap_or((DEFAULT_SCORE, DEFAULT_DETAIL.to_string()));
        let suggestion = SUGGESTION
            .captures(block)
            .map(|s| s[1].trim().to_string())
            .unwrap_or_else(|| DEFAULT_SUGGESTION.to_string());

        analyses.push(CharAnalysis {
            char_index: captures[1].parse().unwrap_or((i + 1) as u32),
            recognized_char: captures[2].to_string(),
            row,
            column,
            structure_score: clamp_score(structure_score),
            structure_comment,
            stroke_score: clamp_score(stroke_score),
            stroke_comment,
            overall_score: clamp_score(parse_num(&captures[3])),
            overall_comment: String::new(),
            suggestion,
            char_image_base64: None,
        });
    }
    analyses
}

/// Parses a single-character critique; same never-fail contract.
pub fn parse_single_reply(task_id: &str, text: &str) -> SingleCharResult {
    let recognized_char = SINGLE_CHAR
        .captures(text)
        .map(|captures| captures[1].to_string())
        .unwrap_or_else(|| "?".to_string());

    let (structure, stroke, balance, spacing, overall) = SINGLE_SCORES
        .captures(text)
        .map(|captures| {
            (
                parse_num(&captures[1]),
                parse_num(&captures[2]),
                parse_num(&captures[3]),
                parse_num(&captures[4]),
                parse_num(&captures[5]),
            )
        })
        .unwrap_or((
            DEFAULT_SCORE,
            DEFAULT_SCORE,
            DEFAULT_SCORE,
            DEFAULT_SCORE,
            DEFAULT_SCORE,
        ));

    SingleCharResult {
        task_id: task_id.to_string(),
        recognized_char,
        structure_score: clamp_score(structure),
        structure_detail: extract_section(text, "结构分析"),
        stroke_score: clamp_score(stroke),
        stroke_detail: extract_section(text, "笔画分析"),
        balance_score: clamp_score(balance),
        balance_detail: extract_section(text, "重心分析"),
        spacing_score: clamp_score(spacing),
        spacing_detail: extract_section(text, "间架分析"),
        overall_score: clamp_score(overall),
        overall_comment: extract_section(text, "总评"),
        suggestion: extract_section(text, "练习建议"),
        processing_time_ms: 0,
        created_at: String::new(),
    }
}

/// Text between `【title】` and the next `【`, truncated to 500 chars.
fn extract_section(text: &str, title: &str) -> String {
    let marker = format!("【{title}】");
    let Some(pos) = text.find(&marker) else {
        return String::new();
    };
    let rest = &text[pos + marker.len()..];
    let end = rest.find('【').unwrap_or(rest.len());
    truncate_chars(rest[..end].trim(), SECTION_MAX_CHARS)
}

/// Legacy path for models that answer in JSON despite the prompt: direct
/// parse, then structural repair, then the top-level pair extractor.
fn try_parse_legacy_json(task_id: &str, text: &str) -> Option<BatchResult> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    let value = serde_json::from_str::<Value>(trimmed)
        .ok()
        .or_else(|| serde_json::from_str(&json_repair::repair_json(trimmed)).ok())
        .or_else(|| {
            let pairs = json_repair::extract_top_level_pairs(trimmed);
            (!pairs.is_empty()).then_some(Value::Object(pairs))
        })?;
    Some(batch_from_json(task_id, &value))
}

fn json_i64(value: &Value, key: &str, default: i64) -> i64 {
    value[key].as_i64().unwrap_or(default)
}

fn batch_from_json(task_id: &str, value: &Value) -> BatchResult {
    let analyses = value["analyses"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .enumerate()
                .map(|(i, item)| CharAnalysis {
                    char_index: json_i64(item, "charIndex", (i + 1) as i64) as u32,
                    recognized_char: item["recognizedChar"].as_str().unwrap_or("?").to_string(),
                    row: json_i64(item, "row", 0).max(0) as u32,
                    column: json_i64(item, "column", 0).max(0) as u32,
                    structure_score: clamp_score(json_i64(item, "structureScore", DEFAULT_SCORE)),
                    structure_comment: item["structureComment"]
                        .as_str()
                        .unwrap_or(DEFAULT_DETAIL)
                        .to_string(),
                    stroke_score: clamp_score(json_i64(item, "strokeScore", DEFAULT_SCORE)),
                    stroke_comment: item["strokeComment"]
                        .as_str()
                        .unwrap_or(DEFAULT_DETAIL)
                        .to_string(),
                    overall_score: clamp_score(json_i64(item, "overallScore", DEFAULT_SCORE)),
                    overall_comment: item["overallComment"].as_str().unwrap_or("").to_string(),
                    suggestion: item["suggestion"]
                        .as_str()
                        .unwrap_or(DEFAULT_SUGGESTION)
                        .to_string(),
                    char_image_base64: None,
                })
                .collect()
        })
        .unwrap_or_default();

    BatchResult {
        task_id: task_id.to_string(),
        image_id: String::new(),
        total_characters: json_i64(value, "totalCharacters", 0).max(0) as u32,
        grid_rows: json_i64(value, "gridRows", 0).max(0) as u32,
        grid_cols: json_i64(value, "gridCols", 0).max(0) as u32,
        analyses,
        avg_structure_score: clamp_score(json_i64(value, "avgStructureScore", DEFAULT_SCORE)),
        avg_stroke_score: clamp_score(json_i64(value, "avgStrokeScore", DEFAULT_SCORE)),
        avg_overall_score: clamp_score(json_i64(value, "avgOverallScore", DEFAULT_SCORE)),
        summary_comment: value["summaryComment"]
            .as_str()
            .map(|s| truncate_chars(s, SUMMARY_MAX_CHARS))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SUMMARY.to_string()),
        processing_time_ms: 0,
        created_at: String::new(),
    }
}
