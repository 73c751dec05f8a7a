use inkgrade::services::engine::{
    extract_top_level_pairs, parse_batch_reply, parse_single_reply, repair_json,
};

const CANONICAL_PAGE: &str = "\
共识别 20 个汉字（4 行 5 列）：飞,流,直,下,三,千,尺,疑,是,银,河,落,九,天,白,日,依,山,尽,黄
结构：73 分 | 笔画：71 分 | 综合：73 分
【重点点评】
1.「疑」（第3行第3列，综合 61 分）
结构（62 分）：左右失衡，\"匕\"偏高
笔画（60 分）：撇画软弱
建议：对照字帖临摹
【总评】整体有进步，继续努力！";

#[test]
fn test_canonical_whole_page_reply() {
    let result = parse_batch_reply("task-abc", CANONICAL_PAGE);

    assert_eq!(result.task_id, "task-abc");
    assert_eq!(result.total_characters, 20);
    assert_eq!(result.grid_rows, 4);
    assert_eq!(result.grid_cols, 5);
    assert_eq!(result.avg_structure_score, 73);
    assert_eq!(result.avg_stroke_score, 71);
    assert_eq!(result.avg_overall_score, 73);
    assert_eq!(result.summary_comment, "整体有进步，继续努力！");

    assert_eq!(result.analyses.len(), 1);
    let analysis = &result.analyses[0];
    assert_eq!(analysis.char_index, 1);
    assert_eq!(analysis.recognized_char, "疑");
    assert_eq!(analysis.row, 3);
    assert_eq!(analysis.column, 3);
    assert_eq!(analysis.overall_score, 61);
    assert_eq!(analysis.structure_score, 62);
    assert_eq!(analysis.structure_comment, "左右失衡，\"匕\"偏高");
    assert_eq!(analysis.stroke_score, 60);
    assert_eq!(analysis.stroke_comment, "撇画软弱");
    assert_eq!(analysis.suggestion, "对照字帖临摹");
}

#[test]
fn test_parsing_is_idempotent() {
    let first = parse_batch_reply("task-abc", CANONICAL_PAGE);
    let second = parse_batch_reply("task-abc", CANONICAL_PAGE);
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}

#[test]
fn test_overview_without_grid_dimensions() {
    let result = parse_batch_reply("task-abc", "共识别 6 个汉字：永,和,九,年,春,风\n【总评】不错");
    assert_eq!(result.total_characters, 6);
    assert_eq!(result.grid_rows, 0);
    assert_eq!(result.grid_cols, 0);
}

#[test]
fn test_missing_overview_keeps_analyses() {
    let reply = "\
1.「永」（第1行第1列，综合 55 分）
结构（50 分）：重心不稳
笔画（58 分）：捺画收笔仓促
建议：放慢书写速度
【总评】基础尚可";
    let result = parse_batch_reply("task-abc", reply);
    // totalCharacters stays 0 when the overview line is absent; analyses are
    // parsed independently.
    assert_eq!(result.total_characters, 0);
    assert_eq!(result.analyses.len(), 1);
    assert_eq!(result.analyses[0].recognized_char, "永");
}

#[test]
fn test_every_field_has_a_default() {
    let result = parse_batch_reply("task-abc", "模型没有按格式回复。");
    assert_eq!(result.total_characters, 0);
    assert_eq!(result.grid_rows, 0);
    assert_eq!(result.grid_cols, 0);
    assert_eq!(result.avg_structure_score, 60);
    assert_eq!(result.avg_stroke_score, 60);
    assert_eq!(result.avg_overall_score, 60);
    assert_eq!(result.summary_comment, "继续加油练习！");
    assert!(result.analyses.is_empty());
}

#[test]
fn test_header_without_position_defaults_to_zero() {
    let reply = "\
1.「心」，综合 70 分
结构（68 分）：卧钩角度偏平
建议：注意三点呼应
【总评】继续保持";
    let result = parse_batch_reply("task-abc", reply);
    assert_eq!(result.analyses.len(), 1);
    assert_eq!(result.analyses[0].row, 0);
    assert_eq!(result.analyses[0].column, 0);
    assert_eq!(result.analyses[0].overall_score, 70);
    assert_eq!(result.analyses[0].stroke_comment, "暂无分析");
    assert_eq!(result.analyses[0].stroke_score, 60);
}

#[test]
fn test_scores_clamped_at_dto_boundary() {
    let reply = "\
共识别 3 个汉字：一,二,三
结构：140 分 | 笔画：95 分 | 综合：120 分
【总评】分数异常的回复";
    let result = parse_batch_reply("task-abc", reply);
    assert_eq!(result.avg_structure_score, 100);
    assert_eq!(result.avg_stroke_score, 95);
    assert_eq!(result.avg_overall_score, 100);
}

#[test]
fn test_summary_truncated_to_two_hundred_chars() {
    let long = "好".repeat(300);
    let result = parse_batch_reply("task-abc", &format!("【总评】{long}"));
    assert_eq!(result.summary_comment.chars().count(), 200);
}

#[test]
fn test_single_char_reply() {
    let reply = "\
字：永
结构：82分 | 笔画：78分 | 重心：80分 | 间架：75分 | 综合：79分
【结构分析】左收右放处理得当。
【笔画分析】横画起笔略顿。
【重心分析】重心稍向左倾。
【间架分析】内部空间均匀。
【总评】整体协调，可以更舒展。
【练习建议】先练竖钩的力度。";
    let result = parse_single_reply("single-xyz", reply);

    assert_eq!(result.task_id, "single-xyz");
    assert_eq!(result.recognized_char, "永");
    assert_eq!(result.structure_score, 82);
    assert_eq!(result.stroke_score, 78);
    assert_eq!(result.balance_score, 80);
    assert_eq!(result.spacing_score, 75);
    assert_eq!(result.overall_score, 79);
    assert_eq!(result.structure_detail, "左收右放处理得当。");
    assert_eq!(result.stroke_detail, "横画起笔略顿。");
    assert_eq!(result.balance_detail, "重心稍向左倾。");
    assert_eq!(result.spacing_detail, "内部空间均匀。");
    assert_eq!(result.overall_comment, "整体协调，可以更舒展。");
    assert_eq!(result.suggestion, "先练竖钩的力度。");
}

#[test]
fn test_single_char_defaults() {
    let result = parse_single_reply("single-xyz", "无法识别图片内容");
    assert_eq!(result.recognized_char, "?");
    assert_eq!(result.structure_score, 60);
    assert_eq!(result.overall_score, 60);
    assert_eq!(result.structure_detail, "");
    assert_eq!(result.suggestion, "");
}

#[test]
fn test_legacy_json_reply_is_accepted() {
    let reply = r#"{"totalCharacters": 12, "gridRows": 3, "gridCols": 4,
        "avgStructureScore": 81, "avgStrokeScore": 79, "avgOverallScore": 80,
        "summaryComment": "整页较为工整"}"#;
    let result = parse_batch_reply("task-abc", reply);
    assert_eq!(result.total_characters, 12);
    assert_eq!(result.grid_rows, 3);
    assert_eq!(result.avg_overall_score, 80);
    assert_eq!(result.summary_comment, "整页较为工整");
}

#[test]
fn test_truncated_json_reply_is_repaired() {
    let reply = r#"{"totalCharacters": 8, "summaryComment": "写得认真"#;
    let result = parse_batch_reply("task-abc", reply);
    assert_eq!(result.total_characters, 8);
    assert_eq!(result.summary_comment, "写得认真");
}

#[test]
fn test_repair_closes_string_and_brackets() {
    assert_eq!(repair_json(r#"{"a": "b"#), r#"{"a": "b"}"#);
    assert_eq!(repair_json(r#"{"a": [1, 2"#), r#"{"a": [1, 2]}"#);
    assert_eq!(repair_json(r#"{"a": 1,"#), r#"{"a": 1}"#);
}

#[test]
fn test_repair_drops_dangling_key() {
    assert_eq!(repair_json(r#"{"a": 1, "b""#), r#"{"a": 1}"#);
    assert_eq!(repair_json(r#"{"a": 1, "b":"#), r#"{"a": 1}"#);
}

#[test]
fn test_top_level_pair_extraction() {
    let pairs = extract_top_level_pairs(r#"garbage "total": 7 noise "comment": "好" {{"#);
    assert_eq!(pairs["total"], 7);
    assert_eq!(pairs["comment"], "好");
}
