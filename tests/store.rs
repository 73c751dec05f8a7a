use inkgrade::server::models::now_timestamp;
use inkgrade::services::engine::parse_batch_reply;
use inkgrade::services::store::{InMemoryResultStore, ResultStore};

fn sample(task_id: &str, summary: &str) -> inkgrade::server::models::BatchResult {
    let mut result = parse_batch_reply(
        task_id,
        &format!(
            "共识别 2 个汉字（1 行 2 列）：永,和\n\
             结构：80 分 | 笔画：75 分 | 综合：78 分\n\
             1.「永」（第1行第1列，综合 70 分）\n\
             结构（72 分）：重心偏右\n\
             笔画（68 分）：捺画乏力\n\
             建议：放慢速度\n\
             【总评】{summary}"
        ),
    );
    result.image_id = format!("img-{task_id}");
    result.processing_time_ms = 1234;
    result.created_at = now_timestamp();
    result
}

#[tokio::test]
async fn test_batch_round_trip_by_task_id() {
    let store = InMemoryResultStore::new();
    let saved = sample("task-roundtrip", "有进步");
    store.save_result(&saved, "a.jpg", Some(1), None).await.unwrap();

    let loaded = store.find_by_task_id("task-roundtrip").await.unwrap().unwrap();
    assert_eq!(loaded.task_id, saved.task_id);
    assert_eq!(loaded.total_characters, saved.total_characters);
    assert_eq!(loaded.avg_structure_score, saved.avg_structure_score);
    assert_eq!(loaded.avg_stroke_score, saved.avg_stroke_score);
    assert_eq!(loaded.avg_overall_score, saved.avg_overall_score);
    assert_eq!(loaded.summary_comment, saved.summary_comment);
    assert_eq!(loaded.processing_time_ms, saved.processing_time_ms);
    assert_eq!(loaded.analyses.len(), 1);
}

#[tokio::test]
async fn test_unknown_task_id_is_none() {
    let store = InMemoryResultStore::new();
    assert!(store.find_by_task_id("task-missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_history_is_limited_and_newest_first() {
    let store = InMemoryResultStore::new();
    for i in 0..12 {
        let mut result = sample(&format!("task-h{i:04}"), "ok");
        // Distinct, ordered timestamps.
        result.created_at = format!("2026-07-01 10:{i:02}:00");
        store.save_result(&result, "a.jpg", Some(5), None).await.unwrap();
    }

    let history = store.history(5, 10).await.unwrap();
    assert_eq!(history.len(), 10);
    assert_eq!(history[0].task_id, "task-h0011");
    assert!(history.windows(2).all(|w| w[0].created_at >= w[1].created_at));
}

#[tokio::test]
async fn test_growth_curve_is_chronological_per_char() {
    let store = InMemoryResultStore::new();
    for (i, ts) in ["2026-06-01 09:00:00", "2026-07-01 09:00:00"].iter().enumerate() {
        let mut result = sample(&format!("task-g{i}"), "ok");
        result.created_at = ts.to_string();
        store.save_result(&result, "a.jpg", Some(9), None).await.unwrap();
    }

    let curve = store.growth_curve(9, "永").await.unwrap();
    assert_eq!(curve.len(), 2);
    assert!(curve[0].created_at < curve[1].created_at);
    assert!(curve.iter().all(|p| p.recognized_char == "永"));

    assert!(store.growth_curve(9, "和").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recent_call_counting_scopes_to_user() {
    let store = InMemoryResultStore::new();
    store
        .save_result(&sample("task-c1", "ok"), "a.jpg", Some(1), None)
        .await
        .unwrap();
    store
        .save_result(&sample("task-c2", "ok"), "a.jpg", Some(2), None)
        .await
        .unwrap();

    assert_eq!(store.count_recent_calls(1, 5).await.unwrap(), 1);
    assert_eq!(store.count_recent_calls(3, 5).await.unwrap(), 0);
}

#[tokio::test]
async fn test_builtin_templates_are_served() {
    let store = InMemoryResultStore::new();
    let templates = store.list_templates().await.unwrap();
    assert!(!templates.is_empty());
    let tian = store.find_template(1).await.unwrap().unwrap();
    assert_eq!(tian.grid_rows, 4);
    assert_eq!(tian.grid_cols, 5);
}
