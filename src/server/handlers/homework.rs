use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Multipart, Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use crate::server::{
    config::AppState,
    error::GradeError,
    models::{default_templates, AnalyzeMode, ApiResponse, GradingTask},
    services::engine::GradeEvent,
};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// End-to-end deadline for a streaming request; the emitter completes on
/// expiry and any still-running upstream call is abandoned.
const STREAM_DEADLINE: Duration = Duration::from_secs(180);

struct Upload {
    image: Vec<u8>,
    file_name: String,
    user_id: Option<i64>,
    copybook_id: Option<i64>,
    template_id: Option<i64>,
}

async fn read_upload(multipart: &mut Multipart) -> Result<Upload, GradeError> {
    let mut image = None;
    let mut file_name = "upload.jpg".to_string();
    let mut user_id = None;
    let mut copybook_id = None;
    let mut template_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GradeError::Parse(format!("上传内容解析失败: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                if let Some(name) = field.file_name() {
                    file_name = name.to_string();
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| GradeError::Parse(format!("读取上传文件失败: {e}")))?;
                if bytes.len() > MAX_UPLOAD_BYTES {
                    return Err(GradeError::FileTooLarge);
                }
                image = Some(bytes.to_vec());
            }
            "userId" => user_id = read_id_field(field).await,
            "copyBookId" => copybook_id = read_id_field(field).await,
            "templateId" => template_id = read_id_field(field).await,
            other => debug!(field = %other, "ignoring unknown form field"),
        }
    }

    let image = image.ok_or_else(|| GradeError::Parse("缺少上传文件 file".to_string()))?;
    Ok(Upload {
        image,
        file_name,
        user_id,
        copybook_id,
        template_id,
    })
}

async fn read_id_field(field: axum::extract::multipart::Field<'_>) -> Option<i64> {
    field.text().await.ok().and_then(|v| v.trim().parse().ok())
}

pub async fn list_templates(State(state): State<AppState>) -> Response {
    match state.store.list_templates().await {
        Ok(templates) if !templates.is_empty() => {
            Json(ApiResponse::ok(templates)).into_response()
        }
        Ok(_) => Json(ApiResponse::ok(default_templates())).into_response(),
        Err(e) => {
            error!(error = %e, "template listing failed");
            GradeError::Fatal(e.to_string()).into_response()
        }
    }
}

pub async fn analyze(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let upload = match read_upload(&mut multipart).await {
        Ok(upload) => upload,
        Err(e) => return e.into_response(),
    };
    let task = GradingTask::whole_page(
        upload.image,
        upload.file_name,
        upload.user_id,
        upload.copybook_id,
        upload.template_id,
    );
    match state.engine.analyze(task).await {
        Ok(result) => Json(ApiResponse::ok(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn analyze_stream(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let upload = match read_upload(&mut multipart).await {
        Ok(upload) => upload,
        Err(e) => return e.into_response(),
    };
    let task = GradingTask::whole_page(
        upload.image,
        upload.file_name,
        upload.user_id,
        upload.copybook_id,
        upload.template_id,
    );
    spawn_and_stream(state, task)
}

pub async fn analyze_single(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let upload = match read_upload(&mut multipart).await {
        Ok(upload) => upload,
        Err(e) => return e.into_response(),
    };
    let task = GradingTask::single_char(upload.image, upload.file_name, upload.user_id);
    match state.engine.analyze_single(task).await {
        Ok(result) => Json(ApiResponse::ok(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn analyze_single_stream(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Response {
    let upload = match read_upload(&mut multipart).await {
        Ok(upload) => upload,
        Err(e) => return e.into_response(),
    };
    let task = GradingTask::single_char(upload.image, upload.file_name, upload.user_id);
    spawn_and_stream(state, task)
}

/// Runs the engine on its own task and bridges its events into an SSE body.
/// Client disconnects surface as channel-send failures, which the engine
/// drops silently.
fn spawn_and_stream(state: AppState, task: GradingTask) -> Response {
    let (tx, rx) = mpsc::channel::<GradeEvent>(64);
    let engine = state.engine.clone();
    let mode = task.mode;
    tokio::spawn(async move {
        match mode {
            AnalyzeMode::WholePage => engine.analyze_stream(task, tx).await,
            AnalyzeMode::SingleChar => engine.analyze_single_stream(task, tx).await,
        }
    });

    let events = ReceiverStream::new(rx)
        .map(|event| Ok::<Event, Infallible>(to_sse_event(event)))
        .take_until(Box::pin(sleep(STREAM_DEADLINE)));
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

fn to_sse_event(event: GradeEvent) -> Event {
    match event {
        GradeEvent::Start => Event::default().event("start").data("{}"),
        GradeEvent::Thinking(message) => Event::default().event("thinking").data(message),
        GradeEvent::Token(text) => Event::default().event("token").data(text),
        GradeEvent::Result(result) => Event::default()
            .event("result")
            .data(serde_json::to_string(&result).unwrap_or_else(|_| "{}".to_string())),
        GradeEvent::SingleResult(result) => Event::default()
            .event("result")
            .data(serde_json::to_string(&result).unwrap_or_else(|_| "{}".to_string())),
        GradeEvent::Error(message) => Event::default().event("error").data(message),
    }
}

pub async fn get_result(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    match state.store.find_by_task_id(&task_id).await {
        Ok(Some(result)) => Json(ApiResponse::ok(result)).into_response(),
        Ok(None) => GradeError::NotFound.into_response(),
        Err(e) => {
            error!(task_id, error = %e, "result lookup failed");
            GradeError::Fatal(e.to_string()).into_response()
        }
    }
}

pub async fn history(State(state): State<AppState>, Path(user_id): Path<i64>) -> Response {
    match state.store.history(user_id, 10).await {
        Ok(entries) => Json(ApiResponse::ok(entries)).into_response(),
        Err(e) => {
            error!(user_id, error = %e, "history lookup failed");
            GradeError::Fatal(e.to_string()).into_response()
        }
    }
}

pub async fn growth(
    State(state): State<AppState>,
    Path((user_id, char_name)): Path<(i64, String)>,
) -> Response {
    match state.store.growth_curve(user_id, &char_name).await {
        Ok(points) => Json(ApiResponse::ok(points)).into_response(),
        Err(e) => {
            error!(user_id, char_name, error = %e, "growth lookup failed");
            GradeError::Fatal(e.to_string()).into_response()
        }
    }
}
