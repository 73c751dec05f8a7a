use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Request-scoped failure with a stable wire code. Every variant maps onto
/// exactly one code so clients can distinguish retry-worthy failures from
/// terminal ones.
#[derive(Error, Debug)]
pub enum GradeError {
    #[error("请求过于频繁，请稍后再试")]
    RateLimited,

    #[error("暂无可用的 AI 通道，请稍后再试")]
    Exhausted,

    #[error("AI 服务调用失败: {0}")]
    Upstream(String),

    #[error("图片处理失败: {0}")]
    Image(String),

    #[error("批改结果处理失败: {0}")]
    Parse(String),

    #[error("文件过大，最大支持 10MB")]
    FileTooLarge,

    #[error("记录不存在")]
    NotFound,

    #[error("系统错误: {0}")]
    Fatal(String),
}

impl GradeError {
    pub fn code(&self) -> &'static str {
        match self {
            GradeError::RateLimited => "RATE_LIMITED",
            GradeError::Exhausted => "EXHAUSTED",
            GradeError::Upstream(_) => "AI_ERROR",
            GradeError::Image(_) => "IMG_ERROR",
            GradeError::Parse(_) => "ANALYZE_FAILED",
            GradeError::FileTooLarge => "FILE_TOO_LARGE",
            GradeError::NotFound => "NOT_FOUND",
            GradeError::Fatal(_) => "SYSTEM_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GradeError::RateLimited
            | GradeError::Image(_)
            | GradeError::Parse(_)
            | GradeError::FileTooLarge => StatusCode::BAD_REQUEST,
            GradeError::NotFound => StatusCode::NOT_FOUND,
            GradeError::Exhausted | GradeError::Upstream(_) | GradeError::Fatal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GradeError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.code(),
            "message": self.to_string(),
            "data": null,
        }));
        (self.status(), body).into_response()
    }
}
