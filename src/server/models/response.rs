use serde::Serialize;

/// Non-stream response envelope: `{ code, message, data }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: "OK".to_string(),
            message: "success".to_string(),
            data: Some(data),
        }
    }
}
