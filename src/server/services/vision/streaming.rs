use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct StreamChoice {
    pub delta: StreamDelta,
    #[allow(dead_code)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub(crate) struct StreamDelta {
    pub content: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamResponse {
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone)]
pub enum StreamUpdate {
    Content(String),
    Done,
    Error(String),
}
