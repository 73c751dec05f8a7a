use std::time::Duration;

/// Which upstream wire contract the endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Chat-completions style: SSE `data:` chunks, bearer auth.
    OpenAi,
    /// Message style: content-block reply, `x-api-key` auth.
    Message,
}

impl Provider {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "message" | "messages" => Provider::Message,
            _ => Provider::OpenAi,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub base_url: String,
    pub model: String,
    pub provider: Provider,
    pub connect_timeout: Duration,
    /// Total request budget for the blocking call.
    pub request_timeout: Duration,
    /// End-to-end budget for a streamed call.
    pub stream_timeout: Duration,
    pub image_detail: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            provider: Provider::OpenAi,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(180),
            image_detail: "high".to_string(),
        }
    }
}
