use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}
