mod config;
mod error;
mod service;
mod streaming;
mod types;

pub use config::{Provider, VisionConfig};
pub use error::VisionError;
pub use service::VisionService;
pub use streaming::StreamUpdate;
