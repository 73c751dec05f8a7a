pub mod grading;
pub mod response;

pub use grading::*;
pub use response::ApiResponse;

use uuid::Uuid;

/// Short random id used in task identifiers, e.g. `task-3f9a1c04b2de`.
pub fn short_id(len: usize) -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(len);
    id
}

/// Wall-clock timestamp in the storage format shared with the database
/// (`YYYY-MM-DD HH:MM:SS`).
pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
