use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::GradeEvent;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Reassurance lines shown while the model is still thinking. Advances one
/// per beat and sticks on the last.
pub const THINKING_MESSAGES: [&str; 6] = [
    "正在仔细观察这页字……",
    "正在逐字分析结构与笔画……",
    "发现了几个值得点评的字……",
    "正在对照书写规范评分……",
    "正在组织点评语言……",
    "就快写完点评了，请稍候……",
];

/// Emits a `thinking` event every 3 seconds until the first upstream token
/// flips `first_token`. The owner aborts the handle on completion so the task
/// does not linger a full beat.
pub fn spawn_heartbeat(
    tx: mpsc::Sender<GradeEvent>,
    first_token: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut index = 0usize;
        loop {
            sleep(HEARTBEAT_INTERVAL).await;
            if first_token.load(Ordering::Acquire) {
                break;
            }
            let message = THINKING_MESSAGES[index];
            if tx
                .send(GradeEvent::Thinking(message.to_string()))
                .await
                .is_err()
            {
                break;
            }
            if index + 1 < THINKING_MESSAGES.len() {
                index += 1;
            }
        }
    })
}
