mod heartbeat;
mod json_repair;
mod parser;
mod prompts;

pub use heartbeat::{spawn_heartbeat, THINKING_MESSAGES};
pub use json_repair::{extract_top_level_pairs, repair_json};
pub use parser::{parse_batch_reply, parse_single_reply};
pub use prompts::PromptSet;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::config::AppConfig;
use crate::server::error::GradeError;
use crate::server::models::{
    default_templates, now_timestamp, short_id, BatchResult, GradingTask, SingleCharResult,
    Template,
};
use crate::server::services::dispatcher::Dispatcher;
use crate::server::services::flood::FloodLimiter;
use crate::server::services::image::{compress_for_upload, GridCropper};
use crate::server::services::keypool::mask_key;
use crate::server::services::store::ResultStore;
use crate::server::services::vision::{StreamUpdate, VisionService};

/// Downstream event for one grading request. The SSE layer maps these onto
/// named events; ordering per request is `Start`, then any `Thinking` strictly
/// before the first `Token`, then tokens in upstream order, then exactly one
/// of `Result`/`SingleResult`/`Error`.
#[derive(Debug, Clone)]
pub enum GradeEvent {
    Start,
    Thinking(String),
    Token(String),
    Result(BatchResult),
    SingleResult(SingleCharResult),
    Error(String),
}

type RunnerFuture = Pin<Box<dyn Future<Output = Result<String, GradeError>> + Send>>;

/// Orchestrates one grading request end to end: admission, image
/// preconditioning, the upstream call (leased key, heartbeat, token
/// forwarding), parsing, cropping, persistence.
pub struct GradingEngine {
    config: Arc<AppConfig>,
    dispatcher: Dispatcher,
    vision: Arc<VisionService>,
    store: Arc<dyn ResultStore>,
    flood: FloodLimiter,
    prompts: PromptSet,
}

impl GradingEngine {
    pub fn new(
        config: Arc<AppConfig>,
        dispatcher: Dispatcher,
        vision: Arc<VisionService>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let flood = FloodLimiter::new(store.clone());
        let prompts = PromptSet::load(&config.prompt_dir);
        Self {
            config,
            dispatcher,
            vision,
            store,
            flood,
            prompts,
        }
    }

    /// Blocking whole-page grading.
    pub async fn analyze(&self, task: GradingTask) -> Result<BatchResult, GradeError> {
        self.flood.check(task.user_id).await?;
        if task.image.is_empty() {
            return Err(GradeError::Upstream("图片内容为空".to_string()));
        }
        let started = Instant::now();
        info!(task_id = %task.task_id, bytes = task.image.len(), "whole-page analysis started");

        let image_b64 = self.precondition(&task.image);
        let reply = if self.config.multi_agent_enabled {
            self.compose_multi_agent(&task.task_id, &image_b64).await?
        } else {
            self.call_upstream(&task.task_id, self.prompts.whole_page.clone(), image_b64)
                .await?
        };

        let mut result = parser::parse_batch_reply(&task.task_id, &reply);
        self.finish_batch(&mut result, &task, started).await;
        Ok(result)
    }

    /// Blocking single-character grading.
    pub async fn analyze_single(&self, task: GradingTask) -> Result<SingleCharResult, GradeError> {
        self.flood.check(task.user_id).await?;
        if task.image.is_empty() {
            return Err(GradeError::Upstream("图片内容为空".to_string()));
        }
        let started = Instant::now();
        info!(task_id = %task.task_id, bytes = task.image.len(), "single-char analysis started");

        let image_b64 = self.precondition(&task.image);
        let reply = self
            .call_upstream(&task.task_id, self.prompts.single_char.clone(), image_b64)
            .await?;

        let mut result = parser::parse_single_reply(&task.task_id, &reply);
        self.finish_single(&mut result, &task, started).await;
        Ok(result)
    }

    /// Streaming whole-page grading. The call is one-shot: a broken upstream
    /// stream retires the key and ends the request with an `Error` event.
    pub async fn analyze_stream(&self, task: GradingTask, tx: mpsc::Sender<GradeEvent>) {
        let _ = tx.send(GradeEvent::Start).await;
        if let Err(e) = self.flood.check(task.user_id).await {
            let _ = tx.send(GradeEvent::Error(e.to_string())).await;
            return;
        }
        if task.image.is_empty() {
            let _ = tx.send(GradeEvent::Error("图片内容为空".to_string())).await;
            return;
        }

        let started = Instant::now();
        match self
            .stream_critique(&task, self.prompts.whole_page.clone(), &tx)
            .await
        {
            Ok(buffer) => {
                let mut result = parser::parse_batch_reply(&task.task_id, &buffer);
                self.finish_batch(&mut result, &task, started).await;
                let _ = tx.send(GradeEvent::Result(result)).await;
            }
            Err(e) => {
                let _ = tx.send(GradeEvent::Error(e.to_string())).await;
            }
        }
    }

    /// Streaming single-character grading.
    pub async fn analyze_single_stream(&self, task: GradingTask, tx: mpsc::Sender<GradeEvent>) {
        let _ = tx.send(GradeEvent::Start).await;
        if let Err(e) = self.flood.check(task.user_id).await {
            let _ = tx.send(GradeEvent::Error(e.to_string())).await;
            return;
        }
        if task.image.is_empty() {
            let _ = tx.send(GradeEvent::Error("图片内容为空".to_string())).await;
            return;
        }

        let started = Instant::now();
        match self
            .stream_critique(&task, self.prompts.single_char.clone(), &tx)
            .await
        {
            Ok(buffer) => {
                let mut result = parser::parse_single_reply(&task.task_id, &buffer);
                self.finish_single(&mut result, &task, started).await;
                let _ = tx.send(GradeEvent::SingleResult(result)).await;
            }
            Err(e) => {
                let _ = tx.send(GradeEvent::Error(e.to_string())).await;
            }
        }
    }

    /// Shared streaming body: lease a key, run the heartbeat until the first
    /// token, forward tokens while accumulating, settle the lease. Returns
    /// the accumulated critique text.
    async fn stream_critique(
        &self,
        task: &GradingTask,
        prompt: String,
        tx: &mpsc::Sender<GradeEvent>,
    ) -> Result<String, GradeError> {
        let key = self.dispatcher.borrow_with_rate().await?;
        let started = Instant::now();

        let first_token = Arc::new(AtomicBool::new(false));
        let beat = spawn_heartbeat(tx.clone(), first_token.clone());

        let image_b64 = self.precondition(&task.image);
        let mut updates = self.vision.grade_stream(&key, &prompt, &image_b64).await;

        let mut buffer = String::new();
        let mut stream_error: Option<String> = None;
        while let Some(update) = updates.recv().await {
            match update {
                StreamUpdate::Content(chunk) => {
                    if !first_token.swap(true, Ordering::AcqRel) {
                        debug!(
                            task_id = %task.task_id,
                            first_token_ms = started.elapsed().as_millis() as u64,
                            "first token received"
                        );
                    }
                    buffer.push_str(&chunk);
                    // Send failures mean the client went away; keep draining
                    // upstream so the result can still be parsed and stored.
                    let _ = tx.send(GradeEvent::Token(chunk)).await;
                }
                StreamUpdate::Done => break,
                StreamUpdate::Error(message) => {
                    stream_error = Some(message);
                    break;
                }
            }
        }
        first_token.store(true, Ordering::Release);
        beat.abort();

        let latency_ms = started.elapsed().as_millis() as u64;
        if let Some(message) = stream_error {
            self.dispatcher.pool().mark_failed(key.clone()).await;
            self.log_usage(&key, &task.task_id, false, latency_ms).await;
            return Err(GradeError::Upstream(message));
        }

        self.dispatcher.pool().give_back(key.clone()).await;
        if buffer.trim().is_empty() {
            self.log_usage(&key, &task.task_id, false, latency_ms).await;
            return Err(GradeError::Upstream("AI 返回空内容".to_string()));
        }
        self.log_usage(&key, &task.task_id, true, latency_ms).await;
        Ok(buffer)
    }

    fn precondition(&self, image: &[u8]) -> String {
        BASE64.encode(compress_for_upload(image, self.config.max_image_size))
    }

    /// Runs one prompt through the dispatcher's lease-and-retry machinery.
    async fn call_upstream(
        &self,
        task_id: &str,
        prompt: String,
        image_b64: String,
    ) -> Result<String, GradeError> {
        let runner = self.make_runner(task_id.to_string());
        self.dispatcher
            .execute_with_retry((prompt, image_b64), runner)
            .await
    }

    /// Three-pass critique: structure and stroke drafts fan out through the
    /// dispatcher, then a synthesis pass merges them. Missing drafts degrade
    /// to the single-pass prompt.
    async fn compose_multi_agent(
        &self,
        task_id: &str,
        image_b64: &str,
    ) -> Result<String, GradeError> {
        let base = &self.prompts.whole_page;
        let items = vec![
            (prompts::structure_focus(base), image_b64.to_string()),
            (prompts::stroke_focus(base), image_b64.to_string()),
        ];
        let mut drafts = self
            .dispatcher
            .dispatch_all(items, self.make_runner(task_id.to_string()))
            .await;

        let stroke_draft = drafts.pop().flatten();
        let structure_draft = drafts.pop().flatten();
        match (structure_draft, stroke_draft) {
            (Some(structure), Some(stroke)) => {
                let composed = prompts::compose(base, &structure, &stroke);
                self.call_upstream(task_id, composed, image_b64.to_string())
                    .await
            }
            _ => {
                warn!(task_id, "multi-agent drafts incomplete, falling back to single pass");
                self.call_upstream(task_id, base.clone(), image_b64.to_string())
                    .await
            }
        }
    }

    /// Builds the per-attempt closure the dispatcher drives: one upstream
    /// call, key usage accounting, empty replies surfaced as upstream errors.
    fn make_runner(
        &self,
        task_id: String,
    ) -> impl Fn((String, String), String) -> RunnerFuture + Clone + Send + Sync + 'static {
        let vision = self.vision.clone();
        let store = self.store.clone();
        move |(prompt, image_b64): (String, String), key: String| {
            let vision = vision.clone();
            let store = store.clone();
            let task_id = task_id.clone();
            Box::pin(async move {
                let started = Instant::now();
                let outcome = vision.grade(&key, &prompt, &image_b64).await;
                let latency_ms = started.elapsed().as_millis() as u64;
                let success = matches!(&outcome, Ok(content) if !content.trim().is_empty());
                if let Err(e) = store
                    .log_key_usage(&mask_key(&key), &task_id, success, latency_ms)
                    .await
                {
                    warn!(error = %e, "failed to log key usage");
                }
                match outcome {
                    Ok(content) if content.trim().is_empty() => {
                        Err(GradeError::Upstream("AI 返回空内容".to_string()))
                    }
                    Ok(content) => Ok(content),
                    Err(e) => Err(GradeError::Upstream(e.to_string())),
                }
            }) as RunnerFuture
        }
    }

    async fn finish_batch(&self, result: &mut BatchResult, task: &GradingTask, started: Instant) {
        result.image_id = format!("img-{}", short_id(12));
        result.processing_time_ms = started.elapsed().as_millis() as u64;
        result.created_at = now_timestamp();

        if let Some(template) = self.resolve_template(task.template_id).await {
            // Crops come from the original upload, not the recompressed copy.
            GridCropper::attach_crops(result, &task.image, &template);
        }

        if let Err(e) = self
            .store
            .save_result(result, &task.file_name, task.user_id, task.copybook_id)
            .await
        {
            warn!(task_id = %result.task_id, error = %e, "failed to persist batch result");
        }
    }

    async fn finish_single(
        &self,
        result: &mut SingleCharResult,
        task: &GradingTask,
        started: Instant,
    ) {
        result.processing_time_ms = started.elapsed().as_millis() as u64;
        result.created_at = now_timestamp();
        if let Err(e) = self.store.save_single_result(result, task.user_id).await {
            warn!(task_id = %result.task_id, error = %e, "failed to persist single result");
        }
    }

    async fn resolve_template(&self, template_id: Option<i64>) -> Option<Template> {
        let id = template_id?;
        match self.store.find_template(id).await {
            Ok(Some(template)) => Some(template),
            Ok(None) => default_templates().into_iter().find(|t| t.id == id),
            Err(e) => {
                warn!(template_id = id, error = %e, "template lookup failed, trying built-ins");
                default_templates().into_iter().find(|t| t.id == id)
            }
        }
    }

    async fn log_usage(&self, key: &str, task_id: &str, success: bool, latency_ms: u64) {
        if let Err(e) = self
            .store
            .log_key_usage(&mask_key(key), task_id, success, latency_ms)
            .await
        {
            warn!(error = %e, "failed to log key usage");
        }
    }
}
