use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::server::handlers::homework::{self, MAX_UPLOAD_BYTES};
use crate::server::services::dispatcher::Dispatcher;
use crate::server::services::engine::GradingEngine;
use crate::server::services::keypool::{
    spawn_recovery_ticker, KeyPool, MemoryKeyPool, RedisKeyPool,
};
use crate::server::services::rate_limit::SlidingWindowRateLimiter;
use crate::server::services::store::{InMemoryResultStore, PostgresResultStore, ResultStore};
use crate::server::services::vision::{Provider, VisionConfig, VisionService};

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `memory` (default) or `redis`; selects the key-pool variant.
    pub storage_type: String,
    pub max_concurrent: usize,
    pub retry_count: u32,
    pub key_cooldown_seconds: u64,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_max_requests: usize,
    pub key_borrow_timeout_seconds: u64,
    pub max_characters_per_batch: usize,
    pub max_image_size: u32,
    pub request_timeout_seconds: u64,
    pub multi_agent_enabled: bool,
    pub api_keys: Vec<String>,
    pub vision_api_url: String,
    pub vision_model: String,
    pub vision_provider: String,
    pub prompt_dir: String,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for AppConfig {
    fn default() -> Self {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let api_keys = env::var("API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            storage_type: env::var("STORAGE_TYPE").unwrap_or_else(|_| "memory".to_string()),
            max_concurrent: env_or("MAX_CONCURRENT", 15),
            retry_count: env_or("RETRY_COUNT", 3),
            key_cooldown_seconds: env_or("KEY_COOLDOWN_SECONDS", 60),
            rate_limit_window_seconds: env_or("RATE_LIMIT_WINDOW_SECONDS", 60),
            rate_limit_max_requests: env_or("RATE_LIMIT_MAX_REQUESTS", 50),
            key_borrow_timeout_seconds: env_or("KEY_BORROW_TIMEOUT_SECONDS", 120),
            max_characters_per_batch: env_or("MAX_CHARACTERS_PER_BATCH", 30),
            max_image_size: env_or("MAX_IMAGE_SIZE", 512),
            request_timeout_seconds: env_or("REQUEST_TIMEOUT_SECONDS", 30),
            multi_agent_enabled: env_or("MULTI_AGENT_ENABLED", false),
            api_keys,
            vision_api_url: env::var("VISION_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            vision_model: env::var("VISION_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            vision_provider: env::var("VISION_PROVIDER").unwrap_or_else(|_| "openai".to_string()),
            prompt_dir: env::var("PROMPT_DIR").unwrap_or_else(|_| "prompts".to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            redis_url: env::var("REDIS_URL").ok(),
        }
    }
}

impl AppConfig {
    pub fn vision_config(&self) -> VisionConfig {
        VisionConfig {
            base_url: self.vision_api_url.clone(),
            model: self.vision_model.clone(),
            provider: Provider::parse(&self.vision_provider),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            stream_timeout: Duration::from_secs(180),
            image_detail: "high".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<GradingEngine>,
    pub store: Arc<dyn ResultStore>,
    pub pool: Arc<dyn KeyPool>,
}

/// Wires the pool, rate limiter, dispatcher, upstream client, store, and
/// engine together, seeds the key pool, and starts the recovery ticker.
pub async fn build_state(config: AppConfig) -> Result<AppState> {
    let config = Arc::new(config);

    let store: Arc<dyn ResultStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .context("Failed to create database pool")?;
            Arc::new(PostgresResultStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; grading records are kept in memory only");
            Arc::new(InMemoryResultStore::new())
        }
    };

    let borrow_timeout = Duration::from_secs(config.key_borrow_timeout_seconds);
    let pool: Arc<dyn KeyPool> = match config.storage_type.as_str() {
        "redis" => {
            let url = config
                .redis_url
                .clone()
                .context("STORAGE_TYPE=redis requires REDIS_URL")?;
            Arc::new(RedisKeyPool::connect(&url, borrow_timeout).await?)
        }
        _ => Arc::new(MemoryKeyPool::new(borrow_timeout)),
    };

    if config.api_keys.is_empty() {
        warn!("no API keys configured; grading requests will fail with EXHAUSTED");
    }
    pool.add_keys(config.api_keys.clone()).await;
    info!(
        keys = pool.available_count().await,
        storage = %config.storage_type,
        "key pool ready"
    );

    let limiter = Arc::new(SlidingWindowRateLimiter::new(
        Duration::from_secs(config.rate_limit_window_seconds),
        config.rate_limit_max_requests,
    ));
    let dispatcher = Dispatcher::new(
        pool.clone(),
        limiter.clone(),
        config.max_concurrent,
        config.max_characters_per_batch,
        config.retry_count,
    );
    let vision = Arc::new(VisionService::new(config.vision_config()));
    let engine = Arc::new(GradingEngine::new(
        config.clone(),
        dispatcher,
        vision,
        store.clone(),
    ));

    let _recovery = spawn_recovery_ticker(
        pool.clone(),
        limiter,
        Duration::from_secs(config.key_cooldown_seconds),
    );

    Ok(AppState {
        config,
        engine,
        store,
        pool,
    })
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

pub fn configure_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/homework/templates", get(homework::list_templates))
        .route("/api/homework/analyze", post(homework::analyze))
        .route("/api/homework/analyze-stream", post(homework::analyze_stream))
        .route("/api/homework/analyze-single", post(homework::analyze_single))
        .route(
            "/api/homework/analyze-single-stream",
            post(homework::analyze_single_stream),
        )
        .route("/api/homework/history/:user_id", get(homework::history))
        .route("/api/homework/growth/:user_id/:char_name", get(homework::growth))
        .route("/api/homework/:task_id", get(homework::get_result))
        // Slack above the documented limit so oversized uploads reach the
        // handler and come back as FILE_TOO_LARGE instead of a bare 413.
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
