use futures_util::StreamExt;
use reqwest::{Client, ClientBuilder, RequestBuilder};
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::config::{Provider, VisionConfig};
use super::error::VisionError;
use super::streaming::{StreamResponse, StreamUpdate};
use super::types;

/// Client for one multimodal inference endpoint. Credentials are not held
/// here; callers pass the leased key per call.
#[derive(Debug, Clone)]
pub struct VisionService {
    client: Client,
    config: VisionConfig,
}

impl VisionService {
    pub fn new(config: VisionConfig) -> Self {
        let client = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, config }
    }

    fn authorize(&self, builder: RequestBuilder, api_key: &str) -> RequestBuilder {
        match self.config.provider {
            Provider::OpenAi => builder.bearer_auth(api_key),
            Provider::Message => builder.header("x-api-key", api_key),
        }
    }

    /// Blocking grade: sends the image and prompt, returns the full critique
    /// text.
    pub async fn grade(
        &self,
        api_key: &str,
        prompt: &str,
        image_b64: &str,
    ) -> Result<String, VisionError> {
        match self.config.provider {
            Provider::OpenAi => self.grade_openai(api_key, prompt, image_b64).await,
            Provider::Message => self.grade_message(api_key, prompt, image_b64).await,
        }
    }

    async fn grade_openai(
        &self,
        api_key: &str,
        prompt: &str,
        image_b64: &str,
    ) -> Result<String, VisionError> {
        let body = types::chat_completion_body(
            &self.config.model,
            prompt,
            image_b64,
            &self.config.image_detail,
            false,
        );
        let request = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .timeout(self.config.request_timeout)
            .json(&body);
        let response = self
            .authorize(request, api_key)
            .send()
            .await
            .map_err(|e| VisionError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(VisionError::RequestFailed(format!("{status}: {text}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VisionError::ParseError(e.to_string()))?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| VisionError::ParseError("content missing in reply".to_string()))?;
        Ok(content.to_string())
    }

    async fn grade_message(
        &self,
        api_key: &str,
        prompt: &str,
        image_b64: &str,
    ) -> Result<String, VisionError> {
        let body = types::message_body(&self.config.model, prompt, image_b64);
        let request = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .timeout(self.config.request_timeout)
            .json(&body);
        let response = self
            .authorize(request, api_key)
            .send()
            .await
            .map_err(|e| VisionError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(VisionError::RequestFailed(format!("{status}: {text}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VisionError::ParseError(e.to_string()))?;
        let blocks = json["content"]
            .as_array()
            .ok_or_else(|| VisionError::ParseError("content blocks missing".to_string()))?;
        let mut content = String::new();
        for block in blocks {
            if block["type"] == "text" {
                if let Some(text) = block["text"].as_str() {
                    content.push_str(text);
                }
            }
        }
        Ok(content)
    }

    /// Streaming grade. Chunks arrive as `StreamUpdate::Content`, followed by
    /// exactly one `Done` or `Error`. Message-style providers do not stream;
    /// their reply is surfaced as a single chunk.
    pub async fn grade_stream(
        &self,
        api_key: &str,
        prompt: &str,
        image_b64: &str,
    ) -> mpsc::Receiver<StreamUpdate> {
        let (tx, rx) = mpsc::channel(100);

        if self.config.provider == Provider::Message {
            let service = self.clone();
            let api_key = api_key.to_string();
            let prompt = prompt.to_string();
            let image_b64 = image_b64.to_string();
            tokio::spawn(async move {
                match service.grade_message(&api_key, &prompt, &image_b64).await {
                    Ok(content) => {
                        if !content.is_empty() {
                            let _ = tx.send(StreamUpdate::Content(content)).await;
                        }
                        let _ = tx.send(StreamUpdate::Done).await;
                    }
                    Err(e) => {
                        let _ = tx.send(StreamUpdate::Error(e.to_string())).await;
                    }
                }
            });
            return rx;
        }

        let client = self.client.clone();
        let config = self.config.clone();
        let api_key = api_key.to_string();
        let body = types::chat_completion_body(
            &config.model,
            prompt,
            image_b64,
            &config.image_detail,
            true,
        );

        tokio::spawn(async move {
            let request = client
                .post(format!("{}/chat/completions", config.base_url))
                .timeout(config.stream_timeout)
                .json(&body);
            let request = match config.provider {
                Provider::OpenAi => request.bearer_auth(&api_key),
                Provider::Message => request.header("x-api-key", &api_key),
            };

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "failed to open upstream stream");
                    let _ = tx.send(StreamUpdate::Error(e.to_string())).await;
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                let _ = tx
                    .send(StreamUpdate::Error(format!("{status}: {text}")))
                    .await;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!(error = %e, "upstream stream broke");
                        let _ = tx.send(StreamUpdate::Error(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        let _ = tx.send(StreamUpdate::Done).await;
                        return;
                    }
                    match serde_json::from_str::<StreamResponse>(data) {
                        Ok(parsed) => {
                            let content = parsed
                                .choices
                                .first()
                                .and_then(|choice| choice.delta.content.clone());
                            if let Some(content) = content {
                                if !content.is_empty()
                                    && tx.send(StreamUpdate::Content(content)).await.is_err()
                                {
                                    // Receiver hung up; stop reading upstream.
                                    return;
                                }
                            }
                        }
                        Err(e) => debug!(error = %e, "skipping unparseable stream line"),
                    }
                }
            }
            // Connection ended without the sentinel; treat as completion.
            let _ = tx.send(StreamUpdate::Done).await;
        });

        rx
    }
}
