//! OpenAI wire client backing the embed, chat-structured, and multi-modal
//! capability seams. Transport-level retries (429 and 5xx, connect/timeout
//! failures) happen here with exponential backoff; schema-level retries are
//! the block generator's concern.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

use crate::services::embed::{EmbedClient, EmbedError};
use crate::services::generate::{ChatClient, FileChatClient, GenerateError};

pub type GenericRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_RETRIES: usize = 3;
const REQUESTS_PER_SECOND: u32 = 8;

#[derive(Debug, Error)]
pub enum OpenAiConfigError {
    #[error("invalid OpenAI API key")]
    InvalidApiKey(#[from] reqwest::header::InvalidHeaderValue),
    #[error("failed to build OpenAI HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
enum CallError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl CallError {
    fn is_retryable(&self) -> bool {
        match self {
            CallError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            CallError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
        }
    }
}

impl From<CallError> for EmbedError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Http(source) => EmbedError::Http(source),
            CallError::Status { status, body } => EmbedError::Provider {
                status: status.as_u16(),
                body,
            },
        }
    }
}

impl From<CallError> for GenerateError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Http(source) => GenerateError::Http(source),
            CallError::Status { status, body } => GenerateError::Provider {
                status: status.as_u16(),
                body,
            },
        }
    }
}

/// Client for OpenAI-compatible endpoints, shared by all provider seams.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    chat_model: String,
    embed_model: String,
    dimensions: usize,
    limiter: Option<Arc<GenericRateLimiter>>,
}

impl OpenAiClient {
    pub fn new(
        api_key: &str,
        base_url: &str,
        chat_model: impl Into<String>,
        embed_model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, OpenAiConfigError> {
        debug_assert!(!api_key.trim().is_empty());
        debug_assert!(dimensions > 0);

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&auth)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        let quota = Quota::per_second(
            NonZeroU32::new(REQUESTS_PER_SECOND).expect("request quota is non-zero"),
        );

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_model: chat_model.into(),
            embed_model: embed_model.into(),
            dimensions,
            limiter: Some(Arc::new(RateLimiter::direct(quota))),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<JsonValue, CallError> {
        let send = || async {
            self.throttle().await;
            let response = self.http.post(self.endpoint(path)).json(body).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                return Err(CallError::Status { status, body });
            }
            Ok(response.json::<JsonValue>().await?)
        };
        send.retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(500))
                .with_max_times(MAX_RETRIES),
        )
        .when(CallError::is_retryable)
        .await
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbedClient for OpenAiClient {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.embed_model,
            input: texts,
            dimensions: self.dimensions,
        };
        let raw = self.post_json("embeddings", &request).await?;
        let mut parsed: EmbeddingResponse = serde_json::from_value(raw)
            .map_err(|err| EmbedError::mismatch(format!("malformed embedding response: {err}")))?;
        parsed.data.sort_by_key(|entry| entry.index);
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn chat_structured(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: &JsonValue,
    ) -> Result<JsonValue, GenerateError> {
        let body = json!({
            "model": self.chat_model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "strict": true,
                    "schema": schema,
                },
            },
        });
        let raw = self.post_json("chat/completions", &body).await?;
        let parsed: ChatResponse = serde_json::from_value(raw)?;
        let content = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(GenerateError::MissingContent)?;
        Ok(serde_json::from_str(content.trim())?)
    }
}

#[derive(Debug, Deserialize)]
struct FileUploadResponse {
    id: String,
}

#[async_trait]
impl FileChatClient for OpenAiClient {
    async fn upload_file(&self, path: &Path, file_name: &str) -> Result<String, GenerateError> {
        let bytes = tokio::fs::read(path).await?;
        let name = if file_name.is_empty() {
            "document.pdf".to_string()
        } else {
            file_name.to_string()
        };

        let send = || async {
            self.throttle().await;
            let part = reqwest::multipart::Part::bytes(bytes.clone())
                .file_name(name.clone())
                .mime_str("application/pdf")
                .map_err(CallError::Http)?;
            let form = reqwest::multipart::Form::new()
                .text("purpose", "user_data")
                .part("file", part);
            let response = self
                .http
                .post(self.endpoint("files"))
                .multipart(form)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                return Err(CallError::Status { status, body });
            }
            Ok(response.json::<JsonValue>().await?)
        };
        let raw = send
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_times(MAX_RETRIES),
            )
            .when(CallError::is_retryable)
            .await
            .map_err(GenerateError::from)?;

        let parsed: FileUploadResponse = serde_json::from_value(raw)?;
        Ok(parsed.id)
    }

    async fn respond_structured(
        &self,
        file_ref: &str,
        system: &str,
        instruction: &str,
        schema_name: &str,
        schema: &JsonValue,
    ) -> Result<JsonValue, GenerateError> {
        let body = json!({
            "model": self.chat_model,
            "instructions": system,
            "input": [{
                "role": "user",
                "content": [
                    {"type": "input_file", "file_id": file_ref},
                    {"type": "input_text", "text": instruction},
                ],
            }],
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": schema_name,
                    "strict": true,
                    "schema": schema,
                },
            },
        });
        let raw = self.post_json("responses", &body).await?;
        let content = extract_output_text(&raw).ok_or(GenerateError::MissingContent)?;
        Ok(serde_json::from_str(content.trim())?)
    }
}

/// Pulls the structured answer out of a Responses API payload: the
/// convenience `output_text` field when present, otherwise the first
/// `output_text` content item of an output message.
fn extract_output_text(raw: &JsonValue) -> Option<String> {
    if let Some(text) = raw.get("output_text").and_then(JsonValue::as_str)
        && !text.trim().is_empty()
    {
        return Some(text.to_string());
    }
    let output = raw.get("output")?.as_array()?;
    for item in output {
        if item.get("type").and_then(JsonValue::as_str) != Some("message") {
            continue;
        }
        let Some(contents) = item.get("content").and_then(JsonValue::as_array) else {
            continue;
        };
        for content in contents {
            if content.get("type").and_then(JsonValue::as_str) == Some("output_text")
                && let Some(text) = content.get("text").and_then(JsonValue::as_str)
                && !text.trim().is_empty()
            {
                return Some(text.to_string());
            }
        }
    }
    None
}
