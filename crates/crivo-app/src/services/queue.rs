//! Durable FIFO ingestion queue backed by Redis.
//!
//! Producers LPUSH JSON payloads onto `document:ingest`; the worker BRPOPs
//! with a 30-second blocking timeout, so one payload is delivered to exactly
//! one runner at a time.

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{INGEST_QUEUE, QUEUE_POP_TIMEOUT_SECS};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Reasons a popped payload is dropped without touching the database.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid job JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("job payload missing required field `{0}`")]
    MissingField(&'static str),
    #[error("job payload carries an invalid fileUrl: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// A validated ingestion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestJob {
    pub document_id: String,
    pub user_id: String,
    pub file_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_pdf_file: Option<bool>,
}

impl IngestJob {
    /// Parses and validates a raw queue payload. Missing required fields are
    /// reported by name so the runner can log and drop the message.
    pub fn from_payload(raw: &str) -> Result<Self, PayloadError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawJob {
            #[serde(default)]
            document_id: Option<String>,
            #[serde(default)]
            user_id: Option<String>,
            #[serde(default)]
            file_url: Option<String>,
            #[serde(default)]
            file_name: Option<String>,
            #[serde(default)]
            use_pdf_file: Option<bool>,
        }

        let parsed: RawJob = serde_json::from_str(raw)?;
        let document_id = required(parsed.document_id, "documentId")?;
        let user_id = required(parsed.user_id, "userId")?;
        let file_url = required(parsed.file_url, "fileUrl")?;
        url::Url::parse(&file_url)?;
        Ok(Self {
            document_id,
            user_id,
            file_url,
            file_name: parsed.file_name.filter(|name| !name.trim().is_empty()),
            use_pdf_file: parsed.use_pdf_file,
        })
    }

    pub fn file_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or("document")
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, PayloadError> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or(PayloadError::MissingField(field))
}

/// Worker-side handle on the `document:ingest` list.
pub struct IngestQueue {
    conn: MultiplexedConnection,
}

impl IngestQueue {
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        debug_assert!(!url.is_empty());
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    /// Blocking pop; `None` when the timeout elapsed with an empty queue.
    pub async fn pop(&mut self) -> Result<Option<String>, QueueError> {
        let reply: Option<(String, String)> = self
            .conn
            .brpop(INGEST_QUEUE, QUEUE_POP_TIMEOUT_SECS)
            .await?;
        Ok(reply.map(|(_, payload)| payload))
    }

    pub async fn push(&mut self, job: &IngestJob) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let _: () = self.conn.lpush(INGEST_QUEUE, payload).await?;
        Ok(())
    }
}
