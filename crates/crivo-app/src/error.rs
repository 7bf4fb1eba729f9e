//! Application-level error type shared across the binary's entry points.

use thiserror::Error;

use crate::config::AppConfigError;
use crate::pipeline::ParseError;
use crate::services::{IngestError, OpenAiConfigError, QueueError, StoreError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] AppConfigError),
    #[error(transparent)]
    OpenAi(#[from] OpenAiConfigError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
