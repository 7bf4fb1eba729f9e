//! Embedding capability seam and the batching wrapper used by the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::constants::EMBED_MAX_BATCH;

const ZERO_VECTOR_VALUE: f32 = 0.0;

/// Errors emitted by embedding providers and the batching wrapper.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("embedding provider returned {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("{0}")]
    Mismatch(String),
}

impl EmbedError {
    pub fn mismatch(msg: impl Into<String>) -> Self {
        EmbedError::Mismatch(msg.into())
    }
}

/// Raw provider call: one request, at most `EMBED_MAX_BATCH` inputs.
#[async_trait]
pub trait EmbedClient: Send + Sync {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    fn dimensions(&self) -> usize;
}

/// Batching front over an [`EmbedClient`]: splits long input lists, maps
/// blank inputs to zero vectors without a provider round-trip, and verifies
/// counts and dimensions.
#[derive(Clone)]
pub struct Embedder {
    client: Arc<dyn EmbedClient>,
    max_batch: usize,
}

impl Embedder {
    pub fn new(client: Arc<dyn EmbedClient>) -> Self {
        Self {
            client,
            max_batch: EMBED_MAX_BATCH,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_max_batch(client: Arc<dyn EmbedClient>, max_batch: usize) -> Self {
        Self { client, max_batch }
    }

    pub fn dimensions(&self) -> usize {
        self.client.dimensions()
    }

    pub async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        debug_assert!(self.max_batch > 0);

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let dim = self.client.dimensions();
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut pending_indices: Vec<usize> = Vec::new();
        let mut pending_payloads: Vec<&str> = Vec::new();
        for (idx, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                results.push(Some(vec![ZERO_VECTOR_VALUE; dim]));
            } else {
                results.push(None);
                pending_indices.push(idx);
                pending_payloads.push(*text);
            }
        }

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(pending_payloads.len());
        for window in pending_payloads.chunks(self.max_batch) {
            let batch = self.client.embed_batch(window).await?;
            if batch.len() != window.len() {
                return Err(EmbedError::mismatch(format!(
                    "embedding count mismatch: expected {}, got {}",
                    window.len(),
                    batch.len()
                )));
            }
            vectors.extend(batch);
        }

        for (idx, vector) in pending_indices.into_iter().zip(vectors.into_iter()) {
            if vector.len() != dim {
                return Err(EmbedError::mismatch(format!(
                    "expected embedding dimension {dim}, got {}",
                    vector.len()
                )));
            }
            results[idx] = Some(vector);
        }

        results
            .into_iter()
            .map(|entry| entry.ok_or_else(|| EmbedError::mismatch("missing embedding result")))
            .collect()
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_texts(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::mismatch("missing query embedding"))
    }
}
