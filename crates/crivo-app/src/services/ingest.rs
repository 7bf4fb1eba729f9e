//! Checklist synthesis: chunk → embed → retrieve → generate → merge →
//! finalize, plus the PDF-native and legacy single-call branches. Errors are
//! labelled with the stage that produced them so the runner can log one
//! structured failure record.

use std::path::Path;
use std::time::Duration;

use futures_util::{StreamExt, TryStreamExt, stream};
use strum::{AsRefStr, Display};
use thiserror::Error;

use crate::constants::BLOCK_FANOUT;
use crate::pipeline::blocks::{BlockKey, block_specs, merge_block_results};
use crate::pipeline::chunk::{ChunkerOptions, NormalizedChunk, chunk_segments};
use crate::pipeline::normalize::finalize;
use crate::pipeline::parse::{ParseError, Segment};
use crate::pipeline::retrieve::{RetrievalParams, retrieve_for_block};
use crate::pipeline::{Checklist, ChecklistDraft};
use crate::services::download::DownloadError;
use crate::services::embed::{EmbedError, Embedder};
use crate::services::generate::{BlockGenerator, ChatClient, FileChatClient, GenerateError};
use crate::services::store::StoreError;

/// Separator between retrieved chunk texts in the generator context.
const CONTEXT_SEPARATOR: &str = "\n\n";

/// Pipeline stage labels used in failure logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Download,
    Parse,
    Embed,
    BlockGenerate,
    Persist,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error("block `{block}` generation failed: {source}")]
    BlockGenerate {
        block: BlockKey,
        #[source]
        source: GenerateError,
    },
    #[error("pdf upload failed: {0}")]
    Upload(#[source] GenerateError),
    #[error("full-checklist generation failed: {0}")]
    FullGenerate(#[source] GenerateError),
    #[error(transparent)]
    Persist(#[from] StoreError),
}

impl IngestError {
    pub fn stage(&self) -> Stage {
        match self {
            IngestError::Download(_) => Stage::Download,
            IngestError::Parse(_) => Stage::Parse,
            IngestError::Embed(_) => Stage::Embed,
            IngestError::BlockGenerate { .. }
            | IngestError::Upload(_)
            | IngestError::FullGenerate(_) => Stage::BlockGenerate,
            IngestError::Persist(_) => Stage::Persist,
        }
    }

    /// The block that failed, when the failure is block-scoped.
    pub fn block_key(&self) -> Option<BlockKey> {
        match self {
            IngestError::BlockGenerate { block, .. } => Some(*block),
            _ => None,
        }
    }
}

/// Knobs shared by the synthesis branches.
#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub chunker: ChunkerOptions,
    pub retrieval: RetrievalParams,
    /// Pause between block calls in PDF-native mode.
    pub block_delay: Duration,
    pub fanout: usize,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            chunker: ChunkerOptions::default(),
            retrieval: RetrievalParams::default(),
            block_delay: Duration::ZERO,
            fanout: BLOCK_FANOUT,
        }
    }
}

/// Text-mode synthesis over parsed segments: the eight blocks each retrieve
/// a diverse context and run concurrently with bounded fan-out; the merge
/// applies results in the fixed block order regardless of completion order.
pub async fn synthesize_from_segments(
    segments: &[Segment],
    embedder: &Embedder,
    chat: &dyn ChatClient,
    generator: &BlockGenerator,
    options: &SynthesisOptions,
    file_name: &str,
) -> Result<Checklist, IngestError> {
    let chunks = embed_chunks(segments, embedder, &options.chunker).await?;
    tracing::debug!(chunks = chunks.len(), "chunk embedding complete");

    let queries: Vec<String> = block_specs().map(|spec| spec.search_query()).collect();
    let query_refs: Vec<&str> = queries.iter().map(String::as_str).collect();
    let query_vectors = embedder.embed_texts(&query_refs).await?;

    let contexts: Vec<(BlockKey, String)> = block_specs()
        .zip(query_vectors.iter())
        .map(|(spec, query_vector)| {
            let retrieved =
                retrieve_for_block(&chunks, query_vector, spec.hints, &options.retrieval);
            let context = retrieved
                .iter()
                .map(|chunk| chunk.text.as_str())
                .collect::<Vec<_>>()
                .join(CONTEXT_SEPARATOR);
            (spec.key, context)
        })
        .collect();

    let fanout = options.fanout.max(1);
    let results = stream::iter(contexts.into_iter().map(|(key, context)| async move {
        let spec = crate::pipeline::blocks::spec_for(key);
        generator
            .generate_block(chat, spec, &context, file_name)
            .await
            .map_err(|source| IngestError::BlockGenerate { block: key, source })
    }))
    .buffered(fanout)
    .try_collect::<Vec<_>>()
    .await?;

    Ok(finalize(merge_block_results(results)))
}

/// PDF-native synthesis: upload once, then run the eight blocks against the
/// file reference with an optional pause between calls.
pub async fn synthesize_from_pdf(
    path: &Path,
    file_name: &str,
    files: &dyn FileChatClient,
    generator: &BlockGenerator,
    options: &SynthesisOptions,
) -> Result<Checklist, IngestError> {
    let file_ref = files
        .upload_file(path, file_name)
        .await
        .map_err(IngestError::Upload)?;
    tracing::debug!(file_ref = %file_ref, "pdf uploaded for multi-modal generation");

    let mut results = Vec::with_capacity(8);
    let mut first = true;
    for spec in block_specs() {
        if !first && !options.block_delay.is_zero() {
            tokio::time::sleep(options.block_delay).await;
        }
        first = false;
        let result = generator
            .generate_block_from_file(files, &file_ref, spec)
            .await
            .map_err(|source| IngestError::BlockGenerate {
                block: spec.key,
                source,
            })?;
        results.push(result);
    }

    Ok(finalize(merge_block_results(results)))
}

/// Legacy branch: one structured call over the full document context.
pub async fn synthesize_legacy(
    segments: &[Segment],
    chat: &dyn ChatClient,
    generator: &BlockGenerator,
    file_name: &str,
) -> Result<Checklist, IngestError> {
    let context = segments
        .iter()
        .map(|segment| segment.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    let payload = generator
        .generate_full(chat, &context, file_name)
        .await
        .map_err(IngestError::FullGenerate)?;

    let mut draft = ChecklistDraft::default();
    payload.apply(&mut draft);
    Ok(finalize(draft))
}

/// Chunks the segments and attaches embedding vectors, verifying that the
/// provider returned one vector per chunk with a uniform dimension.
async fn embed_chunks(
    segments: &[Segment],
    embedder: &Embedder,
    options: &ChunkerOptions,
) -> Result<Vec<NormalizedChunk>, IngestError> {
    let mut chunks = chunk_segments(segments, options);
    let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
    let vectors = embedder.embed_texts(&texts).await?;
    if vectors.len() != chunks.len() {
        return Err(EmbedError::mismatch(format!(
            "expected {} chunk vectors, got {}",
            chunks.len(),
            vectors.len()
        ))
        .into());
    }
    for (chunk, vector) in chunks.iter_mut().zip(vectors) {
        chunk.embedding = vector;
    }
    Ok(chunks)
}
