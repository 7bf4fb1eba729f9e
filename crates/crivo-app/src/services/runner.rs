//! The ingestion worker: pops jobs from the durable queue, drives the
//! synthesis pipeline, and owns the document status lifecycle.
//!
//! One job runs at a time per process; several processes may share the queue
//! because BRPOP hands each payload to exactly one of them. The runner is the
//! single catch point: any stage failure turns into a `failed` status plus a
//! structured log record, and the temp file is removed on every exit path.

use std::sync::Arc;

use serde_json::json;

use crate::config::AppConfig;
use crate::pipeline::{Checklist, DocumentParser};
use crate::services::debug_sink::DebugSink;
use crate::services::download::{DownloadOptions, download_to_temp};
use crate::services::embed::Embedder;
use crate::services::generate::{BlockGenerator, ChatClient, FileChatClient};
use crate::services::ingest::{
    IngestError, SynthesisOptions, synthesize_from_pdf, synthesize_from_segments,
    synthesize_legacy,
};
use crate::services::queue::{IngestJob, IngestQueue, QueueError};
use crate::services::store::{DocumentStore, ProcessingClaim, StoreError};

pub struct JobRunner {
    queue: IngestQueue,
    store: DocumentStore,
    http: reqwest::Client,
    parser: DocumentParser,
    embedder: Embedder,
    chat: Arc<dyn ChatClient>,
    files: Arc<dyn FileChatClient>,
    generator: BlockGenerator,
    debug: DebugSink,
    download: DownloadOptions,
    synthesis: SynthesisOptions,
    use_checklist_blocks: bool,
    use_pdf_as_file: bool,
}

impl JobRunner {
    pub fn new(
        config: &AppConfig,
        queue: IngestQueue,
        store: DocumentStore,
        embedder: Embedder,
        chat: Arc<dyn ChatClient>,
        files: Arc<dyn FileChatClient>,
    ) -> Self {
        Self {
            queue,
            store,
            http: reqwest::Client::new(),
            parser: DocumentParser::new(config.parse_language.clone()),
            embedder,
            chat,
            files,
            generator: BlockGenerator::new(),
            debug: DebugSink::from_dir(config.debug_dump_dir.clone()),
            download: DownloadOptions::builder()
                .timeout_secs(config.download_timeout_secs)
                .max_bytes(config.download_max_bytes)
                .build(),
            synthesis: SynthesisOptions {
                chunker: config.chunker_options(),
                retrieval: config.retrieval_params(),
                block_delay: std::time::Duration::from_secs(config.pdf_block_delay_sec),
                ..SynthesisOptions::default()
            },
            use_checklist_blocks: config.use_checklist_blocks,
            use_pdf_as_file: config.use_pdf_as_file,
        }
    }

    /// Queue loop: blocks up to 30 s per pop and runs forever.
    pub async fn run(&mut self) -> Result<(), QueueError> {
        tracing::info!("worker listening on the ingest queue");
        loop {
            let Some(payload) = self.queue.pop().await? else {
                continue;
            };
            match IngestJob::from_payload(&payload) {
                Ok(job) => self.process(job).await,
                Err(err) => {
                    // Payload-invalid: log and drop without any DB mutation.
                    tracing::error!(error = %err, "dropping malformed job payload");
                }
            }
        }
    }

    /// Processes one job end to end. Never returns an error: every failure
    /// is translated into a document status plus a log record here.
    pub async fn process(&self, job: IngestJob) {
        let document_id = job.document_id.as_str();
        tracing::info!(
            document_id,
            user_id = %job.user_id,
            file_name = %job.file_name(),
            "job received"
        );

        match self.store.claim_processing(document_id).await {
            Ok(ProcessingClaim::Claimed) => {}
            Ok(ProcessingClaim::Absent) => {
                tracing::warn!(document_id, "document row absent; dropping job");
                return;
            }
            Ok(ProcessingClaim::AlreadyDone) => {
                tracing::info!(document_id, "document already done; skipping redelivery");
                return;
            }
            Err(err) => {
                tracing::error!(document_id, error = %err, "failed to claim document");
                return;
            }
        }

        match self.execute(&job).await {
            Ok(()) => {
                tracing::info!(document_id, "job completed");
            }
            Err(err) => {
                match err.block_key() {
                    Some(block) => tracing::error!(
                        document_id,
                        stage = %err.stage(),
                        block_key = %block,
                        error = %err,
                        "job failed"
                    ),
                    None => tracing::error!(
                        document_id,
                        stage = %err.stage(),
                        error = %err,
                        "job failed"
                    ),
                }
                if let Err(status_err) = self.store.mark_failed(document_id).await {
                    tracing::error!(
                        document_id,
                        error = %status_err,
                        "failed to record failed status"
                    );
                }
            }
        }
    }

    async fn execute(&self, job: &IngestJob) -> Result<(), IngestError> {
        let file_name = job.file_name();
        // The handle owns the temp file; dropping it at the end of this
        // scope deletes the download on success and failure alike.
        let temp = download_to_temp(&self.http, &job.file_url, file_name, &self.download).await?;

        let use_pdf = job.use_pdf_file.unwrap_or(self.use_pdf_as_file);
        let checklist = if use_pdf {
            tracing::info!(document_id = %job.document_id, "pdf-native branch selected");
            synthesize_from_pdf(
                temp.path(),
                file_name,
                self.files.as_ref(),
                &self.generator,
                &self.synthesis,
            )
            .await?
        } else {
            let segments = self.parser.parse(temp.path(), file_name)?;
            tracing::info!(
                document_id = %job.document_id,
                segments = segments.len(),
                "document parsed"
            );
            self.debug.write_json(
                &job.user_id,
                &job.document_id,
                "parse",
                &json!({
                    "fileName": file_name,
                    "language": self.parser.language(),
                    "segments": segments.len(),
                }),
            );
            if self.use_checklist_blocks {
                synthesize_from_segments(
                    &segments,
                    &self.embedder,
                    self.chat.as_ref(),
                    &self.generator,
                    &self.synthesis,
                    file_name,
                )
                .await?
            } else {
                synthesize_legacy(&segments, self.chat.as_ref(), &self.generator, file_name)
                    .await?
            }
        };

        self.persist(job, file_name, &checklist).await
    }

    async fn persist(
        &self,
        job: &IngestJob,
        file_name: &str,
        checklist: &Checklist,
    ) -> Result<(), IngestError> {
        if let Ok(data) = serde_json::to_value(checklist) {
            self.debug
                .write_json(&job.user_id, &job.document_id, "checklist", &data);
        }

        match self
            .store
            .insert_checklist(&job.user_id, file_name, &job.document_id, checklist)
            .await
        {
            Ok(()) => {}
            Err(StoreError::DuplicateChecklist(_)) => {
                // A concurrent delivery won the insert; the UNIQUE constraint
                // is the idempotency guard.
                tracing::info!(
                    document_id = %job.document_id,
                    "checklist already present; keeping the existing row"
                );
            }
            Err(err) => return Err(err.into()),
        }

        self.store.mark_done(&job.document_id).await?;
        tracing::info!(document_id = %job.document_id, "document done");
        Ok(())
    }
}
