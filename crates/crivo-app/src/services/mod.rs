//! IO-bound services coordinating external systems (queue, database,
//! object storage, embedding and chat providers). Pure transforms live in
//! `crate::pipeline`; keep them out of here so concurrency and resource
//! accounting stay localized.

pub mod debug_sink;
pub mod download;
pub mod embed;
pub mod generate;
pub mod ingest;
pub mod openai;
pub mod queue;
pub mod runner;
pub mod store;

pub use debug_sink::DebugSink;
pub use download::{DownloadError, DownloadOptions, download_to_temp};
pub use embed::{EmbedClient, EmbedError, Embedder};
pub use generate::{BlockGenerator, ChatClient, FileChatClient, GenerateError};
pub use ingest::{
    IngestError, Stage, SynthesisOptions, synthesize_from_pdf, synthesize_from_segments,
    synthesize_legacy,
};
pub use openai::{OpenAiClient, OpenAiConfigError};
pub use queue::{IngestJob, IngestQueue, PayloadError, QueueError};
pub use runner::JobRunner;
pub use store::{DocumentStatus, DocumentStore, ProcessingClaim, StoreError};
