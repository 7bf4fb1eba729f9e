//! Cross-cutting application constants.

/// Durable FIFO queue consumed by the ingestion worker.
pub const INGEST_QUEUE: &str = "document:ingest";

/// Blocking pop timeout for the queue loop, in seconds.
pub const QUEUE_POP_TIMEOUT_SECS: f64 = 30.0;

/// Chat model used for block generation and the PDF-native branch.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Embedding model used for chunk and query vectors.
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";

/// Dimensionality of embeddings produced by the default embedder.
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

/// Maximum number of inputs per embedding provider call.
pub const EMBED_MAX_BATCH: usize = 2048;

/// Chunking thresholds, in characters.
pub const DEFAULT_CHUNK_MIN_CHARS: usize = 800;
pub const DEFAULT_CHUNK_MAX_CHARS: usize = 1200;
pub const DEFAULT_CHUNK_OVERLAP_CHARS: usize = 150;

/// Retrieval parameters.
pub const DEFAULT_TOP_K_RETRIEVAL: usize = 12;
pub const DEFAULT_TOP_N_FOR_MMR: usize = 40;
pub const DEFAULT_MMR_LAMBDA: f32 = 0.7;

/// Multiplier applied to a chunk's similarity when its section hint matches
/// one of the block's hints.
pub const SECTION_HINT_BOOST: f32 = 1.15;

/// Checklist document shape version persisted in the `data` column.
pub const CHECKLIST_SCHEMA_VERSION: u32 = 2;

/// Concurrent block-generation calls within a single job.
pub const BLOCK_FANOUT: usize = 4;
