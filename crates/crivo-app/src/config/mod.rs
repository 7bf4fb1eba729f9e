//! Configuration loading.
//!
//! Defaults are layered under an optional TOML file and the process
//! environment, so the operational variables (`REDIS_URL`, `DATABASE_URL`,
//! `OPENAI_API_KEY`, `USE_CHECKLIST_BLOCKS`, `USE_PDF_AS_FILE`, the chunking
//! and retrieval knobs) can be set without a config file at all.

use std::{env, path::PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use crate::constants::{
    DEFAULT_CHAT_MODEL, DEFAULT_CHUNK_MAX_CHARS, DEFAULT_CHUNK_MIN_CHARS,
    DEFAULT_CHUNK_OVERLAP_CHARS, DEFAULT_EMBED_MODEL, DEFAULT_EMBEDDING_DIM, DEFAULT_MMR_LAMBDA,
    DEFAULT_TOP_K_RETRIEVAL, DEFAULT_TOP_N_FOR_MMR,
};
use crate::pipeline::{ChunkerOptions, RetrievalParams};

const LOCAL_CONFIG_PATH: &str = "config/settings.toml";
const CONFIG_OVERRIDE_ENV: &str = "CRIVO_CONFIG_FILE";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),
    #[error("DATABASE_URL is required")]
    MissingDatabaseUrl,
    #[error("OPENAI_API_KEY is required")]
    MissingOpenAiApiKey,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub redis_url: String,
    pub database_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub embed_model: String,
    pub embedding_dimensions: usize,
    /// When false, fall back to one structured call over the full context.
    pub use_checklist_blocks: bool,
    /// Default for jobs that do not carry `usePdfFile`.
    pub use_pdf_as_file: bool,
    pub chunk_min_chars: usize,
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub top_k_retrieval: usize,
    pub top_n_for_mmr: usize,
    pub mmr_lambda: f32,
    /// Pause between block calls in PDF-native mode, in seconds.
    pub pdf_block_delay_sec: u64,
    pub download_timeout_secs: u64,
    pub download_max_bytes: u64,
    /// Language hint handed to the document parser.
    pub parse_language: String,
    /// When set, parse dumps and raw block responses are written under this
    /// directory keyed by `{userId}/{documentId}`.
    pub debug_dump_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn chunker_options(&self) -> ChunkerOptions {
        ChunkerOptions {
            min_chars: self.chunk_min_chars,
            max_chars: self.chunk_max_chars,
            overlap_chars: self.chunk_overlap_chars,
        }
    }

    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            top_k: self.top_k_retrieval,
            mmr_pool: self.top_n_for_mmr,
            mmr_lambda: self.mmr_lambda,
            ..RetrievalParams::default()
        }
    }

    pub fn require_database_url(&self) -> Result<&str, AppConfigError> {
        self.database_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(AppConfigError::MissingDatabaseUrl)
    }

    pub fn require_openai_api_key(&self) -> Result<&str, AppConfigError> {
        self.openai_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(AppConfigError::MissingOpenAiApiKey)
    }
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let mut builder = Config::builder()
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("openai_base_url", "https://api.openai.com/v1")?
        .set_default("chat_model", DEFAULT_CHAT_MODEL)?
        .set_default("embed_model", DEFAULT_EMBED_MODEL)?
        .set_default("embedding_dimensions", DEFAULT_EMBEDDING_DIM as i64)?
        .set_default("use_checklist_blocks", true)?
        .set_default("use_pdf_as_file", false)?
        .set_default("chunk_min_chars", DEFAULT_CHUNK_MIN_CHARS as i64)?
        .set_default("chunk_max_chars", DEFAULT_CHUNK_MAX_CHARS as i64)?
        .set_default("chunk_overlap_chars", DEFAULT_CHUNK_OVERLAP_CHARS as i64)?
        .set_default("top_k_retrieval", DEFAULT_TOP_K_RETRIEVAL as i64)?
        .set_default("top_n_for_mmr", DEFAULT_TOP_N_FOR_MMR as i64)?
        .set_default("mmr_lambda", DEFAULT_MMR_LAMBDA as f64)?
        .set_default("pdf_block_delay_sec", 0)?
        .set_default("download_timeout_secs", 300)?
        .set_default("download_max_bytes", 104_857_600)?
        .set_default("parse_language", "por")?;

    builder = builder.add_source(
        File::new(LOCAL_CONFIG_PATH, FileFormat::Toml).required(false),
    );

    if let Some(override_path) = env::var_os(CONFIG_OVERRIDE_ENV) {
        let path = PathBuf::from(override_path);
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
    }

    builder = builder.add_source(Environment::default().try_parsing(true));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn validate_config(config: &AppConfig) -> Result<(), AppConfigError> {
    if config.chunk_min_chars == 0 || config.chunk_max_chars < config.chunk_min_chars {
        return Err(invalid_config(
            "chunk_max_chars must be >= chunk_min_chars and both positive",
        ));
    }
    if config.chunk_overlap_chars >= config.chunk_min_chars {
        return Err(invalid_config(
            "chunk_overlap_chars must be smaller than chunk_min_chars",
        ));
    }
    if config.top_k_retrieval == 0 || config.top_n_for_mmr < config.top_k_retrieval {
        return Err(invalid_config(
            "top_n_for_mmr must be >= top_k_retrieval and both positive",
        ));
    }
    if !(0.0..=1.0).contains(&config.mmr_lambda) {
        return Err(invalid_config("mmr_lambda must lie in [0, 1]"));
    }
    if config.embedding_dimensions == 0 {
        return Err(invalid_config("embedding_dimensions must be positive"));
    }
    if config.download_max_bytes == 0 {
        return Err(invalid_config("download_max_bytes must be positive"));
    }
    Ok(())
}

fn invalid_config<S: Into<String>>(message: S) -> AppConfigError {
    AppConfigError::Build(config::ConfigError::Message(message.into()))
}
