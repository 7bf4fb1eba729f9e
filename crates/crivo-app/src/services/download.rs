//! Streamed download of the presigned job URL into a suffixed temp file.
//! The caller owns the handle; dropping it removes the file on every exit
//! path.

use std::path::Path;
use std::time::Duration;

use bon::Builder;
use futures_util::StreamExt;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("download failed with status {0}")]
    Status(reqwest::StatusCode),
    #[error("download exceeded the {limit}-byte quota")]
    TooLarge { limit: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Limits applied to one download.
#[derive(Debug, Clone, Builder)]
pub struct DownloadOptions {
    #[builder(default = 300)]
    pub timeout_secs: u64,
    #[builder(default = 104_857_600)]
    pub max_bytes: u64,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

pub async fn download_to_temp(
    http: &reqwest::Client,
    url: &str,
    file_name: &str,
    options: &DownloadOptions,
) -> Result<NamedTempFile, DownloadError> {
    debug_assert!(!url.is_empty());
    debug_assert!(options.max_bytes > 0);

    let suffix = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| ".bin".to_string());
    let temp = tempfile::Builder::new().suffix(&suffix).tempfile()?;

    let response = http
        .get(url)
        .timeout(Duration::from_secs(options.timeout_secs))
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status(status));
    }

    let mut file = tokio::fs::File::create(temp.path()).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(piece) = stream.next().await {
        let piece = piece?;
        written += piece.len() as u64;
        if written > options.max_bytes {
            return Err(DownloadError::TooLarge {
                limit: options.max_bytes,
            });
        }
        file.write_all(&piece).await?;
    }
    file.flush().await?;

    tracing::debug!(bytes = written, path = %temp.path().display(), "download complete");
    Ok(temp)
}
