//! Streaming blob downloads with a hard size cap.
//!
//! The body is copied chunk-by-chunk into a caller-supplied sink, counting
//! bytes as it goes, so an oversized object is rejected mid-stream instead of
//! buffered. Redirects are bounded by the client policy; the sixth one fails
//! the request.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

const MAX_REDIRECTS: usize = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Assumed when the origin does not say what it is serving; avatar blobs are
/// effectively always images.
pub const DEFAULT_CONTENT_TYPE: &str = "image/png";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download exceeds size limit of {limit} bytes")]
    FileSizeExceeded { limit: u64 },

    #[error("download failed with status {0}")]
    Status(u16),

    #[error("download failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
pub struct HeadInfo {
    pub content_length: Option<u64>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub bytes_written: u64,
    pub content_type: String,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn head(&self, url: &str) -> Result<HeadInfo, DownloadError>;

    async fn download(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        max_size: Option<u64>,
    ) -> Result<DownloadOutcome, DownloadError>;
}

pub struct DownloadClient {
    http: reqwest::Client,
}

impl fmt::Debug for DownloadClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadClient").finish()
    }
}

impl Default for DownloadClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .expect("Failed to create HTTP client");
        Self { http }
    }
}

#[async_trait]
impl Downloader for DownloadClient {
    async fn head(&self, url: &str) -> Result<HeadInfo, DownloadError> {
        let response = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|e| DownloadError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        Ok(HeadInfo {
            content_length: content_length_of(response.headers()),
            content_type: content_type_of(response.headers()),
        })
    }

    async fn download(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        max_size: Option<u64>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        let content_type = content_type_of(response.headers());

        if let (Some(max), Some(advertised)) = (max_size, content_length_of(response.headers()))
            && advertised > max
        {
            return Err(DownloadError::FileSizeExceeded { limit: max });
        }

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::Transport(e.to_string()))?;
            written += chunk.len() as u64;
            if let Some(max) = max_size
                && written > max
            {
                return Err(DownloadError::FileSizeExceeded { limit: max });
            }
            sink.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::Transport(format!("sink write failed: {e}")))?;
        }
        sink.flush()
            .await
            .map_err(|e| DownloadError::Transport(format!("sink flush failed: {e}")))?;

        debug!(url, bytes = written, content_type, "download complete");
        Ok(DownloadOutcome {
            bytes_written: written,
            content_type,
        })
    }
}

fn content_length_of(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Media type with any `; charset=...` parameter stripped.
fn content_type_of(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(';').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}
