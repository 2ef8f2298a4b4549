//! Fetch Relay
//!
//! Retrieves remote media (generated images and clips, source audio) by URL with
//! a fixed user agent and a hard timeout. Timeouts are reported separately from
//! every other failure. Local paths and `file://` URLs are read from disk so the
//! same entry point serves sessions that reference local assets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::settings::RelaySettings;

/// Content type assumed when the upstream omits one
pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Fetch relay failures
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Request to {url} timed out after {timeout_sec}s")]
    Timeout { url: String, timeout_sec: u64 },

    #[error("Upstream returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RelayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RelayError::Timeout { .. })
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Bytes fetched through the relay
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Source of media bytes for the assembly pipeline
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, reference: &str) -> RelayResult<RelayResponse>;
}

/// HTTP fetch relay
#[derive(Debug, Clone)]
pub struct FetchRelay {
    client: reqwest::Client,
    timeout: Duration,
}

impl FetchRelay {
    pub fn new(settings: &RelaySettings) -> RelayResult<Self> {
        Self::with_timeout(
            Duration::from_secs(settings.timeout_sec),
            &settings.user_agent,
        )
    }

    pub fn with_timeout(timeout: Duration, user_agent: &str) -> RelayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| RelayError::Request(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    async fn fetch_remote(&self, url: &str) -> RelayResult<RelayResponse> {
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                RelayError::Timeout {
                    url: url.to_string(),
                    timeout_sec: self.timeout.as_secs(),
                }
            } else {
                RelayError::Request(e.to_string())
            }
        };

        let resp = self.client.get(url).send().await.map_err(map_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RelayError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let bytes = resp.bytes().await.map_err(map_err)?.to_vec();

        tracing::debug!("Fetched {} bytes ({}) from {}", bytes.len(), content_type, url);
        Ok(RelayResponse {
            bytes,
            content_type,
        })
    }
}

#[async_trait]
impl MediaFetcher for FetchRelay {
    async fn fetch(&self, reference: &str) -> RelayResult<RelayResponse> {
        match classify(reference)? {
            Reference::Remote(url) => self.fetch_remote(url).await,
            Reference::Local(path) => read_local(&path).await,
        }
    }
}

enum Reference<'a> {
    Remote(&'a str),
    Local(PathBuf),
}

fn classify(reference: &str) -> RelayResult<Reference<'_>> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err(RelayError::InvalidUrl("empty reference".to_string()));
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(Reference::Remote(trimmed));
    }
    if let Some(path) = trimmed.strip_prefix("file://") {
        return Ok(Reference::Local(PathBuf::from(path)));
    }
    if lower.contains("://") {
        return Err(RelayError::InvalidUrl(format!(
            "unsupported scheme: {}",
            trimmed
        )));
    }
    Ok(Reference::Local(PathBuf::from(trimmed)))
}

async fn read_local(path: &Path) -> RelayResult<RelayResponse> {
    let bytes = tokio::fs::read(path).await.map_err(|source| RelayError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(RelayResponse {
        bytes,
        content_type: content_type_for(path).to_string(),
    })
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
