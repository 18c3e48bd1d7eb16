//! Fetcher interface and the values that cross it.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Per-request options handed to a [`Fetcher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Deadline for a single attempt
    pub timeout: Duration,
    /// Extra headers for this request
    pub headers: BTreeMap<String, String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            headers: BTreeMap::new(),
        }
    }
}

/// One fetched page, discarded once its rows are extracted
#[derive(Debug, Clone)]
pub struct PageFetchResult {
    pub status: u16,
    pub body: String,
    /// URL actually served, after redirects
    pub final_url: String,
}

/// Fetch failure kinds
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("request to {url} timed out after {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} refused automated access (HTTP {status})")]
    AntiBotBlock { url: String, status: u16 },

    #[error("invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("failed to build HTTP client: {message}")]
    Client { message: String },

    #[error("fetch of {url} cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    /// Whether the remote site is refusing automated access
    pub fn is_block(&self) -> bool {
        matches!(self, FetchError::AntiBotBlock { .. })
    }

    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::AntiBotBlock { status, .. } => *status == 429,
            FetchError::InvalidHeader { .. }
            | FetchError::Client { .. }
            | FetchError::Cancelled { .. } => false,
        }
    }
}

/// Classify a response status against the configured block list.
///
/// Returns `None` for success statuses.
pub fn classify_status(url: &str, status: u16, block_statuses: &[u16]) -> Option<FetchError> {
    if (200..300).contains(&status) {
        None
    } else if block_statuses.contains(&status) {
        Some(FetchError::AntiBotBlock {
            url: url.to_string(),
            status,
        })
    } else {
        Some(FetchError::Status {
            url: url.to_string(),
            status,
        })
    }
}

/// Source of directory pages
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url`; a non-success status is an error
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<PageFetchResult, FetchError>;
}
