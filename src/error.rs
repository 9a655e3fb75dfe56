//! Crate-level error type.

use std::path::PathBuf;

/// Errors surfaced by the media pipeline outside the edge endpoints.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server returned {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("image conversion failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error while {context} ({path:?}): {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid inline media: {0}")]
    DataUri(#[from] crate::data_uri::DataUriError),

    #[error("preview store unavailable: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("{action} failed: {reason}")]
    DownloadFailed { action: &'static str, reason: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, MediaError>;
