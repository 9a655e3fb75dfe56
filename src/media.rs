//! Media references: the slice of an asset record the delivery pipeline reads.

use crate::classify;
use serde::{Deserialize, Serialize};

/// Kind of media an asset holds, supplied by the asset record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Design,
    Text,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Design => "design",
            MediaKind::Text => "text",
        }
    }
}

/// Container family of a media URL, derived from its path extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerHint {
    /// A video container browsers refuse by MIME type (QuickTime family).
    Legacy,
    /// A video container browsers play directly.
    Standard,
    Unknown,
}

/// The minimal unit the pipeline operates on.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaReference {
    /// Absolute URL to the binary, or a data-URI.
    pub source_url: String,
    pub media_kind: MediaKind,
    /// Cache-invalidation marker owned by the asset record.
    pub last_modified_marker: i64,
}

impl MediaReference {
    pub fn new(source_url: impl Into<String>, media_kind: MediaKind, last_modified_marker: i64) -> Self {
        Self {
            source_url: source_url.into(),
            media_kind,
            last_modified_marker,
        }
    }

    /// Computed per call, never stored.
    pub fn container_hint(&self) -> ContainerHint {
        classify::container_hint(&self.source_url)
    }

    pub fn is_video(&self) -> bool {
        self.media_kind == MediaKind::Video
    }
}

/// The fields of an asset record this subsystem consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub id: String,
    pub url: String,
    pub last_modified_marker: i64,
    pub media_kind: MediaKind,
}

impl AssetRecord {
    pub fn reference(&self) -> MediaReference {
        MediaReference::new(self.url.clone(), self.media_kind, self.last_modified_marker)
    }
}
