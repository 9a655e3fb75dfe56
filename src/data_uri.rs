//! Inline `data:` URIs.
//!
//! Asset records may carry their bytes inline instead of pointing at storage.
//! These never go over the network; the payload is decoded in place.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

#[derive(Debug, thiserror::Error)]
pub enum DataUriError {
    #[error("data URI has no ',' separator")]
    Malformed,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid percent-encoded payload: {0}")]
    Percent(#[from] std::string::FromUtf8Error),
}

/// A decoded `data:[<media type>][;base64],<payload>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    /// Lowercased media type without parameters; `text/plain` when absent.
    pub media_type: String,
    pub bytes: Vec<u8>,
}

pub fn is_data_uri(raw: &str) -> bool {
    raw.get(..5).is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

impl DataUri {
    /// `Ok(None)` when `raw` is not a data URI at all.
    pub fn parse(raw: &str) -> Result<Option<Self>, DataUriError> {
        if !is_data_uri(raw) {
            return Ok(None);
        }
        let (header, payload) = raw[5..].split_once(',').ok_or(DataUriError::Malformed)?;

        let mut params = header.split(';');
        let media_type = params
            .next()
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "text/plain".to_string());
        let base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

        let bytes = if base64 {
            let compact: String = urlencoding::decode(payload)?
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            STANDARD.decode(compact)?
        } else {
            urlencoding::decode_binary(payload.as_bytes()).into_owned()
        };

        Ok(Some(Self { media_type, bytes }))
    }

    /// File extension matching the media type, if it is a known one.
    pub fn extension(&self) -> Option<&'static str> {
        match self.media_type.as_str() {
            "image/png" => Some("png"),
            "image/jpeg" | "image/jpg" => Some("jpg"),
            "image/webp" => Some("webp"),
            "image/gif" => Some("gif"),
            "image/svg+xml" => Some("svg"),
            "video/mp4" => Some("mp4"),
            "video/quicktime" => Some("mov"),
            "text/plain" => Some("txt"),
            _ => None,
        }
    }
}
