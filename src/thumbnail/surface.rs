//! Decoding seams the thumbnail generator drives.
//!
//! A [`VideoSurface`] plays the part of an off-screen video element: it is
//! attached to a URL, reports media events, seeks and hands out the current
//! frame. An [`ImageDecoder`] preloads and decodes a still image.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::data_uri::DataUri;

/// A decoded RGBA frame.
#[derive(Clone)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Media events, mirroring the ones a video element fires.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Dimensions and duration are known.
    LoadedMetadata { width: u32, height: u32 },
    /// The frame at the current position can be rendered.
    LoadedData,
    /// A seek completed.
    Seeked,
    Error(String),
}

/// How much of the media is decoded, ordered like `HTMLMediaElement.readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing = 0,
    HaveMetadata = 1,
    HaveCurrentData = 2,
    HaveFutureData = 3,
    HaveEnoughData = 4,
}

impl ReadyState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::HaveNothing,
            1 => ReadyState::HaveMetadata,
            2 => ReadyState::HaveCurrentData,
            3 => ReadyState::HaveFutureData,
            _ => ReadyState::HaveEnoughData,
        }
    }
}

/// Attachment settings: metadata-only preload, muted, inline playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceOptions {
    pub preload_metadata_only: bool,
    pub muted: bool,
    pub plays_inline: bool,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            preload_metadata_only: true,
            muted: true,
            plays_inline: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("video backend unavailable: {0}")]
    Unavailable(String),
    #[error("failed to attach source: {0}")]
    Attach(String),
    #[error("seek refused: {0}")]
    Seek(String),
    #[error("no frame decoded: {0}")]
    Capture(String),
    #[error("image decode failed: {0}")]
    Decode(String),
}

pub trait VideoSurface: Send {
    /// Point the surface at `url`. Events arrive on the returned receiver
    /// until [`VideoSurface::detach`] is called.
    fn attach(
        &mut self,
        url: &str,
        options: SurfaceOptions,
    ) -> Result<mpsc::UnboundedReceiver<MediaEvent>, SurfaceError>;

    fn ready_state(&self) -> ReadyState;

    fn seek(&mut self, seconds: f64) -> Result<(), SurfaceError>;

    /// Rasterize the currently decoded frame at native size.
    fn capture_frame(&mut self) -> Result<Frame, SurfaceError>;

    /// Drop every listener and release the source.
    fn detach(&mut self);
}

/// Hands out one surface per thumbnail request.
pub trait VideoBackend: Send + Sync {
    fn surface(&self) -> Result<Box<dyn VideoSurface>, SurfaceError>;
}

/// Backend for builds without a native video decoder: every attach fails,
/// so video thumbnails resolve to a placeholder.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVideoBackend;

impl VideoBackend for NoVideoBackend {
    fn surface(&self) -> Result<Box<dyn VideoSurface>, SurfaceError> {
        Err(SurfaceError::Unavailable(
            "built without the gstreamer feature".into(),
        ))
    }
}

#[async_trait]
pub trait ImageDecoder: Send + Sync {
    /// Fully load and decode the image behind `url`.
    async fn decode(&self, url: &str) -> Result<Frame, SurfaceError>;
}

/// Preloads images over HTTP and decodes them with the `image` crate.
/// Inline data URIs are decoded without a request.
#[derive(Debug, Clone)]
pub struct HttpImageDecoder {
    client: reqwest::Client,
}

impl HttpImageDecoder {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageDecoder for HttpImageDecoder {
    async fn decode(&self, url: &str) -> Result<Frame, SurfaceError> {
        let bytes = match DataUri::parse(url).map_err(|e| SurfaceError::Decode(e.to_string()))? {
            Some(inline) => Bytes::from(inline.bytes),
            None => self
                .client
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| SurfaceError::Decode(e.to_string()))?
                .bytes()
                .await
                .map_err(|e| SurfaceError::Decode(e.to_string()))?,
        };

        tokio::task::spawn_blocking(move || {
            let image = image::load_from_memory(&bytes)
                .map_err(|e| SurfaceError::Decode(e.to_string()))?
                .to_rgba8();
            let (width, height) = image.dimensions();
            Ok(Frame {
                pixels: image.into_raw(),
                width,
                height,
            })
        })
        .await
        .map_err(|e| SurfaceError::Decode(e.to_string()))?
    }
}
