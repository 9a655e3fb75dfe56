//! Still-frame previews for image and video assets.
//!
//! Video frames are captured by driving a [`VideoSurface`] through an
//! explicit state machine: attach, wait for metadata, seek, wait for a
//! decoded frame, rasterize. The whole capture is bounded by a timeout and
//! the surface is detached on every exit path.

#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod raster;
pub mod surface;
#[cfg(test)]
pub(crate) mod testing;

pub use surface::{
    Frame, HttpImageDecoder, ImageDecoder, MediaEvent, NoVideoBackend, ReadyState, SurfaceError,
    SurfaceOptions, VideoBackend, VideoSurface,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::media::{MediaKind, MediaReference};
use crate::router::ProxyRouter;

pub const DEFAULT_SEEK_SECONDS: f64 = 0.5;

/// A rasterized still, serialized as a data-URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailArtifact {
    pub data_uri: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ThumbnailOptions {
    /// Upper bound on a video capture, measured from attach.
    pub timeout: Duration,
    pub quality: u8,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            quality: 80,
        }
    }
}

/// Progress of a single video capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Attached,
    /// Dimensions known; waiting for a decoded frame at the current position.
    MetadataReady,
    Seeking,
    FrameReady,
    TimedOut,
    Failed,
}

/// Produces previews. Safe to call concurrently for the same reference;
/// deduplication is the cache's job.
pub struct ThumbnailGenerator {
    router: Arc<ProxyRouter>,
    video: Arc<dyn VideoBackend>,
    images: Arc<dyn ImageDecoder>,
    options: ThumbnailOptions,
}

impl ThumbnailGenerator {
    pub fn new(
        router: Arc<ProxyRouter>,
        video: Arc<dyn VideoBackend>,
        images: Arc<dyn ImageDecoder>,
        options: ThumbnailOptions,
    ) -> Self {
        Self {
            router,
            video,
            images,
            options,
        }
    }

    /// Resolve a preview for `reference`, or `None` when the caller should show
    /// a placeholder. Never fails.
    pub async fn generate(&self, reference: &MediaReference, seek_seconds: f64) -> Option<ThumbnailArtifact> {
        let frame = match reference.media_kind {
            MediaKind::Image => self.image_frame(reference).await?,
            MediaKind::Video => self.video_frame(reference, seek_seconds).await?,
            MediaKind::Design | MediaKind::Text => return None,
        };

        let quality = self.options.quality;
        let (width, height) = (frame.width, frame.height);
        let encoded = tokio::task::spawn_blocking(move || raster::to_jpeg_data_uri(&frame, quality)).await;
        match encoded {
            Ok(Ok(data_uri)) => Some(ThumbnailArtifact {
                data_uri,
                width,
                height,
            }),
            Ok(Err(e)) => {
                tracing::debug!(url = %reference.source_url, error = %e, "Failed to encode thumbnail");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Thumbnail encoder task failed");
                None
            }
        }
    }

    async fn image_frame(&self, reference: &MediaReference) -> Option<Frame> {
        let url = self.router.route_url(reference);
        match self.images.decode(&url).await {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!(%url, error = %e, "Image preload failed");
                None
            }
        }
    }

    async fn video_frame(&self, reference: &MediaReference, seek_seconds: f64) -> Option<Frame> {
        let url = self.router.route_url(reference);
        let mut surface = match self.video.surface() {
            Ok(surface) => surface,
            Err(e) => {
                tracing::debug!(%url, error = %e, "No video surface for thumbnail");
                return None;
            }
        };
        capture_frame(surface.as_mut(), &url, seek_seconds, self.options.timeout).await
    }
}

/// Capture one frame from `url` at `seek_seconds`, or `None` on failure or
/// timeout.
pub async fn capture_frame(
    surface: &mut dyn VideoSurface,
    url: &str,
    seek_seconds: f64,
    timeout: Duration,
) -> Option<Frame> {
    let mut capture = match Capture::attach(surface, url) {
        Ok(capture) => capture,
        Err(e) => {
            tracing::debug!(%url, error = %e, "Failed to attach video surface");
            return None;
        }
    };

    match tokio::time::timeout(timeout, capture.run(seek_seconds)).await {
        Ok(Ok(frame)) => Some(frame),
        Ok(Err(e)) => {
            tracing::debug!(%url, state = ?capture.state, error = %e, "Video thumbnail failed");
            None
        }
        Err(_) => {
            capture.state = CaptureState::TimedOut;
            tracing::debug!(%url, ?timeout, "Video thumbnail timed out");
            None
        }
    }
}

/// An attached surface. Dropping it detaches the surface, so listeners are
/// released on success, failure and timeout alike.
struct Capture<'a> {
    surface: &'a mut dyn VideoSurface,
    events: mpsc::UnboundedReceiver<MediaEvent>,
    state: CaptureState,
}

impl<'a> Capture<'a> {
    fn attach(surface: &'a mut dyn VideoSurface, url: &str) -> Result<Self, SurfaceError> {
        let events = surface.attach(url, SurfaceOptions::default())?;
        Ok(Self {
            surface,
            events,
            state: CaptureState::Attached,
        })
    }

    async fn run(&mut self, seek_seconds: f64) -> Result<Frame, SurfaceError> {
        while let Some(event) = self.events.recv().await {
            if let Some(frame) = self.on_event(event, seek_seconds)? {
                return Ok(frame);
            }
        }
        self.state = CaptureState::Failed;
        Err(SurfaceError::Capture("surface stopped reporting events".into()))
    }

    fn on_event(&mut self, event: MediaEvent, seek_seconds: f64) -> Result<Option<Frame>, SurfaceError> {
        match (self.state, event) {
            (_, MediaEvent::Error(message)) => {
                self.state = CaptureState::Failed;
                Err(SurfaceError::Capture(message))
            }
            (CaptureState::Attached, MediaEvent::LoadedMetadata { width, height }) => {
                tracing::trace!(width, height, seek_seconds, "Metadata ready, seeking");
                match self.surface.seek(seek_seconds) {
                    Ok(()) => {
                        self.state = CaptureState::Seeking;
                        Ok(None)
                    }
                    Err(e) => {
                        // Some containers refuse arbitrary seeks; use whatever is decoded.
                        tracing::debug!(error = %e, "Seek refused, capturing current frame");
                        self.state = CaptureState::MetadataReady;
                        self.try_capture()
                    }
                }
            }
            (CaptureState::Seeking, MediaEvent::Seeked) => {
                self.state = CaptureState::MetadataReady;
                self.try_capture()
            }
            (CaptureState::Seeking | CaptureState::MetadataReady, MediaEvent::LoadedData) => {
                self.try_capture()
            }
            // Repeats and out-of-order events fire nothing.
            _ => Ok(None),
        }
    }

    fn try_capture(&mut self) -> Result<Option<Frame>, SurfaceError> {
        if self.surface.ready_state() < ReadyState::HaveCurrentData {
            return Ok(None);
        }
        match self.surface.capture_frame() {
            Ok(frame) => {
                self.state = CaptureState::FrameReady;
                Ok(Some(frame))
            }
            Err(e) => {
                self.state = CaptureState::Failed;
                Err(e)
            }
        }
    }
}

impl Drop for Capture<'_> {
    fn drop(&mut self) {
        self.events.close();
        self.surface.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedBackend, StubImages};
    use super::*;
    use crate::classify::HostAllowlist;
    use tokio::time::Instant;

    const CLIP: &str = "https://firebasestorage.googleapis.com/v0/b/brand/o/clip.mov?alt=media";

    fn generator(video: ScriptedBackend, images: StubImages) -> ThumbnailGenerator {
        let router = Arc::new(ProxyRouter::new("", Arc::new(HostAllowlist::default())));
        ThumbnailGenerator::new(router, Arc::new(video), Arc::new(images), ThumbnailOptions::default())
    }

    #[tokio::test]
    async fn captures_frame_after_seek_through_convert_proxy() {
        let video = ScriptedBackend::playable(640, 360);
        let log = video.log();
        let generator = generator(video, StubImages::failing());

        let artifact = generator
            .generate(&MediaReference::new(CLIP, MediaKind::Video, 1000), DEFAULT_SEEK_SECONDS)
            .await
            .unwrap();

        assert!(artifact.data_uri.starts_with("data:image/jpeg;base64,"));
        assert_eq!((artifact.width, artifact.height), (640, 360));

        let log = log.lock().unwrap();
        assert!(log.attached[0].starts_with("/convert-video?url="));
        assert_eq!(log.seeks, vec![0.5]);
        assert_eq!(log.detached, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_surface_times_out_to_none() {
        let video = ScriptedBackend::never_ready();
        let log = video.log();
        let generator = generator(video, StubImages::failing());

        let started = Instant::now();
        let artifact = generator
            .generate(&MediaReference::new(CLIP, MediaKind::Video, 1), DEFAULT_SEEK_SECONDS)
            .await;

        assert!(artifact.is_none());
        assert!(started.elapsed() <= Duration::from_millis(2500));
        assert_eq!(log.lock().unwrap().detached, 1);
    }

    #[tokio::test]
    async fn refused_seek_falls_back_to_current_frame() {
        let video = ScriptedBackend::playable(320, 180).refusing_seeks();
        let log = video.log();
        let generator = generator(video, StubImages::failing());

        let artifact = generator
            .generate(&MediaReference::new(CLIP, MediaKind::Video, 1), 3.0)
            .await
            .unwrap();

        assert_eq!((artifact.width, artifact.height), (320, 180));
        assert_eq!(log.lock().unwrap().seeks, vec![3.0]);
    }

    #[tokio::test]
    async fn data_available_during_seek_captures_without_seeked() {
        let video = ScriptedBackend::without_seeked(160, 90);
        let log = video.log();
        let generator = generator(video, StubImages::failing());

        let artifact = generator
            .generate(&MediaReference::new(CLIP, MediaKind::Video, 1), 0.5)
            .await
            .unwrap();

        assert_eq!((artifact.width, artifact.height), (160, 90));
        let log = log.lock().unwrap();
        assert_eq!(log.seeks, vec![0.5]);
        assert_eq!(log.detached, 1);
    }

    #[tokio::test]
    async fn media_error_resolves_none_and_detaches() {
        let video = ScriptedBackend::erroring("MEDIA_ERR_SRC_NOT_SUPPORTED");
        let log = video.log();
        let generator = generator(video, StubImages::failing());

        assert!(generator
            .generate(&MediaReference::new(CLIP, MediaKind::Video, 1), 0.5)
            .await
            .is_none());
        assert_eq!(log.lock().unwrap().detached, 1);
    }

    #[tokio::test]
    async fn images_decode_through_fetch_proxy() {
        let images = StubImages::solid(48, 32);
        let requested = images.requested();
        let generator = generator(ScriptedBackend::never_ready(), images);

        let source = "https://storage.googleapis.com/bucket/hero.png";
        let artifact = generator
            .generate(&MediaReference::new(source, MediaKind::Image, 1), 0.5)
            .await
            .unwrap();

        assert_eq!((artifact.width, artifact.height), (48, 32));
        assert!(requested.lock().unwrap()[0].starts_with("/fetch-image?url="));
    }

    #[tokio::test]
    async fn inline_image_decodes_without_a_request() {
        use base64::Engine;

        let mut png = Vec::new();
        image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 128, 255, 255]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let source = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png)
        );

        let router = Arc::new(ProxyRouter::new("", Arc::new(HostAllowlist::default())));
        let generator = ThumbnailGenerator::new(
            router,
            Arc::new(ScriptedBackend::never_ready()),
            Arc::new(HttpImageDecoder::new(reqwest::Client::new())),
            ThumbnailOptions::default(),
        );

        let artifact = generator
            .generate(&MediaReference::new(source, MediaKind::Image, 1), 0.5)
            .await
            .unwrap();
        assert_eq!((artifact.width, artifact.height), (4, 4));
        assert!(artifact.data_uri.starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn broken_images_and_documents_resolve_none() {
        let generator = generator(ScriptedBackend::never_ready(), StubImages::failing());

        for kind in [MediaKind::Image, MediaKind::Design, MediaKind::Text] {
            let reference = MediaReference::new("https://storage.googleapis.com/b/x.png", kind, 1);
            assert!(generator.generate(&reference, 0.5).await.is_none());
        }
    }

    #[tokio::test]
    async fn concurrent_calls_each_get_their_own_surface() {
        let video = ScriptedBackend::playable(64, 36);
        let log = video.log();
        let generator = generator(video, StubImages::failing());
        let reference = MediaReference::new(CLIP, MediaKind::Video, 1);

        let (a, b) = tokio::join!(
            generator.generate(&reference, 0.5),
            generator.generate(&reference, 0.5)
        );

        assert_eq!(a, b);
        assert!(a.is_some());
        let log = log.lock().unwrap();
        assert_eq!(log.attached.len(), 2);
        assert_eq!(log.detached, 2);
    }
}
