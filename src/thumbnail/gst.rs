//! GStreamer-backed video surface.
//!
//! Builds `uridecodebin ! videoconvert ! appsink` and prerolls it paused, so
//! the first frame becomes available without playing audio. A watcher thread
//! turns bus messages into [`MediaEvent`]s.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;

use super::surface::{
    Frame, MediaEvent, ReadyState, SurfaceError, SurfaceOptions, VideoBackend, VideoSurface,
};

/// Creates GStreamer surfaces. Initializes GStreamer once.
pub struct GstVideoBackend;

impl GstVideoBackend {
    pub fn new() -> Result<Self, SurfaceError> {
        gst::init().map_err(|e| SurfaceError::Unavailable(e.to_string()))?;
        tracing::info!("GStreamer initialized: {}", gst::version_string());
        Ok(Self)
    }
}

impl VideoBackend for GstVideoBackend {
    fn surface(&self) -> Result<Box<dyn VideoSurface>, SurfaceError> {
        Ok(Box::new(GstSurface::default()))
    }
}

struct Attachment {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    ready: Arc<AtomicU8>,
    seeking: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct GstSurface {
    attachment: Option<Attachment>,
}

impl GstSurface {
    fn build_pipeline(url: &str) -> Result<(gst::Pipeline, gst_app::AppSink), SurfaceError> {
        let attach_err = |e: gst::glib::BoolError| SurfaceError::Attach(e.to_string());

        let pipeline = gst::Pipeline::new();
        let src = gst::ElementFactory::make("uridecodebin")
            .name("source")
            .property("uri", url)
            .build()
            .map_err(attach_err)?;
        let convert = gst::ElementFactory::make("videoconvert")
            .name("convert")
            .build()
            .map_err(attach_err)?;
        let appsink = gst_app::AppSink::builder()
            .name("sink")
            .caps(
                &gst_video::VideoCapsBuilder::new()
                    .format(gst_video::VideoFormat::Rgba)
                    .build(),
            )
            .build();

        pipeline
            .add_many([&src, &convert, appsink.upcast_ref()])
            .map_err(attach_err)?;
        gst::Element::link_many([&convert, appsink.upcast_ref()]).map_err(attach_err)?;

        // Only the video pad is linked; audio stays unlinked, which keeps the surface muted.
        let convert_weak = convert.downgrade();
        src.connect_pad_added(move |_src, src_pad| {
            let Some(convert) = convert_weak.upgrade() else {
                return;
            };
            let Some(sink_pad) = convert.static_pad("sink") else {
                return;
            };
            if sink_pad.is_linked() {
                return;
            }

            let caps = src_pad.current_caps().unwrap_or_else(|| src_pad.query_caps(None));
            let is_video = caps
                .structure(0)
                .is_some_and(|s| s.name().starts_with("video/"));
            if is_video {
                if let Err(e) = src_pad.link(&sink_pad) {
                    tracing::error!("Failed to link pads: {:?}", e);
                }
            }
        });

        Ok((pipeline, appsink))
    }

    /// Preroll `pipeline` paused, then start the bus watcher. On failure the
    /// pipeline is back in `Null` and no watcher thread exists.
    fn start(
        pipeline: gst::Pipeline,
        appsink: gst_app::AppSink,
    ) -> Result<(Attachment, mpsc::UnboundedReceiver<MediaEvent>), SurfaceError> {
        let release = |pipeline: &gst::Pipeline, e: String| {
            let _ = pipeline.set_state(gst::State::Null);
            SurfaceError::Attach(e)
        };

        let bus = pipeline
            .bus()
            .ok_or_else(|| SurfaceError::Attach("pipeline has no bus".into()))?;
        pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| release(&pipeline, e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicU8::new(ReadyState::HaveNothing as u8));
        let seeking = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        {
            let ready = ready.clone();
            let seeking = seeking.clone();
            let stop = stop.clone();
            let appsink = appsink.clone();
            thread::Builder::new()
                .name("thumbnail-bus".into())
                .spawn(move || {
                    while !stop.load(Ordering::SeqCst) {
                        let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(50)) else {
                            continue;
                        };
                        let event = match msg.view() {
                            gst::MessageView::AsyncDone(_) if seeking.swap(false, Ordering::SeqCst) => {
                                Some(MediaEvent::Seeked)
                            }
                            // First preroll: the frame at position zero is decoded.
                            gst::MessageView::AsyncDone(_) => {
                                ready.store(ReadyState::HaveCurrentData as u8, Ordering::SeqCst);
                                match Self::preroll_dimensions(&appsink) {
                                    Some((width, height)) => {
                                        Some(MediaEvent::LoadedMetadata { width, height })
                                    }
                                    None => Some(MediaEvent::Error("no video stream".into())),
                                }
                            }
                            gst::MessageView::Error(err) => {
                                Some(MediaEvent::Error(format!("{} ({:?})", err.error(), err.debug())))
                            }
                            _ => None,
                        };
                        if let Some(event) = event {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                })
                .map_err(|e| release(&pipeline, e.to_string()))?;
        }

        let attachment = Attachment {
            pipeline,
            appsink,
            ready,
            seeking,
            stop,
        };
        Ok((attachment, rx))
    }

    fn preroll_dimensions(appsink: &gst_app::AppSink) -> Option<(u32, u32)> {
        let pad = appsink.static_pad("sink")?;
        let caps = pad.current_caps()?;
        let info = gst_video::VideoInfo::from_caps(&caps).ok()?;
        Some((info.width(), info.height()))
    }
}

impl VideoSurface for GstSurface {
    fn attach(
        &mut self,
        url: &str,
        _options: SurfaceOptions,
    ) -> Result<mpsc::UnboundedReceiver<MediaEvent>, SurfaceError> {
        self.detach();

        let (pipeline, appsink) = Self::build_pipeline(url)?;
        let (attachment, rx) = Self::start(pipeline, appsink)?;
        self.attachment = Some(attachment);
        Ok(rx)
    }

    fn ready_state(&self) -> ReadyState {
        self.attachment
            .as_ref()
            .map(|a| ReadyState::from_u8(a.ready.load(Ordering::SeqCst)))
            .unwrap_or(ReadyState::HaveNothing)
    }

    fn seek(&mut self, seconds: f64) -> Result<(), SurfaceError> {
        let attachment = self
            .attachment
            .as_ref()
            .ok_or_else(|| SurfaceError::Seek("not attached".into()))?;
        let position = gst::ClockTime::from_nseconds((seconds.max(0.0) * 1e9) as u64);

        attachment.seeking.store(true, Ordering::SeqCst);
        attachment
            .pipeline
            .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE, position)
            .map_err(|e| {
                attachment.seeking.store(false, Ordering::SeqCst);
                SurfaceError::Seek(e.to_string())
            })
    }

    fn capture_frame(&mut self) -> Result<Frame, SurfaceError> {
        let attachment = self
            .attachment
            .as_ref()
            .ok_or_else(|| SurfaceError::Capture("not attached".into()))?;

        let sample = attachment
            .appsink
            .pull_preroll()
            .map_err(|e| SurfaceError::Capture(e.to_string()))?;
        let buffer = sample
            .buffer()
            .ok_or_else(|| SurfaceError::Capture("sample has no buffer".into()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| SurfaceError::Capture("sample has no caps".into()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| SurfaceError::Capture(e.to_string()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| SurfaceError::Capture(e.to_string()))?;

        let (width, height) = (info.width(), info.height());
        let row = width as usize * 4;
        let stride = info.stride()[0] as usize;
        let pixels = if stride == row {
            map.as_slice().to_vec()
        } else {
            map.as_slice()
                .chunks(stride)
                .take(height as usize)
                .flat_map(|line| &line[..row.min(line.len())])
                .copied()
                .collect()
        };

        Ok(Frame {
            pixels,
            width,
            height,
        })
    }

    /// Stops the watcher without joining it; it exits within one bus poll.
    fn detach(&mut self) {
        let Some(attachment) = self.attachment.take() else {
            return;
        };
        attachment.stop.store(true, Ordering::SeqCst);
        let _ = attachment.pipeline.set_state(gst::State::Null);
    }
}

impl Drop for GstSurface {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn gst_available() -> bool {
        gst::init().is_ok()
    }

    /// `videotestsrc ! videoconvert ! appsink`, which always prerolls.
    fn test_pipeline() -> (gst::Pipeline, gst_app::AppSink) {
        let pipeline = gst::Pipeline::new();
        let src = gst::ElementFactory::make("videotestsrc").build().unwrap();
        let convert = gst::ElementFactory::make("videoconvert").build().unwrap();
        let appsink = gst_app::AppSink::builder()
            .caps(
                &gst_video::VideoCapsBuilder::new()
                    .format(gst_video::VideoFormat::Rgba)
                    .width(64)
                    .height(48)
                    .build(),
            )
            .build();
        pipeline
            .add_many([&src, &convert, appsink.upcast_ref()])
            .unwrap();
        gst::Element::link_many([&src, &convert, appsink.upcast_ref()]).unwrap();
        (pipeline, appsink)
    }

    #[test]
    fn failed_preroll_leaves_pipeline_released() {
        if !gst_available() {
            return;
        }
        let (pipeline, appsink) = GstSurface::build_pipeline("nosuch://bucket/clip.mov").unwrap();

        assert!(GstSurface::start(pipeline.clone(), appsink).is_err());
        assert_eq!(pipeline.current_state(), gst::State::Null);

        let mut surface = GstSurface::default();
        assert!(surface.attach("nosuch://bucket/clip.mov", SurfaceOptions::default()).is_err());
        assert!(surface.attachment.is_none());
    }

    #[test]
    fn detach_stops_watcher_without_joining() {
        if !gst_available() {
            return;
        }
        let (pipeline, appsink) = test_pipeline();
        let (attachment, mut events) = GstSurface::start(pipeline, appsink).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let metadata = loop {
            match events.try_recv() {
                Ok(event) => break event,
                Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(10)),
                Err(e) => panic!("no preroll event: {e}"),
            }
        };
        assert_eq!(metadata, MediaEvent::LoadedMetadata { width: 64, height: 48 });

        let stop = attachment.stop.clone();
        let mut surface = GstSurface {
            attachment: Some(attachment),
        };
        surface.detach();
        assert!(surface.attachment.is_none());

        // The watcher drops its handle on the flag once it notices the stop.
        let deadline = Instant::now() + Duration::from_secs(1);
        while Arc::strong_count(&stop) > 1 {
            assert!(Instant::now() < deadline, "watcher thread still running");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
