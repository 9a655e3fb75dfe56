//! Scripted stand-ins for the decoding seams.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::surface::{
    Frame, ImageDecoder, MediaEvent, ReadyState, SurfaceError, SurfaceOptions, VideoBackend,
    VideoSurface,
};

#[derive(Debug, Default)]
pub(crate) struct SurfaceLog {
    pub attached: Vec<String>,
    pub seeks: Vec<f64>,
    pub detached: usize,
}

/// Hands out surfaces that replay a fixed event script on attach.
#[derive(Clone)]
pub(crate) struct ScriptedBackend {
    script: Vec<MediaEvent>,
    ready: ReadyState,
    seek_ok: bool,
    width: u32,
    height: u32,
    log: Arc<Mutex<SurfaceLog>>,
}

impl ScriptedBackend {
    pub fn playable(width: u32, height: u32) -> Self {
        Self {
            script: vec![
                MediaEvent::LoadedMetadata { width, height },
                MediaEvent::LoadedData,
                MediaEvent::Seeked,
            ],
            ready: ReadyState::HaveEnoughData,
            seek_ok: true,
            width,
            height,
            log: Arc::default(),
        }
    }

    /// Decodes a frame after the seek starts but never reports `Seeked`.
    pub fn without_seeked(width: u32, height: u32) -> Self {
        Self {
            script: vec![
                MediaEvent::LoadedMetadata { width, height },
                MediaEvent::LoadedData,
            ],
            ..Self::playable(width, height)
        }
    }

    /// Reports metadata and events but never decodes a frame.
    pub fn never_ready() -> Self {
        Self {
            ready: ReadyState::HaveMetadata,
            ..Self::playable(640, 360)
        }
    }

    pub fn erroring(message: &str) -> Self {
        Self {
            script: vec![MediaEvent::Error(message.into())],
            ..Self::playable(640, 360)
        }
    }

    pub fn refusing_seeks(mut self) -> Self {
        self.seek_ok = false;
        self
    }

    pub fn log(&self) -> Arc<Mutex<SurfaceLog>> {
        self.log.clone()
    }
}

impl VideoBackend for ScriptedBackend {
    fn surface(&self) -> Result<Box<dyn VideoSurface>, SurfaceError> {
        Ok(Box::new(ScriptedSurface {
            backend: self.clone(),
            sender: None,
        }))
    }
}

struct ScriptedSurface {
    backend: ScriptedBackend,
    /// Held so the event channel stays open until detach.
    sender: Option<mpsc::UnboundedSender<MediaEvent>>,
}

impl VideoSurface for ScriptedSurface {
    fn attach(
        &mut self,
        url: &str,
        options: SurfaceOptions,
    ) -> Result<mpsc::UnboundedReceiver<MediaEvent>, SurfaceError> {
        assert!(options.muted && options.plays_inline && options.preload_metadata_only);
        self.backend.log.lock().unwrap().attached.push(url.to_string());

        let (tx, rx) = mpsc::unbounded_channel();
        for event in &self.backend.script {
            let _ = tx.send(event.clone());
        }
        self.sender = Some(tx);
        Ok(rx)
    }

    fn ready_state(&self) -> ReadyState {
        self.backend.ready
    }

    fn seek(&mut self, seconds: f64) -> Result<(), SurfaceError> {
        self.backend.log.lock().unwrap().seeks.push(seconds);
        if self.backend.seek_ok {
            Ok(())
        } else {
            Err(SurfaceError::Seek("container is not seekable".into()))
        }
    }

    fn capture_frame(&mut self) -> Result<Frame, SurfaceError> {
        let (width, height) = (self.backend.width, self.backend.height);
        Ok(Frame {
            pixels: [16u8, 96, 160, 255].repeat((width * height) as usize),
            width,
            height,
        })
    }

    fn detach(&mut self) {
        self.sender = None;
        self.backend.log.lock().unwrap().detached += 1;
    }
}

/// Image decoder that either yields a solid frame or fails every request.
pub(crate) struct StubImages {
    size: Option<(u32, u32)>,
    requested: Arc<Mutex<Vec<String>>>,
}

impl StubImages {
    pub fn solid(width: u32, height: u32) -> Self {
        Self {
            size: Some((width, height)),
            requested: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            size: None,
            requested: Arc::default(),
        }
    }

    pub fn requested(&self) -> Arc<Mutex<Vec<String>>> {
        self.requested.clone()
    }
}

#[async_trait]
impl ImageDecoder for StubImages {
    async fn decode(&self, url: &str) -> Result<Frame, SurfaceError> {
        self.requested.lock().unwrap().push(url.to_string());
        let (width, height) = self
            .size
            .ok_or_else(|| SurfaceError::Decode("broken image".into()))?;
        Ok(Frame {
            pixels: [255u8, 255, 255, 255].repeat((width * height) as usize),
            width,
            height,
        })
    }
}
