//! Format-aware downloads.
//!
//! Saves an asset's original bytes, or for images re-encodes them into a
//! requested raster format first. Saving the original degrades through three
//! tiers: the routed URL, the raw source URL, then handing the URL to the
//! platform opener.

use anyhow::Context;
use futures_util::FutureExt;
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::classify;
use crate::config::Settings;
use crate::data_uri::DataUri;
use crate::error::{MediaError, Result};
use crate::fallback::{first_success, Attempt};
use crate::media::{MediaKind, MediaReference};
use crate::router::ProxyRouter;

const JPEG_QUALITY: u8 = 92;

/// Requested output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    Original,
    Png,
    Jpg,
    Webp,
}

impl TargetFormat {
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            TargetFormat::Original => None,
            TargetFormat::Png => Some("png"),
            TargetFormat::Jpg => Some("jpg"),
            TargetFormat::Webp => Some("webp"),
        }
    }
}

impl FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" => Ok(TargetFormat::Original),
            "png" => Ok(TargetFormat::Png),
            "jpg" | "jpeg" => Ok(TargetFormat::Jpg),
            "webp" => Ok(TargetFormat::Webp),
            other => Err(format!("unknown download format: {other}")),
        }
    }
}

/// Where a download ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Saved(PathBuf),
    /// Nothing could be saved; the URL was opened for viewing instead.
    Opened(String),
}

/// Last-resort viewer for a URL that could not be saved.
pub trait Opener: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// Opens URLs with the platform's default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl Opener for SystemOpener {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        let mut command = if cfg!(target_os = "macos") {
            std::process::Command::new("open")
        } else if cfg!(target_os = "windows") {
            let mut c = std::process::Command::new("cmd");
            c.args(["/C", "start", ""]);
            c
        } else {
            std::process::Command::new("xdg-open")
        };
        let status = command.arg(url).status().context("Failed to launch opener")?;
        anyhow::ensure!(status.success(), "opener exited with {status}");
        Ok(())
    }
}

pub struct DownloadAssembler {
    client: reqwest::Client,
    router: Arc<ProxyRouter>,
    dir: PathBuf,
    opener: Arc<dyn Opener>,
}

impl DownloadAssembler {
    pub fn new(
        client: reqwest::Client,
        router: Arc<ProxyRouter>,
        dir: impl Into<PathBuf>,
        opener: Arc<dyn Opener>,
    ) -> Self {
        Self {
            client,
            router,
            dir: dir.into(),
            opener,
        }
    }

    /// Assembler for the command line: its own router over the configured
    /// allowlist, saving into the download directory and opening with the
    /// system viewer.
    pub fn from_settings(settings: &Settings, client: reqwest::Client) -> Self {
        let router = ProxyRouter::new(
            settings.proxy.base.clone(),
            Arc::new(settings.allowlist.build()),
        );
        Self::new(
            client,
            Arc::new(router),
            settings.download.dir.clone(),
            Arc::new(SystemOpener),
        )
    }

    /// Save `reference` under a name derived from `title`.
    ///
    /// Raster targets apply to images only; other kinds always save the
    /// original bytes. Only when every tier fails is an error returned.
    pub async fn download(
        &self,
        reference: &MediaReference,
        title: &str,
        target: TargetFormat,
    ) -> Result<DownloadOutcome> {
        if let (MediaKind::Image, Some(_)) = (reference.media_kind, target.extension()) {
            match self.convert(reference, title, target).await {
                Ok(path) => return Ok(DownloadOutcome::Saved(path)),
                Err(e) => {
                    tracing::warn!(url = %reference.source_url, ?target, error = %e, "Conversion failed, saving original");
                }
            }
        }
        self.save_original(reference, title).await
    }

    async fn save_original(&self, reference: &MediaReference, title: &str) -> Result<DownloadOutcome> {
        let routed = self.router.route_url(reference);
        let source = reference.source_url.clone();
        let filename = filename_for(title, &source_extension(reference));
        let path = self.dir.join(&filename);

        let attempts = vec![
            Attempt::new(
                "routed fetch",
                self.fetch_to_file(routed, path.clone()).boxed(),
            ),
            Attempt::new(
                "direct fetch",
                self.fetch_to_file(source.clone(), path.clone()).boxed(),
            ),
            Attempt::new(
                "open in viewer",
                async {
                    self.opener.open(&source)?;
                    Ok::<_, anyhow::Error>(DownloadOutcome::Opened(source.clone()))
                }
                .boxed(),
            ),
        ];

        match first_success(attempts).await {
            Ok((tier, outcome)) => {
                tracing::info!(%tier, ?outcome, "Download completed");
                Ok(outcome)
            }
            Err(exhausted) => Err(MediaError::DownloadFailed {
                action: "downloading original file",
                reason: exhausted.to_string(),
            }),
        }
    }

    async fn fetch_to_file(&self, url: String, path: PathBuf) -> anyhow::Result<DownloadOutcome> {
        let bytes = self.fetch_bytes(&url).await?;
        write_file(&path, &bytes).await?;
        Ok(DownloadOutcome::Saved(path))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<bytes::Bytes> {
        if let Some(inline) = DataUri::parse(url)? {
            return Ok(inline.bytes.into());
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| MediaError::Fetch {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.bytes().await.map_err(|source| MediaError::Fetch {
            url: url.to_string(),
            source,
        })
    }

    async fn convert(&self, reference: &MediaReference, title: &str, target: TargetFormat) -> Result<PathBuf> {
        let routed = self.router.route_url(reference);
        let bytes = match self.fetch_bytes(&routed).await {
            Ok(bytes) => bytes,
            Err(e) if routed != reference.source_url => {
                tracing::debug!(error = %e, "Routed image fetch failed, trying source");
                self.fetch_bytes(&reference.source_url).await?
            }
            Err(e) => return Err(e),
        };

        let encoded = tokio::task::spawn_blocking(move || reencode(&bytes, target)).await??;
        let extension = target.extension().unwrap_or("bin");
        let path = self.dir.join(filename_for(title, extension));
        write_file(&path, &encoded).await?;
        Ok(path)
    }
}

/// Decode `bytes` and re-encode them at native resolution.
pub fn reencode(bytes: &[u8], target: TargetFormat) -> Result<Vec<u8>> {
    let image = image::load_from_memory(bytes)?;
    let mut out = Vec::new();
    match target {
        TargetFormat::Png => image.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?,
        TargetFormat::Webp => image
            .to_rgba8()
            .write_to(&mut Cursor::new(&mut out), ImageFormat::WebP)?,
        TargetFormat::Jpg | TargetFormat::Original => {
            JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(&image.to_rgb8())?
        }
    }
    Ok(out)
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| MediaError::Io {
                context: "creating download directory",
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, bytes).await.map_err(|source| MediaError::Io {
        context: "writing download",
        path: path.to_path_buf(),
        source,
    })
}

fn source_extension(reference: &MediaReference) -> String {
    let inline = DataUri::parse(&reference.source_url)
        .ok()
        .flatten()
        .and_then(|uri| uri.extension())
        .map(str::to_string);
    inline
        .or_else(|| {
            url::Url::parse(&reference.source_url)
                .ok()
                .and_then(|url| classify::url_extension(&url))
        })
        .unwrap_or_else(|| match reference.media_kind {
            MediaKind::Image => "jpg".into(),
            MediaKind::Video => "mp4".into(),
            MediaKind::Text => "txt".into(),
            MediaKind::Design => "bin".into(),
        })
}

/// Strip characters filesystems reject and attach `extension`.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        "asset".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extensions replaced rather than doubled when a title already ends in one.
const MEDIA_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "webp", "gif", "bmp", "tif", "tiff", "svg", "mov", "qt", "mqv", "mp4",
    "m4v", "webm",
];

fn filename_for(title: &str, extension: &str) -> String {
    let base = sanitize_filename(title);
    let stem = match base.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) =>
        {
            stem
        }
        _ => base.as_str(),
    };
    format!("{stem}.{extension}")
}
