use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use media_pipeline::config::Settings;
use media_pipeline::download::{DownloadAssembler, DownloadOutcome, TargetFormat};
use media_pipeline::edge::{self, EdgeState, ReqwestUpstream};
use media_pipeline::media::{AssetRecord, MediaKind, MediaReference};
use media_pipeline::session::Session;
use media_pipeline::thumbnail::VideoBackend;

const USAGE: &str = "usage: media-pipeline [serve | warm <assets.json> | download <url> <image|video|design|text> <title> [original|png|jpg|webp]]";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("media_pipeline=info,tower_http=info")),
        )
        .init();

    let settings = Settings::load().context("loading settings")?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        None | Some("serve") => serve(&settings).await,
        Some("warm") => {
            let path = args.get(1).context(USAGE)?;
            warm(&settings, Path::new(path)).await
        }
        Some("download") => {
            let (Some(url), Some(kind), Some(title)) = (args.get(1), args.get(2), args.get(3)) else {
                bail!(USAGE);
            };
            let target = match args.get(4) {
                Some(format) => format.parse().map_err(anyhow::Error::msg)?,
                None => TargetFormat::Original,
            };
            download(&settings, url, kind, title, target).await
        }
        Some(other) => bail!("unknown command {other:?}\n{USAGE}"),
    }
}

/// Run the remux/proxy edge.
async fn serve(settings: &Settings) -> Result<()> {
    let allowlist = Arc::new(settings.allowlist.build());
    tracing::info!(
        hosts = ?allowlist.hosts(),
        suffixes = ?allowlist.suffixes(),
        "Edge allowlist loaded"
    );

    let upstream = ReqwestUpstream::new(allowlist.clone(), Duration::from_secs(10))
        .context("building upstream client")?;
    let app = edge::router(EdgeState::new(allowlist, Arc::new(upstream)))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("binding {}", settings.server.bind))?;
    tracing::info!("Edge listening on {}", settings.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("edge server failed")
}

/// Generate previews for an asset listing, then drop persisted previews
/// that no longer match it.
async fn warm(settings: &Settings, path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let assets: Vec<AssetRecord> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let session = Session::from_settings(settings, fetch_client(settings)?, video_backend())?;
    let resolved = session.warm(&assets).await;

    let current: HashMap<String, i64> = assets
        .iter()
        .map(|a| (a.id.clone(), a.last_modified_marker))
        .collect();
    let pruned = session.cache().prune_stale(&current);

    let stats = session.cache().stats();
    tracing::info!(
        resolved,
        total = assets.len(),
        pruned,
        entries = stats.entries,
        hydrated = stats.hydrated,
        write_failures = stats.write_failures,
        "Preview cache warmed"
    );
    Ok(())
}

async fn download(
    settings: &Settings,
    url: &str,
    kind: &str,
    title: &str,
    target: TargetFormat,
) -> Result<()> {
    let media_kind: MediaKind = serde_json::from_value(serde_json::Value::String(kind.to_string()))
        .with_context(|| format!("unknown media kind {kind:?}"))?;
    let assembler = DownloadAssembler::from_settings(settings, fetch_client(settings)?);

    let reference = MediaReference::new(url, media_kind, 0);
    match assembler.download(&reference, title, target).await? {
        DownloadOutcome::Saved(path) => tracing::info!("Saved {}", path.display()),
        DownloadOutcome::Opened(url) => tracing::info!("Could not save; opened {}", url),
    }
    Ok(())
}

fn fetch_client(settings: &Settings) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(settings.download.timeout())
        .build()
        .context("building fetch client")
}

#[cfg(feature = "gstreamer")]
fn video_backend() -> Arc<dyn VideoBackend> {
    match media_pipeline::thumbnail::gst::GstVideoBackend::new() {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            tracing::warn!("Video previews disabled: {}", e);
            Arc::new(media_pipeline::thumbnail::NoVideoBackend)
        }
    }
}

#[cfg(not(feature = "gstreamer"))]
fn video_backend() -> Arc<dyn VideoBackend> {
    Arc::new(media_pipeline::thumbnail::NoVideoBackend)
}
