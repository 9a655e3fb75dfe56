//! Settings for the edge server, preview cache and download assembler.
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `MEDIA_PIPELINE__*` environment variables.

use crate::classify::HostAllowlist;
use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "media-pipeline.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub proxy: ProxySettings,
    pub allowlist: AllowlistSettings,
    pub cache: CacheSettings,
    pub thumbnail: ThumbnailSettings,
    pub download: DownloadSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8787".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Prefix for routed proxy URLs. Empty means same-origin relative paths.
    pub base: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            base: "http://127.0.0.1:8787".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AllowlistSettings {
    pub hosts: Vec<String>,
    pub suffixes: Vec<String>,
}

impl Default for AllowlistSettings {
    fn default() -> Self {
        let defaults = HostAllowlist::default();
        Self {
            hosts: defaults.hosts().to_vec(),
            suffixes: defaults.suffixes().to_vec(),
        }
    }
}

impl AllowlistSettings {
    pub fn build(&self) -> HostAllowlist {
        HostAllowlist::new(self.hosts.clone(), self.suffixes.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub dir: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".media-cache"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThumbnailSettings {
    pub seek_seconds: f64,
    pub timeout_ms: u64,
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            seek_seconds: 0.5,
            timeout_ms: 2000,
            quality: 80,
        }
    }
}

impl ThumbnailSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub dir: PathBuf,
    /// Per-request limit for download and image fetches.
    pub timeout_secs: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("downloads"),
            timeout_secs: 60,
        }
    }
}

impl DownloadSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    /// Load settings from `MEDIA_PIPELINE_CONFIG` (or the default file) and the environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var("MEDIA_PIPELINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// Load settings from a specific file; a missing file falls back to defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()).required(false))
            .add_source(
                config::Environment::with_prefix("MEDIA_PIPELINE")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("allowlist.hosts")
                    .with_list_parse_key("allowlist.suffixes")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?;

        tracing::debug!(?settings, "Settings loaded");
        Ok(settings)
    }
}
