//! Session context wiring the delivery pipeline together.
//!
//! Created at session start and handed by reference to every consumer; the
//! cache lives exactly as long as the session.

use futures_util::future::join_all;
use std::sync::Arc;

use crate::cache::PreviewCache;
use crate::classify::HostAllowlist;
use crate::config::Settings;
use crate::error::Result;
use crate::media::AssetRecord;
use crate::router::ProxyRouter;
use crate::store::{DirStore, PersistentStore};
use crate::thumbnail::{
    HttpImageDecoder, ImageDecoder, ThumbnailGenerator, ThumbnailOptions, VideoBackend,
};

pub struct Session {
    router: Arc<ProxyRouter>,
    cache: Arc<PreviewCache>,
    generator: Arc<ThumbnailGenerator>,
    seek_seconds: f64,
}

impl Session {
    pub fn new(
        router: Arc<ProxyRouter>,
        cache: Arc<PreviewCache>,
        generator: Arc<ThumbnailGenerator>,
        seek_seconds: f64,
    ) -> Self {
        Self {
            router,
            cache,
            generator,
            seek_seconds,
        }
    }

    /// Build a session from settings: on-disk preview store, HTTP image
    /// decoding and the given video backend.
    pub fn from_settings(
        settings: &Settings,
        client: reqwest::Client,
        video: Arc<dyn VideoBackend>,
    ) -> Result<Self> {
        let router = Arc::new(ProxyRouter::new(
            settings.proxy.base.clone(),
            Arc::new(settings.allowlist.build()),
        ));

        let store: Arc<dyn PersistentStore> = Arc::new(DirStore::open(&settings.cache.dir)?);
        let cache = Arc::new(PreviewCache::open(store));

        let images: Arc<dyn ImageDecoder> = Arc::new(HttpImageDecoder::new(client));
        let generator = Arc::new(ThumbnailGenerator::new(
            router.clone(),
            video,
            images,
            ThumbnailOptions {
                timeout: settings.thumbnail.timeout(),
                quality: settings.thumbnail.quality,
            },
        ));

        Ok(Self::new(router, cache, generator, settings.thumbnail.seek_seconds))
    }

    pub fn router(&self) -> &Arc<ProxyRouter> {
        &self.router
    }

    pub fn allowlist(&self) -> &Arc<HostAllowlist> {
        self.router.allowlist()
    }

    pub fn cache(&self) -> &Arc<PreviewCache> {
        &self.cache
    }

    /// URL to place in a media element for `asset`.
    pub fn media_url(&self, asset: &AssetRecord) -> String {
        self.router.route_url(&asset.reference())
    }

    /// Preview for a grid cell. Served from cache while the asset's marker
    /// is unchanged; otherwise regenerated and written through. `None` means
    /// show a placeholder.
    pub async fn preview(&self, asset: &AssetRecord) -> Option<String> {
        if let Some(hit) = self.cache.get(&asset.id, asset.last_modified_marker) {
            tracing::trace!(asset = %asset.id, "Preview cache hit");
            return Some(hit);
        }

        let artifact = self
            .generator
            .generate(&asset.reference(), self.seek_seconds)
            .await?;
        self.cache
            .put(&asset.id, &artifact.data_uri, asset.last_modified_marker);
        Some(artifact.data_uri)
    }

    /// Generate previews for many assets concurrently. Completion order is
    /// arbitrary. Returns how many resolved.
    pub async fn warm(&self, assets: &[AssetRecord]) -> usize {
        let resolved = join_all(assets.iter().map(|asset| self.preview(asset)))
            .await
            .into_iter()
            .filter(Option::is_some)
            .count();
        tracing::info!("Warmed {}/{} previews", resolved, assets.len());
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::store::MemoryStore;
    use crate::thumbnail::testing::{ScriptedBackend, StubImages};

    const CLIP: &str =
        "https://firebasestorage.googleapis.com/v0/b/brand/o/campaign%2Fclip.mov?alt=media&token=t";

    fn session(video: ScriptedBackend, store: Arc<MemoryStore>) -> Session {
        let router = Arc::new(ProxyRouter::new("", Arc::new(HostAllowlist::default())));
        let generator = Arc::new(ThumbnailGenerator::new(
            router.clone(),
            Arc::new(video),
            Arc::new(StubImages::solid(8, 8)),
            ThumbnailOptions::default(),
        ));
        Session::new(router, Arc::new(PreviewCache::open(store)), generator, 0.5)
    }

    fn clip(marker: i64) -> AssetRecord {
        AssetRecord {
            id: "a1".into(),
            url: CLIP.into(),
            last_modified_marker: marker,
            media_kind: MediaKind::Video,
        }
    }

    #[tokio::test]
    async fn legacy_clip_preview_is_generated_once_then_cached() {
        let video = ScriptedBackend::playable(640, 360);
        let log = video.log();
        let store = Arc::new(MemoryStore::new());
        let session = session(video, store.clone());
        let asset = clip(1000);

        let routed = session.media_url(&asset);
        assert_eq!(
            routed,
            format!("/convert-video?url={}", urlencoding::encode(CLIP))
        );

        let first = session.preview(&asset).await.unwrap();
        assert!(first.starts_with("data:image/jpeg;base64,"));
        {
            let log = log.lock().unwrap();
            assert_eq!(log.attached, vec![routed.clone()]);
            assert_eq!(log.seeks, vec![0.5]);
        }

        let persisted: serde_json::Value =
            serde_json::from_str(&store.get_item("preview:a1").unwrap().unwrap()).unwrap();
        assert_eq!(persisted["url"], first.as_str());
        assert_eq!(persisted["timestamp"], 1000);

        let second = session.preview(&asset).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(log.lock().unwrap().attached.len(), 1);
    }

    #[tokio::test]
    async fn changed_marker_regenerates() {
        let video = ScriptedBackend::playable(64, 36);
        let log = video.log();
        let session = session(video, Arc::new(MemoryStore::new()));

        session.preview(&clip(1000)).await.unwrap();
        session.preview(&clip(1001)).await.unwrap();
        assert_eq!(log.lock().unwrap().attached.len(), 2);
        assert!(session.cache().get("a1", 1000).is_none());
    }

    #[tokio::test]
    async fn failed_generation_is_not_cached() {
        let session = session(ScriptedBackend::erroring("decode"), Arc::new(MemoryStore::new()));

        assert!(session.preview(&clip(1)).await.is_none());
        assert!(session.cache().get("a1", 1).is_none());
    }

    #[tokio::test]
    async fn warm_resolves_every_previewable_asset() {
        let session = session(ScriptedBackend::playable(16, 9), Arc::new(MemoryStore::new()));
        let assets = vec![
            clip(1),
            AssetRecord {
                id: "img".into(),
                url: "https://storage.googleapis.com/b/hero.png".into(),
                last_modified_marker: 5,
                media_kind: MediaKind::Image,
            },
            AssetRecord {
                id: "brief".into(),
                url: "https://storage.googleapis.com/b/brief.txt".into(),
                last_modified_marker: 5,
                media_kind: MediaKind::Text,
            },
        ];

        assert_eq!(session.warm(&assets).await, 2);
        assert_eq!(session.cache().stats().entries, 2);
    }
}
