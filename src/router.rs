//! Rewrites media URLs into the URL actually placed in a request or element.

use crate::classify::HostAllowlist;
use crate::media::{ContainerHint, MediaKind, MediaReference};
use std::sync::Arc;

pub const CONVERT_VIDEO_PATH: &str = "/convert-video";
pub const FETCH_IMAGE_PATH: &str = "/fetch-image";

/// Chooses between pass-through, the image-fetch proxy and the
/// convert-video proxy. Output depends only on its inputs, so it can key
/// caches and element reloads.
#[derive(Debug, Clone)]
pub struct ProxyRouter {
    base: String,
    allowlist: Arc<HostAllowlist>,
}

impl ProxyRouter {
    pub fn new(base: impl Into<String>, allowlist: Arc<HostAllowlist>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { base, allowlist }
    }

    pub fn allowlist(&self) -> &Arc<HostAllowlist> {
        &self.allowlist
    }

    pub fn route_url(&self, reference: &MediaReference) -> String {
        let classification = self.allowlist.classify(&reference.source_url);
        if !classification.allowed {
            return reference.source_url.clone();
        }

        match (reference.media_kind, classification.container_hint) {
            (MediaKind::Image, _) => self.proxy_url(FETCH_IMAGE_PATH, &reference.source_url),
            (MediaKind::Video, ContainerHint::Legacy) => {
                self.proxy_url(CONVERT_VIDEO_PATH, &reference.source_url)
            }
            _ => reference.source_url.clone(),
        }
    }

    fn proxy_url(&self, path: &str, source: &str) -> String {
        format!("{}{}?url={}", self.base, path, urlencoding::encode(source))
    }
}
