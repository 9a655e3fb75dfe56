//! Host allowlist and URL classification.
//!
//! Decides whether a media URL points at trusted blob storage and which
//! container family its path extension belongs to. Pure and synchronous; safe
//! to call on every render.

use crate::media::ContainerHint;
use url::Url;

/// Blob-storage hosts trusted by default.
pub const DEFAULT_HOSTS: &[&str] = &["firebasestorage.googleapis.com", "storage.googleapis.com"];

/// Host suffixes trusted by default.
pub const DEFAULT_SUFFIXES: &[&str] = &[".firebasestorage.app", ".appspot.com"];

/// Legacy containers and the MIME type forced onto them when proxied.
///
/// These hold H.264 video that browsers reject only because storage reports
/// `video/quicktime`. `mqv` is the mobile QuickTime export extension the
/// upload tool produces.
pub const LEGACY_CONTAINERS: &[(&str, &str)] = &[
    ("mov", "video/mp4"),
    ("qt", "video/mp4"),
    ("mqv", "video/mp4"),
];

/// Video containers served straight from storage.
pub const STANDARD_VIDEO_EXTENSIONS: &[&str] =
    &["mp4", "m4v", "webm", "ogv", "ogg", "mkv", "avi", "3gp"];

/// Result of classifying a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub allowed: bool,
    pub container_hint: ContainerHint,
    /// Lowercased path extension, if any.
    pub extension: Option<String>,
}

impl Classification {
    fn rejected() -> Self {
        Self {
            allowed: false,
            container_hint: ContainerHint::Unknown,
            extension: None,
        }
    }
}

/// Fixed set of trusted blob-storage hosts.
///
/// Proxying arbitrary hosts would make the edge an open proxy, so both the
/// router and the edge endpoints consult the same instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAllowlist {
    hosts: Vec<String>,
    suffixes: Vec<String>,
}

impl Default for HostAllowlist {
    fn default() -> Self {
        Self::new(
            DEFAULT_HOSTS.iter().map(|h| h.to_string()).collect(),
            DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl HostAllowlist {
    pub fn new(hosts: Vec<String>, suffixes: Vec<String>) -> Self {
        let hosts = hosts.into_iter().map(|h| h.to_ascii_lowercase()).collect();
        // A suffix always matches at a label boundary.
        let suffixes = suffixes
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(|s| {
                let s = s.to_ascii_lowercase();
                if s.starts_with('.') {
                    s
                } else {
                    format!(".{s}")
                }
            })
            .collect();
        Self { hosts, suffixes }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    pub fn allows_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts.iter().any(|h| *h == host) || self.suffixes.iter().any(|s| host.ends_with(s.as_str()))
    }

    /// Whether an already parsed URL targets an allowed http(s) host.
    pub fn allows(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && url.host_str().is_some_and(|host| self.allows_host(host))
    }

    /// Classify a raw URL. Unparseable input is never an error: it comes back
    /// as not allowed and the caller uses the raw URL unchanged.
    pub fn classify(&self, raw: &str) -> Classification {
        let Ok(url) = Url::parse(raw) else {
            return Classification::rejected();
        };

        let extension = url_extension(&url);
        Classification {
            allowed: self.allows(&url),
            container_hint: hint_for_extension(extension.as_deref()),
            extension,
        }
    }
}

/// Lowercased extension of the last path segment, percent-decoded.
///
/// Storage URLs encode object paths into one segment (`o/folder%2Fclip.mov`),
/// so the segment is decoded before splitting.
pub fn url_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(segment).ok()?;
    let name = decoded.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn hint_for_extension(extension: Option<&str>) -> ContainerHint {
    match extension {
        Some(ext) if forced_content_type(ext).is_some() => ContainerHint::Legacy,
        Some(ext) if STANDARD_VIDEO_EXTENSIONS.contains(&ext) => ContainerHint::Standard,
        _ => ContainerHint::Unknown,
    }
}

/// Container hint of a raw URL, regardless of host.
pub fn container_hint(raw: &str) -> ContainerHint {
    match Url::parse(raw) {
        Ok(url) => hint_for_extension(url_extension(&url).as_deref()),
        Err(_) => ContainerHint::Unknown,
    }
}

/// Output MIME type forced onto a legacy container extension.
pub fn forced_content_type(extension: &str) -> Option<&'static str> {
    let extension = extension.to_ascii_lowercase();
    LEGACY_CONTAINERS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIP: &str =
        "https://firebasestorage.googleapis.com/v0/b/brand.appspot.com/o/assets%2Fclip.MOV?alt=media&token=abc";

    #[test]
    fn allowlisted_storage_url_is_legacy() {
        let c = HostAllowlist::default().classify(CLIP);
        assert!(c.allowed);
        assert_eq!(c.container_hint, ContainerHint::Legacy);
        assert_eq!(c.extension.as_deref(), Some("mov"));
    }

    #[test]
    fn suffix_matches_only_at_label_boundary() {
        let allowlist = HostAllowlist::default();
        assert!(allowlist.allows_host("brand-assets.appspot.com"));
        assert!(!allowlist.allows_host("evilappspot.com"));
        assert!(!allowlist.allows_host("firebasestorage.googleapis.com.evil.example.com"));
    }

    #[test]
    fn unparseable_and_data_uris_are_not_allowed() {
        let allowlist = HostAllowlist::default();
        assert!(!allowlist.classify("not a url").allowed);
        assert_eq!(allowlist.classify("not a url").container_hint, ContainerHint::Unknown);
        assert!(!allowlist.classify("data:image/png;base64,iVBORw0KGgo=").allowed);
        assert!(!allowlist.classify("ftp://storage.googleapis.com/a.mov").allowed);
    }

    #[test]
    fn extension_families() {
        assert_eq!(container_hint("https://x.test/a.qt"), ContainerHint::Legacy);
        assert_eq!(container_hint("https://x.test/a.mqv"), ContainerHint::Legacy);
        assert_eq!(container_hint("https://x.test/a.mp4"), ContainerHint::Standard);
        assert_eq!(container_hint("https://x.test/a.webm?x=1"), ContainerHint::Standard);
        assert_eq!(container_hint("https://x.test/photo.jpg"), ContainerHint::Unknown);
        assert_eq!(container_hint("https://x.test/noext"), ContainerHint::Unknown);
        assert_eq!(container_hint("https://x.test/.mov"), ContainerHint::Unknown);
    }

    #[test]
    fn forced_types_cover_every_legacy_container() {
        for (ext, _) in LEGACY_CONTAINERS {
            assert_eq!(forced_content_type(&ext.to_uppercase()), Some("video/mp4"));
        }
        assert_eq!(forced_content_type("mp4"), None);
    }
}
