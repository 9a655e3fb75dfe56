//! Header policy shared by the edge endpoints.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

pub const ALLOWED_METHODS: &str = "GET, OPTIONS";

/// Reports what storage claimed before the forced content type was applied.
pub const UPSTREAM_CONTENT_TYPE: HeaderName = HeaderName::from_static("x-upstream-content-type");

/// One hour in browsers, one day at the CDN, served stale while revalidating.
pub const CONVERTED_VIDEO_CACHE: &str =
    "public, max-age=3600, s-maxage=86400, stale-while-revalidate=86400";

pub const FETCHED_IMAGE_CACHE: &str = "public, max-age=3600";

/// Headers copied verbatim from a ranged upstream response.
pub const RANGE_PASSTHROUGH: [HeaderName; 3] = [
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
];

pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Range, Content-Type, Accept, Origin"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(
            "Content-Length, Content-Range, Accept-Ranges, X-Upstream-Content-Type",
        ),
    );
}

/// Copy the named headers from upstream when present.
pub fn copy_headers(from: &HeaderMap, to: &mut HeaderMap, names: &[HeaderName]) {
    for name in names {
        if let Some(value) = from.get(name) {
            to.insert(name.clone(), value.clone());
        }
    }
}
