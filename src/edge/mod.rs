//! Remux/proxy edge endpoints.
//!
//! `/convert-video` re-serves legacy QuickTime-family containers with a
//! browser-playable content type and end-to-end range semantics.
//! `/fetch-image` re-serves storage images with permissive CORS so they can
//! be decoded onto a canvas.

mod convert;
mod error;
mod fetch_image;
pub mod policy;
mod upstream;

pub use error::EdgeError;
pub use upstream::{ReqwestUpstream, Upstream, UpstreamBody, UpstreamRequest, UpstreamResponse};

use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use std::sync::Arc;
use url::Url;

use crate::classify::HostAllowlist;
use crate::router::{CONVERT_VIDEO_PATH, FETCH_IMAGE_PATH};

/// State shared by the edge handlers.
#[derive(Clone)]
pub struct EdgeState {
    allowlist: Arc<HostAllowlist>,
    upstream: Arc<dyn Upstream>,
}

impl EdgeState {
    pub fn new(allowlist: Arc<HostAllowlist>, upstream: Arc<dyn Upstream>) -> Self {
        Self { allowlist, upstream }
    }
}

pub fn router(state: EdgeState) -> Router {
    Router::new()
        .route(CONVERT_VIDEO_PATH, any(convert::handle))
        .route(FETCH_IMAGE_PATH, any(fetch_image::handle))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

/// What a request to a proxy endpoint turned out to be after method checks.
enum Admitted {
    Preflight,
    Get,
}

fn admit(method: &Method) -> Result<Admitted, EdgeError> {
    if method == Method::GET {
        Ok(Admitted::Get)
    } else if method == Method::OPTIONS {
        Ok(Admitted::Preflight)
    } else {
        Err(EdgeError::MethodNotAllowed(method.clone()))
    }
}

fn preflight() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    policy::apply_cors(headers);
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    response
}

/// Parse the `url` query parameter and re-check it against the allowlist.
/// The router already did this, but the parameter is attacker-controlled.
fn target_url(query: Option<&str>, allowlist: &HostAllowlist) -> Result<Url, EdgeError> {
    let raw = query
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "url")
                .map(|(_, value)| value.into_owned())
        })
        .filter(|value| !value.is_empty())
        .ok_or(EdgeError::MissingUrl)?;

    let url = Url::parse(&raw).map_err(|e| EdgeError::InvalidUrl(format!("{raw}: {e}")))?;
    if !allowlist.allows(&url) {
        tracing::warn!(url = %url, "Rejected proxy request for disallowed host");
        return Err(EdgeError::ForbiddenHost(
            url.host_str().unwrap_or(url.scheme()).to_string(),
        ));
    }
    Ok(url)
}
