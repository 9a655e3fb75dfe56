//! `GET /convert-video?url=<encoded>`

use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Response};
use axum::response::IntoResponse;

use super::error::EdgeError;
use super::policy::{self, UPSTREAM_CONTENT_TYPE};
use super::upstream::UpstreamRequest;
use super::{admit, preflight, target_url, Admitted, EdgeState};
use crate::classify;

pub(super) async fn handle(
    State(state): State<EdgeState>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> axum::response::Response {
    match convert(&state, &method, query.as_deref(), &headers).await {
        Ok(response) => response,
        Err(e) => {
            tracing::info!(error = %e, status = %e.status(), "convert-video rejected");
            e.into_response()
        }
    }
}

async fn convert(
    state: &EdgeState,
    method: &Method,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Result<axum::response::Response, EdgeError> {
    if let Admitted::Preflight = admit(method)? {
        return Ok(preflight());
    }

    let url = target_url(query, &state.allowlist)?;

    let extension = classify::url_extension(&url);
    let forced_type = extension
        .as_deref()
        .and_then(classify::forced_content_type)
        .ok_or_else(|| {
            EdgeError::UnsupportedContainer(extension.clone().unwrap_or_else(|| "no extension".into()))
        })?;

    let range = headers.get(header::RANGE).cloned();
    tracing::info!(url = %url, range = ?range, "Proxying legacy container");

    let upstream = state
        .upstream
        .fetch(UpstreamRequest {
            url: url.clone(),
            range,
        })
        .await?;

    if !upstream.status.is_success() {
        tracing::warn!(url = %url, status = %upstream.status, "Upstream refused legacy container");
        return Err(EdgeError::UpstreamStatus {
            status: upstream.status.as_u16(),
        });
    }

    let mut response = Response::builder()
        .status(upstream.status)
        .body(upstream.body.into_body(&url))
        .map_err(|e| EdgeError::Response(e.to_string()))?;

    let out = response.headers_mut();
    out.insert(header::CONTENT_TYPE, HeaderValue::from_static(forced_type));
    if let Some(reported) = upstream.headers.get(header::CONTENT_TYPE) {
        out.insert(UPSTREAM_CONTENT_TYPE, reported.clone());
    }
    policy::copy_headers(&upstream.headers, out, &policy::RANGE_PASSTHROUGH);
    policy::apply_cors(out);
    out.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(policy::CONVERTED_VIDEO_CACHE),
    );

    Ok(response)
}
