//! `GET /fetch-image?url=<encoded>`

use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderValue, Method, Response};
use axum::response::IntoResponse;

use super::error::EdgeError;
use super::policy;
use super::upstream::UpstreamRequest;
use super::{admit, preflight, target_url, Admitted, EdgeState};

pub(super) async fn handle(
    State(state): State<EdgeState>,
    method: Method,
    RawQuery(query): RawQuery,
) -> axum::response::Response {
    match fetch(&state, &method, query.as_deref()).await {
        Ok(response) => response,
        Err(e) => {
            tracing::info!(error = %e, status = %e.status(), "fetch-image rejected");
            e.into_response()
        }
    }
}

async fn fetch(
    state: &EdgeState,
    method: &Method,
    query: Option<&str>,
) -> Result<axum::response::Response, EdgeError> {
    if let Admitted::Preflight = admit(method)? {
        return Ok(preflight());
    }

    let url = target_url(query, &state.allowlist)?;
    let upstream = state
        .upstream
        .fetch(UpstreamRequest {
            url: url.clone(),
            range: None,
        })
        .await?;

    if !upstream.status.is_success() {
        return Err(EdgeError::UpstreamStatus {
            status: upstream.status.as_u16(),
        });
    }

    let content_type = upstream
        .headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

    let mut response = Response::builder()
        .status(upstream.status)
        .body(upstream.body.into_body(&url))
        .map_err(|e| EdgeError::Response(e.to_string()))?;

    let out = response.headers_mut();
    out.insert(header::CONTENT_TYPE, content_type);
    policy::copy_headers(&upstream.headers, out, &[header::CONTENT_LENGTH]);
    policy::apply_cors(out);
    out.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(policy::FETCHED_IMAGE_CACHE),
    );

    Ok(response)
}
