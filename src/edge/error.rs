use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::policy;

/// Structured edge failures. Every variant renders as a JSON body carrying a
/// machine-readable `error` kind, so clients can tell an unsupported format
/// from a host or network problem.
#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    #[error("method {0} not allowed")]
    MethodNotAllowed(Method),

    #[error("Missing url parameter")]
    MissingUrl,

    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("host not allowed: {0}")]
    ForbiddenHost(String),

    #[error("this endpoint is for legacy containers only (got {0})")]
    UnsupportedContainer(String),

    #[error("upstream returned {status}")]
    UpstreamStatus { status: u16 },

    #[error("upstream fetch failed: {0}")]
    UpstreamUnreachable(String),

    #[error("failed to build response: {0}")]
    Response(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl EdgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            EdgeError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            EdgeError::MissingUrl | EdgeError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            EdgeError::ForbiddenHost(_) => StatusCode::FORBIDDEN,
            EdgeError::UnsupportedContainer(_) => StatusCode::BAD_REQUEST,
            EdgeError::UpstreamStatus { .. } | EdgeError::UpstreamUnreachable(_) => {
                StatusCode::BAD_GATEWAY
            }
            EdgeError::Response(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EdgeError::MethodNotAllowed(_) => "method_not_allowed",
            EdgeError::MissingUrl | EdgeError::InvalidUrl(_) => "bad_request",
            EdgeError::ForbiddenHost(_) => "forbidden_host",
            EdgeError::UnsupportedContainer(_) => "unsupported_container",
            EdgeError::UpstreamStatus { .. } | EdgeError::UpstreamUnreachable(_) => {
                "upstream_failed"
            }
            EdgeError::Response(_) => "response_failed",
        }
    }
}

impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        policy::apply_cors(headers);
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if matches!(self, EdgeError::MethodNotAllowed(_)) {
            headers.insert(header::ALLOW, HeaderValue::from_static(policy::ALLOWED_METHODS));
        }
        response
    }
}
