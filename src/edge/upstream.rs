//! Upstream fetch seam for the edge endpoints.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::error::EdgeError;
use crate::classify::HostAllowlist;

/// A single upstream GET.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: Url,
    /// Client `Range` header, forwarded verbatim.
    pub range: Option<HeaderValue>,
}

pub enum UpstreamBody {
    /// Piped to the client chunk by chunk.
    Stream(BoxStream<'static, std::io::Result<Bytes>>),
    /// Fully buffered payload.
    Buffered(Bytes),
}

impl UpstreamBody {
    /// Convert into a response body. A stream error after the headers went
    /// out aborts the connection; no second status is ever written.
    pub fn into_body(self, url: &Url) -> Body {
        match self {
            UpstreamBody::Buffered(bytes) => Body::from(bytes),
            UpstreamBody::Stream(stream) => {
                let target = url.to_string();
                Body::from_stream(stream.inspect_err(move |e| {
                    tracing::warn!(url = %target, error = %e, "Upstream stream failed mid-response");
                }))
            }
        }
    }
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, EdgeError>;
}

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// Fetches from blob storage with reqwest, streaming the body.
///
/// Owns its client so every redirect hop is checked against the same
/// allowlist as the original target.
#[derive(Debug, Clone)]
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    pub fn new(allowlist: Arc<HostAllowlist>, connect_timeout: Duration) -> reqwest::Result<Self> {
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if allowlist.allows(attempt.url()) {
                attempt.follow()
            } else {
                let host = attempt.url().host_str().unwrap_or_default().to_string();
                attempt.error(format!("redirect to disallowed host {host}"))
            }
        });

        // No overall timeout: converted videos stream for as long as the player reads.
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(policy)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for ReqwestUpstream {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, EdgeError> {
        let mut builder = self.client.get(request.url.clone());
        if let Some(range) = request.range {
            builder = builder.header(header::RANGE, range);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_redirect() {
                tracing::warn!(url = %request.url, error = %e, "Refused upstream redirect");
                EdgeError::ForbiddenHost(e.to_string())
            } else {
                EdgeError::UpstreamUnreachable(e.to_string())
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        tracing::debug!(url = %request.url, %status, "Upstream responded");

        let stream = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();

        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Stream(stream),
        })
    }
}
