//! URL-prefix proxy to a backend origin.
//!
//! A matched request is forwarded once: no retries, no redirect following,
//! no body decompression. Hop-by-hop headers are dropped in both directions.

use crate::config::ProxyRule;
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, HeaderName, Request, Response, StatusCode};
use axum::response::IntoResponse;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Time allowed to establish the upstream connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Time allowed for the whole upstream exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Largest request body forwarded.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Headers that apply to a single connection (RFC 9110 §7.6.1).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Upstream proxy failure, scoped to one request.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream {target} timed out")]
    Timeout {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream {target} failed: {source}")]
    Upstream {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid upstream URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to read request body: {0}")]
    Body(String),
}

impl ProxyError {
    fn from_reqwest(target: &Url, source: reqwest::Error) -> Self {
        let target = target.to_string();
        if source.is_connect() {
            Self::Connect { target, source }
        } else if source.is_timeout() {
            Self::Timeout { target, source }
        } else {
            Self::Upstream { target, source }
        }
    }

    /// Status returned to the client in place of the upstream response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Connect { .. } | Self::Upstream { .. } | Self::InvalidUrl { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::Body(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "PROXY_CONNECT_ERROR",
            Self::Timeout { .. } => "PROXY_TIMEOUT",
            Self::Upstream { .. } => "PROXY_UPSTREAM_ERROR",
            Self::InvalidUrl { .. } => "PROXY_INVALID_URL",
            Self::Body(_) => "PROXY_BODY_ERROR",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let status = self.status();
        let body = format!("{}: {self}\n", self.code());
        (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
    }
}

/// Forwards requests to proxy targets.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
}

impl ProxyClient {
    /// Client with the default timeouts.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT)
    }

    /// Client with explicit connect and total timeouts.
    pub fn with_timeouts(connect: Duration, total: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connect)
            .timeout(total)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    /// Forward `request` to `rule.target` and relay the upstream response.
    pub async fn forward(
        &self,
        rule: &ProxyRule,
        request: Request<Body>,
    ) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str());
        let url = target_url(&rule.target, path_and_query)?;

        let mut headers = strip_hop_by_hop(&parts.headers);
        headers.remove(header::CONTENT_LENGTH);
        if rule.change_origin {
            headers.remove(header::HOST);
        }

        let body = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| ProxyError::Body(e.to_string()))?;

        debug!(method = %parts.method, url = %url, bytes = body.len(), "forwarding request");

        let upstream = self
            .client
            .request(parts.method, url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::from_reqwest(&url, e))?;

        let status = upstream.status();
        let mut response_headers = strip_hop_by_hop(upstream.headers());
        response_headers.remove(header::CONTENT_LENGTH);
        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| ProxyError::from_reqwest(&url, e))?;

        debug!(url = %url, status = status.as_u16(), bytes = bytes.len(), "upstream responded");

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// The upstream URL for a request: the target (including any base path)
/// followed by the original path and query.
pub fn target_url(target: &Url, path_and_query: &str) -> Result<Url, ProxyError> {
    let base = target.as_str().trim_end_matches('/');
    let url = format!("{base}{path_and_query}");
    Url::parse(&url).map_err(|source| ProxyError::InvalidUrl { url, source })
}

/// Copy `headers` without hop-by-hop headers, including any named by
/// `Connection`.
#[must_use]
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || named.contains(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Check whether a header applies only to one connection.
#[must_use]
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}
