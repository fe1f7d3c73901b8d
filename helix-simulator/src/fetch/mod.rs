//! Outbound HTTP
//!
//! Every upstream call of the dispatcher (raw content, content proxy, proxy strains,
//! special assets) goes through [`HttpClient`], so tests can record and script
//! upstream behaviour.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tracing::{debug, error, info, warn, Level};

use crate::error::Result;

/// Request sent to an upstream
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

impl OutboundRequest {
    /// `GET url` without headers
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Response received from an upstream
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl UpstreamResponse {
    /// Response with `status` and `body` and no headers
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// HTTP client used for all upstream requests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send `request`; non-2xx statuses are responses, not errors
    ///
    /// # Errors
    ///
    /// [`crate::error::SimulatorError::Upstream`] with a 502 status if the
    /// upstream cannot be reached.
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse>;
}

/// [`HttpClient`] backed by reqwest
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Create a client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse> {
        let response = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .header(http::header::CACHE_CONTROL, "no-store")
            .body(request.body)
            .send()
            .await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Log level matching an upstream status
#[must_use]
pub fn status_level(status: StatusCode) -> Level {
    match status.as_u16() {
        0..=299 => Level::DEBUG,
        300..=399 => Level::INFO,
        400..=499 => Level::WARN,
        _ => Level::ERROR,
    }
}

/// Log `message` at the level matching `status`
pub fn log_status(status: StatusCode, message: &str) {
    let level = status_level(status);
    if level == Level::DEBUG {
        debug!(status = status.as_u16(), "{message}");
    } else if level == Level::INFO {
        info!(status = status.as_u16(), "{message}");
    } else if level == Level::WARN {
        warn!(status = status.as_u16(), "{message}");
    } else {
        error!(status = status.as_u16(), "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tokio::net::TcpListener;

    #[test]
    fn test_status_level() {
        assert_eq!(status_level(StatusCode::OK), Level::DEBUG);
        assert_eq!(status_level(StatusCode::MOVED_PERMANENTLY), Level::INFO);
        assert_eq!(status_level(StatusCode::NOT_FOUND), Level::WARN);
        assert_eq!(status_level(StatusCode::BAD_GATEWAY), Level::ERROR);
    }

    #[tokio::test]
    async fn test_reqwest_client_returns_non_success_as_response() {
        let app = Router::new().route("/ok", get(|| async { "hello" }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = ReqwestClient::new();
        let ok = client
            .send(OutboundRequest::get(format!("http://127.0.0.1:{port}/ok")))
            .await
            .unwrap();
        assert_eq!(ok.status, StatusCode::OK);
        assert_eq!(ok.body, Bytes::from_static(b"hello"));

        let missing = client
            .send(OutboundRequest::get(format!("http://127.0.0.1:{port}/missing")))
            .await
            .unwrap();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_connection_refused_is_bad_gateway() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = ReqwestClient::new()
            .send(OutboundRequest::get(format!("http://127.0.0.1:{port}/")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
