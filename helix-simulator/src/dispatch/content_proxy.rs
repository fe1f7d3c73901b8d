//! Structured content (`.md`, `.json`) resolution
//!
//! Content is read from the strain's content repository first. When the repository
//! answers 404 the request falls back to the inner CDN, which also knows about
//! mounted external sources.

use std::sync::Arc;

use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::{error, info};
use url::Url;

use super::delivery::{mime_for_extension, Delivery};
use crate::error::{Result, SimulatorError};
use crate::fetch::{HttpClient, OutboundRequest};
use crate::git::GitReference;

/// Fragments that are never looked up on the inner CDN
pub const WELL_KNOWN_FRAGMENTS: [&str; 3] = ["/head.md", "/header.md", "/footer.md"];

/// Query parameters describing the lookup itself, not forwarded to the inner CDN
const RESERVED_PARAMS: [&str; 5] = ["owner", "repo", "ref", "path", "REPO_RAW_ROOT"];

/// One content lookup
#[derive(Debug, Clone, Copy)]
pub struct ContentRequest<'a> {
    /// Effective content reference (possibly emulated)
    pub content: &'a GitReference,
    /// Content reference as configured, used for the inner CDN host
    pub original: &'a GitReference,
    /// Path of the document, e.g. `/index.md`
    pub path: &'a str,
    /// Query parameters of the request
    pub query: &'a [(String, String)],
    /// Request headers
    pub headers: &'a HeaderMap,
}

/// Resolves structured content against git and the inner CDN
#[derive(Clone)]
pub struct ContentProxy {
    client: Arc<dyn HttpClient>,
    inner_cdn_domain: String,
}

impl ContentProxy {
    /// Create a content proxy falling back to `inner_cdn_domain`
    pub fn new(client: Arc<dyn HttpClient>, inner_cdn_domain: impl Into<String>) -> Self {
        Self {
            client,
            inner_cdn_domain: inner_cdn_domain.into(),
        }
    }

    fn git_headers(headers: &HeaderMap) -> HeaderMap {
        let mut forwarded = HeaderMap::new();
        if let Some(token) = headers.get("x-github-token").and_then(|v| v.to_str().ok()) {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                forwarded.insert(http::header::AUTHORIZATION, value);
            }
        }
        if let Some(request_id) = headers.get("x-request-id") {
            forwarded.insert("x-request-id", request_id.clone());
        }
        forwarded
    }

    /// Resolve one document
    ///
    /// # Errors
    ///
    /// Returns an error if an upstream cannot be reached or the emulator fails to start.
    pub async fn fetch(&self, request: &ContentRequest<'_>) -> Result<Delivery> {
        let extension = request
            .path
            .rsplit('/')
            .next()
            .and_then(|name| name.split_once('.'))
            .map_or("", |(_, ext)| ext);

        let github_url = format!(
            "{}{}{}",
            request.content.raw(),
            request.content.path(),
            request.path
        );
        info!("simulator proxy: try loading from github first: {github_url}");
        let response = self
            .client
            .send(OutboundRequest {
                headers: Self::git_headers(request.headers),
                ..OutboundRequest::get(&github_url)
            })
            .await?;

        if response.status.is_success() {
            info!(
                "simulator proxy: loaded from github: {github_url}: {}",
                response.status
            );
            return Ok(Delivery::typed(
                &mime_for_extension(extension),
                response.body,
            ));
        }
        if response.status != StatusCode::NOT_FOUND {
            error!(
                "simulator proxy: {github_url} does not exist. {}",
                response.status
            );
            return Ok(Delivery::empty(response.status));
        }
        info!("simulator proxy: {github_url} does not exist. 404");

        if WELL_KNOWN_FRAGMENTS.contains(&request.path) {
            return Ok(Delivery::empty(StatusCode::NOT_FOUND));
        }

        let mut url = Url::parse(&format!(
            "https://{}--{}--{}.{}{}",
            request.original.git_ref(),
            request.original.repo(),
            request.original.owner(),
            self.inner_cdn_domain,
            request.path
        ))
        .map_err(|e| SimulatorError::bad_gateway(format!("invalid content proxy url: {e}")))?;
        {
            let rest: Vec<_> = request
                .query
                .iter()
                .filter(|(name, _)| !RESERVED_PARAMS.contains(&name.as_str()))
                .collect();
            if !rest.is_empty() {
                let mut pairs = url.query_pairs_mut();
                for (name, value) in rest {
                    pairs.append_pair(name, value);
                }
            }
        }

        info!("simulator proxy: fetch from content proxy {url}");
        let response = self.client.send(OutboundRequest::get(url.as_str())).await?;
        if !response.status.is_success() {
            error!(
                "simulator proxy: error fetching from content proxy {url}: {} {}",
                response.status,
                String::from_utf8_lossy(&response.body)
            );
            return Ok(Delivery::empty(response.status));
        }
        info!(
            "simulator proxy: fetch from content proxy {url}: {}",
            response.status
        );
        Ok(Delivery::from_upstream(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{MockHttpClient, UpstreamResponse};
    use bytes::Bytes;
    use parking_lot::Mutex;

    fn reference(url: &str) -> GitReference {
        GitReference::parse(url).unwrap()
    }

    /// Client answering from a fixed list of `(url, status, body)` and recording requests
    fn scripted(
        answers: Vec<(&'static str, StatusCode, &'static str)>,
    ) -> (MockHttpClient, Arc<Mutex<Vec<OutboundRequest>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let mut client = MockHttpClient::new();
        client.expect_send().returning(move |request| {
            let answer = answers
                .iter()
                .find(|(url, _, _)| *url == request.url)
                .map_or_else(
                    || UpstreamResponse::new(StatusCode::NOT_FOUND, ""),
                    |(_, status, body)| UpstreamResponse::new(*status, Bytes::from(*body)),
                );
            recorder.lock().push(request);
            Ok(answer)
        });
        (client, seen)
    }

    fn lookup<'a>(
        content: &'a GitReference,
        path: &'a str,
        query: &'a [(String, String)],
        headers: &'a HeaderMap,
    ) -> ContentRequest<'a> {
        ContentRequest {
            content,
            original: content,
            path,
            query,
            headers,
        }
    }

    #[tokio::test]
    async fn test_loads_from_git_first() {
        let (client, seen) = scripted(vec![(
            "https://raw.github.com/adobe/blog/main/index.md",
            StatusCode::OK,
            "# Hello",
        )]);
        let proxy = ContentProxy::new(Arc::new(client), "hlx.page");
        let content = reference("https://github.com/adobe/blog.git#main");
        let mut headers = HeaderMap::new();
        headers.insert("x-github-token", HeaderValue::from_static("t0k3n"));

        let delivery = proxy
            .fetch(&lookup(&content, "/index.md", &[], &headers))
            .await
            .unwrap();

        assert_eq!(delivery.status, StatusCode::OK);
        assert_eq!(delivery.body, Bytes::from_static(b"# Hello"));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].headers["authorization"], "Bearer t0k3n");
    }

    #[tokio::test]
    async fn test_falls_back_to_inner_cdn_with_query() {
        let (client, seen) = scripted(vec![(
            "https://main--blog--adobe.hlx.page/data.json?limit=5",
            StatusCode::OK,
            "{}",
        )]);
        let proxy = ContentProxy::new(Arc::new(client), "hlx.page");
        let content = reference("https://github.com/adobe/blog.git#main");
        let query = vec![
            ("path".to_string(), "/data.json".to_string()),
            ("limit".to_string(), "5".to_string()),
            ("REPO_RAW_ROOT".to_string(), "x".to_string()),
        ];

        let delivery = proxy
            .fetch(&lookup(&content, "/data.json", &query, &HeaderMap::new()))
            .await
            .unwrap();

        assert_eq!(delivery.status, StatusCode::OK);
        let urls: Vec<_> = seen.lock().iter().map(|r| r.url.clone()).collect();
        assert_eq!(
            urls,
            [
                "https://raw.github.com/adobe/blog/main/data.json",
                "https://main--blog--adobe.hlx.page/data.json?limit=5",
            ]
        );
    }

    #[tokio::test]
    async fn test_well_known_fragments_do_not_fall_back() {
        let (client, seen) = scripted(vec![]);
        let proxy = ContentProxy::new(Arc::new(client), "hlx.page");
        let content = reference("https://github.com/adobe/blog.git");

        let delivery = proxy
            .fetch(&lookup(&content, "/header.md", &[], &HeaderMap::new()))
            .await
            .unwrap();
        assert_eq!(delivery.status, StatusCode::NOT_FOUND);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_other_git_status_is_passed_through() {
        let (client, seen) = scripted(vec![(
            "https://raw.github.com/adobe/blog/master/index.md",
            StatusCode::UNAUTHORIZED,
            "",
        )]);
        let proxy = ContentProxy::new(Arc::new(client), "hlx.page");
        let content = reference("https://github.com/adobe/blog.git");

        let delivery = proxy
            .fetch(&lookup(&content, "/index.md", &[], &HeaderMap::new()))
            .await
            .unwrap();
        assert_eq!(delivery.status, StatusCode::UNAUTHORIZED);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_inner_cdn_uses_original_reference() {
        let (client, seen) = scripted(vec![]);
        let proxy = ContentProxy::new(Arc::new(client), "hlx.page");
        let emulated = GitReference::emulated("127.0.0.1", 4000, "helix", "key", "local");
        let original = reference("https://github.com/adobe/blog.git#main");

        let delivery = proxy
            .fetch(&ContentRequest {
                content: &emulated,
                original: &original,
                path: "/missing.md",
                query: &[],
                headers: &HeaderMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(delivery.status, StatusCode::NOT_FOUND);
        let urls: Vec<_> = seen.lock().iter().map(|r| r.url.clone()).collect();
        assert_eq!(
            urls,
            [
                "http://127.0.0.1:4000/raw/helix/key/local/missing.md",
                "https://main--blog--adobe.hlx.page/missing.md",
            ]
        );
    }
}
