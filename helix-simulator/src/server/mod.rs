//! HTTP transport
//!
//! A thin axum layer over [`DeliveryDispatcher`]: the internal content-proxy route
//! plus a fallback that hands every other request to the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::dispatch::{DeliveryDispatcher, CONTENT_PROXY_ROUTE};
use crate::error::{Result, SimulatorError};
use crate::git::service::bind_error;
use crate::routing::IncomingRequest;

/// Build the router serving `dispatcher`
pub fn router(dispatcher: Arc<DeliveryDispatcher>) -> Router {
    Router::new()
        .route(
            &format!("{CONTENT_PROXY_ROUTE}/{{strain}}"),
            get(content_proxy),
        )
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn content_proxy(
    State(dispatcher): State<Arc<DeliveryDispatcher>>,
    Path(strain): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let query = query.unwrap_or_default();
    let query: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    dispatcher
        .content_proxy_request(&strain, &query, &headers)
        .await
        .into_response()
}

async fn dispatch(
    State(dispatcher): State<Arc<DeliveryDispatcher>>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "unable to read request body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    let url = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_string();

    dispatcher
        .dispatch(IncomingRequest {
            method: parts.method,
            url,
            headers: parts.headers,
            body,
        })
        .await
        .into_response()
}

/// Whether something already accepts connections on `host:port`
pub async fn port_in_use(host: &str, port: u16) -> bool {
    TcpStream::connect((host, port)).await.is_ok()
}

/// A running simulator HTTP server
pub struct SimulatorServer {
    addr: SocketAddr,
    dispatcher: Arc<DeliveryDispatcher>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SimulatorServer {
    /// Bind `host:port` and start serving
    ///
    /// Port 0 picks a free port; the bound port is recorded on the dispatcher.
    ///
    /// # Errors
    ///
    /// [`SimulatorError::PortInUse`] if a fixed port is already taken.
    pub async fn start(dispatcher: Arc<DeliveryDispatcher>, host: &str, port: u16) -> Result<Self> {
        if port != 0 && port_in_use(host, port).await {
            return Err(SimulatorError::PortInUse(port));
        }
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| bind_error(e, port))?;
        let addr = listener.local_addr()?;
        dispatcher.set_port(addr.port());

        let app = router(Arc::clone(&dispatcher));
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                signal.await.ok();
            });
            if let Err(e) = server.await {
                warn!(error = %e, "simulator server terminated with error");
            }
        });

        info!("simulator up and running: http://{addr}/");
        Ok(Self {
            addr,
            dispatcher,
            shutdown,
            task,
        })
    }

    /// Bound address
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound port
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop serving and stop the git emulator
    ///
    /// # Errors
    ///
    /// Returns an error if the git service fails to stop.
    pub async fn stop(self) -> Result<()> {
        debug!("stopping simulator server");
        self.shutdown.send(()).ok();
        if let Err(e) = self.task.await {
            warn!(error = %e, "simulator server task failed to join");
        }
        self.dispatcher.emulator().stop().await?;
        info!("simulator stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchSettings;
    use crate::fetch::{MockHttpClient, UpstreamResponse};
    use crate::git::{LocalRepoEmulator, MockGitService};
    use crate::render::MockRenderEngine;
    use crate::strain::{StrainConfig, StrainRegistry};
    use crate::template::TemplateResolver;
    use bytes::Bytes;
    use tower::ServiceExt;

    fn dispatcher(client: MockHttpClient) -> Arc<DeliveryDispatcher> {
        let content = StrainConfig {
            content: Some(crate::strain::GitLocation::Url(
                "https://github.com/adobe/blog.git#main".to_string(),
            )),
            ..StrainConfig::local_default()
        };
        Arc::new(DeliveryDispatcher::new(
            Arc::new(StrainRegistry::from_config(vec![content]).unwrap()),
            Arc::new(LocalRepoEmulator::new("/", Arc::new(MockGitService::new()))),
            Arc::new(TemplateResolver::new("/nonexistent")),
            Arc::new(MockRenderEngine::new()),
            Arc::new(client),
            DispatchSettings::default(),
        ))
    }

    fn answering(url: &'static str, body: &'static str) -> MockHttpClient {
        let mut client = MockHttpClient::new();
        client.expect_send().returning(move |request| {
            Ok(if request.url == url {
                UpstreamResponse::new(StatusCode::OK, Bytes::from(body))
            } else {
                UpstreamResponse::new(StatusCode::NOT_FOUND, "")
            })
        });
        client
    }

    #[tokio::test]
    async fn test_fallback_dispatches() {
        let app = router(dispatcher(answering(
            "https://raw.github.com/adobe/blog/main/styles.css",
            "body {}",
        )));

        let response = app
            .oneshot(Request::get("/styles.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/css");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"body {}"));
    }

    #[tokio::test]
    async fn test_internal_content_proxy_route() {
        let app = router(dispatcher(answering(
            "https://raw.github.com/adobe/blog/main/nav.md",
            "# Nav",
        )));

        let response = app
            .oneshot(
                Request::get("/__internal__/content-proxy/default?path=%2Fnav.md")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"# Nav"));
    }

    #[tokio::test]
    async fn test_start_records_port_and_stops() {
        let d = dispatcher(answering("unused", ""));
        let server = SimulatorServer::start(Arc::clone(&d), "127.0.0.1", 0)
            .await
            .unwrap();
        assert_ne!(server.port(), 0);
        assert_eq!(d.port(), server.port());
        assert!(port_in_use("127.0.0.1", server.port()).await);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_fixed_port_in_use() {
        let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = blocker.local_addr().unwrap().port();

        let result = SimulatorServer::start(dispatcher(MockHttpClient::new()), "127.0.0.1", port).await;
        assert!(matches!(result, Err(SimulatorError::PortInUse(p)) if p == port));
    }
}
