//! Request delivery
//!
//! [`DeliveryDispatcher`] decides where a request is served from. The steps run in
//! a fixed order and the first one that produces a response wins:
//!
//! 1. proxy strains are forwarded to their origin
//! 2. reserved asset paths are forwarded to the inner CDN
//! 3. content and static references are rebound to the local emulator, if mapped
//! 4. `.json` and `.md` requests go to the content proxy
//! 5. a matching render script renders the response (a 404 from it falls through)
//! 6. the content repository, then the static repository, is asked for the raw file

mod content_proxy;
mod delivery;
mod special;

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{
    header::{AUTHORIZATION, CONNECTION, COOKIE, HOST},
    HeaderMap, HeaderValue, Method, StatusCode,
};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::error::{Result, SimulatorError};
use crate::fetch::{log_status, HttpClient, OutboundRequest};
use crate::git::{GitReference, LocalRepoEmulator};
use crate::render::{render_params, ParamsInput, RenderEngine};
use crate::routing::{IncomingRequest, RequestRoutingContext};
use crate::strain::{ProxyOrigin, Strain, StrainRegistry, StrainRequest};
use crate::template::TemplateResolver;

pub use content_proxy::{ContentProxy, ContentRequest, WELL_KNOWN_FRAGMENTS};
pub use delivery::{mime_for_extension, Delivery};
pub use special::{inner_cdn_url, is_special_asset};

/// Route of the internal content proxy; the strain name follows
pub const CONTENT_PROXY_ROUTE: &str = "/__internal__/content-proxy";

/// Inner CDN domain used unless configured otherwise
pub const DEFAULT_INNER_CDN_DOMAIN: &str = "hlx.page";

const GITHUB_TOKEN_PARAM: &str = "GITHUB_TOKEN";
const GITHUB_RAW_HOSTS: [&str; 2] = [
    "https://raw.github.com/",
    "https://raw.githubusercontent.com/",
];

/// Strain with its references rebound for one request
///
/// The shared [`Strain`] is never modified; the original content reference stays
/// available for display and for the inner CDN.
#[derive(Debug, Clone)]
pub struct EffectiveStrain {
    /// Strain as configured
    pub strain: Arc<Strain>,
    /// Content reference to fetch from
    pub content: GitReference,
    /// Static reference to fetch from
    pub static_url: GitReference,
}

impl EffectiveStrain {
    /// Content reference as configured
    #[must_use]
    pub fn original_content(&self) -> &GitReference {
        &self.strain.content
    }

    /// Whether the content is served by the local emulator
    #[must_use]
    pub fn is_emulated(&self) -> bool {
        self.content != self.strain.content
    }
}

/// Dispatcher settings taken from the project configuration
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Domain of the inner CDN, e.g. `hlx.page`
    pub inner_cdn_domain: String,
    /// Developer default parameters for render scripts
    pub default_params: Map<String, Value>,
    /// Headers set on every incoming request before strain selection
    pub request_override_headers: HeaderMap,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            inner_cdn_domain: DEFAULT_INNER_CDN_DOMAIN.to_string(),
            default_params: Map::new(),
            request_override_headers: HeaderMap::new(),
        }
    }
}

/// Routes requests to proxies, render scripts and git content
pub struct DeliveryDispatcher {
    registry: Arc<StrainRegistry>,
    emulator: Arc<LocalRepoEmulator>,
    templates: Arc<TemplateResolver>,
    engine: Arc<dyn RenderEngine>,
    client: Arc<dyn HttpClient>,
    content_proxy: ContentProxy,
    settings: DispatchSettings,
    port: AtomicU16,
}

impl DeliveryDispatcher {
    /// Wire a dispatcher from its collaborators
    pub fn new(
        registry: Arc<StrainRegistry>,
        emulator: Arc<LocalRepoEmulator>,
        templates: Arc<TemplateResolver>,
        engine: Arc<dyn RenderEngine>,
        client: Arc<dyn HttpClient>,
        settings: DispatchSettings,
    ) -> Self {
        let content_proxy = ContentProxy::new(Arc::clone(&client), &settings.inner_cdn_domain);
        Self {
            registry,
            emulator,
            templates,
            engine,
            client,
            content_proxy,
            settings,
            port: AtomicU16::new(0),
        }
    }

    /// Strain registry
    #[must_use]
    pub fn registry(&self) -> &Arc<StrainRegistry> {
        &self.registry
    }

    /// Local repository emulator
    #[must_use]
    pub fn emulator(&self) -> &Arc<LocalRepoEmulator> {
        &self.emulator
    }

    /// Template resolver
    #[must_use]
    pub fn templates(&self) -> &Arc<TemplateResolver> {
        &self.templates
    }

    /// Render engine
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn RenderEngine> {
        &self.engine
    }

    /// Record the port the server listens on
    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::Relaxed);
    }

    /// Port the server listens on, 0 before start
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Relaxed)
    }

    /// URL of the internal content proxy for `strain`
    #[must_use]
    pub fn content_proxy_url(&self, strain: &str) -> String {
        format!(
            "http://localhost:{}{CONTENT_PROXY_ROUTE}/{strain}",
            self.port()
        )
    }

    /// Apply request overrides, select the strain and decompose the URL
    #[must_use]
    pub fn route(&self, mut request: IncomingRequest) -> RequestRoutingContext {
        for (name, value) in &self.settings.request_override_headers {
            request.headers.insert(name.clone(), value.clone());
        }
        let selection = self
            .registry
            .select(&StrainRequest::new(&request.url, &request.headers));
        RequestRoutingContext::new(request, &selection)
    }

    /// Rebind the references of `strain` to the emulator where mapped
    ///
    /// # Errors
    ///
    /// Returns an error if the git emulator fails to start.
    pub async fn effective_strain(&self, strain: &Arc<Strain>) -> Result<EffectiveStrain> {
        let content = self
            .emulator
            .resolve(&strain.content)
            .await?
            .unwrap_or_else(|| strain.content.clone());
        let static_url = self
            .emulator
            .resolve(&strain.static_content.url)
            .await?
            .unwrap_or_else(|| strain.static_content.url.clone());
        Ok(EffectiveStrain {
            strain: Arc::clone(strain),
            content,
            static_url,
        })
    }

    /// Serve one request
    pub async fn dispatch(&self, request: IncomingRequest) -> Delivery {
        let ctx = self.route(request);
        debug!(context = %ctx.to_json(), "dispatching request");

        match self.deliver(&ctx).await {
            Ok(delivery) => delivery,
            Err(SimulatorError::NotFound(path)) => {
                info!("Resource not found: {path}");
                Delivery::empty(StatusCode::NOT_FOUND)
            }
            Err(e) => {
                error!(path = %ctx.path(), "Error while delivering resource: {e}");
                Delivery::from_error(e)
            }
        }
    }

    /// Serve a request of the internal content proxy route
    ///
    /// `query` must contain `path`; the other parameters are forwarded to the inner
    /// CDN.
    pub async fn content_proxy_request(
        &self,
        strain_name: &str,
        query: &[(String, String)],
        headers: &HeaderMap,
    ) -> Delivery {
        let Some(strain) = self.registry.get(strain_name) else {
            info!("unknown strain for content proxy: {strain_name}");
            return Delivery::empty(StatusCode::NOT_FOUND);
        };
        let Some(path) = query.iter().find(|(name, _)| name == "path").map(|(_, v)| v) else {
            return Delivery::empty(StatusCode::BAD_REQUEST);
        };

        let result = async {
            let effective = self.effective_strain(&strain).await?;
            self.content_proxy
                .fetch(&ContentRequest {
                    content: &effective.content,
                    original: effective.original_content(),
                    path,
                    query,
                    headers,
                })
                .await
        }
        .await;
        result.unwrap_or_else(|e| {
            error!("Error during proxy: {e}");
            Delivery::empty(StatusCode::INTERNAL_SERVER_ERROR)
        })
    }

    async fn deliver(&self, ctx: &RequestRoutingContext) -> Result<Delivery> {
        if let Some(origin) = &ctx.strain.origin {
            return self.proxy_strain(ctx, origin).await;
        }

        if is_special_asset(ctx.path()) {
            let url = inner_cdn_url(&ctx.strain.content, &self.settings.inner_cdn_domain, &ctx.url);
            debug!("helix url, proxying to {url}");
            return self.forward(ctx, &url).await.map_err(|e| {
                SimulatorError::bad_gateway(format!("Failed to proxy helix request: {e}"))
            });
        }

        let effective = self.effective_strain(&ctx.strain).await?;

        if matches!(ctx.extension(), "json" | "md") {
            return self
                .content_proxy
                .fetch(&ContentRequest {
                    content: &effective.content,
                    original: effective.original_content(),
                    path: ctx.rel_path(),
                    query: &ctx.params,
                    headers: &ctx.headers,
                })
                .await;
        }

        if let Some(delivery) = self.render(ctx, &effective).await? {
            return Ok(delivery);
        }

        self.fetch_static(ctx, &effective).await
    }

    async fn proxy_strain(
        &self,
        ctx: &RequestRoutingContext,
        origin: &ProxyOrigin,
    ) -> Result<Delivery> {
        let url = proxy_target(ctx, origin);
        self.forward(ctx, &url)
            .await
            .map_err(|e| SimulatorError::internal(format!("Error during proxy: {e}")))
    }

    async fn forward(&self, ctx: &RequestRoutingContext, url: &str) -> Result<Delivery> {
        let mut headers = ctx.headers.clone();
        for name in [COOKIE, CONNECTION, HOST] {
            headers.remove(name);
        }
        let body = if ctx.method == Method::GET || ctx.method == Method::HEAD {
            Bytes::new()
        } else {
            ctx.body.clone()
        };
        debug!("Proxy {} request to {url}", ctx.method);
        let response = self
            .client
            .send(OutboundRequest {
                method: ctx.method.clone(),
                url: url.to_string(),
                headers,
                body,
            })
            .await?;
        log_status(
            response.status,
            &format!("Proxy {} request to {url}: {}", ctx.method, response.status),
        );
        Ok(Delivery::from_upstream(response))
    }

    async fn render(
        &self,
        ctx: &RequestRoutingContext,
        effective: &EffectiveStrain,
    ) -> Result<Option<Delivery>> {
        let Some(script) = self.templates.resolve(ctx).await else {
            return Ok(None);
        };
        let params = render_params(&ParamsInput {
            ctx,
            content: &effective.content,
            content_proxy_url: &self.content_proxy_url(&ctx.strain.name),
            defaults: &self.settings.default_params,
        });

        let response = self.engine.invoke(&script, params).await.map_err(|e| {
            SimulatorError::internal(format!("error rendering dynamic script: {e}"))
        })?;
        if response.status_code == StatusCode::NOT_FOUND.as_u16() {
            info!(script = %script.logical_name, "script reported 404, trying static content");
            return Ok(None);
        }
        Delivery::from_render(response).map(Some)
    }

    fn github_token(&self, url: &str) -> Option<&str> {
        GITHUB_RAW_HOSTS
            .iter()
            .any(|host| url.starts_with(host))
            .then(|| self.settings.default_params.get(GITHUB_TOKEN_PARAM))
            .flatten()
            .and_then(Value::as_str)
    }

    async fn fetch_static(
        &self,
        ctx: &RequestRoutingContext,
        effective: &EffectiveStrain,
    ) -> Result<Delivery> {
        let candidates = [
            format!("{}{}", effective.content.raw(), ctx.rel_path()),
            format!(
                "{}{}{}",
                effective.static_url.raw(),
                effective.strain.static_content.path,
                ctx.rel_path()
            ),
        ];

        for url in candidates {
            debug!("fetching static resource from {url}");
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&ctx.ids.request_id) {
                headers.insert("x-request-id", value);
            }
            if let Some(token) = self.github_token(&url) {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                    headers.insert(AUTHORIZATION, value);
                }
            }

            let response = self
                .client
                .send(OutboundRequest {
                    headers,
                    ..OutboundRequest::get(&url)
                })
                .await?;
            if response.status.is_success() {
                return Ok(Delivery::typed(
                    &mime_for_extension(ctx.extension()),
                    response.body,
                ));
            }
            log_status(
                response.status,
                &format!(
                    "resource at {url} does not exist. got {} from server",
                    response.status
                ),
            );
        }

        Err(SimulatorError::NotFound(ctx.path().to_string()))
    }
}

/// Origin URL for a proxy strain request
fn proxy_target(ctx: &RequestRoutingContext, origin: &ProxyOrigin) -> String {
    let request_path = ctx.resolved.request_path.as_str();
    let mount = ctx.mount();
    let relative = if mount.is_empty() {
        request_path
    } else if request_path == mount {
        ""
    } else {
        request_path
            .strip_prefix(mount)
            .filter(|rest| rest.starts_with('/'))
            .unwrap_or(request_path)
    };

    let base = origin.path.trim_matches('/');
    let rest = relative.trim_start_matches('/');
    let mut target = String::from("/");
    target.push_str(base);
    if !base.is_empty() && !rest.is_empty() {
        target.push('/');
    }
    target.push_str(rest);

    let mut url = origin.url_for(&target);
    if !ctx.query_string().is_empty() {
        url.push('?');
        url.push_str(ctx.query_string());
    }
    url
}
