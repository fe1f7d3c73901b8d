//! Per-request routing context

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::path::{PathResolver, ResolvedPath};
use crate::strain::{Selection, Strain};

/// Backend name reported to render scripts
pub const BACKEND_NAME: &str = "localhost--F_Petridish";

/// Path prefix of CGI scripts
pub const CGI_PREFIX: &str = "/cgi-bin/";

/// Request as received by the dispatcher
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    /// HTTP method
    pub method: Method,
    /// Path and query
    pub url: String,
    /// Request headers, overrides already applied
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

/// Ids identifying one request towards render scripts and upstreams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIds {
    /// `x-openwhisk-activation-id`
    pub activation_id: String,
    /// `x-request-id`
    pub request_id: String,
    /// `x-cdn-request-id`
    pub cdn_request_id: String,
}

impl RequestIds {
    fn generate() -> Self {
        Self {
            activation_id: Uuid::new_v4().simple().to_string(),
            request_id: Uuid::new_v4().simple().to_string(),
            cdn_request_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Everything the dispatcher knows about a request once a strain is selected
///
/// Built once per request and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RequestRoutingContext {
    /// Request target as received
    pub url: String,
    /// Decomposed path
    pub resolved: ResolvedPath,
    /// Selected strain
    pub strain: Arc<Strain>,
    /// HTTP method
    pub method: Method,
    /// Request headers
    pub headers: HeaderMap,
    /// Decoded query parameters, in order
    pub params: Vec<(String, String)>,
    /// Request body
    pub body: Bytes,
    /// Generated request ids
    pub ids: RequestIds,
}

impl RequestRoutingContext {
    /// Build the context for `request` routed to `selection`
    #[must_use]
    pub fn new(request: IncomingRequest, selection: &Selection) -> Self {
        let resolved = PathResolver::resolve(
            &request.url,
            &selection.strain,
            selection.mount.as_deref(),
        );
        let params = url::form_urlencoded::parse(resolved.query_string.as_bytes())
            .into_owned()
            .collect();
        Self {
            url: request.url,
            resolved,
            strain: Arc::clone(&selection.strain),
            method: request.method,
            headers: request.headers,
            params,
            body: request.body,
            ids: RequestIds::generate(),
        }
    }

    /// Request path, with directory index injected
    #[must_use]
    pub fn path(&self) -> &str {
        &self.resolved.path
    }

    /// Mount-relative path
    #[must_use]
    pub fn rel_path(&self) -> &str {
        &self.resolved.rel_path
    }

    /// Resource path used to locate content
    #[must_use]
    pub fn resource_path(&self) -> &str {
        &self.resolved.resource_path
    }

    /// Selector, empty if none
    #[must_use]
    pub fn selector(&self) -> &str {
        &self.resolved.selector
    }

    /// Extension, empty if none
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.resolved.extension
    }

    /// Mount, empty for the root
    #[must_use]
    pub fn mount(&self) -> &str {
        &self.resolved.mount
    }

    /// Query string without `?`
    #[must_use]
    pub fn query_string(&self) -> &str {
        &self.resolved.query_string
    }

    /// Whether the request targets a CGI script
    #[must_use]
    pub fn is_cgi(&self) -> bool {
        self.path().starts_with(CGI_PREFIX)
    }

    /// Headers handed to render scripts: request ids first, client headers win
    #[must_use]
    pub fn script_headers(&self) -> Map<String, Value> {
        let mut headers = Map::new();
        for (name, value) in [
            ("x-openwhisk-activation-id", self.ids.activation_id.as_str()),
            ("x-request-id", self.ids.request_id.as_str()),
            ("x-backend-name", BACKEND_NAME),
            ("x-cdn-request-id", self.ids.cdn_request_id.as_str()),
            ("x-strain", self.strain.name.as_str()),
        ] {
            headers.insert(name.to_string(), Value::String(value.to_string()));
        }
        for (name, value) in &self.headers {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), Value::String(value.to_string()));
            }
        }
        headers
    }

    /// Summary for logging
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "url": self.url,
            "path": self.path(),
            "resourcePath": self.resource_path(),
            "selector": self.selector(),
            "extension": self.extension(),
            "method": self.method.as_str(),
            "strain": self.strain.name,
        })
    }
}
