//! Parameter object handed to render scripts

use http::header::CONTENT_TYPE;
use serde_json::{Map, Value};

use crate::git::GitReference;
use crate::routing::RequestRoutingContext;

/// Inputs to [`render_params`]
#[derive(Debug, Clone, Copy)]
pub struct ParamsInput<'a> {
    /// Routing context of the request
    pub ctx: &'a RequestRoutingContext,
    /// Effective content reference (emulated if the repository is local)
    pub content: &'a GitReference,
    /// URL of the internal content proxy for the request's strain
    pub content_proxy_url: &'a str,
    /// Developer default parameters
    pub defaults: &'a Map<String, Value>,
}

fn string(value: impl Into<String>) -> Value {
    Value::String(value.into())
}

fn json_body(ctx: &RequestRoutingContext) -> Option<Map<String, Value>> {
    let is_json = ctx
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if !is_json || ctx.body.is_empty() {
        return None;
    }
    match serde_json::from_slice(&ctx.body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Assemble the parameters for a script invocation
///
/// Later sources win: request headers and method, developer defaults, a JSON
/// request body, then the routing parameters.
#[must_use]
pub fn render_params(input: &ParamsInput<'_>) -> Map<String, Value> {
    let ParamsInput {
        ctx,
        content,
        content_proxy_url,
        defaults,
    } = *input;

    let mut params = Map::new();
    params.insert("__ow_headers".to_string(), Value::Object(ctx.script_headers()));
    params.insert(
        "__ow_method".to_string(),
        string(ctx.method.as_str().to_lowercase()),
    );
    params.extend(defaults.clone());
    if let Some(body) = json_body(ctx) {
        params.extend(body);
    }

    if ctx.is_cgi() {
        params.insert("__hlx_owner".to_string(), string(content.owner()));
        params.insert("__hlx_repo".to_string(), string(content.repo()));
        params.insert("__hlx_ref".to_string(), string(content.git_ref()));
        for (name, value) in &ctx.params {
            params.insert(name.clone(), string(value.as_str()));
        }
    } else {
        for (name, value) in [
            ("owner", content.owner().to_string()),
            ("repo", content.repo().to_string()),
            ("ref", content.git_ref().to_string()),
            ("path", format!("{}.md", ctx.resource_path())),
            ("selector", ctx.selector().to_string()),
            ("extension", ctx.extension().to_string()),
            ("rootPath", ctx.mount().to_string()),
            ("params", ctx.query_string().to_string()),
            ("REPO_RAW_ROOT", format!("{}/", content.raw_root())),
            ("REPO_API_ROOT", format!("{}/", content.api_root())),
            ("CONTENT_PROXY_URL", content_proxy_url.to_string()),
        ] {
            params.insert(name.to_string(), string(value));
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::IncomingRequest;
    use crate::strain::{Selection, Strain, StrainConfig};
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue, Method};
    use serde_json::json;
    use std::sync::Arc;

    fn docs_selection() -> Selection {
        let config: StrainConfig = toml::from_str(
            r#"
            name = "docs"
            content = "https://github.com/adobe/helix-home.git#main"
            urls = ["https://www.project-helix.io/docs"]
            "#,
        )
        .unwrap();
        Selection {
            strain: Arc::new(Strain::try_from(config).unwrap()),
            mount: None,
        }
    }

    fn params_for(request: IncomingRequest, defaults: &Map<String, Value>) -> Map<String, Value> {
        let selection = docs_selection();
        let ctx = RequestRoutingContext::new(request, &selection);
        render_params(&ParamsInput {
            ctx: &ctx,
            content: &selection.strain.content,
            content_proxy_url: "http://localhost:3000/__internal__/content-proxy/docs",
            defaults,
        })
    }

    #[test]
    fn test_regular_script_params() {
        let mut defaults = Map::new();
        defaults.insert("GITHUB_TOKEN".to_string(), json!("secret"));
        defaults.insert("owner".to_string(), json!("overridden"));

        let params = params_for(
            IncomingRequest {
                method: Method::GET,
                url: "/docs/api/index.print.html?a=1".to_string(),
                ..IncomingRequest::default()
            },
            &defaults,
        );

        assert_eq!(params["owner"], "adobe");
        assert_eq!(params["repo"], "helix-home");
        assert_eq!(params["ref"], "main");
        assert_eq!(params["path"], "/api/index.md");
        assert_eq!(params["selector"], "print");
        assert_eq!(params["extension"], "html");
        assert_eq!(params["rootPath"], "/docs");
        assert_eq!(params["params"], "a=1");
        assert_eq!(params["REPO_RAW_ROOT"], "https://raw.github.com/");
        assert_eq!(params["REPO_API_ROOT"], "https://api.github.com/");
        assert_eq!(params["GITHUB_TOKEN"], "secret");
        assert_eq!(params["__ow_method"], "get");
        assert_eq!(params["__ow_headers"]["x-strain"], "docs");
        assert!(params.get("__hlx_owner").is_none());
    }

    #[test]
    fn test_cgi_script_params() {
        let params = params_for(
            IncomingRequest {
                method: Method::POST,
                url: "/cgi-bin/search.js?q=helix".to_string(),
                ..IncomingRequest::default()
            },
            &Map::new(),
        );
        assert_eq!(params["__hlx_owner"], "adobe");
        assert_eq!(params["__hlx_repo"], "helix-home");
        assert_eq!(params["__hlx_ref"], "main");
        assert_eq!(params["q"], "helix");
        assert_eq!(params["__ow_method"], "post");
        assert!(params.get("path").is_none());
    }

    #[test]
    fn test_json_body_is_merged() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let params = params_for(
            IncomingRequest {
                method: Method::POST,
                url: "/docs/form.html".to_string(),
                headers,
                body: Bytes::from_static(br#"{"email":"dev@example.com"}"#),
            },
            &Map::new(),
        );
        assert_eq!(params["email"], "dev@example.com");
    }
}
