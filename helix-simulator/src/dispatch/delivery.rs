//! Response produced by the dispatcher

use axum::response::{IntoResponse, Response};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use http::{
    header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING},
    HeaderMap, HeaderName, HeaderValue, StatusCode,
};
use serde_json::Value;

use crate::error::{Result, SimulatorError};
use crate::fetch::UpstreamResponse;
use crate::render::RenderResponse;

const DEFAULT_RENDER_TYPE: &str = "text/html";

/// Content type for a file extension
#[must_use]
pub fn mime_for_extension(extension: &str) -> String {
    let extension = extension.rsplit('.').next().unwrap_or(extension);
    mime_guess::from_ext(extension)
        .first_or_octet_stream()
        .to_string()
}

/// Status, headers and body of a dispatched request
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl Delivery {
    /// Empty response with `status`
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// 200 response with the given content type
    pub fn typed(content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        Self {
            status: StatusCode::OK,
            headers,
            body: body.into(),
        }
    }

    /// Pass an upstream response through, minus hop-by-hop headers
    #[must_use]
    pub fn from_upstream(response: UpstreamResponse) -> Self {
        let mut headers = response.headers;
        for name in [CONNECTION, TRANSFER_ENCODING, CONTENT_LENGTH] {
            headers.remove(name);
        }
        Self {
            status: response.status,
            headers,
            body: response.body,
        }
    }

    /// Response for a failed request
    #[must_use]
    pub fn from_error(err: SimulatorError) -> Self {
        let status = err.status();
        match err {
            SimulatorError::Upstream { reason, .. } => Self {
                status,
                headers: HeaderMap::new(),
                body: Bytes::from(reason),
            },
            _ => Self::empty(status),
        }
    }

    /// Shape a render script response
    ///
    /// JSON content types serialise the body, `*/octet-stream` and `image/*`
    /// base64-decode it, anything else is sent as text.
    ///
    /// # Errors
    ///
    /// Returns an error if a binary body is not valid base64 or a JSON body cannot be serialised.
    pub fn from_render(response: RenderResponse) -> Result<Self> {
        let content_type = response
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
            .map_or(DEFAULT_RENDER_TYPE, |(_, value)| value.as_str())
            .to_string();

        let body = if content_type.contains("/json") {
            Bytes::from(serde_json::to_vec(&response.body)?)
        } else if content_type.contains("/octet-stream") || content_type.starts_with("image/") {
            match &response.body {
                Value::String(encoded) => Bytes::from(STANDARD.decode(encoded).map_err(|e| {
                    SimulatorError::internal(format!("invalid base64 body: {e}"))
                })?),
                Value::Null => Bytes::new(),
                _ => {
                    return Err(SimulatorError::internal(
                        "binary response body must be a base64 string",
                    ))
                }
            }
        } else {
            match response.body {
                Value::String(text) => Bytes::from(text),
                Value::Null => Bytes::new(),
                other => Bytes::from(other.to_string()),
            }
        };

        let status = StatusCode::from_u16(response.status_code).map_err(|e| {
            SimulatorError::internal(format!("invalid status {}: {e}", response.status_code))
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &response.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| SimulatorError::internal(format!("invalid header {name}: {e}")))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| SimulatorError::internal(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_RENDER_TYPE));
        }

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// Content type header, if any
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

impl IntoResponse for Delivery {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn render(content_type: Option<&str>, body: Value) -> RenderResponse {
        let mut headers = BTreeMap::new();
        if let Some(content_type) = content_type {
            headers.insert("Content-Type".to_string(), content_type.to_string());
        }
        RenderResponse {
            status_code: 200,
            headers,
            body,
        }
    }

    #[test]
    fn test_render_defaults_to_html() {
        let delivery = Delivery::from_render(render(None, json!("<h1>Hi</h1>"))).unwrap();
        assert_eq!(delivery.status, StatusCode::OK);
        assert_eq!(delivery.content_type(), Some("text/html"));
        assert_eq!(delivery.body, Bytes::from_static(b"<h1>Hi</h1>"));
    }

    #[test]
    fn test_render_json_is_serialized() {
        let delivery =
            Delivery::from_render(render(Some("application/json"), json!({"a": [1, 2]}))).unwrap();
        assert_eq!(delivery.body, Bytes::from_static(br#"{"a":[1,2]}"#));
    }

    #[test]
    fn test_render_binary_is_decoded() {
        let delivery =
            Delivery::from_render(render(Some("image/png"), json!("aGVsbG8="))).unwrap();
        assert_eq!(delivery.body, Bytes::from_static(b"hello"));

        let err = Delivery::from_render(render(Some("application/octet-stream"), json!("%%%")))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_render_keeps_status_and_headers() {
        let mut response = render(Some("text/plain"), json!("moved"));
        response.status_code = 301;
        response
            .headers
            .insert("Location".to_string(), "/new".to_string());
        let delivery = Delivery::from_render(response).unwrap();
        assert_eq!(delivery.status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(delivery.headers["location"], "/new");
    }

    #[test]
    fn test_upstream_strips_hop_headers() {
        let mut upstream = UpstreamResponse::new(StatusCode::OK, "x");
        upstream
            .headers
            .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let delivery = Delivery::from_upstream(upstream);
        assert!(!delivery.headers.contains_key(TRANSFER_ENCODING));
        assert_eq!(delivery.content_type(), Some("text/plain"));
    }

    #[test]
    fn test_mime_for_extension() {
        assert_eq!(mime_for_extension("html"), "text/html");
        assert_eq!(mime_for_extension("css"), "text/css");
        assert_eq!(mime_for_extension("min.css"), "text/css");
        assert_eq!(mime_for_extension(""), "application/octet-stream");
    }
}
