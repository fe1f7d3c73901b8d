//! Dynamic rendering
//!
//! Render scripts are executed through the [`RenderEngine`] capability. The engine
//! owns its cache of loaded scripts ([`ScriptRegistry`]); a rebuild of the scripts
//! is signalled with [`RenderEngine::reload`].

mod command;
mod params;
mod registry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::template::ScriptDescriptor;

pub use command::CommandRenderEngine;
pub use params::{render_params, ParamsInput};
pub use registry::{ScriptHandle, ScriptRegistry};

const fn default_status() -> u16 {
    200
}

/// Structured response of a render script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    /// HTTP status, 200 unless given
    #[serde(default = "default_status", alias = "status")]
    pub status_code: u16,
    /// Response headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Body; shaped according to the content type
    #[serde(default)]
    pub body: Value,
}

impl Default for RenderResponse {
    fn default() -> Self {
        Self {
            status_code: default_status(),
            headers: BTreeMap::new(),
            body: Value::Null,
        }
    }
}

/// Executes render scripts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Run `script` with `params`
    ///
    /// A script answering with a non-2xx status is a response, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the script cannot be run or its output is invalid.
    async fn invoke(
        &self,
        script: &ScriptDescriptor,
        params: Map<String, Value>,
    ) -> Result<RenderResponse>;

    /// Forget every loaded script so the next invocation picks up a rebuild
    fn reload(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_accepts_status_alias() {
        let response: RenderResponse =
            serde_json::from_value(json!({ "status": 404, "body": "" })).unwrap();
        assert_eq!(response.status_code, 404);
    }

    #[test]
    fn test_response_defaults() {
        let response: RenderResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(response, RenderResponse::default());
    }
}
