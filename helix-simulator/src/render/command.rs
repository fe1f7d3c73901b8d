//! Render engine running scripts through an interpreter
//!
//! Each invocation spawns `<command> <snapshot>` for the script's loaded snapshot,
//! writes the parameter object as JSON to stdin and reads a JSON response from
//! stdout:
//!
//! ```json
//! { "statusCode": 200, "headers": { "Content-Type": "text/html" }, "body": "<html>..." }
//! ```

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::registry::ScriptRegistry;
use super::{RenderEngine, RenderResponse};
use crate::error::{Result, SimulatorError};
use crate::template::ScriptDescriptor;

/// Runs render scripts with an external interpreter such as `node`
#[derive(Debug)]
pub struct CommandRenderEngine {
    command: String,
    build_dir: PathBuf,
    scripts: ScriptRegistry,
}

impl CommandRenderEngine {
    /// Create an engine running scripts with `command`
    ///
    /// `build_dir` is the directory evicted on [`RenderEngine::reload`].
    pub fn new(command: impl Into<String>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            build_dir: build_dir.into(),
            scripts: ScriptRegistry::new(),
        }
    }

    /// Loaded script handles
    #[must_use]
    pub const fn scripts(&self) -> &ScriptRegistry {
        &self.scripts
    }
}

#[async_trait]
impl RenderEngine for CommandRenderEngine {
    async fn invoke(
        &self,
        script: &ScriptDescriptor,
        params: Map<String, Value>,
    ) -> Result<RenderResponse> {
        let handle = self.scripts.load(&script.absolute_path).await?;
        debug!(
            script = %script.logical_name,
            generation = handle.generation,
            "invoking script"
        );

        let mut command = Command::new(&self.command);
        command
            .arg(&handle.snapshot)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = handle.path.parent() {
            command.current_dir(dir);
        }
        let mut child = command.spawn().map_err(|e| {
            SimulatorError::internal(format!("unable to launch {}: {e}", self.command))
        })?;

        let input = serde_json::to_vec(&Value::Object(params))?;
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!(error = %e, "script closed stdin early");
                }
            });
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(SimulatorError::internal(format!(
                "script {} failed ({}): {}",
                script.logical_name,
                output.status,
                stderr.trim()
            )));
        }
        if !stderr.trim().is_empty() {
            warn!(script = %script.logical_name, "{}", stderr.trim());
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            SimulatorError::internal(format!(
                "script {} returned an invalid response: {e}",
                script.logical_name
            ))
        })
    }

    fn reload(&self) {
        let evicted = self.scripts.evict_prefix(&self.build_dir);
        info!(evicted, dir = %self.build_dir.display(), "render scripts reloaded");
    }
}
