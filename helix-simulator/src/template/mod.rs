//! Render script lookup
//!
//! The build directory contains one `*.info.json` file per compiled script:
//!
//! ```json
//! { "name": "html", "main": "html.js" }
//! ```
//!
//! Older builds omit `name`; it is then derived from the info file's location
//! (`src/html.info.json` is `html`, `cgi-bin/hello.info.json` is `cgi-bin-hello`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, SimulatorError};
use crate::routing::RequestRoutingContext;

const INFO_SUFFIX: &str = ".info.json";
const DEFAULT_EXTENSION: &str = "html";

/// A render script known by its logical name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDescriptor {
    /// `html`, `print_html`, `cgi-bin-hello`, ...
    pub logical_name: String,
    /// Script entry point
    pub absolute_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ScriptInfo {
    #[serde(default)]
    name: Option<String>,
    main: String,
}

fn legacy_name(build_dir: &Path, info_file: &Path) -> String {
    let relative = info_file.strip_prefix(build_dir).unwrap_or(info_file);
    let cgi = relative
        .components()
        .next()
        .is_some_and(|c| c.as_os_str() == "cgi-bin");
    let basename = relative
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_default()
        .trim_end_matches(INFO_SUFFIX);
    if cgi {
        format!("cgi-bin-{basename}")
    } else {
        basename.to_string()
    }
}

/// Scan `build_dir` for script metadata
///
/// Unreadable or malformed info files are skipped with a warning.
///
/// # Errors
///
/// Returns an error if the scan task fails.
pub async fn scan_scripts(build_dir: &Path) -> Result<HashMap<String, ScriptDescriptor>> {
    let build_dir = build_dir.to_path_buf();
    let infos: Vec<PathBuf> = tokio::task::spawn_blocking({
        let build_dir = build_dir.clone();
        move || {
            WalkDir::new(&build_dir)
                .into_iter()
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .is_some_and(|n| n.ends_with(INFO_SUFFIX))
                })
                .map(walkdir::DirEntry::into_path)
                .collect()
        }
    })
    .await
    .map_err(|e| SimulatorError::internal(e.to_string()))?;

    let mut scripts = HashMap::with_capacity(infos.len());
    for info_file in infos {
        let info: ScriptInfo = match tokio::fs::read(&info_file)
            .await
            .map_err(SimulatorError::from)
            .and_then(|data| serde_json::from_slice(&data).map_err(Into::into))
        {
            Ok(info) => info,
            Err(e) => {
                warn!(file = %info_file.display(), error = %e, "ignoring script info");
                continue;
            }
        };
        let logical_name = info
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| legacy_name(&build_dir, &info_file));
        let absolute_path = build_dir.join(&info.main);
        debug!(name = %logical_name, main = %absolute_path.display(), "found script");
        scripts.insert(
            logical_name.clone(),
            ScriptDescriptor {
                logical_name,
                absolute_path,
            },
        );
    }
    Ok(scripts)
}

/// Logical script name for a request
#[must_use]
pub fn logical_name(ctx: &RequestRoutingContext) -> String {
    if ctx.is_cgi() {
        let basename = ctx.path().rsplit('/').next().unwrap_or_default();
        return format!("cgi-bin-{}", basename.trim_end_matches(".js"));
    }
    let extension = if ctx.extension().is_empty() {
        DEFAULT_EXTENSION
    } else {
        ctx.extension()
    };
    if ctx.selector().is_empty() {
        extension.to_string()
    } else {
        format!("{}_{extension}", ctx.selector())
    }
}

/// Maps requests to render scripts
#[derive(Debug)]
pub struct TemplateResolver {
    build_dir: PathBuf,
    scripts: RwLock<HashMap<String, ScriptDescriptor>>,
}

impl TemplateResolver {
    /// Create a resolver over `build_dir`; call [`Self::rescan`] to load it
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
            scripts: RwLock::new(HashMap::new()),
        }
    }

    /// Build directory scanned for scripts
    #[must_use]
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Re-read the build directory, replacing the script map
    ///
    /// # Errors
    ///
    /// Returns an error if the scan task fails.
    pub async fn rescan(&self) -> Result<usize> {
        let scripts = scan_scripts(&self.build_dir).await?;
        let count = scripts.len();
        *self.scripts.write() = scripts;
        info!(count, dir = %self.build_dir.display(), "scripts scanned");
        Ok(count)
    }

    /// Names of all known scripts
    #[must_use]
    pub fn script_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.scripts.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Script for a request, if one exists on disk
    pub async fn resolve(&self, ctx: &RequestRoutingContext) -> Option<ScriptDescriptor> {
        let name = logical_name(ctx);
        debug!(path = %ctx.path(), script = %name, "resolved script name");

        let Some(script) = self.scripts.read().get(&name).cloned() else {
            info!("no script for {name}");
            return None;
        };
        match tokio::fs::metadata(&script.absolute_path).await {
            Ok(metadata) if metadata.is_file() => Some(script),
            _ => {
                info!("script file not found: {}", script.absolute_path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::IncomingRequest;
    use crate::strain::{Selection, Strain, StrainConfig};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx(url: &str) -> RequestRoutingContext {
        let strain = Strain::try_from(StrainConfig::local_default()).unwrap();
        RequestRoutingContext::new(
            IncomingRequest {
                url: url.to_string(),
                ..IncomingRequest::default()
            },
            &Selection {
                strain: Arc::new(strain),
                mount: None,
            },
        )
    }

    fn write(dir: &Path, relative: &str, content: &str) {
        let file = dir.join(relative);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(file, content).unwrap();
    }

    #[test]
    fn test_logical_names() {
        assert_eq!(logical_name(&ctx("/index.html")), "html");
        assert_eq!(logical_name(&ctx("/index.print.html")), "print_html");
        assert_eq!(logical_name(&ctx("/data.json")), "json");
        assert_eq!(logical_name(&ctx("/content")), "html");
        assert_eq!(logical_name(&ctx("/cgi-bin/hello.js")), "cgi-bin-hello");
        assert_eq!(logical_name(&ctx("/cgi-bin/hello")), "cgi-bin-hello");
    }

    #[tokio::test]
    async fn test_scan_named_and_legacy_infos() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "html.js", "");
        write(temp.path(), "html.info.json", r#"{"name":"html","main":"html.js"}"#);
        write(temp.path(), "src/print_html.info.json", r#"{"main":"print_html.js"}"#);
        write(temp.path(), "cgi-bin/hello.info.json", r#"{"main":"cgi-bin/hello.js"}"#);
        write(temp.path(), "broken.info.json", "{not json");

        let scripts = scan_scripts(temp.path()).await.unwrap();
        assert_eq!(scripts.len(), 3);
        assert_eq!(scripts["html"].absolute_path, temp.path().join("html.js"));
        assert!(scripts.contains_key("print_html"));
        assert_eq!(
            scripts["cgi-bin-hello"].absolute_path,
            temp.path().join("cgi-bin/hello.js")
        );
    }

    #[tokio::test]
    async fn test_resolve_requires_file_on_disk() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "html.js", "");
        write(temp.path(), "html.info.json", r#"{"name":"html","main":"html.js"}"#);
        write(temp.path(), "json.info.json", r#"{"name":"json","main":"json.js"}"#);

        let resolver = TemplateResolver::new(temp.path());
        assert_eq!(resolver.rescan().await.unwrap(), 2);

        let script = resolver.resolve(&ctx("/index.html")).await.unwrap();
        assert_eq!(script.logical_name, "html");
        assert!(resolver.resolve(&ctx("/data.json")).await.is_none());
        assert!(resolver.resolve(&ctx("/index.print.html")).await.is_none());
    }

    #[tokio::test]
    async fn test_rescan_picks_up_new_scripts() {
        let temp = TempDir::new().unwrap();
        let resolver = TemplateResolver::new(temp.path());
        assert_eq!(resolver.rescan().await.unwrap(), 0);
        assert!(resolver.resolve(&ctx("/index.html")).await.is_none());

        write(temp.path(), "html.js", "");
        write(temp.path(), "html.info.json", r#"{"name":"html","main":"html.js"}"#);
        resolver.rescan().await.unwrap();
        assert!(resolver.resolve(&ctx("/index.html")).await.is_some());
        assert_eq!(resolver.script_names(), ["html"]);
    }

    #[tokio::test]
    async fn test_missing_build_dir_yields_no_scripts() {
        let temp = TempDir::new().unwrap();
        let scripts = scan_scripts(&temp.path().join("nope")).await.unwrap();
        assert!(scripts.is_empty());
    }
}
