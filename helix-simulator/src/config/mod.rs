//! Configuration management for the simulator
//!
//! Configuration is loaded from multiple sources with clear precedence:
//!
//! 1. Environment variables (highest priority, `HLX_` prefix, `__` for nesting)
//! 2. `./helix-config.toml` (project)
//! 3. `~/.config/helix-simulator/config.toml` (user config, XDG)
//! 4. `/etc/helix-simulator/config.toml` (system config)
//! 5. Hardcoded defaults (fallback)
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! port = 3000
//!
//! [project]
//! build_dir = ".hlx/build"
//! render_command = "node"
//!
//! [project.params]
//! GITHUB_TOKEN = "..."
//!
//! [project.request_override.headers]
//! host = "www.project-helix.io"
//!
//! [[local_repos]]
//! path = "../helix-pages"
//! url = "https://github.com/adobe/helix-pages.git"
//!
//! [[strains]]
//! name = "default"
//! content = "https://github.com/adobe/project-helix.io.git#main"
//! static = { path = "/htdocs" }
//!
//! [[strains]]
//! name = "api"
//! origin = "https://www.adobe.io/api"
//! urls = ["http://localhost/api"]
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dispatch::DEFAULT_INNER_CDN_DOMAIN;
use crate::strain::{StrainConfig, DEFAULT_STRAIN};

const APP_NAME: &str = "helix-simulator";
const LOCAL_CONFIG: &str = "./helix-config.toml";
const ENV_PREFIX: &str = "HLX_";

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address
    pub host: String,

    /// Port, 0 picks a free one
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Headers applied to every incoming request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOverride {
    /// Header name to value
    pub headers: BTreeMap<String, String>,
}

/// Project settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    /// Project directory, the process directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Directory holding the built render scripts, relative to `cwd`
    pub build_dir: PathBuf,

    /// Strain whose content decides whether the project is served locally
    pub strain_name: String,

    /// Interpreter that runs render scripts
    pub render_command: String,

    /// Domain of the inner CDN
    pub inner_cdn_domain: String,

    /// Default parameters passed to every render script
    pub params: Map<String, Value>,

    /// Headers merged over incoming requests
    pub request_override: RequestOverride,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            cwd: None,
            build_dir: PathBuf::from(".hlx/build"),
            strain_name: DEFAULT_STRAIN.to_string(),
            render_command: "node".to_string(),
            inner_cdn_domain: DEFAULT_INNER_CDN_DOMAIN.to_string(),
            params: Map::new(),
            request_override: RequestOverride::default(),
        }
    }
}

/// Embedded git service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    /// Bind address
    pub host: String,

    /// Port, 0 picks a free one
    pub port: u16,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            host: crate::git::GIT_LOCAL_HOST.to_string(),
            port: 0,
        }
    }
}

/// Additional working copy emulating a remote repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRepoSettings {
    /// Directory inside the working copy, relative to `cwd`
    pub path: PathBuf,

    /// Git URL of the repository it stands in for
    pub url: String,
}

/// Complete simulator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Extra local repositories
    pub local_repos: Vec<LocalRepoSettings>,

    /// Strain definitions; a local `default` strain is used when empty
    pub strains: Vec<StrainConfig>,

    /// HTTP listener
    pub server: ServerSettings,

    /// Project layout and render settings
    pub project: ProjectSettings,

    /// Embedded git service
    pub git: GitSettings,
}

impl SimulatorConfig {
    /// Load configuration from the standard locations
    ///
    /// # Errors
    ///
    /// Returns an error if the defaults cannot be serialized, a configuration file
    /// cannot be parsed or a value has the wrong type.
    pub fn load() -> anyhow::Result<Self> {
        let mut figment = Self::defaults()?;

        let system_config = PathBuf::from("/etc").join(APP_NAME).join("config.toml");
        if system_config.exists() {
            figment = figment.merge(Toml::file(&system_config));
        }

        let user_config = Self::recommended_path();
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }

        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            figment = figment.merge(Toml::file(&local_config));
        }

        let config = figment.merge(Self::env()).extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// # Errors
    ///
    /// Returns an error if the file contains invalid TOML or a value has the wrong
    /// type. A missing file yields the defaults.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let config = Self::defaults()?
            .merge(Toml::file(path.as_ref()))
            .merge(Self::env())
            .extract()?;
        Ok(config)
    }

    /// Recommended location of the user configuration file
    #[must_use]
    pub fn recommended_path() -> PathBuf {
        dirs::config_dir().map_or_else(
            || PathBuf::from(LOCAL_CONFIG),
            |config_dir| config_dir.join(APP_NAME).join("config.toml"),
        )
    }

    /// Strain definitions, falling back to the local default strain
    #[must_use]
    pub fn strain_configs(&self) -> Vec<StrainConfig> {
        if self.strains.is_empty() {
            vec![StrainConfig::local_default()]
        } else {
            self.strains.clone()
        }
    }

    fn defaults() -> anyhow::Result<Figment> {
        Ok(Figment::new().merge(Toml::string(&toml::to_string(&Self::default())?)))
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__").lowercase(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = SimulatorConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.project.build_dir, PathBuf::from(".hlx/build"));
        assert_eq!(config.project.strain_name, "default");
        assert_eq!(config.project.render_command, "node");
        assert_eq!(config.project.inner_cdn_domain, "hlx.page");
        assert!(config.strains.is_empty());
    }

    #[test]
    fn test_strain_configs_fall_back_to_local_default() {
        let strains = SimulatorConfig::default().strain_configs();
        assert_eq!(strains.len(), 1);
        assert_eq!(strains[0], StrainConfig::local_default());
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let config = SimulatorConfig::load_from("/nonexistent/helix-config.toml").unwrap();
        assert_eq!(config.project.render_command, "node");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"
[server]
port = 0

[project]
build_dir = "dist"

[project.params]
GITHUB_TOKEN = "secret"

[project.request_override.headers]
host = "www.project-helix.io"

[[local_repos]]
path = "../pages"
url = "https://github.com/adobe/helix-pages.git"

[[strains]]
name = "default"
content = "https://github.com/adobe/project-helix.io.git#main"

[[strains]]
name = "api"
origin = "https://www.adobe.io/api"
urls = ["http://localhost/api"]
"#,
        )
        .unwrap();

        let config = SimulatorConfig::load_from(file.path()).unwrap();
        assert_eq!(config.server.port, 0);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.project.build_dir, PathBuf::from("dist"));
        assert_eq!(config.project.params["GITHUB_TOKEN"], "secret");
        assert_eq!(
            config.project.request_override.headers["host"],
            "www.project-helix.io"
        );
        assert_eq!(config.local_repos[0].path, PathBuf::from("../pages"));
        assert_eq!(config.strains.len(), 2);
        assert_eq!(config.strains[1].origin.as_deref(), Some("https://www.adobe.io/api"));
        assert_eq!(config.strain_configs().len(), 2);
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[server]\nport = \"many\"\n").unwrap();
        assert!(SimulatorConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn test_recommended_path() {
        let path = SimulatorConfig::recommended_path();
        assert!(path.ends_with("config.toml"));
    }
}
