//! Strain data model
//!
//! [`StrainConfig`] is the declarative shape read from configuration; it is
//! converted into the immutable [`Strain`] the registry hands out.

use serde::{Deserialize, Serialize};
use url::Url;

use super::condition::Condition;
use crate::error::{Result, SimulatorError};
use crate::git::{GitReference, PartialGitReference};

/// Directory index used when a strain names none
pub const DEFAULT_DIRECTORY_INDEX: &str = "index.html";

/// Static sub-path used when a strain names none
pub const DEFAULT_STATIC_PATH: &str = "/htdocs";

/// Content location of the built-in default strain
pub const DEFAULT_CONTENT_URL: &str = "http://localhost/local/default.git";

/// Git location as written in configuration: a git URL or a partial table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GitLocation {
    /// `https://github.com/owner/repo.git#ref`
    Url(String),
    /// `{ host = "...", owner = "...", repo = "..." }`
    Parts(PartialGitReference),
}

impl GitLocation {
    fn to_reference(&self, defaults: &GitReference) -> Result<GitReference> {
        match self {
            Self::Url(url) => GitReference::parse(url),
            Self::Parts(parts) => Ok(GitReference::merged(parts, defaults)),
        }
    }
}

/// Static section of a strain as written in configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Static repository, defaults to the content repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<GitLocation>,
    /// Sub-path of static files inside the repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Strain as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrainConfig {
    /// Unique strain name
    pub name: String,
    /// Content repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<GitLocation>,
    /// Static repository and path
    #[serde(
        default,
        rename = "static",
        skip_serializing_if = "Option::is_none"
    )]
    pub static_content: Option<StaticConfig>,
    /// Document appended to directory requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_index: Option<String>,
    /// Declarative match condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// URL prefixes the strain is served under
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// Proxy origin; makes this a proxy strain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl StrainConfig {
    /// The built-in `default` strain serving the local working copy
    #[must_use]
    pub fn local_default() -> Self {
        Self {
            name: "default".to_string(),
            content: Some(GitLocation::Url(DEFAULT_CONTENT_URL.to_string())),
            static_content: None,
            directory_index: None,
            condition: None,
            urls: Vec::new(),
            origin: None,
        }
    }
}

/// Static content location of a strain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticContent {
    /// Static repository
    pub url: GitReference,
    /// Sub-path of static files inside the repository
    pub path: String,
}

/// Upstream origin of a proxy strain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOrigin {
    /// `http` or `https`
    pub scheme: String,
    /// Origin host name
    pub hostname: String,
    /// Origin port
    pub port: u16,
    /// Path prefix on the origin
    pub path: String,
}

impl ProxyOrigin {
    /// Parse an origin URL such as `https://www.adobe.io/api`
    ///
    /// # Errors
    ///
    /// [`SimulatorError::Config`] if `input` is not a URL with a host.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || SimulatorError::Config(format!("Invalid proxy origin: {input}"));
        let url = Url::parse(input).map_err(|_| invalid())?;
        let hostname = url.host_str().ok_or_else(invalid)?.to_string();
        let port = url.port_or_known_default().ok_or_else(invalid)?;
        Ok(Self {
            scheme: url.scheme().to_string(),
            hostname,
            port,
            path: url.path().to_string(),
        })
    }

    /// Whether the origin is reached over TLS
    #[must_use]
    pub fn use_ssl(&self) -> bool {
        self.scheme == "https"
    }

    /// Absolute URL of `path` on this origin
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        format!("{}://{}:{}{path}", self.scheme, self.hostname, self.port)
    }
}

/// A named routing rule binding requests to content sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strain {
    /// Unique name
    pub name: String,
    /// Content repository
    pub content: GitReference,
    /// Static repository and path
    pub static_content: StaticContent,
    /// Document appended to directory requests
    pub directory_index: String,
    /// Declarative match condition
    pub condition: Option<Condition>,
    /// URL prefixes, only the first one is used for matching
    pub urls: Vec<Url>,
    /// Proxy origin
    pub origin: Option<ProxyOrigin>,
}

impl Strain {
    /// Whether requests are proxied instead of resolved against git
    #[must_use]
    pub const fn is_proxy(&self) -> bool {
        self.origin.is_some()
    }

    /// Mount implied by the first URL prefix, without trailing slash
    #[must_use]
    pub fn url_mount(&self) -> Option<String> {
        self.urls.first().and_then(|url| {
            let mount = url.path().trim_end_matches('/');
            (!mount.is_empty()).then(|| mount.to_string())
        })
    }
}

impl TryFrom<StrainConfig> for Strain {
    type Error = SimulatorError;

    fn try_from(config: StrainConfig) -> Result<Self> {
        let content = match &config.content {
            Some(location) => location.to_reference(&GitReference::default())?,
            None if config.origin.is_some() => GitReference::default(),
            None => {
                return Err(SimulatorError::Config(format!(
                    "strain '{}' has no content location",
                    config.name
                )))
            }
        };

        let static_config = config.static_content.unwrap_or_default();
        let static_url = match &static_config.url {
            Some(location) => location.to_reference(&content)?,
            None => content.clone(),
        };
        let static_path = static_config
            .path
            .or_else(|| (!static_url.path().is_empty()).then(|| static_url.path().to_string()))
            .unwrap_or_else(|| DEFAULT_STATIC_PATH.to_string());

        let urls = config
            .urls
            .iter()
            .map(|u| {
                Url::parse(u).map_err(|_| {
                    SimulatorError::Config(format!("strain '{}': invalid url {u}", config.name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let origin = config.origin.as_deref().map(ProxyOrigin::parse).transpose()?;

        Ok(Self {
            name: config.name,
            content,
            static_content: StaticContent {
                url: static_url,
                path: static_path,
            },
            directory_index: config
                .directory_index
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_DIRECTORY_INDEX.to_string()),
            condition: config.condition,
            urls,
            origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> StrainConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_defaults() {
        let strain = Strain::try_from(parse(
            r#"
            name = "default"
            content = "https://github.com/adobe/project-helix.io.git"
            "#,
        ))
        .unwrap();
        assert_eq!(strain.directory_index, "index.html");
        assert_eq!(strain.static_content.url, strain.content);
        assert_eq!(strain.static_content.path, "/htdocs");
        assert!(!strain.is_proxy());
        assert_eq!(strain.url_mount(), None);
    }

    #[test]
    fn test_partial_tables() {
        let strain = Strain::try_from(parse(
            r#"
            name = "docs"
            content = { owner = "adobe", repo = "helix-home", ref = "develop", path = "/docs" }
            static = { url = { repo = "helix-static" }, path = "/dist" }
            urls = ["https://www.project-helix.io/docs/"]
            "#,
        ))
        .unwrap();
        assert_eq!(strain.content.host(), "github.com");
        assert_eq!(strain.content.git_ref(), "develop");
        assert_eq!(strain.content.path(), "/docs");
        assert_eq!(strain.static_content.url.owner(), "adobe");
        assert_eq!(strain.static_content.url.repo(), "helix-static");
        assert_eq!(strain.static_content.path, "/dist");
        assert_eq!(strain.url_mount().as_deref(), Some("/docs"));
    }

    #[test]
    fn test_static_path_from_url() {
        let strain = Strain::try_from(parse(
            r#"
            name = "assets"
            content = "https://github.com/adobe/foo.git"
            static = { url = "https://github.com/adobe/bar.git/public#v2" }
            "#,
        ))
        .unwrap();
        assert_eq!(strain.static_content.path, "/public");
        assert_eq!(strain.static_content.url.git_ref(), "v2");
    }

    #[test]
    fn test_proxy_strain() {
        let strain = Strain::try_from(parse(
            r#"
            name = "api"
            origin = "https://www.adobe.io/api"
            urls = ["http://localhost:3000/api"]
            "#,
        ))
        .unwrap();
        assert!(strain.is_proxy());
        let origin = strain.origin.unwrap();
        assert!(origin.use_ssl());
        assert_eq!(origin.port, 443);
        assert_eq!(origin.url_for("/api/x"), "https://www.adobe.io:443/api/x");
    }

    #[test]
    fn test_missing_content_is_config_error() {
        let result = Strain::try_from(parse(r#"name = "broken""#));
        assert!(matches!(result, Err(SimulatorError::Config(_))));
    }

    #[test]
    fn test_local_default() {
        let strain = Strain::try_from(StrainConfig::local_default()).unwrap();
        assert!(strain.content.is_local());
        assert_eq!(strain.name, "default");
    }
}
