//! Git-hosted content references
//!
//! A [`GitReference`] names a location inside a git repository hosted by a
//! github-like provider: `host`, `owner`, `repo`, `ref` and a sub-`path`. The raw and
//! api endpoints are derived from the host and never stored.
//!
//! # Example
//!
//! ```rust
//! use helix_simulator::git::GitReference;
//!
//! let reference: GitReference = "https://github.com/adobe/foo.git".parse().unwrap();
//! assert_eq!(reference.git_ref(), "master");
//! assert_eq!(reference.raw(), "https://raw.github.com/adobe/foo/master");
//! ```

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SimulatorError};

/// Ref used when none is given
pub const DEFAULT_REF: &str = "master";

/// Host that marks a reference as served from the developer's working copy
pub const LOCAL_HOST: &str = "localhost";

const DEFAULT_HOST: &str = "github.com";
const DEFAULT_SCHEME: &str = "https";
const RAW_TYPE: &str = "raw";
const API_TYPE: &str = "api";

/// Immutable reference to a location in a git repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "PartialGitReference")]
pub struct GitReference {
    #[serde(rename = "protocol")]
    scheme: String,
    host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    owner: String,
    repo: String,
    #[serde(rename = "ref")]
    git_ref: String,
    path: String,
}

/// Partial reference as found in configuration files
///
/// Missing fields are taken from the defaults passed to [`GitReference::merged`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialGitReference {
    /// URL scheme, `https` unless given
    pub protocol: Option<String>,
    /// Provider host
    pub host: Option<String>,
    /// Provider port
    pub port: Option<u16>,
    /// Repository owner
    pub owner: Option<String>,
    /// Repository name
    pub repo: Option<String>,
    /// Branch or tag
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    /// Sub-path inside the repository
    pub path: Option<String>,
}

impl From<PartialGitReference> for GitReference {
    fn from(partial: PartialGitReference) -> Self {
        Self::merged(&partial, &Self::default())
    }
}

impl Default for GitReference {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: None,
            owner: String::new(),
            repo: String::new(),
            git_ref: DEFAULT_REF.to_string(),
            path: String::new(),
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<&String> {
    value.filter(|v| !v.is_empty())
}

impl GitReference {
    /// Create a reference from its parts
    pub fn new(
        host: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        git_ref: Option<&str>,
    ) -> Self {
        Self {
            host: host.into(),
            owner: owner.into(),
            repo: repo.into(),
            git_ref: git_ref
                .filter(|r| !r.is_empty())
                .unwrap_or(DEFAULT_REF)
                .to_string(),
            ..Self::default()
        }
    }

    /// Merge a partial descriptor with defaults
    #[must_use]
    pub fn merged(partial: &PartialGitReference, defaults: &Self) -> Self {
        Self {
            scheme: non_empty(partial.protocol.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.scheme.clone()),
            host: non_empty(partial.host.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.host.clone()),
            port: partial.port.or(defaults.port),
            owner: non_empty(partial.owner.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.owner.clone()),
            repo: non_empty(partial.repo.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.repo.clone()),
            git_ref: non_empty(partial.git_ref.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.git_ref.clone()),
            path: partial
                .path
                .clone()
                .unwrap_or_else(|| defaults.path.clone()),
        }
    }

    /// Parse a git URL
    ///
    /// Accepts `scheme://host[:port]/owner/repo[.git][/sub/path][#ref]` and the
    /// scp-like `user@host:owner/repo.git[#ref]`.
    ///
    /// # Errors
    ///
    /// [`SimulatorError::Config`] if `input` is not a git URL.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || SimulatorError::Config(format!("Invalid git url: {input}"));

        let (location, fragment) = match input.split_once('#') {
            Some((location, fragment)) => (location, Some(fragment)),
            None => (input, None),
        };

        let (scheme, host, port, repo_path) = if location.contains("://") {
            let url = Url::parse(location).map_err(|_| invalid())?;
            let host = url.host_str().ok_or_else(invalid)?.to_string();
            let scheme = match url.scheme() {
                "http" => "http",
                _ => DEFAULT_SCHEME,
            };
            (scheme, host, url.port(), url.path().to_string())
        } else {
            // scp-like syntax: git@github.com:owner/repo.git
            let (authority, path) = location.split_once(':').ok_or_else(invalid)?;
            let host = authority.rsplit('@').next().ok_or_else(invalid)?;
            (DEFAULT_SCHEME, host.to_string(), None, format!("/{path}"))
        };

        let mut segments = repo_path.split('/').filter(|s| !s.is_empty());
        let owner = segments.next().ok_or_else(invalid)?.to_string();
        let repo = segments
            .next()
            .map(|r| r.trim_end_matches(".git").to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(invalid)?;
        let rest: Vec<&str> = segments.collect();
        let path = if rest.is_empty() {
            String::new()
        } else {
            format!("/{}", rest.join("/"))
        };

        Ok(Self {
            scheme: scheme.to_string(),
            host,
            port,
            owner,
            repo,
            git_ref: fragment
                .filter(|f| !f.is_empty())
                .unwrap_or(DEFAULT_REF)
                .to_string(),
            path,
        })
    }

    /// URL scheme used for the derived endpoints
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Provider host, e.g. `github.com`
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Provider port, if not the scheme default
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Repository owner
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Branch or tag, `master` unless given
    #[must_use]
    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }

    /// Sub-path inside the repository, empty for the repository root
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this reference points at the developer's working copy
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.host == LOCAL_HOST
    }

    /// Key identifying the repository regardless of ref and path
    #[must_use]
    pub fn repo_key(&self) -> String {
        format!("{}--{}--{}", self.host, self.owner, self.repo)
    }

    /// Copy of this reference with another sub-path
    #[must_use]
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    /// Emulated reference served over plain http from `host:port`
    #[must_use]
    pub fn emulated(host: &str, port: u16, owner: &str, repo: &str, git_ref: &str) -> Self {
        Self {
            scheme: "http".to_string(),
            host: host.to_string(),
            port: Some(port),
            owner: owner.to_string(),
            repo: repo.to_string(),
            git_ref: git_ref.to_string(),
            path: String::new(),
        }
    }

    fn endpoint_root(&self, kind: &str) -> String {
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
        if self.host.parse::<Ipv4Addr>().is_ok() {
            format!("{}://{}{port}/{kind}", self.scheme, self.host)
        } else {
            format!("{}://{kind}.{}{port}", self.scheme, self.host)
        }
    }

    /// Root of the raw endpoint, e.g. `https://raw.github.com`
    ///
    /// For an IP host the form is `http://127.0.0.1:1234/raw`.
    #[must_use]
    pub fn raw_root(&self) -> String {
        self.endpoint_root(RAW_TYPE)
    }

    /// Root of the api endpoint, e.g. `https://api.github.com`
    #[must_use]
    pub fn api_root(&self) -> String {
        self.endpoint_root(API_TYPE)
    }

    /// Raw URL of the repository at its ref, e.g. `https://raw.github.com/owner/repo/master`
    #[must_use]
    pub fn raw(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.raw_root(),
            self.owner,
            self.repo,
            self.git_ref
        )
    }

    /// Serialize to a JSON value
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize from a JSON value
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not a serialized reference.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

impl FromStr for GitReference {
    type Err = SimulatorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for GitReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, "/{}/{}.git", self.owner, self.repo)?;
        if !self.path.is_empty() {
            write!(f, "{}", self.path)?;
        }
        write!(f, "#{}", self.git_ref)
    }
}
