//! Declarative strain conditions
//!
//! Conditions are written as single-key tables in the strain configuration:
//!
//! ```toml
//! [[strains]]
//! name = "website"
//! condition = { host = "project-helix.io" }
//!
//! [[strains]]
//! name = "docs"
//! condition = { all = [{ host = "www.project-helix.io" }, { path_prefix = "/docs" }] }
//! ```
//!
//! `url` and `path_prefix` conditions also name the mount of the strain when they
//! match.

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use url::Url;

/// Request attributes conditions are evaluated against
#[derive(Debug, Clone, Copy)]
pub struct ConditionInput<'a> {
    /// Host header value, possibly with port
    pub host: &'a str,
    /// Request path without query
    pub path: &'a str,
    /// Request headers
    pub headers: &'a HeaderMap,
}

/// Outcome of a successful condition evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionMatch {
    /// Mount supplied by the condition, if any
    pub mount: Option<String>,
}

/// Declarative predicate over host, path and headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Every nested condition holds
    All(Vec<Condition>),
    /// At least one nested condition holds
    Any(Vec<Condition>),
    /// The nested condition does not hold
    Not(Box<Condition>),
    /// Host name equals (port ignored)
    Host(String),
    /// Request path starts with this prefix, at a segment boundary
    PathPrefix(String),
    /// Host matches and the path starts with the URL's path
    Url(String),
    /// Header equals value (name is case-insensitive)
    Header {
        /// Header name
        name: String,
        /// Expected value
        value: String,
    },
}

/// Host name without port
pub(crate) fn host_name(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split_once(']').map_or(host, |(h, _)| &h[1..]);
    }
    host.split(':').next().unwrap_or(host)
}

/// Ensure a path ends with a slash
pub(crate) fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Whether `path` lies below `prefix`, comparing at segment boundaries
pub(crate) fn is_path_prefix(prefix: &str, path: &str) -> bool {
    with_trailing_slash(path).starts_with(&with_trailing_slash(prefix))
}

fn mount_of(prefix: &str) -> Option<String> {
    let mount = prefix.trim_end_matches('/');
    (!mount.is_empty()).then(|| mount.to_string())
}

impl Condition {
    /// Evaluate against a request, returning the match if the condition holds
    #[must_use]
    pub fn evaluate(&self, input: &ConditionInput<'_>) -> Option<ConditionMatch> {
        match self {
            Self::All(conditions) => {
                let mut matched = ConditionMatch::default();
                for condition in conditions {
                    let m = condition.evaluate(input)?;
                    if matched.mount.is_none() {
                        matched.mount = m.mount;
                    }
                }
                Some(matched)
            }
            Self::Any(conditions) => conditions.iter().find_map(|c| c.evaluate(input)),
            Self::Not(condition) => condition
                .evaluate(input)
                .is_none()
                .then(ConditionMatch::default),
            Self::Host(expected) => host_name(input.host)
                .eq_ignore_ascii_case(expected)
                .then(ConditionMatch::default),
            Self::PathPrefix(prefix) => {
                is_path_prefix(prefix, input.path).then(|| ConditionMatch {
                    mount: mount_of(prefix),
                })
            }
            Self::Url(url) => {
                let url = Url::parse(url).ok()?;
                let expected_host = url.host_str()?;
                let host_matches = match url.port() {
                    Some(port) => input
                        .host
                        .eq_ignore_ascii_case(&format!("{expected_host}:{port}")),
                    None => host_name(input.host).eq_ignore_ascii_case(expected_host),
                };
                (host_matches && is_path_prefix(url.path(), input.path)).then(|| ConditionMatch {
                    mount: mount_of(url.path()),
                })
            }
            Self::Header { name, value } => input
                .headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == value)
                .then(ConditionMatch::default),
        }
    }
}
