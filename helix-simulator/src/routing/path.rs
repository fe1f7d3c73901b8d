//! Decomposition of request URLs into routing coordinates

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::strain::Strain;

static REPEATED_SLASHES: Lazy<Regex> = Lazy::new(|| Regex::new("/{2,}").expect("valid regex"));

/// Path fields of a request, relative to the selected strain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPath {
    /// Request path as received, without query
    pub request_path: String,
    /// Request path, with directory index injected
    pub path: String,
    /// Query string without `?`
    pub query_string: String,
    /// Mount the strain is rooted at, empty for the root
    pub mount: String,
    /// `path` with the mount removed
    pub rel_path: String,
    /// Mount-relative path without selector and extension, below the content sub-path
    pub resource_path: String,
    /// Selector, empty if none
    pub selector: String,
    /// Extension, empty if none
    pub extension: String,
}

/// Splits request URLs into path, selector, extension and mount
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver;

impl PathResolver {
    /// Resolve `raw_url` for `strain`
    ///
    /// `explicit_mount` is the mount supplied by a matching strain condition and
    /// takes precedence over the strain's first URL prefix.
    #[must_use]
    pub fn resolve(raw_url: &str, strain: &Strain, explicit_mount: Option<&str>) -> ResolvedPath {
        let (request_path, query_string) = split_url(raw_url);

        let mut path = if request_path.ends_with('/') {
            REPEATED_SLASHES
                .replace_all(&format!("{request_path}{}", strain.directory_index), "/")
                .into_owned()
        } else {
            request_path.to_string()
        };
        if path.is_empty() {
            path.push('/');
        }

        let last_slash = path.rfind('/').unwrap_or(0);
        let (mut stem, extension) = match path.rfind('.') {
            Some(dot) if dot > last_slash => (&path[..dot], &path[dot + 1..]),
            _ => (path.as_str(), ""),
        };
        let mut selector = "";
        if let Some(dot) = stem.rfind('.').filter(|&dot| dot > last_slash) {
            selector = &stem[dot + 1..];
            stem = &stem[..dot];
        }

        let mount = explicit_mount
            .map(|m| m.trim_end_matches('/').to_string())
            .or_else(|| strain.url_mount())
            .unwrap_or_default();

        let (rel_path, mut resource_path) =
            if !mount.is_empty() && stem.starts_with(&format!("{mount}/")) {
                (path[mount.len()..].to_string(), stem[mount.len()..].to_string())
            } else {
                (path.clone(), stem.to_string())
            };

        let content_path = strain.content.path().trim_end_matches('/');
        if !content_path.is_empty() {
            resource_path = format!("{content_path}{resource_path}");
        }

        ResolvedPath {
            request_path: request_path.to_string(),
            query_string: query_string.to_string(),
            mount,
            rel_path,
            resource_path,
            selector: selector.to_string(),
            extension: extension.to_string(),
            path,
        }
    }
}

/// Split a request target into path and query, dropping any fragment
fn split_url(raw_url: &str) -> (&str, &str) {
    let raw_url = raw_url.split_once('#').map_or(raw_url, |(u, _)| u);
    let without_origin = match raw_url.find("://") {
        Some(i) if !raw_url.starts_with('/') => {
            let rest = &raw_url[i + 3..];
            rest.find(['/', '?']).map_or("/", |at| &rest[at..])
        }
        _ => raw_url,
    };
    let (path, query) = without_origin
        .split_once('?')
        .unwrap_or((without_origin, ""));
    (if path.is_empty() { "/" } else { path }, query)
}
