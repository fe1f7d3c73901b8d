//! Strain registry and selection
//!
//! Selection precedence, first match wins:
//!
//! 1. override cookie (`X-Strain`) or query parameter (`x-strain`) naming a known strain
//! 2. declarative conditions, in registration order
//! 3. URL prefixes, in registration order
//! 4. the `default` strain

use std::sync::Arc;

use http::{header::COOKIE, HeaderMap};
use parking_lot::RwLock;
use tracing::debug;

use super::condition::{host_name, is_path_prefix, ConditionInput};
use super::model::{Strain, StrainConfig};
use crate::error::{Result, SimulatorError};

/// Name of the strain used when nothing else matches
pub const DEFAULT_STRAIN: &str = "default";

/// Cookie that forces a strain
pub const STRAIN_COOKIE: &str = "X-Strain";

/// Query parameter that forces a strain
pub const STRAIN_PARAM: &str = "x-strain";

/// Request attributes relevant for strain selection
#[derive(Debug, Clone, Default)]
pub struct StrainRequest {
    /// Host header value
    pub host: String,
    /// Path without query
    pub path: String,
    /// Raw query string, without `?`
    pub query: String,
    /// Request headers
    pub headers: HeaderMap,
}

impl StrainRequest {
    /// Build from a path-and-query string and request headers
    #[must_use]
    pub fn new(path_and_query: &str, headers: &HeaderMap) -> Self {
        let (path, query) = path_and_query
            .split_once('?')
            .unwrap_or((path_and_query, ""));
        let host = headers
            .get(http::header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Self {
            host,
            path: if path.is_empty() { "/" } else { path }.to_string(),
            query: query.to_string(),
            headers: headers.clone(),
        }
    }

    /// Strain named by the override cookie or query parameter
    fn override_name(&self) -> Option<String> {
        let from_cookie = self
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == STRAIN_COOKIE)
            .map(|(_, value)| value.trim().to_string());

        from_cookie.or_else(|| {
            url::form_urlencoded::parse(self.query.as_bytes())
                .find(|(name, _)| name == STRAIN_PARAM)
                .map(|(_, value)| value.into_owned())
        })
    }
}

/// Result of strain selection
#[derive(Debug, Clone)]
pub struct Selection {
    /// Selected strain
    pub strain: Arc<Strain>,
    /// Mount supplied by a matching condition
    pub mount: Option<String>,
}

impl Selection {
    fn of(strain: &Arc<Strain>) -> Self {
        Self {
            strain: Arc::clone(strain),
            mount: None,
        }
    }
}

#[derive(Debug)]
struct Strains {
    ordered: Vec<Arc<Strain>>,
    default: Arc<Strain>,
}

/// Ordered set of strains with a mandatory `default`
#[derive(Debug)]
pub struct StrainRegistry {
    strains: RwLock<Strains>,
}

impl StrainRegistry {
    /// Create a registry
    ///
    /// # Errors
    ///
    /// [`SimulatorError::Config`] if no `default` strain is present or a name is
    /// used twice.
    pub fn new(strains: Vec<Strain>) -> Result<Self> {
        for (i, strain) in strains.iter().enumerate() {
            if strains[..i].iter().any(|s| s.name == strain.name) {
                return Err(SimulatorError::Config(format!(
                    "strain '{}' is defined more than once",
                    strain.name
                )));
            }
        }
        let ordered: Vec<Arc<Strain>> = strains.into_iter().map(Arc::new).collect();
        let default = ordered
            .iter()
            .find(|s| s.name == DEFAULT_STRAIN)
            .cloned()
            .ok_or_else(|| SimulatorError::Config("no 'default' strain configured".to_string()))?;
        Ok(Self {
            strains: RwLock::new(Strains { ordered, default }),
        })
    }

    /// Create a registry from configuration
    ///
    /// # Errors
    ///
    /// [`SimulatorError::Config`] for an invalid strain or an invalid set of strains.
    pub fn from_config(configs: Vec<StrainConfig>) -> Result<Self> {
        let strains = configs
            .into_iter()
            .map(Strain::try_from)
            .collect::<Result<Vec<_>>>()?;
        Self::new(strains)
    }

    /// Strain by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Strain>> {
        self.strains
            .read()
            .ordered
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    /// All strains in registration order
    #[must_use]
    pub fn strains(&self) -> Vec<Arc<Strain>> {
        self.strains.read().ordered.clone()
    }

    /// The `default` strain
    #[must_use]
    pub fn default_strain(&self) -> Arc<Strain> {
        Arc::clone(&self.strains.read().default)
    }

    /// Replace the strain with the same name, or append it
    ///
    /// Used for developer overrides during a session.
    pub fn upsert(&self, strain: Strain) {
        let mut strains = self.strains.write();
        let strain = Arc::new(strain);
        if strain.name == DEFAULT_STRAIN {
            strains.default = Arc::clone(&strain);
        }
        match strains.ordered.iter_mut().find(|s| s.name == strain.name) {
            Some(slot) => *slot = strain,
            None => strains.ordered.push(strain),
        }
    }

    /// Select the strain for a request
    #[must_use]
    pub fn select(&self, request: &StrainRequest) -> Selection {
        let strains = self.strains.read();

        if let Some(name) = request.override_name() {
            if let Some(strain) = strains.ordered.iter().find(|s| s.name == name) {
                debug!(strain = %name, "strain selected by override");
                return Selection::of(strain);
            }
        }

        let input = ConditionInput {
            host: &request.host,
            path: &request.path,
            headers: &request.headers,
        };
        for strain in &strains.ordered {
            if let Some(matched) = strain.condition.as_ref().and_then(|c| c.evaluate(&input)) {
                debug!(strain = %strain.name, "strain selected by condition");
                return Selection {
                    strain: Arc::clone(strain),
                    mount: matched.mount,
                };
            }
        }

        let request_host = host_name(&request.host);
        for strain in &strains.ordered {
            let Some(url) = strain.urls.first() else {
                continue;
            };
            let host_matches = match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => request.host == format!("{host}:{port}"),
                (Some(host), None) => request_host == host,
                (None, _) => false,
            };
            if host_matches && is_path_prefix(url.path(), &request.path) {
                debug!(strain = %strain.name, "strain selected by url");
                return Selection::of(strain);
            }
        }

        Selection::of(&strains.default)
    }
}
