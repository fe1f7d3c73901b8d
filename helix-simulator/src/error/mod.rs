//! Error types and error handling
//!
//! Startup errors (`Config`, `RepoConflict`, `PortInUse`) abort initialisation.
//! Per-request errors (`NotFound`, `Upstream`) are turned into a response for that
//! request only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Simulator error type
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// Configuration error, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// A directory or repository is already registered with a different counterpart
    #[error("Server for {key} already registered for {path}")]
    RepoConflict {
        /// Repo-identity key of the rejected registration
        key: String,
        /// Directory that is already mapped
        path: String,
    },

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failure of a fetch, proxy or render target
    #[error("Upstream error: {reason}")]
    Upstream {
        /// Status surfaced to the client
        status: StatusCode,
        /// Failure reason
        reason: String,
    },

    /// A listener could not bind its port
    #[error("Port {0} already in use by another process.")]
    PortInUse(u16),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimulatorError {
    /// Upstream failure surfaced as 502 Bad Gateway
    pub fn bad_gateway(reason: impl Into<String>) -> Self {
        Self::Upstream {
            status: StatusCode::BAD_GATEWAY,
            reason: reason.into(),
        }
    }

    /// Upstream failure surfaced as 500 Internal Server Error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Upstream {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            reason: reason.into(),
        }
    }

    /// HTTP status this error is surfaced as
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for SimulatorError {
    fn from(err: reqwest::Error) -> Self {
        Self::bad_gateway(err.to_string())
    }
}

impl IntoResponse for SimulatorError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::NotFound(_) => status.into_response(),
            Self::Upstream { reason, .. } => (status, reason).into_response(),
            _ => status.into_response(),
        }
    }
}

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimulatorError>;
