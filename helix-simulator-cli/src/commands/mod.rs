//! CLI command implementations

pub mod strains;
pub mod up;

pub use strains::StrainsCommand;
pub use up::UpCommand;

use std::path::Path;

use anyhow::{Context, Result};
use helix_simulator::config::SimulatorConfig;

/// Load the configuration from `path`, or from the standard locations
///
/// # Errors
///
/// Returns an error if a configuration source cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> Result<SimulatorConfig> {
    match path {
        Some(path) => SimulatorConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => SimulatorConfig::load().context("Failed to load configuration"),
    }
}
