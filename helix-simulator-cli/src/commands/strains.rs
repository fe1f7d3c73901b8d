//! Strain listing command

use std::path::PathBuf;

use anyhow::{Context, Result};
use console::style;
use helix_simulator::strain::StrainRegistry;

use super::load_config;

/// Print the configured strains in selection order
pub struct StrainsCommand {
    config: Option<PathBuf>,
}

impl StrainsCommand {
    /// Create a new command instance
    pub const fn new(config: Option<PathBuf>) -> Self {
        Self { config }
    }

    /// Execute the command
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded.
    pub fn execute(&self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let registry = StrainRegistry::from_config(config.strain_configs())
            .context("Invalid strain configuration")?;

        for strain in registry.strains() {
            println!("{}", style(&strain.name).bold());
            match &strain.origin {
                Some(origin) => println!(
                    "  {} {}",
                    style("proxy:").dim(),
                    origin.url_for(&origin.path)
                ),
                None => {
                    println!("  {} {}", style("content:").dim(), strain.content);
                    println!(
                        "  {} {}{}",
                        style("static:").dim(),
                        strain.static_content.url,
                        strain.static_content.path
                    );
                }
            }
            if let Some(url) = strain.urls.first() {
                println!("  {} {url}", style("url:").dim());
            }
            if strain.condition.is_some() {
                println!("  {} yes", style("condition:").dim());
            }
        }
        Ok(())
    }
}
