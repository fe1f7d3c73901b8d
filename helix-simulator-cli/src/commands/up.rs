//! Simulator server command

use std::path::PathBuf;

use anyhow::{Context, Result};
use console::style;
use helix_simulator::{observability, project::Project};
use tracing::{info, warn};

use super::load_config;

/// Start the simulator and serve until interrupted
pub struct UpCommand {
    /// Configuration file
    pub config: Option<PathBuf>,
    /// Port override
    pub port: Option<u16>,
    /// Bind address override
    pub host: Option<String>,
    /// Project directory override
    pub cwd: Option<PathBuf>,
    /// Build directory override
    pub build_dir: Option<PathBuf>,
    /// Strain override
    pub strain: Option<String>,
    /// Render interpreter override
    pub render_command: Option<String>,
    /// Log level
    pub log_level: String,
}

impl UpCommand {
    /// Execute the command
    ///
    /// # Errors
    ///
    /// Returns an error if logging, configuration, project startup or shutdown fails.
    pub async fn execute(self) -> Result<()> {
        observability::init(&self.log_level).context("Failed to initialise logging")?;

        let mut config = load_config(self.config.as_deref())?;
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(cwd) = self.cwd {
            config.project.cwd = Some(cwd);
        }
        if let Some(build_dir) = self.build_dir {
            config.project.build_dir = build_dir;
        }
        if let Some(strain) = self.strain {
            config.project.strain_name = strain;
        }
        if let Some(render_command) = self.render_command {
            config.project.render_command = render_command;
        }
        let host = config.server.host.clone();

        let mut project = Project::builder(config)
            .init()
            .await
            .context("Failed to initialise project")?;
        let port = project.start().await.context("Failed to start simulator")?;

        println!(
            "{} {}",
            style("Simulator running at").green().bold(),
            style(format!("http://{host}:{port}/")).cyan()
        );
        println!(
            "  {} {}",
            style("strain:").dim(),
            style(&project.strain().name).bold()
        );
        println!(
            "  {} {}",
            style("content:").dim(),
            project.strain().content
        );
        println!("{}", style("Press Ctrl-C to stop.").dim());
        println!();

        wait_for_shutdown(&project).await?;

        project.stop().await.context("Failed to stop simulator")?;
        println!("{}", style("Simulator stopped.").green());
        Ok(())
    }
}

/// Wait for Ctrl-C, reloading render scripts on SIGHUP
#[cfg(unix)]
async fn wait_for_shutdown(project: &Project) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                return Ok(());
            }
            _ = hangup.recv() => match project.reload_scripts().await {
                Ok(count) => info!("reloaded {count} render scripts"),
                Err(e) => warn!("unable to reload render scripts: {e}"),
            },
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_project: &Project) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}
