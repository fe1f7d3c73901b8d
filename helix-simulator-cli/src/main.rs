//! hlx-sim: run the helix simulator against a local project

#![forbid(unsafe_code)]

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{StrainsCommand, UpCommand};

#[derive(Parser)]
#[command(name = "hlx-sim")]
#[command(version)]
#[command(about = "Local simulator for a git-backed CDN", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the simulator and serve until Ctrl-C
    Up {
        /// Port to listen on, 0 picks a free one
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind
        #[arg(long)]
        host: Option<String>,
        /// Project directory
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Directory with the built render scripts
        #[arg(long)]
        build_dir: Option<PathBuf>,
        /// Strain whose content decides local emulation
        #[arg(short, long)]
        strain: Option<String>,
        /// Interpreter for render scripts
        #[arg(long)]
        render_command: Option<String>,
        /// Log level of the simulator
        #[arg(long, default_value = "info")]
        log_level: String,
    },
    /// List the configured strains
    Strains,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Up {
            port,
            host,
            cwd,
            build_dir,
            strain,
            render_command,
            log_level,
        } => {
            let cmd = UpCommand {
                config: cli.config,
                port,
                host,
                cwd,
                build_dir,
                strain,
                render_command,
                log_level,
            };
            cmd.execute().await?;
        }
        Commands::Strains => {
            StrainsCommand::new(cli.config).execute()?;
        }
    }

    Ok(())
}
