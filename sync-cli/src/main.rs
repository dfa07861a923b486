//! # boxsync
//!
//! Command-line client for a boxsync relay.
//!
//! ## Commands
//!
//! - `init`: Save username and local directory
//! - `status`: Show saved settings and local files
//! - `run`: Connect to the relay and keep the directory in sync
//!
//! ## Example
//!
//! ```bash
//! # Pick a name and a directory to sync
//! boxsync init --name alice --dir ~/Box
//!
//! # Connect and sync until Ctrl-C (or `quit`)
//! boxsync run --relay 10.0.0.5:59090
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod console;

use commands::{init, run, status};

/// Command-line client for a boxsync relay.
#[derive(Parser, Debug)]
#[command(name = "boxsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for preferences and client.toml
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save username and local directory
    Init {
        /// Username announced to the relay
        #[arg(long, short)]
        name: String,

        /// Directory to keep in sync
        #[arg(long, short)]
        dir: PathBuf,

        /// Overwrite existing preferences
        #[arg(long)]
        force: bool,
    },

    /// Show saved settings and local files
    Status,

    /// Connect to the relay and sync until interrupted
    Run {
        /// Relay address (overrides client.toml)
        #[arg(long, short)]
        relay: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    match cli.command {
        Commands::Init { name, dir, force } => {
            init::run(&data_dir, &name, &dir, force).await?;
        }
        Commands::Status => {
            status::run(&data_dir).await?;
        }
        Commands::Run { relay } => {
            run::run(&data_dir, relay).await?;
        }
    }

    Ok(())
}

/// Get the default data directory for boxsync.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "boxsync", "boxsync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
