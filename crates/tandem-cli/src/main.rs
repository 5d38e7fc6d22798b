//! Tandem CLI - operator commands for diff replay into a SQLite secondary store

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the exported diff files (overrides the config file)
    #[arg(long)]
    blob_dir: Option<PathBuf>,

    /// Path to the SQLite secondary store (overrides the config file)
    #[arg(long)]
    secondary: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending diff files to the secondary store
    Replay {
        /// Report the window the next run would replay without applying it
        #[arg(long)]
        dry_run: bool,
    },

    /// Secondary store, lock and replication lag
    Status,

    /// List diff files not yet applied
    Diffs {
        /// Show at most this many files
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = config::CliConfig::load(cli.config.as_deref())?
        .with_overrides(cli.blob_dir, cli.secondary);

    match cli.command {
        Commands::Replay { dry_run } => {
            commands::replay::execute(&config, dry_run).await?;
        }
        Commands::Status => {
            commands::status::execute(&config).await?;
        }
        Commands::Diffs { limit } => {
            commands::diffs::execute(&config, limit).await?;
        }
    }

    Ok(())
}
