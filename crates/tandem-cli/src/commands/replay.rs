//! Replay command implementation

use crate::config::CliConfig;
use anyhow::{Context, Result};
use tandem::prelude::*;

pub async fn execute(config: &CliConfig, dry_run: bool) -> Result<()> {
    tracing::info!(
        blob_dir = %config.blob_dir.display(),
        secondary = %config.secondary_path.display(),
        dry_run,
        "Replaying diff files"
    );

    let engine = config.engine()?;
    let outcome = engine.run(dry_run).await.context("Replay failed")?;
    println!("{outcome}");

    if let ReplayOutcome::TimedOut(_) = outcome {
        println!("Run 'tandem replay' again to continue");
    }
    Ok(())
}
