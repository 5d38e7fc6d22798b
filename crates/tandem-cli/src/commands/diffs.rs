//! Diffs command implementation

use crate::config::CliConfig;
use anyhow::{Context, Result};
use tandem::format_time;

pub async fn execute(config: &CliConfig, limit: usize) -> Result<()> {
    let engine = config.engine()?;
    let pending = engine
        .pending()
        .await
        .context("Failed to list diff files")?;

    if pending.is_empty() {
        println!("No pending diff files in {}", config.blob_dir.display());
        return Ok(());
    }

    println!("{:<45} {:<26} {:<26}", "FILE", "LOWER", "UPPER");
    for file in pending.iter().take(limit) {
        println!(
            "{:<45} {:<26} {:<26}",
            file.name.to_string(),
            format_time(file.lower),
            format_time(file.upper())
        );
    }
    if pending.len() > limit {
        println!("... and {} more", pending.len() - limit);
    }
    Ok(())
}
