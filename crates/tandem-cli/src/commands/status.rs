//! Status command implementation

use crate::config::CliConfig;
use anyhow::{Context, Result};
use tandem::format_time;
use tandem::prelude::*;

pub async fn execute(config: &CliConfig) -> Result<()> {
    tracing::info!(
        "Checking secondary store status: {}",
        config.secondary_path.display()
    );

    let secondary = config.open_secondary()?;

    println!("\nReplication Status");
    println!("{}", "=".repeat(60));
    println!("Secondary: {}", config.secondary_path.display());
    println!("Diff files: {}", config.blob_dir.display());

    let schema_version = secondary
        .schema_version()
        .context("Failed to get schema version")?;
    println!("Schema Version: {schema_version}");

    let entities = secondary
        .entity_count()
        .context("Failed to count entities")?;
    println!("Entities: {entities}");

    let cursor = secondary
        .get_cursor()
        .context("Failed to get replication cursor")?;
    println!("Replication Cursor: {}", format_time(cursor));

    let now = SystemClock.now();
    let phase = config.schedule()?.phase_at(now);
    println!("\nMigration Phase: {phase}");
    if !phase.replicates_to_secondary() {
        println!("  Replay is inactive in this phase");
    }

    let lock = secondary
        .lock_store()
        .load(&config.replay.lock_resource, &config.replay.lock_scope)
        .context("Failed to read replay lock")?;
    match lock {
        Some(row) if row.expiration_time > now => println!(
            "Replay Lock: held by {} until {}",
            row.holder_id,
            format_time(row.expiration_time)
        ),
        Some(row) => println!("Replay Lock: expired (last holder {})", row.holder_id),
        None => println!("Replay Lock: free"),
    }

    let pending = config
        .engine()?
        .pending()
        .await
        .context("Failed to list diff files")?;
    if pending.is_empty() {
        println!("\n✓ Secondary store is up to date");
    } else {
        println!("\n⚠️  Replication lag: {} diff file(s) behind", pending.len());
        println!("Run 'tandem replay' to catch up");
    }

    Ok(())
}
