//! CLI configuration file

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tandem::prelude::*;
use tandem::PhaseTransition;

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    /// Directory holding the exported diff files
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,

    /// Path to the SQLite secondary store
    #[serde(default = "default_secondary_path")]
    pub secondary_path: PathBuf,

    #[serde(default)]
    pub replay: ReplayConfig,

    /// Migration phase schedule; replay runs as if the secondary is always
    /// fed when empty.
    #[serde(default)]
    pub phases: Vec<PhaseTransition>,
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("./data/diffs")
}

fn default_secondary_path() -> PathBuf {
    PathBuf::from("./data/secondary.db")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            blob_dir: default_blob_dir(),
            secondary_path: default_secondary_path(),
            replay: ReplayConfig::default(),
            phases: Vec::new(),
        }
    }
}

impl CliConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn with_overrides(mut self, blob_dir: Option<PathBuf>, secondary: Option<PathBuf>) -> Self {
        if let Some(dir) = blob_dir {
            self.blob_dir = dir;
        }
        if let Some(path) = secondary {
            self.secondary_path = path;
        }
        self
    }

    pub fn open_secondary(&self) -> Result<Arc<SqliteSecondaryStore>> {
        let store = SqliteSecondaryStore::open(SqliteConfig::new(&self.secondary_path))
            .with_context(|| {
                format!(
                    "Failed to open secondary store {}",
                    self.secondary_path.display()
                )
            })?;
        Ok(Arc::new(store))
    }

    pub fn schedule(&self) -> Result<MigrationSchedule> {
        if self.phases.is_empty() {
            return Ok(MigrationSchedule::constant(MigrationPhase::DatastorePrimary));
        }
        MigrationSchedule::new(self.phases.clone()).context("Invalid migration phase schedule")
    }

    /// Replay engine over the configured blob directory and secondary store.
    pub fn engine(&self) -> Result<ReplayEngine<SqliteSecondaryStore>> {
        let secondary = self.open_secondary()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let locks = LockService::new(Arc::new(secondary.lock_store()), clock.clone());
        let engine = ReplayEngine::new(
            secondary,
            Arc::new(LocalBlobStore::new(&self.blob_dir)),
            locks,
            Arc::new(ProcessLivenessChecker::from_env()),
            Arc::new(self.schedule()?),
            clock,
            self.replay.clone(),
        )
        .context("Invalid replay configuration")?;
        Ok(engine)
    }
}
