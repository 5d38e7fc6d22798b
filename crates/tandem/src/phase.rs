//! Migration phase sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tandem_core::{
    clock::start_of_time,
    error::{Result, TandemError},
    traits::{MigrationPhase, MigrationPhaseSource},
};

/// The same phase at every instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedPhase(pub MigrationPhase);

impl MigrationPhaseSource for FixedPhase {
    fn phase_at(&self, _time: DateTime<Utc>) -> MigrationPhase {
        self.0
    }
}

/// One scheduled phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: DateTime<Utc>,
    pub phase: MigrationPhase,
}

/// Time-indexed migration phases.
///
/// The schedule starts at the start of time and every step must be a
/// transition the phase graph allows.
#[derive(Debug, Clone)]
pub struct MigrationSchedule {
    phases: BTreeMap<DateTime<Utc>, MigrationPhase>,
}

impl MigrationSchedule {
    pub fn new(transitions: impl IntoIterator<Item = PhaseTransition>) -> Result<Self> {
        let mut phases = BTreeMap::new();
        for t in transitions {
            if let Some(existing) = phases.insert(t.from, t.phase) {
                return Err(TandemError::Config(format!(
                    "duplicate migration transition at {}: {existing} and {}",
                    t.from, t.phase
                )));
            }
        }

        match phases.keys().next() {
            Some(first) if *first == start_of_time() => {}
            _ => {
                return Err(TandemError::Config(
                    "migration schedule must start at the start of time".to_string(),
                ))
            }
        }

        for ((_, from), (at, to)) in phases.iter().zip(phases.iter().skip(1)) {
            if !from.allowed_next().contains(to) {
                return Err(TandemError::Config(format!(
                    "invalid migration transition {from} -> {to} at {at}"
                )));
            }
        }
        Ok(Self { phases })
    }

    /// Schedule that stays in `phase` forever.
    pub fn constant(phase: MigrationPhase) -> Self {
        Self {
            phases: BTreeMap::from([(start_of_time(), phase)]),
        }
    }

    pub fn transitions(&self) -> Vec<PhaseTransition> {
        self.phases
            .iter()
            .map(|(from, phase)| PhaseTransition {
                from: *from,
                phase: *phase,
            })
            .collect()
    }
}

impl MigrationPhaseSource for MigrationSchedule {
    fn phase_at(&self, time: DateTime<Utc>) -> MigrationPhase {
        self.phases
            .range(..=time)
            .next_back()
            .map(|(_, phase)| *phase)
            .unwrap_or(MigrationPhase::DatastoreOnly)
    }
}
