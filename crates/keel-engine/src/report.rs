//! What a run did

use crate::ledger::RecordStatus;
use chrono::{DateTime, Utc};
use keel_core::Version;
use uuid::Uuid;

/// A script whose failure was tolerated under continue-after-failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedScript {
    pub unit: String,
    pub script: String,
    /// Zero-based index of the batch that failed
    pub batch: usize,
    pub error: String,
}

/// One unit that ran to completion.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub label: String,
    /// `None` for lifecycle units, which are not recorded
    pub version: Option<Version>,
    pub status: RecordStatus,
    pub scripts_run: usize,
    pub batches_run: usize,
    pub rows_imported: u64,
    pub skipped: Vec<SkippedScript>,
}

/// Summary returned by a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub platform: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Ledger version before the run
    pub previous_version: Version,
    /// Ledger version after the run
    pub current_version: Version,
    pub units: Vec<UnitReport>,
}

impl RunReport {
    /// Versions recorded by this run, in order.
    pub fn applied_versions(&self) -> Vec<&Version> {
        self.units.iter().filter_map(|u| u.version.as_ref()).collect()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &SkippedScript> {
        self.units.iter().flat_map(|u| u.skipped.iter())
    }

    /// Whether any recorded version is marked partial.
    pub fn is_partial(&self) -> bool {
        self.units
            .iter()
            .any(|u| u.version.is_some() && u.status == RecordStatus::Partial)
    }

    /// True when nothing was pending.
    pub fn is_noop(&self) -> bool {
        self.units.is_empty()
    }
}
