//! keel-engine - Migration engine for Keel
//!
//! This crate applies pending versions through a platform adapter: the
//! applied-versions ledger, bulk data import, and the orchestrator that
//! drives a run from bootstrap to the final ledger row.

pub mod error;
pub(crate) mod exec;
pub mod importer;
pub mod ledger;
pub mod orchestrator;
pub mod report;

pub use error::{EngineError, EngineResult};
pub use importer::BulkImporter;
pub use ledger::{LedgerRecord, NewLedgerEntry, RecordStatus, VersionLedger};
pub use orchestrator::{MigrationOrchestrator, RunPhase};
pub use report::{RunReport, SkippedScript, UnitReport};
