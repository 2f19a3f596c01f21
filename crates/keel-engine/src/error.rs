//! Error types for keel-engine

use keel_core::CoreError;
use keel_db::DbError;
use keel_plugin::PluginError;
use thiserror::Error;

/// Migration engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Validation, config or filesystem error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Connection or transaction error outside script execution
    #[error(transparent)]
    Db(#[from] DbError),

    /// Adapter could not be obtained
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// A statement batch failed (X001)
    #[error("[X001] {unit}/{script} batch {batch} failed: {source}")]
    Execution {
        unit: String,
        script: String,
        batch: usize,
        source: DbError,
    },

    /// Data file rows could not be loaded (X002)
    ///
    /// Rows count from 1 after the header; 0 means the header or the file
    /// itself. When a multi-row INSERT fails the database does not say
    /// which row was bad, so the whole batch's range is reported.
    #[error("[X002] Bulk import of {file} failed at {}: {cause}", row_span(.first_row, .last_row))]
    BulkImport {
        file: String,
        first_row: u64,
        last_row: u64,
        cause: String,
    },

    /// Ledger unreadable or unwritable (X003)
    #[error("[X003] Version ledger error: {0}")]
    Ledger(String),

    /// Target database is missing and auto-create is off (X004)
    #[error("[X004] Database '{database}' does not exist; enable auto-create to create it")]
    DatabaseNotFound { database: String },

    /// Cancellation was requested (X005)
    #[error("[X005] Run cancelled before {next}")]
    Cancelled { next: String },

    /// The run stopped part-way; everything up to `last_applied` is in the ledger (X006)
    #[error("[X006] Run aborted, last applied version {last_applied}: {source}")]
    Aborted {
        last_applied: String,
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// True when the run stopped because of input validation, before any
    /// script reached the database.
    pub fn is_validation(&self) -> bool {
        match self {
            EngineError::Core(e) => e.is_validation(),
            EngineError::Aborted { source, .. } => source.is_validation(),
            _ => false,
        }
    }
}

/// Result type alias for EngineError
pub type EngineResult<T> = Result<T, EngineError>;

fn row_span(first: &u64, last: &u64) -> String {
    match (*first, *last) {
        (0, _) => "header".to_string(),
        (first, last) if first == last => format!("row {}", first),
        (first, last) => format!("rows {}..{}", first, last),
    }
}
