//! Error types for keel-plugin

use keel_db::DbError;
use thiserror::Error;

/// Plugin loading errors
#[derive(Error, Debug)]
pub enum PluginError {
    /// No built-in adapter or plugin registers this platform (P001)
    #[error("[P001] Unknown platform '{platform}'. Available: {available}")]
    UnknownPlatform { platform: String, available: String },

    /// Plugin directory for the platform does not exist (P002)
    #[error("[P002] Plugin directory not found: {path}")]
    PluginDirNotFound { path: String },

    /// Dynamic library could not be opened (P003)
    #[error("[P003] Failed to load library {path}: {reason}")]
    LibraryLoad { path: String, reason: String },

    /// Plugin library does not export the declaration symbol (P004)
    #[error("[P004] Library {path} does not export '{symbol}'")]
    SymbolMissing { path: String, symbol: String },

    /// Plugin was built against an incompatible host (P005)
    #[error("[P005] Plugin '{plugin}' requires {what} {found}, host provides {expected}")]
    AbiMismatch {
        plugin: String,
        what: &'static str,
        expected: String,
        found: String,
    },

    /// Dependency found neither in the shared registry nor in the manifest (P006)
    #[error("[P006] Plugin '{plugin}' dependency {dependency} could not be resolved: {root_cause}")]
    DependencyUnresolved {
        plugin: String,
        dependency: String,
        root_cause: String,
    },

    /// Native library listed in the manifest failed to load (P007)
    #[error("[P007] Plugin '{plugin}' native library '{name}' failed to load: {reason}")]
    NativeLibrary {
        plugin: String,
        name: String,
        reason: String,
    },

    /// Adapter factory rejected its connection string (P008)
    #[error("[P008] Adapter construction failed: {0}")]
    Adapter(#[from] DbError),

    /// Registry lock poisoned (P009)
    #[error("[P009] Plugin registry lock poisoned: {0}")]
    Poisoned(String),
}

/// Result type alias for PluginError
pub type PluginResult<T> = Result<T, PluginError>;
