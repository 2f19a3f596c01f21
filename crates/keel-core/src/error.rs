//! Error types for keel-core

use thiserror::Error;

/// Core error type for Keel.
///
/// Everything in the `V0xx` range is a validation failure: it is always
/// raised before any script reaches the database.
#[derive(Error, Debug)]
pub enum CoreError {
    /// V001: A version label could not be parsed
    #[error("[V001] Invalid version label '{label}': expected v<major>.<minor>[.<patch>[.<revision>]]")]
    InvalidVersion { label: String },

    /// V002: Two version directories resolve to the same version
    #[error("[V002] Duplicate version {version}: directories '{first}' and '{second}'")]
    DuplicateVersion {
        version: String,
        first: String,
        second: String,
    },

    /// V003: Requested target is below what the ledger already holds
    #[error("[V003] Target version {target} is lower than the applied version {applied}; downgrades are not supported")]
    TargetBelowApplied { target: String, applied: String },

    /// V004: Strict token replacement found placeholders with no value
    #[error("[V004] Unresolved token(s) in {context}: {tokens}")]
    UnresolvedTokens { context: String, tokens: String },

    /// V005: The same token key was supplied more than once
    #[error("[V005] Duplicate token key '{key}'")]
    DuplicateToken { key: String },

    /// V006: Token was not in KEY=VALUE form
    #[error("[V006] Invalid token '{raw}': expected KEY=VALUE")]
    InvalidToken { raw: String },

    /// V007: Database, schema or table name is not a plain identifier
    #[error("[V007] Invalid {kind} name '{name}': only letters, digits, '_' and '$' are allowed")]
    InvalidIdentifier { kind: &'static str, name: String },

    /// V008: Script root does not exist
    #[error("[V008] Workspace directory not found: {path}")]
    WorkspaceNotFound { path: String },

    /// V009: Name used only inside quotes or string literals is unsafe there
    #[error("[V009] Invalid {kind} name '{name}': quotes, ';', '${{' and control characters are not allowed")]
    InvalidQuotedName { kind: &'static str, name: String },

    /// C001: Config file not found
    #[error("[C001] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// C002: Invalid configuration value
    #[error("[C002] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// C003: YAML parse error
    #[error("[C003] Config parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// IO error
    #[error("[E001] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error with file path context
    #[error("[E002] Failed to read '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },
}

impl CoreError {
    /// True for the validation family, which must stop a run before any
    /// statement executes.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidVersion { .. }
                | CoreError::DuplicateVersion { .. }
                | CoreError::TargetBelowApplied { .. }
                | CoreError::UnresolvedTokens { .. }
                | CoreError::DuplicateToken { .. }
                | CoreError::InvalidToken { .. }
                | CoreError::InvalidIdentifier { .. }
                | CoreError::WorkspaceNotFound { .. }
                | CoreError::InvalidQuotedName { .. }
        )
    }
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
