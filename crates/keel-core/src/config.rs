//! Run configuration, optionally loaded from keel.yml
//!
//! A [`RunConfig`] is a plain value handed to the orchestrator for a single
//! run. The CLI builds one from the config file (if any) and then overrides
//! individual fields from flags.

use crate::error::{CoreError, CoreResult};
use crate::sql_utils::validate_identifier;
use crate::token::{Token, TokenReplacer};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file names looked up in the workspace, in order.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["keel.yml", "keel.yaml"];

/// Everything one migration run needs to know.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Platform name used to look up the adapter (e.g. `duckdb`)
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Backend-specific connection string
    #[serde(default)]
    pub connection_string: String,

    /// Script root containing one directory per version
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Highest version to apply; latest available when absent
    #[serde(default)]
    pub target_version: Option<Version>,

    /// Create the target database through the master connection if missing
    #[serde(default)]
    pub auto_create_database: bool,

    /// Skip failing scripts on backends without atomic DDL
    #[serde(default)]
    pub continue_after_failure: bool,

    /// Wrap each version in a transaction when the backend supports it
    #[serde(default = "default_true")]
    pub transactional: bool,

    /// Schema holding the ledger; adapter default when absent
    #[serde(default)]
    pub schema: Option<String>,

    /// Ledger table name; adapter default when absent
    #[serde(default)]
    pub ledger_table: Option<String>,

    /// User tokens substituted into scripts, in order
    #[serde(default)]
    pub tokens: Vec<Token>,

    /// Fail on `${...}` placeholders with no value
    #[serde(default)]
    pub strict_tokens: bool,

    /// Directory holding one subdirectory per plugin platform
    #[serde(default)]
    pub plugins_dir: Option<PathBuf>,

    /// Rows per insert batch during bulk import
    #[serde(default = "default_bulk_batch_size")]
    pub bulk_batch_size: usize,

    /// Per-statement timeout in seconds
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// Recorded as AppliedByUser; falls back to $USER
    #[serde(default)]
    pub applied_by_user: Option<String>,

    /// Recorded as AppliedByTool
    #[serde(default = "default_tool_name")]
    pub tool_name: String,

    /// Recorded as AppliedByToolVersion
    #[serde(default = "default_tool_version")]
    pub tool_version: String,
}

fn default_platform() -> String {
    "duckdb".to_string()
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

fn default_bulk_batch_size() -> usize {
    1000
}

fn default_tool_name() -> String {
    "keel".to_string()
}

fn default_tool_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            connection_string: String::new(),
            workspace: default_workspace(),
            target_version: None,
            auto_create_database: false,
            continue_after_failure: false,
            transactional: true,
            schema: None,
            ledger_table: None,
            tokens: Vec::new(),
            strict_tokens: false,
            plugins_dir: None,
            bulk_batch_size: default_bulk_batch_size(),
            command_timeout_secs: None,
            applied_by_user: None,
            tool_name: default_tool_name(),
            tool_version: default_tool_version(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: RunConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Locate keel.yml or keel.yaml in `dir`.
    pub fn find_in_dir(dir: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.exists())
    }

    /// Load configuration from a workspace directory
    pub fn load_from_dir(dir: &Path) -> CoreResult<Self> {
        match Self::find_in_dir(dir) {
            Some(path) => Self::load(&path),
            None => Err(CoreError::ConfigNotFound {
                path: dir.join(CONFIG_FILE_NAMES[0]).display().to_string(),
            }),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> CoreResult<()> {
        if self.platform.trim().is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "platform cannot be empty".to_string(),
            });
        }
        if self.bulk_batch_size == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "bulk_batch_size must be at least 1".to_string(),
            });
        }
        if self.command_timeout_secs == Some(0) {
            return Err(CoreError::ConfigInvalid {
                message: "command_timeout_secs must be at least 1".to_string(),
            });
        }
        if let Some(schema) = &self.schema {
            validate_identifier("schema", schema)?;
        }
        if let Some(table) = &self.ledger_table {
            validate_identifier("table", table)?;
        }
        self.token_replacer()?;
        Ok(())
    }

    /// Replacer over the user tokens, honouring `strict_tokens`.
    pub fn token_replacer(&self) -> CoreResult<TokenReplacer> {
        Ok(TokenReplacer::new(self.tokens.clone())?.strict(self.strict_tokens))
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// Who to record as having applied a version.
    pub fn applied_by(&self) -> String {
        self.applied_by_user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
