//! keel-core - Core library for Keel
//!
//! This crate provides the shared types used across all Keel components:
//! version labels, script-root discovery, token replacement, and the run
//! configuration value.

pub mod checksum;
pub mod config;
pub mod error;
pub mod resolver;
pub mod script;
pub mod sql_utils;
pub mod token;
pub mod version;

pub use checksum::compute_checksum_all;
pub use config::RunConfig;
pub use error::{CoreError, CoreResult};
pub use resolver::{select_pending, VersionDir, VersionResolver};
pub use script::{BulkDataFile, MigrationUnit, ScriptFile, UnitKind};
pub use token::{Token, TokenReplacer, DB_NAME_TOKEN, SCHEMA_NAME_TOKEN, TABLE_NAME_TOKEN};
pub use version::Version;
