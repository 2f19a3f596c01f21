//! keel-db - Platform adapter layer for Keel
//!
//! This crate provides the `PlatformAdapter` and `Connection` traits, the
//! batch splitter shared by all adapters, and the built-in DuckDB and
//! Snowflake adapters.

pub mod conn_string;
pub mod duckdb;
pub mod error;
pub mod snowflake;
pub mod splitter;
pub mod traits;

pub use conn_string::ConnectionString;
pub use duckdb::DuckDbAdapter;
pub use error::{DbError, DbResult};
pub use snowflake::SnowflakeAdapter;
pub use splitter::{BatchSeparator, StatementSplitter};
pub use traits::{
    AdapterFactory, Connection, ConnectionInfo, PlatformAdapter, PlatformCapabilities, Row,
    SqlTemplate, SqlValue,
};

/// Version of this crate, checked by the plugin loader against plugins
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
