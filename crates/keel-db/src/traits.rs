//! Platform adapter and connection traits
//!
//! An adapter never runs anything itself: it hands out connections and SQL
//! text, and the orchestrator decides what to execute and when. That split is
//! what lets one migration algorithm drive dialects that disagree on
//! transactional DDL, identifier quoting and batch separators.

use crate::error::DbResult;
use crate::splitter::{BatchSeparator, StatementSplitter};
use async_trait::async_trait;
use std::sync::Arc;

/// Fixed per adapter instance; drives the transaction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
    /// Schema changes can be rolled back inside a transaction
    pub atomic_ddl_supported: bool,

    /// The backend has schemas distinct from databases
    pub schema_supported: bool,
}

/// Where an adapter is pointed, for logs and for the database-name token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Server, host or file the adapter talks to
    pub data_source: Option<String>,

    /// Target database name
    pub database: Option<String>,
}

/// The fixed set of SQL templates every adapter provides.
///
/// Templates may use `${KEEL_DB_NAME}`, `${KEEL_SCHEMA_NAME}` and
/// `${KEEL_TABLE_NAME}`; nothing else is substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlTemplate {
    /// Returns a row when the target database exists (run on the master connection)
    CheckDatabaseExists,
    /// Creates the target database (run on the master connection)
    CreateDatabase,
    /// Creates the target schema
    CreateSchema,
    /// Returns a row when the ledger table exists
    CheckLedgerExists,
    /// Creates the ledger table; may hold several statements
    CreateLedger,
    /// One row, one column: the label of the last applied version
    GetCurrentVersion,
    /// All ledger rows in application order: SequenceId, Version,
    /// AppliedOnUtc (text), AppliedByUser, AppliedByTool,
    /// AppliedByToolVersion, Checksum, Status
    GetAllVersions,
    /// Parameterised insert, parameters in order: Version, AppliedOnUtc,
    /// AppliedByUser, AppliedByTool, AppliedByToolVersion, Checksum, Status,
    /// AdditionalArtifacts
    InsertVersion,
}

impl SqlTemplate {
    pub const ALL: [SqlTemplate; 8] = [
        SqlTemplate::CheckDatabaseExists,
        SqlTemplate::CreateDatabase,
        SqlTemplate::CreateSchema,
        SqlTemplate::CheckLedgerExists,
        SqlTemplate::CreateLedger,
        SqlTemplate::GetCurrentVersion,
        SqlTemplate::GetAllVersions,
        SqlTemplate::InsertVersion,
    ];
}

/// A bound parameter or a result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Text rendering for display; `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Real(r) => Some(r.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Blob(b) => Some(format!("<{} bytes>", b.len())),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One result row.
pub type Row = Vec<SqlValue>;

/// A live session against the backend.
///
/// Autocommit unless [`Connection::begin`] was called. Dropping a connection
/// with an open transaction rolls it back.
#[async_trait]
pub trait Connection: Send {
    /// Execute one batch of SQL, which may hold several statements
    async fn execute_batch(&mut self, sql: &str) -> DbResult<()>;

    /// Execute a single parameterised statement, returns affected rows
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<usize>;

    /// Run a query and collect every row
    async fn query(&mut self, sql: &str) -> DbResult<Vec<Row>>;

    /// Start an explicit transaction
    async fn begin(&mut self) -> DbResult<()>;

    /// Commit the open transaction
    async fn commit(&mut self) -> DbResult<()>;

    /// Roll back the open transaction
    async fn rollback(&mut self) -> DbResult<()>;

    /// Whether an explicit transaction is open
    fn in_transaction(&self) -> bool;
}

/// One implementation per backend.
///
/// Implementations must be Send + Sync; the orchestrator owns one instance
/// for the duration of a run and never shares it across concurrent runs.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Registry name, e.g. `duckdb`
    fn platform(&self) -> &str;

    fn capabilities(&self) -> PlatformCapabilities;

    fn connection_info(&self) -> ConnectionInfo;

    /// Schema used when the run does not name one
    fn default_schema(&self) -> &str;

    /// Ledger table used when the run does not name one
    fn default_ledger_table(&self) -> &str {
        "__keel_versions"
    }

    /// How scripts are cut into batches on this backend
    fn batch_separator(&self) -> BatchSeparator;

    /// Split raw script text into executable batches
    fn split_statements(&self, sql: &str) -> Vec<String> {
        StatementSplitter::new(self.batch_separator()).split(sql)
    }

    /// SQL text for one of the fixed templates
    fn template(&self, template: SqlTemplate) -> &'static str;

    /// Connection bound to the target database and schema
    async fn connect(&self) -> DbResult<Box<dyn Connection>>;

    /// Administrative connection with no target database or schema bound
    async fn connect_master(&self) -> DbResult<Box<dyn Connection>>;
}

/// Constructs an adapter from a connection string.
pub type AdapterFactory =
    Arc<dyn Fn(&str) -> DbResult<Box<dyn PlatformAdapter>> + Send + Sync>;
