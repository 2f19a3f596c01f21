//! DuckDB platform adapter
//!
//! DuckDB runs DDL inside transactions, so every version can be applied
//! atomically. All connections handed out are clones of the one database
//! instance opened by the adapter, which keeps `:memory:` databases visible
//! across connections.

use crate::conn_string::ConnectionString;
use crate::error::{DbError, DbResult};
use crate::splitter::BatchSeparator;
use crate::traits::{
    AdapterFactory, Connection, ConnectionInfo, PlatformAdapter, PlatformCapabilities, Row,
    SqlTemplate, SqlValue,
};
use async_trait::async_trait;
use duckdb::types::Value;
use duckdb::InterruptHandle;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const IN_MEMORY: &str = ":memory:";

/// Adapter over a single DuckDB database file (or an in-memory database).
pub struct DuckDbAdapter {
    database: Mutex<duckdb::Connection>,
    path: String,
    database_name: String,
    schema: String,
}

impl DuckDbAdapter {
    /// Open from a connection string: `path=<file>[;schema=<name>]`, a bare
    /// path, or empty for an in-memory database.
    pub fn new(connection_string: &str) -> DbResult<Self> {
        let raw = connection_string.trim();
        let (path, schema) = if raw.contains('=') {
            let cs = ConnectionString::parse(raw)?;
            (
                cs.get_any(&["path", "data source", "database"])
                    .unwrap_or(IN_MEMORY)
                    .to_string(),
                cs.get("schema").map(str::to_string),
            )
        } else if raw.is_empty() {
            (IN_MEMORY.to_string(), None)
        } else {
            (raw.to_string(), None)
        };

        let database = if path == IN_MEMORY {
            duckdb::Connection::open_in_memory()
        } else {
            duckdb::Connection::open(Path::new(&path))
        }
        .map_err(|e| DbError::ConnectionError(format!("{}: {}", path, e)))?;

        // DuckDB derives the catalog name from the file name, so ask it.
        let database_name = database
            .query_row("SELECT current_database()", [], |row| row.get::<_, String>(0))
            .map_err(|e| DbError::ConnectionError(format!("{}: {}", path, e)))?;

        log::debug!("Opened DuckDB database '{}' at {}", database_name, path);

        Ok(Self {
            database: Mutex::new(database),
            database_name,
            schema: schema.unwrap_or_else(|| "main".to_string()),
            path,
        })
    }

    /// Fresh in-memory database
    pub fn in_memory() -> DbResult<Self> {
        Self::new(IN_MEMORY)
    }

    fn clone_connection(&self) -> DbResult<Box<dyn Connection>> {
        let database = self
            .database
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))?;
        let conn = database
            .try_clone()
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Box::new(DuckDbConnection::new(conn)))
    }
}

/// Factory registered under the `duckdb` platform name.
pub fn factory() -> AdapterFactory {
    Arc::new(|connection_string: &str| -> DbResult<Box<dyn PlatformAdapter>> {
        Ok(Box::new(DuckDbAdapter::new(connection_string)?) as Box<dyn PlatformAdapter>)
    })
}

#[async_trait]
impl PlatformAdapter for DuckDbAdapter {
    fn platform(&self) -> &str {
        "duckdb"
    }

    fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities {
            atomic_ddl_supported: true,
            schema_supported: true,
        }
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            data_source: Some(self.path.clone()),
            database: Some(self.database_name.clone()),
        }
    }

    fn default_schema(&self) -> &str {
        &self.schema
    }

    fn batch_separator(&self) -> BatchSeparator {
        BatchSeparator::None
    }

    fn template(&self, template: SqlTemplate) -> &'static str {
        match template {
            SqlTemplate::CheckDatabaseExists => {
                "SELECT 1 FROM duckdb_databases() WHERE database_name = '${KEEL_DB_NAME}'"
            }
            SqlTemplate::CreateDatabase => {
                "ATTACH IF NOT EXISTS '${KEEL_DB_NAME}.duckdb' AS \"${KEEL_DB_NAME}\""
            }
            SqlTemplate::CreateSchema => "CREATE SCHEMA IF NOT EXISTS ${KEEL_SCHEMA_NAME}",
            SqlTemplate::CheckLedgerExists => {
                "SELECT 1 FROM information_schema.tables \
                 WHERE lower(table_schema) = lower('${KEEL_SCHEMA_NAME}') \
                 AND lower(table_name) = lower('${KEEL_TABLE_NAME}')"
            }
            SqlTemplate::CreateLedger => {
                "CREATE SEQUENCE IF NOT EXISTS ${KEEL_SCHEMA_NAME}.${KEEL_TABLE_NAME}_seq;
CREATE TABLE ${KEEL_SCHEMA_NAME}.${KEEL_TABLE_NAME} (
    SequenceId BIGINT PRIMARY KEY DEFAULT nextval('${KEEL_SCHEMA_NAME}.${KEEL_TABLE_NAME}_seq'),
    Version VARCHAR(190) NOT NULL UNIQUE,
    AppliedOnUtc TIMESTAMP NOT NULL DEFAULT current_timestamp,
    AppliedByUser VARCHAR(32) NOT NULL,
    AppliedByTool VARCHAR(32) NOT NULL,
    AppliedByToolVersion VARCHAR(16) NOT NULL,
    Checksum VARCHAR(64),
    Status VARCHAR(16) NOT NULL DEFAULT 'Successful',
    AdditionalArtifacts BLOB
);"
            }
            SqlTemplate::GetCurrentVersion => {
                "SELECT Version FROM ${KEEL_SCHEMA_NAME}.${KEEL_TABLE_NAME} \
                 ORDER BY SequenceId DESC LIMIT 1"
            }
            SqlTemplate::GetAllVersions => {
                "SELECT SequenceId, Version, CAST(AppliedOnUtc AS VARCHAR), AppliedByUser, \
                 AppliedByTool, AppliedByToolVersion, Checksum, Status \
                 FROM ${KEEL_SCHEMA_NAME}.${KEEL_TABLE_NAME} ORDER BY SequenceId ASC"
            }
            SqlTemplate::InsertVersion => {
                "INSERT INTO ${KEEL_SCHEMA_NAME}.${KEEL_TABLE_NAME} \
                 (Version, AppliedOnUtc, AppliedByUser, AppliedByTool, AppliedByToolVersion, \
                 Checksum, Status, AdditionalArtifacts) \
                 VALUES (?, CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?)"
            }
        }
    }

    async fn connect(&self) -> DbResult<Box<dyn Connection>> {
        self.clone_connection()
    }

    async fn connect_master(&self) -> DbResult<Box<dyn Connection>> {
        self.clone_connection()
    }
}

/// One session on the shared DuckDB instance.
///
/// Statements that may run long (`execute_batch`, `execute`) run on the
/// blocking pool so a caller's timeout can fire. If the awaiting future is
/// dropped first, the running statement is interrupted.
pub struct DuckDbConnection {
    conn: Arc<Mutex<duckdb::Connection>>,
    interrupt: Arc<InterruptHandle>,
    in_tx: bool,
}

impl DuckDbConnection {
    fn new(conn: duckdb::Connection) -> Self {
        let interrupt = conn.interrupt_handle();
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            in_tx: false,
        }
    }

    /// Waits for any interrupted statement still holding the session.
    fn lock(&self) -> DbResult<MutexGuard<'_, duckdb::Connection>> {
        self.conn
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))
    }

    async fn run_blocking<T, F>(&self, work: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&duckdb::Connection) -> DbResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let guard = InterruptOnDrop(Some(Arc::clone(&self.interrupt)));
        let joined = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| DbError::MutexPoisoned(e.to_string()))?;
            work(&*conn)
        })
        .await;
        guard.disarm();
        joined.map_err(|e| DbError::ExecutionError(format!("statement task failed: {}", e)))?
    }

    fn control(&self, sql: &str) -> DbResult<()> {
        self.lock()?
            .execute_batch(sql)
            .map_err(|e| DbError::TransactionError(e.to_string()))
    }
}

/// Interrupts the session's statement unless disarmed once it finished.
struct InterruptOnDrop(Option<Arc<InterruptHandle>>);

impl InterruptOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            log::debug!("Interrupting abandoned DuckDB statement");
            handle.interrupt();
        }
    }
}

impl Drop for DuckDbConnection {
    fn drop(&mut self) {
        if self.in_tx {
            if let Err(e) = self.control("ROLLBACK") {
                log::warn!("Rollback on drop failed: {}", e);
            }
        }
    }
}

fn to_duckdb(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Boolean(*b),
        SqlValue::Integer(i) => Value::BigInt(*i),
        SqlValue::Real(r) => Value::Double(*r),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Blob(b) => Value::Blob(b.clone()),
    }
}

fn from_duckdb(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Boolean(b) => SqlValue::Bool(b),
        Value::TinyInt(i) => SqlValue::Integer(i.into()),
        Value::SmallInt(i) => SqlValue::Integer(i.into()),
        Value::Int(i) => SqlValue::Integer(i.into()),
        Value::BigInt(i) => SqlValue::Integer(i),
        Value::UTinyInt(i) => SqlValue::Integer(i.into()),
        Value::USmallInt(i) => SqlValue::Integer(i.into()),
        Value::UInt(i) => SqlValue::Integer(i.into()),
        Value::UBigInt(i) => match i64::try_from(i) {
            Ok(i) => SqlValue::Integer(i),
            Err(_) => SqlValue::Text(i.to_string()),
        },
        Value::HugeInt(i) => match i64::try_from(i) {
            Ok(i) => SqlValue::Integer(i),
            Err(_) => SqlValue::Text(i.to_string()),
        },
        Value::Float(f) => SqlValue::Real(f.into()),
        Value::Double(f) => SqlValue::Real(f),
        Value::Text(s) => SqlValue::Text(s),
        Value::Blob(b) => SqlValue::Blob(b),
        other => SqlValue::Text(format!("{:?}", other)),
    }
}

#[async_trait]
impl Connection for DuckDbConnection {
    async fn execute_batch(&mut self, sql: &str) -> DbResult<()> {
        let sql = sql.to_string();
        self.run_blocking(move |conn| Ok(conn.execute_batch(&sql)?))
            .await
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<usize> {
        let sql = sql.to_string();
        let values: Vec<Value> = params.iter().map(to_duckdb).collect();
        self.run_blocking(move |conn| {
            Ok(conn.execute(&sql, duckdb::params_from_iter(values.iter()))?)
        })
        .await
    }

    async fn query(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let count = row.as_ref().column_count();
            let mut values = Vec::with_capacity(count);
            for i in 0..count {
                values.push(from_duckdb(row.get::<_, Value>(i)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    async fn begin(&mut self) -> DbResult<()> {
        if self.in_tx {
            return Err(DbError::TransactionError(
                "transaction already open".to_string(),
            ));
        }
        self.control("BEGIN TRANSACTION")?;
        self.in_tx = true;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        if !self.in_tx {
            return Err(DbError::TransactionError("no open transaction".to_string()));
        }
        self.in_tx = false;
        self.control("COMMIT")
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if !self.in_tx {
            return Err(DbError::TransactionError("no open transaction".to_string()));
        }
        self.in_tx = false;
        self.control("ROLLBACK")
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
