//! The applied-versions ledger
//!
//! Every statement here comes from the adapter's templates with the three
//! reserved tokens substituted. Names are validated as plain identifiers
//! before they are allowed into a template.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use keel_core::sql_utils::{validate_identifier, validate_quoted_name};
use keel_core::{
    Token, TokenReplacer, Version, DB_NAME_TOKEN, SCHEMA_NAME_TOKEN, TABLE_NAME_TOKEN,
};
use keel_db::{Connection, PlatformAdapter, Row, SqlTemplate, SqlValue};
use std::fmt;

/// How a version unit finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Every script ran
    Successful,
    /// At least one script failed and was skipped
    Partial,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Successful => "Successful",
            RecordStatus::Partial => "Partial",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub version: Version,
    pub applied_on: DateTime<Utc>,
    pub applied_by_user: String,
    pub applied_by_tool: String,
    pub applied_by_tool_version: String,
    pub checksum: String,
    pub status: RecordStatus,
    pub additional_artifacts: Option<Vec<u8>>,
}

/// A row read back from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub sequence_id: i64,
    pub version: String,
    pub applied_on_utc: String,
    pub applied_by_user: String,
    pub applied_by_tool: String,
    pub applied_by_tool_version: String,
    pub checksum: Option<String>,
    pub status: String,
}

impl LedgerRecord {
    fn from_row(row: &Row) -> EngineResult<Self> {
        if row.len() < 8 {
            return Err(EngineError::Ledger(format!(
                "expected 8 columns from get-all-versions, got {}",
                row.len()
            )));
        }
        let text = |i: usize| row[i].to_text().unwrap_or_default();
        let sequence_id = match &row[0] {
            SqlValue::Integer(i) => *i,
            other => other
                .to_text()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| EngineError::Ledger(format!("bad SequenceId {:?}", other)))?,
        };
        Ok(Self {
            sequence_id,
            version: text(1),
            applied_on_utc: text(2),
            applied_by_user: text(3),
            applied_by_tool: text(4),
            applied_by_tool_version: text(5),
            checksum: row[6].to_text(),
            status: text(7),
        })
    }
}

/// Ledger operations for one adapter and one (database, schema, table).
pub struct VersionLedger<'a> {
    adapter: &'a dyn PlatformAdapter,
    database: Option<String>,
    schema: String,
    table: String,
    tokens: TokenReplacer,
}

impl<'a> VersionLedger<'a> {
    /// Ledger in `schema`.`table`, falling back to the adapter's defaults.
    pub fn new(
        adapter: &'a dyn PlatformAdapter,
        schema: Option<&str>,
        table: Option<&str>,
    ) -> EngineResult<Self> {
        let database = adapter
            .connection_info()
            .database
            .map(|db| db.trim_matches('"').to_string())
            .filter(|db| !db.is_empty());
        let schema = schema.unwrap_or(adapter.default_schema()).to_string();
        let table = table.unwrap_or(adapter.default_ledger_table()).to_string();

        if let Some(db) = &database {
            validate_quoted_name("database", db)?;
        }
        validate_identifier("schema", &schema)?;
        validate_identifier("table", &table)?;

        let tokens = TokenReplacer::new(vec![
            Token::new(DB_NAME_TOKEN, database.clone().unwrap_or_default()),
            Token::new(SCHEMA_NAME_TOKEN, schema.clone()),
            Token::new(TABLE_NAME_TOKEN, table.clone()),
        ])?
        .strict(true);

        Ok(Self {
            adapter,
            database,
            schema,
            table,
            tokens,
        })
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The reserved tokens, for merging into the script replacer.
    pub fn reserved_tokens(&self) -> Vec<Token> {
        self.tokens.tokens().to_vec()
    }

    /// Rendered template text.
    pub fn sql(&self, template: SqlTemplate) -> EngineResult<String> {
        Ok(self
            .tokens
            .replace(&format!("{:?} template", template), self.adapter.template(template))?)
    }

    async fn run_template(&self, conn: &mut dyn Connection, template: SqlTemplate) -> EngineResult<()> {
        let sql = self.sql(template)?;
        for batch in self.adapter.split_statements(&sql) {
            conn.execute_batch(&batch)
                .await
                .map_err(|e| EngineError::Ledger(format!("{:?}: {}", template, e)))?;
        }
        Ok(())
    }

    async fn has_rows(&self, conn: &mut dyn Connection, template: SqlTemplate) -> EngineResult<bool> {
        let rows = conn
            .query(&self.sql(template)?)
            .await
            .map_err(|e| EngineError::Ledger(format!("{:?}: {}", template, e)))?;
        Ok(!rows.is_empty())
    }

    /// Run on the master connection.
    pub async fn database_exists(&self, master: &mut dyn Connection) -> EngineResult<bool> {
        self.has_rows(master, SqlTemplate::CheckDatabaseExists).await
    }

    /// Run on the master connection.
    pub async fn create_database(&self, master: &mut dyn Connection) -> EngineResult<()> {
        log::info!("Creating database {}", self.database.as_deref().unwrap_or(""));
        self.run_template(master, SqlTemplate::CreateDatabase).await
    }

    pub async fn create_schema(&self, conn: &mut dyn Connection) -> EngineResult<()> {
        log::info!("Creating schema {}", self.schema);
        self.run_template(conn, SqlTemplate::CreateSchema).await
    }

    pub async fn exists(&self, conn: &mut dyn Connection) -> EngineResult<bool> {
        self.has_rows(conn, SqlTemplate::CheckLedgerExists).await
    }

    pub async fn create(&self, conn: &mut dyn Connection) -> EngineResult<()> {
        log::info!("Creating version ledger {}.{}", self.schema, self.table);
        self.run_template(conn, SqlTemplate::CreateLedger).await
    }

    /// Last applied version; [`Version::zero`] for an empty ledger.
    pub async fn current_version(&self, conn: &mut dyn Connection) -> EngineResult<Version> {
        let rows = conn
            .query(&self.sql(SqlTemplate::GetCurrentVersion)?)
            .await
            .map_err(|e| EngineError::Ledger(e.to_string()))?;
        match rows.first().and_then(|row| row.first()) {
            None | Some(SqlValue::Null) => Ok(Version::zero()),
            Some(value) => {
                let label = value.to_text().unwrap_or_default();
                Version::parse(label.trim()).map_err(|e| {
                    EngineError::Ledger(format!("unreadable version '{}': {}", label, e))
                })
            }
        }
    }

    /// Every row, in application order.
    pub async fn all_versions(&self, conn: &mut dyn Connection) -> EngineResult<Vec<LedgerRecord>> {
        let rows = conn
            .query(&self.sql(SqlTemplate::GetAllVersions)?)
            .await
            .map_err(|e| EngineError::Ledger(e.to_string()))?;
        rows.iter().map(LedgerRecord::from_row).collect()
    }

    pub async fn record(&self, conn: &mut dyn Connection, entry: &NewLedgerEntry) -> EngineResult<()> {
        let params = [
            SqlValue::from(entry.version.label()),
            SqlValue::from(entry.applied_on.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
            SqlValue::from(entry.applied_by_user.as_str()),
            SqlValue::from(entry.applied_by_tool.as_str()),
            SqlValue::from(entry.applied_by_tool_version.as_str()),
            SqlValue::from(entry.checksum.as_str()),
            SqlValue::from(entry.status.as_str()),
            entry
                .additional_artifacts
                .clone()
                .map(SqlValue::Blob)
                .unwrap_or(SqlValue::Null),
        ];
        let inserted = conn
            .execute(&self.sql(SqlTemplate::InsertVersion)?, &params)
            .await
            .map_err(|e| EngineError::Ledger(format!("recording {}: {}", entry.version, e)))?;
        if inserted != 1 {
            return Err(EngineError::Ledger(format!(
                "recording {} affected {} rows",
                entry.version, inserted
            )));
        }
        log::debug!("Recorded {} as {}", entry.version, entry.status);
        Ok(())
    }
}

#[cfg(test)]
#[path = "ledger_test.rs"]
mod tests;
