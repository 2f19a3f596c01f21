//! Snowflake platform adapter
//!
//! Snowflake commits DDL implicitly, so versions cannot be applied
//! atomically and failed scripts may be skipped. Scripts are split on `GO`
//! lines. Connection string handling and SQL templates are complete; there
//! is no wire driver yet, so `connect` reports the backend as unimplemented.

use crate::conn_string::ConnectionString;
use crate::error::{DbError, DbResult};
use crate::splitter::BatchSeparator;
use crate::traits::{
    AdapterFactory, Connection, ConnectionInfo, PlatformAdapter, PlatformCapabilities,
    SqlTemplate,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Snowflake adapter configured from `host=...;db=...;schema=...;user=...`.
pub struct SnowflakeAdapter {
    connection_string: ConnectionString,
}

impl SnowflakeAdapter {
    pub fn new(connection_string: &str) -> DbResult<Self> {
        Ok(Self {
            connection_string: ConnectionString::parse(connection_string)?,
        })
    }

    /// Session connection string with the database name double-quoted so
    /// Snowflake keeps its case.
    pub fn session_connection_string(&self) -> String {
        let mut cs = self.connection_string.clone();
        if let Some(db) = cs.get("db").map(str::to_string) {
            if !is_double_quoted(&db) {
                cs.set("db", &format!("\"{}\"", db));
            }
        }
        cs.to_string()
    }

    /// Administrative connection string: no database or schema bound, so it
    /// can connect before the target database exists.
    pub fn master_connection_string(&self) -> String {
        let mut cs = self.connection_string.clone();
        cs.remove("db");
        cs.remove("schema");
        cs.to_string()
    }

    fn not_implemented(&self, feature: &str) -> DbError {
        DbError::NotImplemented {
            backend: "snowflake".to_string(),
            feature: feature.to_string(),
        }
    }
}

fn is_double_quoted(value: &str) -> bool {
    value.len() >= 2 && value.starts_with('"') && value.ends_with('"')
}

/// Factory registered under the `snowflake` platform name.
pub fn factory() -> AdapterFactory {
    Arc::new(|connection_string: &str| -> DbResult<Box<dyn PlatformAdapter>> {
        Ok(Box::new(SnowflakeAdapter::new(connection_string)?) as Box<dyn PlatformAdapter>)
    })
}

#[async_trait]
impl PlatformAdapter for SnowflakeAdapter {
    fn platform(&self) -> &str {
        "snowflake"
    }

    fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities {
            atomic_ddl_supported: false,
            schema_supported: true,
        }
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            data_source: self
                .connection_string
                .get_any(&["host", "account"])
                .map(str::to_string),
            database: self.connection_string.get("db").map(str::to_string),
        }
    }

    fn default_schema(&self) -> &str {
        "PUBLIC"
    }

    fn default_ledger_table(&self) -> &str {
        "__KEEL_VERSIONS"
    }

    fn batch_separator(&self) -> BatchSeparator {
        BatchSeparator::Line("GO")
    }

    fn template(&self, template: SqlTemplate) -> &'static str {
        match template {
            SqlTemplate::CheckDatabaseExists => "SHOW DATABASES LIKE '${KEEL_DB_NAME}';",
            SqlTemplate::CreateDatabase => "CREATE DATABASE \"${KEEL_DB_NAME}\";",
            SqlTemplate::CreateSchema => {
                "CREATE SCHEMA IF NOT EXISTS \"${KEEL_DB_NAME}\".\"${KEEL_SCHEMA_NAME}\";"
            }
            SqlTemplate::CheckLedgerExists => {
                "SELECT 1 WHERE EXISTS (SELECT * FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = '${KEEL_SCHEMA_NAME}' AND TABLE_NAME = '${KEEL_TABLE_NAME}' \
                 AND TABLE_TYPE = 'BASE TABLE')"
            }
            SqlTemplate::CreateLedger => {
                "CREATE TABLE \"${KEEL_DB_NAME}\".\"${KEEL_SCHEMA_NAME}\".\"${KEEL_TABLE_NAME}\"(\
                 \"SequenceId\" NUMBER NOT NULL IDENTITY START 1 INCREMENT 1,\
                 \"Version\" VARCHAR(512) NOT NULL,\
                 \"AppliedOnUtc\" TIMESTAMP_NTZ(9) NOT NULL,\
                 \"AppliedByUser\" VARCHAR(32) NOT NULL DEFAULT CURRENT_USER(),\
                 \"AppliedByTool\" VARCHAR(32) NULL,\
                 \"AppliedByToolVersion\" VARCHAR(16) NULL,\
                 \"Checksum\" VARCHAR(64) NULL,\
                 \"Status\" VARCHAR(16) NOT NULL DEFAULT 'Successful',\
                 \"AdditionalArtifacts\" VARBINARY NULL,\
                 PRIMARY KEY (\"SequenceId\")\
                 );"
            }
            SqlTemplate::GetCurrentVersion => {
                "SELECT TOP 1 \"Version\" \
                 FROM \"${KEEL_DB_NAME}\".\"${KEEL_SCHEMA_NAME}\".\"${KEEL_TABLE_NAME}\" \
                 ORDER BY \"SequenceId\" DESC;"
            }
            SqlTemplate::GetAllVersions => {
                "SELECT \"SequenceId\", \"Version\", TO_VARCHAR(\"AppliedOnUtc\"), \"AppliedByUser\", \
                 \"AppliedByTool\", \"AppliedByToolVersion\", \"Checksum\", \"Status\" \
                 FROM \"${KEEL_DB_NAME}\".\"${KEEL_SCHEMA_NAME}\".\"${KEEL_TABLE_NAME}\" \
                 ORDER BY \"SequenceId\" ASC;"
            }
            SqlTemplate::InsertVersion => {
                "INSERT INTO \"${KEEL_DB_NAME}\".\"${KEEL_SCHEMA_NAME}\".\"${KEEL_TABLE_NAME}\" \
                 (\"Version\", \"AppliedOnUtc\", \"AppliedByUser\", \"AppliedByTool\", \
                 \"AppliedByToolVersion\", \"Checksum\", \"Status\", \"AdditionalArtifacts\") \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?);"
            }
        }
    }

    async fn connect(&self) -> DbResult<Box<dyn Connection>> {
        log::debug!(
            "Snowflake session requested for {}",
            self.connection_info().database.unwrap_or_default()
        );
        Err(self.not_implemented("connect"))
    }

    async fn connect_master(&self) -> DbResult<Box<dyn Connection>> {
        Err(self.not_implemented("connect_master"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "host=acme.snowflakecomputing.com;user=deployer;db=Sales;schema=OPS";

    #[test]
    fn test_capabilities_and_defaults() {
        let adapter = SnowflakeAdapter::new(RAW).unwrap();
        assert!(!adapter.capabilities().atomic_ddl_supported);
        assert!(adapter.capabilities().schema_supported);
        assert_eq!(adapter.default_schema(), "PUBLIC");
        assert_eq!(adapter.default_ledger_table(), "__KEEL_VERSIONS");
        assert_eq!(adapter.batch_separator(), BatchSeparator::Line("GO"));
    }

    #[test]
    fn test_session_string_quotes_database() {
        let adapter = SnowflakeAdapter::new(RAW).unwrap();
        assert_eq!(
            adapter.session_connection_string(),
            "host=acme.snowflakecomputing.com;user=deployer;db=\"Sales\";schema=OPS"
        );

        let quoted = SnowflakeAdapter::new("host=a;db=\"Sales\"").unwrap();
        assert_eq!(quoted.session_connection_string(), "host=a;db=\"Sales\"");
    }

    #[test]
    fn test_master_string_drops_database_and_schema() {
        let adapter = SnowflakeAdapter::new(RAW).unwrap();
        assert_eq!(
            adapter.master_connection_string(),
            "host=acme.snowflakecomputing.com;user=deployer"
        );
    }

    #[test]
    fn test_connection_info() {
        let info = SnowflakeAdapter::new(RAW).unwrap().connection_info();
        assert_eq!(info.data_source.as_deref(), Some("acme.snowflakecomputing.com"));
        assert_eq!(info.database.as_deref(), Some("Sales"));
    }

    #[test]
    fn test_splits_on_go() {
        let adapter = SnowflakeAdapter::new(RAW).unwrap();
        let batches = adapter.split_statements("CREATE TABLE a (id INT);\nGO\nCREATE TABLE b (id INT);");
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_templates_use_reserved_tokens_only() {
        let adapter = SnowflakeAdapter::new(RAW).unwrap();
        let reserved = ["${KEEL_DB_NAME}", "${KEEL_SCHEMA_NAME}", "${KEEL_TABLE_NAME}"];
        for template in SqlTemplate::ALL {
            let mut sql = adapter.template(template).to_string();
            for token in reserved {
                sql = sql.replace(token, "X");
            }
            assert!(!sql.contains("${"), "{:?} has an unknown token", template);
        }
        assert_eq!(adapter.template(SqlTemplate::InsertVersion).matches('?').count(), 8);
    }

    #[tokio::test]
    async fn test_connect_not_implemented() {
        let adapter = SnowflakeAdapter::new(RAW).unwrap();
        assert!(matches!(
            adapter.connect().await.err().unwrap(),
            DbError::NotImplemented { .. }
        ));
        assert!(adapter.connect_master().await.is_err());
    }

    #[test]
    fn test_factory_rejects_bad_connection_string() {
        assert!(factory()("host").is_err());
        assert!(factory()(RAW).is_ok());
    }
}
