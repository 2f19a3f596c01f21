//! Bulk import of `.csv` / `.tsv` files into existing tables
//!
//! The header row names target columns. A file named `schema.table.csv`
//! targets that schema, otherwise the connection's default applies. Rows
//! are sent as multi-row parameterised INSERTs of at most `batch_size`
//! rows. Empty fields load as NULL.

use crate::error::{EngineError, EngineResult};
use crate::exec::with_timeout;
use keel_core::sql_utils::validate_identifier;
use keel_core::BulkDataFile;
use keel_db::{Connection, SqlValue};
use std::time::Duration;

/// Loads data files through one connection.
#[derive(Debug, Clone)]
pub struct BulkImporter {
    batch_size: usize,
    timeout: Option<Duration>,
}

impl BulkImporter {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Import one file, returning the number of rows loaded.
    ///
    /// Rows are numbered from 1, not counting the header. A row that cannot
    /// be parsed is reported alone; a failing INSERT reports its batch's
    /// row range.
    pub async fn import(&self, conn: &mut dyn Connection, file: &BulkDataFile) -> EngineResult<u64> {
        let fail_rows = |first_row: u64, last_row: u64, cause: String| EngineError::BulkImport {
            file: file.relative_path.clone(),
            first_row,
            last_row,
            cause,
        };
        let fail = |row: u64, cause: String| fail_rows(row, row, cause);

        if let Some(schema) = &file.schema {
            validate_identifier("schema", schema).map_err(|e| fail(0, e.to_string()))?;
        }
        validate_identifier("table", &file.table).map_err(|e| fail(0, e.to_string()))?;
        let table = file.qualified_table(None);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(file.delimiter)
            .has_headers(true)
            .from_path(&file.path)
            .map_err(|e| fail(0, e.to_string()))?;

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| fail(0, e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if columns.is_empty() {
            return Err(fail(0, "missing header row".to_string()));
        }
        for column in &columns {
            validate_identifier("column", column).map_err(|e| fail(0, e.to_string()))?;
        }

        log::debug!(
            "Importing {} into {} ({} columns)",
            file.relative_path,
            table,
            columns.len()
        );

        let mut loaded: u64 = 0;
        let mut batch: Vec<SqlValue> = Vec::with_capacity(self.batch_size * columns.len());
        let mut batch_rows = 0usize;

        for (index, record) in reader.records().enumerate() {
            let row = index as u64 + 1;
            let record = record.map_err(|e| fail(row, e.to_string()))?;
            if record.len() != columns.len() {
                return Err(fail(
                    row,
                    format!("expected {} fields, found {}", columns.len(), record.len()),
                ));
            }
            batch.extend(record.iter().map(|field| {
                if field.is_empty() {
                    SqlValue::Null
                } else {
                    SqlValue::from(field)
                }
            }));
            batch_rows += 1;

            if batch_rows == self.batch_size {
                self.flush(conn, &table, &columns, &batch, batch_rows)
                    .await
                    .map_err(|cause| fail_rows(loaded + 1, row, cause))?;
                loaded += batch_rows as u64;
                batch.clear();
                batch_rows = 0;
            }
        }
        if batch_rows > 0 {
            self.flush(conn, &table, &columns, &batch, batch_rows)
                .await
                .map_err(|cause| fail_rows(loaded + 1, loaded + batch_rows as u64, cause))?;
            loaded += batch_rows as u64;
        }

        log::info!("Imported {} rows from {}", loaded, file.relative_path);
        Ok(loaded)
    }

    async fn flush(
        &self,
        conn: &mut dyn Connection,
        table: &str,
        columns: &[String],
        values: &[SqlValue],
        rows: usize,
    ) -> Result<(), String> {
        let sql = insert_sql(table, columns, rows);
        with_timeout(self.timeout, conn.execute(&sql, values))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// `INSERT INTO t (a, b) VALUES (?, ?), (?, ?)` for `rows` rows.
pub(crate) fn insert_sql(table: &str, columns: &[String], rows: usize) -> String {
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        columns.join(", "),
        vec![placeholders; rows].join(", ")
    )
}

#[cfg(test)]
#[path = "importer_test.rs"]
mod tests;
