//! List command implementation

use anyhow::{Context, Result};
use keel_engine::{LedgerRecord, MigrationOrchestrator};

use crate::cli::{GlobalArgs, ListArgs, ListOutput};
use crate::commands::common::{load_config, plugin_loader};

/// Execute the list command
pub async fn execute(args: &ListArgs, global: &GlobalArgs) -> Result<()> {
    let config = load_config(&args.connection, global)?;
    let orchestrator = MigrationOrchestrator::new(plugin_loader(&config));
    let records = orchestrator
        .list(&config)
        .await
        .context("Failed to read the version ledger")?;

    match args.output {
        ListOutput::Table => {
            if records.is_empty() {
                println!("No versions applied");
            } else {
                print_table(&records);
            }
        }
        ListOutput::Json => {
            let json = serde_json::to_string_pretty(&to_json(&records))
                .context("Failed to serialize ledger rows")?;
            println!("{}", json);
        }
    }
    Ok(())
}

fn to_json(records: &[LedgerRecord]) -> serde_json::Value {
    serde_json::Value::Array(
        records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "sequence_id": r.sequence_id,
                    "version": r.version,
                    "applied_on_utc": r.applied_on_utc,
                    "applied_by_user": r.applied_by_user,
                    "applied_by_tool": r.applied_by_tool,
                    "applied_by_tool_version": r.applied_by_tool_version,
                    "checksum": r.checksum,
                    "status": r.status,
                })
            })
            .collect(),
    )
}

fn print_table(records: &[LedgerRecord]) {
    let version_width = records
        .iter()
        .map(|r| r.version.len())
        .max()
        .unwrap_or(7)
        .max(7);
    let applied_width = records
        .iter()
        .map(|r| r.applied_on_utc.len())
        .max()
        .unwrap_or(10)
        .max(10);
    let user_width = records
        .iter()
        .map(|r| r.applied_by_user.len())
        .max()
        .unwrap_or(4)
        .max(4);
    let status_width = 10;

    println!(
        "{:<version_width$}  {:<applied_width$}  {:<user_width$}  {:<status_width$}  TOOL",
        "VERSION",
        "APPLIED_ON",
        "USER",
        "STATUS",
    );
    println!(
        "{:-<version_width$}  {:-<applied_width$}  {:-<user_width$}  {:-<status_width$}  {}",
        "",
        "",
        "",
        "",
        "-".repeat(16),
    );
    for r in records {
        println!(
            "{:<version_width$}  {:<applied_width$}  {:<user_width$}  {:<status_width$}  {} {}",
            r.version,
            r.applied_on_utc,
            r.applied_by_user,
            r.status,
            r.applied_by_tool,
            r.applied_by_tool_version,
        );
    }
    println!();
    println!("{} version(s) applied", records.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let records = vec![LedgerRecord {
            sequence_id: 1,
            version: "v1.00".to_string(),
            applied_on_utc: "2024-05-01 10:00:00".to_string(),
            applied_by_user: "ana".to_string(),
            applied_by_tool: "keel".to_string(),
            applied_by_tool_version: "0.1.2".to_string(),
            checksum: None,
            status: "Partial".to_string(),
        }];
        let json = to_json(&records);
        assert_eq!(json[0]["version"], "v1.00");
        assert_eq!(json[0]["status"], "Partial");
        assert!(json[0]["checksum"].is_null());
    }
}
