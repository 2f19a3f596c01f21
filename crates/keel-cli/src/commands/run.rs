//! Run command implementation

use anyhow::{Context, Result};
use keel_core::RunConfig;
use keel_engine::{EngineError, MigrationOrchestrator, RecordStatus, RunReport};
use tokio_util::sync::CancellationToken;

use crate::cli::{GlobalArgs, RunArgs};
use crate::commands::common::{load_config, plugin_loader};

/// Execute the run command
pub async fn execute(args: &RunArgs, global: &GlobalArgs) -> Result<()> {
    let config = build_config(args, global)?;
    config.validate().context("Invalid run configuration")?;

    println!(
        "Migrating {} ({}) from {}",
        config.platform,
        if config.transactional {
            "transactional"
        } else {
            "autocommit"
        },
        config.workspace.display()
    );

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received; stopping after the current version");
            watcher.cancel();
        }
    });

    let mut orchestrator =
        MigrationOrchestrator::new(plugin_loader(&config)).with_cancellation(cancel);

    match orchestrator.run(&config).await {
        Ok(report) => {
            print_report(&report, global.verbose);
            Ok(())
        }
        Err(err) => {
            print_abort(&err);
            Err(err).context("Migration run aborted")
        }
    }
}

fn build_config(args: &RunArgs, global: &GlobalArgs) -> Result<RunConfig> {
    let mut config = load_config(&args.connection, global)?;
    if let Some(target) = &args.target_version {
        config.target_version = Some(target.clone());
    }
    if args.continue_after_failure {
        config.continue_after_failure = true;
    }
    if args.no_transaction {
        config.transactional = false;
    }
    if args.auto_create_db {
        config.auto_create_database = true;
    }
    if args.strict_tokens {
        config.strict_tokens = true;
    }
    if let Some(size) = args.bulk_batch_size {
        config.bulk_batch_size = size;
    }
    // Flag tokens replace file tokens with the same key.
    for token in &args.tokens {
        config.tokens.retain(|t| t.key != token.key);
        config.tokens.push(token.clone());
    }
    Ok(config)
}

fn print_report(report: &RunReport, verbose: bool) {
    if report.is_noop() {
        println!(
            "Database is up to date at version {}",
            report.current_version
        );
        return;
    }

    for unit in &report.units {
        let marker = match unit.status {
            RecordStatus::Successful => "✓",
            RecordStatus::Partial => "!",
        };
        let mut line = format!(
            "  {} {} ({} scripts, {} batches",
            marker, unit.label, unit.scripts_run, unit.batches_run
        );
        if unit.rows_imported > 0 {
            line.push_str(&format!(", {} rows imported", unit.rows_imported));
        }
        line.push(')');
        println!("{}", line);

        for skipped in &unit.skipped {
            println!(
                "      skipped {} at batch {}: {}",
                skipped.script, skipped.batch, skipped.error
            );
        }
    }

    let elapsed = report.finished_at - report.started_at;
    println!();
    println!(
        "Applied {} version(s): {} -> {} in {:.2}s",
        report.applied_versions().len(),
        report.previous_version,
        report.current_version,
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    if report.is_partial() {
        println!("Some scripts were skipped; affected versions are recorded as Partial.");
    }
    if verbose {
        println!("Run id: {}", report.run_id);
    }
}

fn print_abort(err: &EngineError) {
    if let EngineError::Aborted { last_applied, .. } = err {
        eprintln!("Last fully applied version: {}", last_applied);
        eprintln!("Fix the failing script and run again; applied versions are skipped.");
    }
}
