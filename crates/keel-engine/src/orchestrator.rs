//! The migration run
//!
//! One run: obtain an adapter, bootstrap database and ledger, read the
//! applied version, prepare every pending unit (scripts read, tokens
//! substituted, batches split) and then apply the units strictly in order.
//! A unit is recorded in the ledger only once all of its scripts and data
//! files have been processed. The adapter's plugin, if any, is released
//! when the run ends.

use crate::error::{EngineError, EngineResult};
use crate::exec::with_timeout;
use crate::importer::BulkImporter;
use crate::ledger::{LedgerRecord, NewLedgerEntry, RecordStatus, VersionLedger};
use crate::report::{RunReport, SkippedScript, UnitReport};
use chrono::{DateTime, Utc};
use keel_core::{
    BulkDataFile, CoreResult, MigrationUnit, RunConfig, TokenReplacer, UnitKind, Version,
    VersionResolver,
};
use keel_db::{Connection, PlatformAdapter};
use keel_plugin::{AdapterHandle, PluginLoader};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Where the orchestrator is in its run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Scanning,
    Executing(String),
    Recording(String),
    Completed,
    Aborted,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => f.write_str("idle"),
            RunPhase::Scanning => f.write_str("scanning"),
            RunPhase::Executing(unit) => write!(f, "executing {}", unit),
            RunPhase::Recording(unit) => write!(f, "recording {}", unit),
            RunPhase::Completed => f.write_str("completed"),
            RunPhase::Aborted => f.write_str("aborted"),
        }
    }
}

/// What to do when a batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePolicy {
    /// Stop the run (after rolling back, when transactional)
    Abort,
    /// Log, skip the rest of the failing script, go on with the next one
    SkipScript,
}

/// Per-unit execution mode, fixed before the unit starts.
#[derive(Debug, Clone, Copy)]
struct UnitMode {
    transactional: bool,
    on_failure: FailurePolicy,
}

impl UnitMode {
    fn for_run(adapter: &dyn PlatformAdapter, config: &RunConfig) -> Self {
        let atomic = adapter.capabilities().atomic_ddl_supported;
        // Skipping is only allowed where nothing could have been rolled back.
        let on_failure = if !atomic && config.continue_after_failure {
            FailurePolicy::SkipScript
        } else {
            FailurePolicy::Abort
        };
        Self {
            transactional: atomic && config.transactional,
            on_failure,
        }
    }
}

/// A script with tokens substituted and batches split.
#[derive(Debug)]
struct PreparedScript {
    relative_path: String,
    batches: Vec<String>,
}

#[derive(Debug)]
struct PreparedUnit {
    unit: MigrationUnit,
    scripts: Vec<PreparedScript>,
}

impl PreparedUnit {
    fn prepare(
        unit: MigrationUnit,
        adapter: &dyn PlatformAdapter,
        replacer: &TokenReplacer,
    ) -> CoreResult<Self> {
        let scripts = unit
            .scripts
            .iter()
            .map(|script| {
                let sql = replacer.replace(&script.relative_path, &script.sql)?;
                Ok(PreparedScript {
                    relative_path: script.relative_path.clone(),
                    batches: adapter.split_statements(&sql),
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self { unit, scripts })
    }
}

/// Result of running one script.
enum ScriptOutcome {
    Completed { batches: usize },
    Skipped(SkippedScript),
}

/// Applies pending migrations for one run configuration at a time.
pub struct MigrationOrchestrator {
    loader: Arc<PluginLoader>,
    cancel: CancellationToken,
    phase: RunPhase,
}

impl MigrationOrchestrator {
    pub fn new(loader: Arc<PluginLoader>) -> Self {
        Self {
            loader,
            cancel: CancellationToken::new(),
            phase: RunPhase::Idle,
        }
    }

    /// Use an externally owned token; cancellation is honoured between units.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    /// Apply every pending version up to `config.target_version`.
    pub async fn run(&mut self, config: &RunConfig) -> EngineResult<RunReport> {
        self.phase = RunPhase::Idle;
        let result = self.run_inner(config).await;
        self.phase = match &result {
            Ok(_) => RunPhase::Completed,
            Err(_) => RunPhase::Aborted,
        };
        result
    }

    /// Every ledger row, or nothing when the ledger does not exist yet.
    pub async fn list(&self, config: &RunConfig) -> EngineResult<Vec<LedgerRecord>> {
        config.validate()?;
        let adapter = self.loader.load(&config.platform, &config.connection_string)?;
        let result = Self::list_on(&*adapter, config).await;
        self.release_adapter(adapter);
        result
    }

    async fn list_on(
        adapter: &dyn PlatformAdapter,
        config: &RunConfig,
    ) -> EngineResult<Vec<LedgerRecord>> {
        let ledger = VersionLedger::new(
            adapter,
            config.schema.as_deref(),
            config.ledger_table.as_deref(),
        )?;
        let mut conn = adapter.connect().await?;
        if !ledger.exists(conn.as_mut()).await? {
            return Ok(Vec::new());
        }
        ledger.all_versions(conn.as_mut()).await
    }

    /// Drop the adapter, then release the plugin it came from so the
    /// plugin's libraries unload once no other handle uses them.
    fn release_adapter(&self, adapter: AdapterHandle) {
        let plugin = adapter.plugin().map(str::to_string);
        drop(adapter);
        if let Some(plugin) = plugin {
            if let Err(e) = self.loader.release(&plugin) {
                log::warn!("Failed to release plugin '{}': {}", plugin, e);
            }
        }
    }

    async fn run_inner(&mut self, config: &RunConfig) -> EngineResult<RunReport> {
        let started_at = Utc::now();
        config.validate()?;

        let adapter = self.loader.load(&config.platform, &config.connection_string)?;
        let result = self.run_on(&*adapter, config, started_at).await;
        self.release_adapter(adapter);
        result
    }

    async fn run_on(
        &mut self,
        adapter: &dyn PlatformAdapter,
        config: &RunConfig,
        started_at: DateTime<Utc>,
    ) -> EngineResult<RunReport> {
        let run_id = Uuid::new_v4();
        let info = adapter.connection_info();
        log::info!(
            "Run {} on {} ({})",
            run_id,
            adapter.platform(),
            info.data_source.as_deref().unwrap_or("default")
        );

        let ledger = VersionLedger::new(
            adapter,
            config.schema.as_deref(),
            config.ledger_table.as_deref(),
        )?;
        self.bootstrap(adapter, &ledger, config).await?;

        let previous_version = {
            let mut conn = adapter.connect().await?;
            ledger.current_version(conn.as_mut()).await?
        };
        log::info!("Current version: {}", previous_version);

        self.phase = RunPhase::Scanning;
        let units = self.scan(adapter, &ledger, config, &previous_version)?;
        if units.is_empty() {
            log::info!("Database is up to date at {}", previous_version);
        }

        let mode = UnitMode::for_run(adapter, config);
        let mut last_applied = previous_version.clone();
        let mut reports = Vec::with_capacity(units.len());

        for prepared in &units {
            let label = prepared.unit.label();
            let outcome = if self.cancel.is_cancelled() {
                Err(EngineError::Cancelled { next: label })
            } else {
                self.run_unit(adapter, &ledger, prepared, config, mode).await
            };
            match outcome {
                Ok(report) => {
                    if let Some(version) = &report.version {
                        last_applied = version.clone();
                    }
                    reports.push(report);
                }
                Err(source) => {
                    log::error!("Run aborted at {}: {}", prepared.unit.label(), source);
                    return Err(EngineError::Aborted {
                        last_applied: last_applied.to_string(),
                        source: Box::new(source),
                    });
                }
            }
        }

        Ok(RunReport {
            run_id,
            platform: adapter.platform().to_string(),
            started_at,
            finished_at: Utc::now(),
            previous_version,
            current_version: last_applied,
            units: reports,
        })
    }

    /// Make sure the database and ledger exist. Safe to repeat.
    async fn bootstrap(
        &self,
        adapter: &dyn PlatformAdapter,
        ledger: &VersionLedger<'_>,
        config: &RunConfig,
    ) -> EngineResult<()> {
        if let Some(database) = ledger.database() {
            let mut master = adapter.connect_master().await?;
            if !ledger.database_exists(master.as_mut()).await? {
                if !config.auto_create_database {
                    return Err(EngineError::DatabaseNotFound {
                        database: database.to_string(),
                    });
                }
                ledger.create_database(master.as_mut()).await?;
            }
        }

        let mut conn = adapter.connect().await?;
        if !ledger.exists(conn.as_mut()).await? {
            if adapter.capabilities().schema_supported
                && !ledger.schema().eq_ignore_ascii_case(adapter.default_schema())
            {
                ledger.create_schema(conn.as_mut()).await?;
            }
            ledger.create(conn.as_mut()).await?;
        }
        Ok(())
    }

    /// Resolve pending versions and prepare every unit to run, so token and
    /// layout errors surface before anything executes.
    fn scan(
        &self,
        adapter: &dyn PlatformAdapter,
        ledger: &VersionLedger<'_>,
        config: &RunConfig,
        current: &Version,
    ) -> EngineResult<Vec<PreparedUnit>> {
        let resolver = VersionResolver::new(&config.workspace);
        let pending = resolver.pending(current, config.target_version.as_ref())?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        log::info!(
            "{} pending version(s): {}",
            pending.len(),
            pending
                .iter()
                .map(|d| d.version.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut units = Vec::with_capacity(pending.len() + 3);
        if current.is_zero() {
            units.extend(resolver.lifecycle_unit(UnitKind::Init)?);
        }
        units.extend(resolver.lifecycle_unit(UnitKind::Pre)?);
        for dir in &pending {
            units.push(dir.load()?);
        }
        units.extend(resolver.lifecycle_unit(UnitKind::Post)?);

        let replacer = config
            .token_replacer()?
            .with_tokens(ledger.reserved_tokens())?;
        let prepared = units
            .into_iter()
            .map(|unit| PreparedUnit::prepare(unit, adapter, &replacer))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(prepared)
    }

    async fn run_unit(
        &mut self,
        adapter: &dyn PlatformAdapter,
        ledger: &VersionLedger<'_>,
        prepared: &PreparedUnit,
        config: &RunConfig,
        mode: UnitMode,
    ) -> EngineResult<UnitReport> {
        let label = prepared.unit.label();
        self.phase = RunPhase::Executing(label.clone());
        log::info!(
            "Applying {} ({} scripts, {} data files{})",
            label,
            prepared.scripts.len(),
            prepared.unit.data_files.len(),
            if mode.transactional { ", transactional" } else { "" }
        );

        let mut conn = adapter.connect().await?;
        if mode.transactional {
            conn.begin().await?;
        }

        let result = self
            .apply_unit(conn.as_mut(), ledger, prepared, config, mode)
            .await;

        match result {
            Ok(report) => {
                if mode.transactional {
                    conn.commit().await?;
                }
                Ok(report)
            }
            Err(e) => {
                if mode.transactional {
                    match conn.rollback().await {
                        Ok(()) => log::error!("Rolled back {}", label),
                        Err(rb) => log::error!("Rollback of {} failed: {}", label, rb),
                    }
                }
                Err(e)
            }
        }
    }

    async fn apply_unit(
        &mut self,
        conn: &mut dyn Connection,
        ledger: &VersionLedger<'_>,
        prepared: &PreparedUnit,
        config: &RunConfig,
        mode: UnitMode,
    ) -> EngineResult<UnitReport> {
        let label = prepared.unit.label();
        let mut report = UnitReport {
            label: label.clone(),
            version: None,
            status: RecordStatus::Successful,
            scripts_run: 0,
            batches_run: 0,
            rows_imported: 0,
            skipped: Vec::new(),
        };

        for script in &prepared.scripts {
            match execute_script(conn, &label, script, config, mode.on_failure).await? {
                ScriptOutcome::Completed { batches } => {
                    report.scripts_run += 1;
                    report.batches_run += batches;
                }
                ScriptOutcome::Skipped(skipped) => report.skipped.push(skipped),
            }
        }

        let importer = BulkImporter::new(config.bulk_batch_size).with_timeout(config.command_timeout());
        for file in &prepared.unit.data_files {
            report.rows_imported += if mode.transactional {
                importer.import(conn, file).await?
            } else {
                import_in_own_transaction(conn, &importer, file).await?
            };
        }

        if !report.skipped.is_empty() {
            report.status = RecordStatus::Partial;
            log::warn!(
                "{} completed with {} skipped script(s)",
                label,
                report.skipped.len()
            );
        }

        if let UnitKind::Version(version) = &prepared.unit.kind {
            self.phase = RunPhase::Recording(label);
            let entry = NewLedgerEntry {
                version: version.clone(),
                applied_on: Utc::now(),
                applied_by_user: config.applied_by(),
                applied_by_tool: config.tool_name.clone(),
                applied_by_tool_version: config.tool_version.clone(),
                checksum: prepared.unit.checksum(),
                status: report.status,
                additional_artifacts: None,
            };
            ledger.record(conn, &entry).await?;
            report.version = Some(version.clone());
        }

        Ok(report)
    }
}

async fn execute_script(
    conn: &mut dyn Connection,
    unit: &str,
    script: &PreparedScript,
    config: &RunConfig,
    on_failure: FailurePolicy,
) -> EngineResult<ScriptOutcome> {
    log::debug!(
        "Running {} ({} batches)",
        script.relative_path,
        script.batches.len()
    );
    for (index, batch) in script.batches.iter().enumerate() {
        let Err(source) = with_timeout(config.command_timeout(), conn.execute_batch(batch)).await
        else {
            continue;
        };
        return match on_failure {
            FailurePolicy::SkipScript => {
                log::warn!(
                    "Skipping rest of {}/{}: batch {} failed: {}",
                    unit,
                    script.relative_path,
                    index,
                    source
                );
                Ok(ScriptOutcome::Skipped(SkippedScript {
                    unit: unit.to_string(),
                    script: script.relative_path.clone(),
                    batch: index,
                    error: source.to_string(),
                }))
            }
            FailurePolicy::Abort => Err(EngineError::Execution {
                unit: unit.to_string(),
                script: script.relative_path.clone(),
                batch: index,
                source,
            }),
        };
    }
    Ok(ScriptOutcome::Completed {
        batches: script.batches.len(),
    })
}

/// Import one file with its own transaction so a failed file leaves no rows.
async fn import_in_own_transaction(
    conn: &mut dyn Connection,
    importer: &BulkImporter,
    file: &BulkDataFile,
) -> EngineResult<u64> {
    conn.begin().await?;
    match importer.import(conn, file).await {
        Ok(rows) => {
            conn.commit().await?;
            Ok(rows)
        }
        Err(e) => {
            if let Err(rb) = conn.rollback().await {
                log::error!("Rollback of {} failed: {}", file.relative_path, rb);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
