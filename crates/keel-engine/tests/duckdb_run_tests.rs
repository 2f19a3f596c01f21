//! End-to-end runs against a DuckDB database file

use keel_core::{RunConfig, Token, Version};
use keel_db::{Connection, DbError, DuckDbAdapter, PlatformAdapter};
use keel_engine::{EngineError, MigrationOrchestrator, RecordStatus, RunPhase};
use keel_plugin::{
    PluginContext, PluginDeclaration, PluginLoader, PluginRegistrar, ABI_VERSION, KEEL_DB_VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    database_file: &'static str,
}

impl Workspace {
    fn new() -> Self {
        Self::with_database_file("keel.duckdb")
    }

    fn with_database_file(database_file: &'static str) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            database_file,
        }
    }

    fn scripts(&self) -> PathBuf {
        self.dir.path().join("scripts")
    }

    fn database(&self) -> PathBuf {
        self.dir.path().join(self.database_file)
    }

    fn write(&self, relative: &str, content: &str) {
        let path = self.scripts().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn config(&self) -> RunConfig {
        std::fs::create_dir_all(self.scripts()).unwrap();
        RunConfig {
            platform: "duckdb".to_string(),
            connection_string: format!("path={}", self.database().display()),
            workspace: self.scripts(),
            applied_by_user: Some("tester".to_string()),
            ..RunConfig::default()
        }
    }

    /// Run one query on a fresh handle, closed before returning.
    async fn query_i64(&self, sql: &str) -> i64 {
        let adapter = DuckDbAdapter::new(&self.database().display().to_string()).unwrap();
        let mut conn = adapter.connect().await.unwrap();
        conn.query(sql).await.unwrap()[0][0].as_i64().unwrap()
    }

    async fn query_strings(&self, sql: &str) -> Vec<String> {
        let adapter = DuckDbAdapter::new(&self.database().display().to_string()).unwrap();
        let mut conn = adapter.connect().await.unwrap();
        conn.query(sql)
            .await
            .unwrap()
            .iter()
            .map(|row| row[0].to_text().unwrap_or_default())
            .collect()
    }

    async fn table_exists(&self, name: &str) -> bool {
        self.query_i64(&format!(
            "SELECT count(*) FROM information_schema.tables WHERE table_name = '{}'",
            name
        ))
        .await
            > 0
    }
}

fn orchestrator() -> MigrationOrchestrator {
    MigrationOrchestrator::new(Arc::new(PluginLoader::new()))
}

fn versions(labels: &[&str]) -> Vec<Version> {
    labels.iter().map(|l| Version::parse(l).unwrap()).collect()
}

#[tokio::test]
async fn test_applies_pending_versions_in_order() {
    let ws = Workspace::new();
    ws.write("v1.00/01_customers.sql", "CREATE TABLE customers (id INTEGER, name VARCHAR);");
    ws.write(
        "v1.01/01_orders.sql",
        "CREATE TABLE orders (id INTEGER, customer_id INTEGER);\nINSERT INTO customers VALUES (1, 'Ana');",
    );
    ws.write("v0.10/01_first.sql", "CREATE TABLE first_table (id INTEGER);");

    let mut orch = orchestrator();
    let report = orch.run(&ws.config()).await.unwrap();

    assert_eq!(orch.phase(), &RunPhase::Completed);
    assert!(report.previous_version.is_zero());
    assert_eq!(report.current_version.label(), "v1.01");
    let applied: Vec<Version> = report.applied_versions().into_iter().cloned().collect();
    assert_eq!(applied, versions(&["v0.10", "v1.00", "v1.01"]));
    assert!(!report.is_partial());

    assert_eq!(ws.query_i64("SELECT count(*) FROM customers").await, 1);
    let recorded = ws
        .query_strings("SELECT Version FROM main.__keel_versions ORDER BY SequenceId")
        .await;
    assert_eq!(recorded, vec!["v0.10", "v1.00", "v1.01"]);
}

#[tokio::test]
async fn test_database_file_name_need_not_be_identifier() {
    for file in ["my-app.duckdb", "2024.duckdb", "app.v2.duckdb"] {
        let ws = Workspace::with_database_file(file);
        ws.write("v1.00/a.sql", "CREATE TABLE a (id INTEGER);");
        let config = ws.config();

        let report = orchestrator().run(&config).await.unwrap();
        assert_eq!(report.current_version.label(), "v1.00", "{file}");
        assert!(ws.table_exists("a").await, "{file}");

        let rows = orchestrator().list(&config).await.unwrap();
        assert_eq!(rows.len(), 1, "{file}");
    }
}

#[tokio::test]
async fn test_rerun_is_noop() {
    let ws = Workspace::new();
    ws.write("v1.00/a.sql", "CREATE TABLE t (id INTEGER);");
    let config = ws.config();

    orchestrator().run(&config).await.unwrap();
    let report = orchestrator().run(&config).await.unwrap();

    assert!(report.is_noop());
    assert_eq!(report.previous_version.label(), "v1.00");
    assert_eq!(report.current_version.label(), "v1.00");
    assert_eq!(
        ws.query_i64("SELECT count(*) FROM main.__keel_versions").await,
        1
    );
}

#[tokio::test]
async fn test_target_version_limits_run() {
    let ws = Workspace::new();
    ws.write("v1.00/a.sql", "CREATE TABLE a (id INTEGER);");
    ws.write("v2.00/b.sql", "CREATE TABLE b (id INTEGER);");

    let mut config = ws.config();
    config.target_version = Some(Version::parse("v1.00").unwrap());
    let report = orchestrator().run(&config).await.unwrap();
    assert_eq!(report.current_version.label(), "v1.00");
    assert!(!ws.table_exists("b").await);

    config.target_version = None;
    let report = orchestrator().run(&config).await.unwrap();
    assert_eq!(report.previous_version.label(), "v1.00");
    assert_eq!(report.current_version.label(), "v2.00");
    assert!(ws.table_exists("b").await);
}

#[tokio::test]
async fn test_lifecycle_units_wrap_versions() {
    let ws = Workspace::new();
    let log_step = |step: &str| {
        format!(
            "INSERT INTO run_log SELECT count(*) + 1, '{}' FROM run_log;",
            step
        )
    };
    ws.write(
        "_init/01_log.sql",
        &format!("CREATE TABLE run_log (seq INTEGER, step VARCHAR);\n{}", log_step("init")),
    );
    ws.write("_pre/01.sql", &log_step("pre"));
    ws.write("v1.00/01.sql", &log_step("v1.00"));
    ws.write("_post/01.sql", &log_step("post"));

    let report = orchestrator().run(&ws.config()).await.unwrap();
    let labels: Vec<&str> = report.units.iter().map(|u| u.label.as_str()).collect();
    assert_eq!(labels, vec!["_init", "_pre", "v1.00", "_post"]);
    assert_eq!(report.applied_versions().len(), 1);

    ws.write("v1.01/01.sql", &log_step("v1.01"));
    orchestrator().run(&ws.config()).await.unwrap();

    let steps = ws.query_strings("SELECT step FROM run_log ORDER BY seq").await;
    assert_eq!(
        steps,
        vec!["init", "pre", "v1.00", "post", "pre", "v1.01", "post"]
    );
}

#[tokio::test]
async fn test_failed_script_rolls_back_version() {
    let ws = Workspace::new();
    ws.write("v1.00/a.sql", "CREATE TABLE kept (id INTEGER);");
    ws.write("v1.01/a.sql", "CREATE TABLE half_done (id INTEGER);");
    ws.write("v1.01/b.sql", "SELECT * FROM no_such_table;");
    ws.write("v1.01/c.sql", "CREATE TABLE never_created (id INTEGER);");

    let mut orch = orchestrator();
    let err = orch.run(&ws.config()).await.unwrap_err();
    assert_eq!(orch.phase(), &RunPhase::Aborted);

    match err {
        EngineError::Aborted {
            last_applied,
            source,
        } => {
            assert_eq!(last_applied, "v1.00");
            match *source {
                EngineError::Execution {
                    unit,
                    script,
                    batch,
                    ..
                } => {
                    assert_eq!(unit, "v1.01");
                    assert_eq!(script, "b.sql");
                    assert_eq!(batch, 0);
                }
                other => panic!("unexpected source: {}", other),
            }
        }
        other => panic!("unexpected error: {}", other),
    }

    assert!(ws.table_exists("kept").await);
    assert!(!ws.table_exists("half_done").await);
    assert!(!ws.table_exists("never_created").await);
    let recorded = ws
        .query_strings("SELECT Version FROM main.__keel_versions")
        .await;
    assert_eq!(recorded, vec!["v1.00"]);
}

#[tokio::test]
async fn test_command_timeout_aborts_slow_version() {
    let ws = Workspace::new();
    ws.write("v1.00/a.sql", "CREATE TABLE fast (id INTEGER);");
    ws.write(
        "v1.01/a.sql",
        "CREATE TABLE slow AS SELECT count(*) AS n FROM range(20000000) a, range(1000) b;",
    );
    let mut config = ws.config();
    config.command_timeout_secs = Some(1);

    let started = std::time::Instant::now();
    let err = orchestrator().run(&config).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(20));

    match err {
        EngineError::Aborted {
            last_applied,
            source,
        } => {
            assert_eq!(last_applied, "v1.00");
            match *source {
                EngineError::Execution { unit, source, .. } => {
                    assert_eq!(unit, "v1.01");
                    assert!(matches!(source, DbError::Timeout { seconds: 1 }));
                }
                other => panic!("unexpected source: {}", other),
            }
        }
        other => panic!("unexpected error: {}", other),
    }

    assert!(ws.table_exists("fast").await);
    assert!(!ws.table_exists("slow").await);
    let recorded = ws
        .query_strings("SELECT Version FROM main.__keel_versions")
        .await;
    assert_eq!(recorded, vec!["v1.00"]);
}

#[tokio::test]
async fn test_fix_and_resume() {
    let ws = Workspace::new();
    ws.write("v1.00/a.sql", "CREATE TABLE a (id INTEGER);");
    ws.write("v1.01/a.sql", "INSERT INTO missing VALUES (1);");
    let config = ws.config();

    assert!(orchestrator().run(&config).await.is_err());

    ws.write("v1.01/a.sql", "INSERT INTO a VALUES (1);");
    let report = orchestrator().run(&config).await.unwrap();
    assert_eq!(report.previous_version.label(), "v1.00");
    let applied: Vec<Version> = report.applied_versions().into_iter().cloned().collect();
    assert_eq!(applied, versions(&["v1.01"]));
    assert_eq!(ws.query_i64("SELECT count(*) FROM a").await, 1);
}

#[tokio::test]
async fn test_tokens_substituted_into_scripts() {
    let ws = Workspace::new();
    ws.write(
        "v1.00/a.sql",
        "CREATE SCHEMA ${APP_SCHEMA};\nCREATE TABLE ${APP_SCHEMA}.settings (k VARCHAR, v VARCHAR);\n\
         INSERT INTO ${APP_SCHEMA}.settings VALUES ('ledger', '${KEEL_TABLE_NAME}');",
    );
    let mut config = ws.config();
    config.tokens = vec![Token::new("APP_SCHEMA", "sales")];
    config.strict_tokens = true;

    orchestrator().run(&config).await.unwrap();
    let values = ws.query_strings("SELECT v FROM sales.settings").await;
    assert_eq!(values, vec!["__keel_versions"]);
}

#[tokio::test]
async fn test_unresolved_strict_token_stops_before_execution() {
    let ws = Workspace::new();
    ws.write("v1.00/a.sql", "CREATE TABLE a (id INTEGER);");
    ws.write("v1.01/a.sql", "CREATE TABLE ${NOT_SET} (id INTEGER);");
    let mut config = ws.config();
    config.strict_tokens = true;

    let err = orchestrator().run(&config).await.unwrap_err();
    assert!(err.is_validation());
    assert!(!ws.table_exists("a").await);
}

#[tokio::test]
async fn test_data_files_loaded_with_version() {
    let ws = Workspace::new();
    ws.write(
        "v1.00/01_visitors.sql",
        "CREATE TABLE visitors (id INTEGER, name VARCHAR);",
    );
    ws.write("v1.00/visitors.csv", "id,name\n1,Ana\n2,Bo\n3,\n");

    let mut config = ws.config();
    config.bulk_batch_size = 2;
    let report = orchestrator().run(&config).await.unwrap();

    assert_eq!(report.units[0].rows_imported, 3);
    assert_eq!(ws.query_i64("SELECT count(*) FROM visitors").await, 3);
}

#[tokio::test]
async fn test_bad_data_file_aborts_version() {
    let ws = Workspace::new();
    ws.write(
        "v1.00/01_visitors.sql",
        "CREATE TABLE visitors (id INTEGER NOT NULL, name VARCHAR);",
    );
    ws.write("v1.00/visitors.csv", "id,name\n1,Ana\n,Bo\n");

    let err = orchestrator().run(&ws.config()).await.unwrap_err();
    match err {
        EngineError::Aborted { source, .. } => {
            assert!(matches!(
                *source,
                EngineError::BulkImport {
                    first_row: 1,
                    last_row: 2,
                    ..
                }
            ))
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!ws.table_exists("visitors").await);
}

#[tokio::test]
async fn test_cancelled_run_applies_nothing() {
    let ws = Workspace::new();
    ws.write("v1.00/a.sql", "CREATE TABLE a (id INTEGER);");

    let mut orch = orchestrator();
    orch.cancellation_token().cancel();
    let err = orch.run(&ws.config()).await.unwrap_err();
    match err {
        EngineError::Aborted {
            last_applied,
            source,
        } => {
            assert_eq!(last_applied, "v0");
            assert!(matches!(*source, EngineError::Cancelled { .. }));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!ws.table_exists("a").await);
}

#[tokio::test]
async fn test_list_reads_ledger_rows() {
    let ws = Workspace::new();
    let config = ws.config();

    assert!(orchestrator().list(&config).await.unwrap().is_empty());

    ws.write("v1.00/a.sql", "CREATE TABLE a (id INTEGER);");
    ws.write("v1.01/a.sql", "CREATE TABLE b (id INTEGER);");
    orchestrator().run(&config).await.unwrap();

    let rows = orchestrator().list(&config).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].version, "v1.00");
    assert_eq!(rows[1].version, "v1.01");
    assert!(rows[0].sequence_id < rows[1].sequence_id);
    assert_eq!(rows[0].applied_by_user, "tester");
    assert_eq!(rows[0].applied_by_tool, "keel");
    assert_eq!(rows[0].status, RecordStatus::Successful.as_str());
    assert_eq!(rows[0].checksum.as_deref().map(str::len), Some(64));
}

fn register_duck_plugin(registrar: &mut dyn PluginRegistrar) {
    registrar.register_adapter("plugduck", keel_db::duckdb::factory());
}

fn install_duck_plugin(loader: &PluginLoader, dir: &TempDir) {
    let declaration = PluginDeclaration {
        abi_version: ABI_VERSION,
        keel_db_version: KEEL_DB_VERSION,
        dependencies: &[],
        register: register_duck_plugin,
    };
    loader
        .install(PluginContext::create("duckplug", dir.path()), declaration)
        .unwrap();
}

#[tokio::test]
async fn test_plugin_released_when_run_ends() {
    let ws = Workspace::new();
    let plugin_dir = TempDir::new().unwrap();
    let loader = Arc::new(PluginLoader::empty());
    let mut config = ws.config();
    config.platform = "plugduck".to_string();

    install_duck_plugin(&loader, &plugin_dir);
    ws.write("v1.00/a.sql", "CREATE TABLE a (id INTEGER);");
    let mut orch = MigrationOrchestrator::new(Arc::clone(&loader));
    orch.run(&config).await.unwrap();
    assert!(!loader.is_loaded("duckplug").unwrap());

    install_duck_plugin(&loader, &plugin_dir);
    ws.write("v1.01/a.sql", "INSERT INTO missing VALUES (1);");
    assert!(orch.run(&config).await.is_err());
    assert!(!loader.is_loaded("duckplug").unwrap());

    install_duck_plugin(&loader, &plugin_dir);
    let rows = orch.list(&config).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!loader.is_loaded("duckplug").unwrap());
}
