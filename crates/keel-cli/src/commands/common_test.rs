use super::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn connection_args(path: &Path) -> ConnectionArgs {
    ConnectionArgs {
        path: path.to_path_buf(),
        connection_string: None,
        platform: None,
        schema: None,
        table: None,
        plugins_dir: None,
        command_timeout: None,
    }
}

fn global() -> GlobalArgs {
    GlobalArgs {
        verbose: false,
        config: None,
    }
}

#[test]
fn test_no_config_file_uses_project_dir() {
    let dir = TempDir::new().unwrap();
    let config = load_config(&connection_args(dir.path()), &global()).unwrap();
    assert_eq!(config.workspace, dir.path());
    assert_eq!(config.platform, "duckdb");
}

#[test]
fn test_config_file_then_flags() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("keel.yml"),
        "platform: snowflake\nconnection_string: host=a;db=b\nworkspace: scripts\nschema: ops\n",
    )
    .unwrap();

    let mut args = connection_args(dir.path());
    args.connection_string = Some("host=x;db=y".to_string());
    args.table = Some("applied".to_string());
    args.command_timeout = Some(30);

    let config = load_config(&args, &global()).unwrap();
    assert_eq!(config.platform, "snowflake");
    assert_eq!(config.connection_string, "host=x;db=y");
    assert_eq!(config.workspace, dir.path().join("scripts"));
    assert_eq!(config.schema.as_deref(), Some("ops"));
    assert_eq!(config.ledger_table.as_deref(), Some("applied"));
    assert_eq!(config.command_timeout_secs, Some(30));
}

#[test]
fn test_explicit_config_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ci.yml");
    std::fs::write(&path, "platform: duckdb\nstrict_tokens: true\n").unwrap();

    let global = GlobalArgs {
        verbose: false,
        config: Some(path),
    };
    let config = load_config(&connection_args(Path::new("elsewhere")), &global).unwrap();
    assert!(config.strict_tokens);
    assert_eq!(config.workspace, dir.path().join("."));
}

#[test]
fn test_invalid_config_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("keel.yml"), "not_a_field: 1\n").unwrap();
    let err = load_config(&connection_args(dir.path()), &global()).unwrap_err();
    assert!(err.to_string().contains("Failed to load config"));
}

#[test]
fn test_plugin_loader_uses_configured_dir() {
    let config = RunConfig {
        plugins_dir: Some(PathBuf::from("/opt/keel/plugins")),
        ..RunConfig::default()
    };
    let loader = plugin_loader(&config);
    assert_eq!(loader.plugins_dir(), Some(Path::new("/opt/keel/plugins")));
    assert!(loader.platforms().unwrap().contains(&"duckdb".to_string()));
}
