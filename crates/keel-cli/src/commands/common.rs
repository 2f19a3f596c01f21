//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use keel_core::RunConfig;
use keel_plugin::PluginLoader;
use std::path::Path;
use std::sync::Arc;

use crate::cli::{ConnectionArgs, GlobalArgs};

/// Load keel.yml (or `--config`) and apply the connection flags on top.
///
/// A workspace path from the config file is taken relative to the file's
/// directory. Without a config file the project directory is the workspace.
pub(crate) fn load_config(args: &ConnectionArgs, global: &GlobalArgs) -> Result<RunConfig> {
    let config_path = match &global.config {
        Some(path) => Some(path.clone()),
        None => RunConfig::find_in_dir(&args.path),
    };

    let mut config = match &config_path {
        Some(path) => {
            let mut config = RunConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            let base = path.parent().unwrap_or(Path::new("."));
            config.workspace = base.join(&config.workspace);
            log::debug!("Loaded config from {}", path.display());
            config
        }
        None => RunConfig {
            workspace: args.path.clone(),
            ..RunConfig::default()
        },
    };

    if let Some(cs) = &args.connection_string {
        config.connection_string = cs.clone();
    }
    if let Some(platform) = &args.platform {
        config.platform = platform.to_lowercase();
    }
    if let Some(schema) = &args.schema {
        config.schema = Some(schema.clone());
    }
    if let Some(table) = &args.table {
        config.ledger_table = Some(table.clone());
    }
    if let Some(dir) = &args.plugins_dir {
        config.plugins_dir = Some(dir.clone());
    }
    if let Some(secs) = args.command_timeout {
        config.command_timeout_secs = Some(secs);
    }
    Ok(config)
}

/// Adapter registry with the built-ins and, when configured, the plugin directory.
pub(crate) fn plugin_loader(config: &RunConfig) -> Arc<PluginLoader> {
    let loader = PluginLoader::new();
    let loader = match &config.plugins_dir {
        Some(dir) => loader.with_plugins_dir(dir),
        None => loader,
    };
    Arc::new(loader)
}

#[cfg(test)]
#[path = "common_test.rs"]
mod tests;
