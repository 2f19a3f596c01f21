//! Name-keyed adapter registry with runtime plugin loading

use crate::context::{PluginContext, SharedRegistry};
use crate::declaration::{
    version_satisfies, PluginDeclaration, PluginRegistrar, ABI_VERSION, DECLARATION_SYMBOL,
    KEEL_DB_VERSION,
};
use crate::error::{PluginError, PluginResult};
use keel_db::{AdapterFactory, PlatformAdapter};
use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// An adapter instance plus the plugin context its code lives in.
///
/// The adapter is dropped before the context, so a released plugin's
/// libraries stay mapped until the last adapter built from them is gone.
pub struct AdapterHandle {
    adapter: Box<dyn PlatformAdapter>,
    context: Option<Arc<PluginContext>>,
}

impl AdapterHandle {
    /// Plugin the adapter came from; `None` for built-ins.
    pub fn plugin(&self) -> Option<&str> {
        self.context.as_deref().map(PluginContext::name)
    }
}

impl Deref for AdapterHandle {
    type Target = dyn PlatformAdapter;

    fn deref(&self) -> &Self::Target {
        self.adapter.as_ref()
    }
}

impl std::fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("platform", &self.adapter.platform())
            .field("plugin", &self.plugin())
            .finish()
    }
}

/// Factories one plugin registered, and the context keeping their code
/// loaded. Factories drop first.
struct LoadedPlugin {
    factories: HashMap<String, AdapterFactory>,
    context: Arc<PluginContext>,
}

#[derive(Default)]
struct CollectingRegistrar {
    factories: HashMap<String, AdapterFactory>,
}

impl PluginRegistrar for CollectingRegistrar {
    fn register_adapter(&mut self, platform: &str, factory: AdapterFactory) {
        self.factories.insert(platform.to_ascii_lowercase(), factory);
    }
}

/// Finds and constructs platform adapters.
///
/// Built-in adapters are looked up first. Anything else is loaded from
/// `<plugins_dir>/<platform>/` on first use and stays registered until
/// [`PluginLoader::release`] is called.
pub struct PluginLoader {
    builtins: Mutex<HashMap<String, AdapterFactory>>,
    plugins_dir: Option<PathBuf>,
    shared: Mutex<SharedRegistry>,
    loaded: Mutex<HashMap<String, LoadedPlugin>>,
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginLoader {
    /// Loader with the built-in `duckdb` and `snowflake` adapters.
    pub fn new() -> Self {
        let loader = Self::empty();
        loader.register_builtin("duckdb", keel_db::duckdb::factory());
        loader.register_builtin("snowflake", keel_db::snowflake::factory());
        loader
    }

    /// Loader with nothing registered.
    pub fn empty() -> Self {
        Self {
            builtins: Mutex::new(HashMap::new()),
            plugins_dir: None,
            shared: Mutex::new(SharedRegistry::with_host_crates()),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_plugins_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugins_dir = Some(dir.into());
        self
    }

    pub fn plugins_dir(&self) -> Option<&Path> {
        self.plugins_dir.as_deref()
    }

    /// Register (or replace) an in-process adapter factory.
    pub fn register(&self, platform: &str, factory: AdapterFactory) -> PluginResult<()> {
        lock(&self.builtins)?.insert(platform.to_ascii_lowercase(), factory);
        Ok(())
    }

    fn register_builtin(&self, platform: &str, factory: AdapterFactory) {
        if let Ok(mut builtins) = self.builtins.lock() {
            builtins.insert(platform.to_string(), factory);
        }
    }

    /// Every platform name currently resolvable without touching disk.
    pub fn platforms(&self) -> PluginResult<Vec<String>> {
        let mut names: BTreeSet<String> = lock(&self.builtins)?.keys().cloned().collect();
        for plugin in lock(&self.loaded)?.values() {
            names.extend(plugin.factories.keys().cloned());
        }
        Ok(names.into_iter().collect())
    }

    /// Construct an adapter for `platform` bound to `connection_string`.
    pub fn load(&self, platform: &str, connection_string: &str) -> PluginResult<AdapterHandle> {
        let key = platform.to_ascii_lowercase();

        if let Some(factory) = lock(&self.builtins)?.get(&key).cloned() {
            log::debug!("Using built-in adapter '{}'", key);
            return Ok(AdapterHandle {
                adapter: factory(connection_string)?,
                context: None,
            });
        }

        if self.find_loaded(&key)?.is_none() && self.plugin_dir_for(&key).is_some() {
            self.load_plugin(&key)?;
        }

        match self.find_loaded(&key)? {
            Some((factory, context)) => Ok(AdapterHandle {
                adapter: factory(connection_string)?,
                context: Some(context),
            }),
            None => Err(PluginError::UnknownPlatform {
                platform: platform.to_string(),
                available: self.platforms()?.join(", "),
            }),
        }
    }

    fn find_loaded(&self, key: &str) -> PluginResult<Option<(AdapterFactory, Arc<PluginContext>)>> {
        Ok(lock(&self.loaded)?.values().find_map(|plugin| {
            plugin
                .factories
                .get(key)
                .map(|f| (Arc::clone(f), Arc::clone(&plugin.context)))
        }))
    }

    fn plugin_dir_for(&self, platform: &str) -> Option<PathBuf> {
        self.plugins_dir
            .as_ref()
            .map(|dir| dir.join(platform))
            .filter(|dir| dir.is_dir())
    }

    /// Load the plugin in `<plugins_dir>/<platform>/` and register its
    /// adapters. Loading an already loaded plugin is a no-op.
    pub fn load_plugin(&self, platform: &str) -> PluginResult<()> {
        let key = platform.to_ascii_lowercase();
        if self.is_loaded(&key)? {
            return Ok(());
        }

        let dir = match &self.plugins_dir {
            Some(root) => root.join(&key),
            None => {
                return Err(PluginError::PluginDirNotFound {
                    path: format!("<no plugins dir>/{}", key),
                })
            }
        };
        if !dir.is_dir() {
            return Err(PluginError::PluginDirNotFound {
                path: dir.display().to_string(),
            });
        }

        log::info!("Loading plugin '{}' from {}", key, dir.display());
        let mut context = PluginContext::create(&key, &dir);
        context.load_natives()?;
        let library = context.load_library()?;

        // SAFETY: the symbol is generated by `export_plugin!` as a
        // `PluginDeclaration` static; its type is checked through
        // `abi_version` before any field besides it is trusted.
        let declaration = unsafe {
            library
                .get::<*const PluginDeclaration>(DECLARATION_SYMBOL)
                .map_err(|_| PluginError::SymbolMissing {
                    path: context.library_path().display().to_string(),
                    symbol: "keel_plugin_declaration".to_string(),
                })?
                .read()
        };

        self.install(context, declaration)
    }

    /// Check a declaration, resolve its dependencies and register its
    /// adapters under the context's name.
    pub fn install(
        &self,
        mut context: PluginContext,
        declaration: PluginDeclaration,
    ) -> PluginResult<()> {
        check_declaration(context.name(), &declaration)?;

        {
            let mut shared = lock(&self.shared)?;
            for dependency in declaration.dependencies {
                context.resolve_dependency(&mut shared, dependency)?;
            }
        }

        let mut registrar = CollectingRegistrar::default();
        (declaration.register)(&mut registrar);
        log::debug!(
            "Plugin '{}' registered: {:?}",
            context.name(),
            registrar.factories.keys().collect::<Vec<_>>()
        );

        let name = context.name().to_string();
        lock(&self.loaded)?.insert(
            name,
            LoadedPlugin {
                factories: registrar.factories,
                context: Arc::new(context),
            },
        );
        Ok(())
    }

    pub fn is_loaded(&self, plugin: &str) -> PluginResult<bool> {
        Ok(lock(&self.loaded)?.contains_key(&plugin.to_ascii_lowercase()))
    }

    /// Forget a loaded plugin. Its libraries are unloaded once every
    /// [`AdapterHandle`] built from it has been dropped. Returns whether the
    /// plugin was loaded.
    pub fn release(&self, plugin: &str) -> PluginResult<bool> {
        let removed = lock(&self.loaded)?.remove(&plugin.to_ascii_lowercase());
        if let Some(loaded) = &removed {
            log::info!(
                "Released plugin '{}' ({} adapter handles outstanding)",
                loaded.context.name(),
                Arc::strong_count(&loaded.context) - 1
            );
        }
        Ok(removed.is_some())
    }
}

fn check_declaration(plugin: &str, declaration: &PluginDeclaration) -> PluginResult<()> {
    if declaration.abi_version != ABI_VERSION {
        return Err(PluginError::AbiMismatch {
            plugin: plugin.to_string(),
            what: "plugin ABI",
            expected: ABI_VERSION.to_string(),
            found: declaration.abi_version.to_string(),
        });
    }
    if !version_satisfies(declaration.keel_db_version, KEEL_DB_VERSION) {
        return Err(PluginError::AbiMismatch {
            plugin: plugin.to_string(),
            what: "keel-db",
            expected: KEEL_DB_VERSION.to_string(),
            found: declaration.keel_db_version.to_string(),
        });
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> PluginResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| PluginError::Poisoned(e.to_string()))
}

#[cfg(test)]
#[path = "loader_test.rs"]
mod tests;
