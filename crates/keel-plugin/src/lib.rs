//! keel-plugin - Adapter registry and plugin loading for Keel
//!
//! Built-in adapters are registered by name. Other backends ship as dynamic
//! libraries in `<plugins_dir>/<platform>/`, each loaded into its own
//! [`PluginContext`] with its dependencies resolved from the host first and
//! the plugin's `plugin.yml` second.

pub mod context;
pub mod declaration;
pub mod error;
pub mod loader;
pub mod manifest;

pub use context::{PluginContext, Resolution, SharedRegistry};
pub use declaration::{
    DependencyDeclaration, PluginDeclaration, PluginRegistrar, ABI_VERSION, KEEL_DB_VERSION,
};
pub use error::{PluginError, PluginResult};
pub use loader::{AdapterHandle, PluginLoader};
pub use manifest::{PluginManifest, MANIFEST_FILE};
