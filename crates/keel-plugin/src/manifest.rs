//! plugin.yml: the private dependency manifest of one plugin directory

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Manifest file looked up in each plugin directory.
pub const MANIFEST_FILE: &str = "plugin.yml";

/// A managed dependency shipped alongside the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyEntry {
    pub name: String,
    pub version: String,
    /// Library path, relative to the plugin directory
    pub path: PathBuf,
}

/// A native library the plugin links against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NativeEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Parsed plugin.yml.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    /// Adapter library file name; platform default when absent
    #[serde(default)]
    pub library: Option<PathBuf>,

    #[serde(default)]
    pub dependencies: Vec<DependencyEntry>,

    #[serde(default)]
    pub native: Vec<NativeEntry>,
}

impl PluginManifest {
    /// Read `plugin.yml` from `dir`. `Ok(None)` when the directory has none.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>, String> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        serde_yaml::from_str(&content)
            .map(Some)
            .map_err(|e| format!("malformed {}: {}", path.display(), e))
    }

    pub fn dependency(&self, name: &str) -> Option<&DependencyEntry> {
        self.dependencies.iter().find(|d| d.name == name)
    }
}
