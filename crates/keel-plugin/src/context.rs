//! Isolated plugin contexts and the shared dependency registry
//!
//! Each plugin directory gets its own [`PluginContext`] owning every library
//! loaded on its behalf. Libraries are opened with local symbol visibility,
//! so two plugins carrying different versions of one dependency never see
//! each other's symbols. Dropping the last reference to a context unloads
//! its libraries.

use crate::declaration::{version_satisfies, DependencyDeclaration};
use crate::error::{PluginError, PluginResult};
use crate::manifest::PluginManifest;
use libloading::Library;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// Libraries and manifest of one loaded plugin.
///
/// Field order is drop order: the plugin library goes before the
/// dependencies it links against, which go before native libraries.
#[derive(Debug)]
pub struct PluginContext {
    name: String,
    dir: PathBuf,
    library: Option<Arc<Library>>,
    dependencies: Vec<Arc<Library>>,
    natives: Vec<Library>,
    manifest: Option<PluginManifest>,
    creation_error: Option<String>,
}

impl PluginContext {
    /// Create the context for the plugin in `dir`.
    ///
    /// A manifest that cannot be read does not fail creation; the diagnostic
    /// is kept and reported if resolution later depends on the manifest.
    pub fn create(name: &str, dir: &Path) -> Self {
        let (manifest, creation_error) = match PluginManifest::load_from_dir(dir) {
            Ok(manifest) => (manifest, None),
            Err(e) => {
                log::warn!("Plugin '{}': {}", name, e);
                (None, Some(e))
            }
        };
        Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            library: None,
            dependencies: Vec::new(),
            natives: Vec::new(),
            manifest,
            creation_error,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> Option<&PluginManifest> {
        self.manifest.as_ref()
    }

    /// Diagnostic captured when the context was created, if any.
    pub fn creation_error(&self) -> Option<&str> {
        self.creation_error.as_deref()
    }

    /// Number of libraries this context keeps loaded.
    pub fn library_count(&self) -> usize {
        usize::from(self.library.is_some()) + self.dependencies.len() + self.natives.len()
    }

    /// Best explanation for a failed lookup against this context.
    pub fn root_cause(&self, what: &str) -> String {
        if let Some(e) = &self.creation_error {
            return e.clone();
        }
        match &self.manifest {
            None => format!(
                "no {} in {}",
                crate::manifest::MANIFEST_FILE,
                self.dir.display()
            ),
            Some(_) => format!("{} not listed in {}", what, crate::manifest::MANIFEST_FILE),
        }
    }

    /// Path of the adapter library: the manifest's `library`, else the
    /// platform-conventional file name for `keel_<name>`.
    pub fn library_path(&self) -> PathBuf {
        let file = self
            .manifest
            .as_ref()
            .and_then(|m| m.library.clone())
            .unwrap_or_else(|| {
                PathBuf::from(libloading::library_filename(format!("keel_{}", self.name)))
            });
        self.dir.join(file)
    }

    /// Load every native library listed in the manifest. Natives are never
    /// looked up anywhere but the plugin directory.
    pub fn load_natives(&mut self) -> PluginResult<()> {
        let entries = match &self.manifest {
            Some(manifest) => manifest.native.clone(),
            None => return Ok(()),
        };
        for entry in entries {
            let path = self.dir.join(&entry.path);
            let library = open_library(&path).map_err(|reason| PluginError::NativeLibrary {
                plugin: self.name.clone(),
                name: entry.name.clone(),
                reason,
            })?;
            log::debug!("Plugin '{}': loaded native {}", self.name, entry.name);
            self.natives.push(library);
        }
        Ok(())
    }

    /// Open the adapter library itself.
    pub fn load_library(&mut self) -> PluginResult<Arc<Library>> {
        let path = self.library_path();
        let library = open_library(&path).map_err(|reason| PluginError::LibraryLoad {
            path: path.display().to_string(),
            reason: match &self.creation_error {
                Some(cause) => format!("{} ({})", reason, cause),
                None => reason,
            },
        })?;
        let library = Arc::new(library);
        self.library = Some(Arc::clone(&library));
        Ok(library)
    }

    /// Resolve one declared dependency: shared registry first, then the
    /// plugin's own manifest.
    pub fn resolve_dependency(
        &mut self,
        shared: &mut SharedRegistry,
        dependency: &DependencyDeclaration,
    ) -> PluginResult<Resolution> {
        if let Some(hit) = shared.lookup(dependency.name, dependency.version) {
            log::debug!(
                "Plugin '{}': {} {} resolved from shared registry",
                self.name,
                dependency.name,
                dependency.version
            );
            return Ok(match hit {
                SharedHit::Host => Resolution::Host,
                SharedHit::Library(library) => {
                    self.dependencies.push(library);
                    Resolution::Shared
                }
            });
        }

        let entry = self
            .manifest
            .as_ref()
            .and_then(|m| m.dependency(dependency.name))
            .filter(|entry| version_satisfies(dependency.version, &entry.version))
            .cloned();
        let Some(entry) = entry else {
            return Err(PluginError::DependencyUnresolved {
                plugin: self.name.clone(),
                dependency: format!("{} {}", dependency.name, dependency.version),
                root_cause: self.root_cause(dependency.name),
            });
        };

        let path = self.dir.join(&entry.path);
        let library = open_library(&path).map_err(|reason| PluginError::LibraryLoad {
            path: path.display().to_string(),
            reason,
        })?;
        let library = Arc::new(library);
        shared.insert_library(&entry.name, &entry.version, &library);
        self.dependencies.push(library);
        log::debug!(
            "Plugin '{}': {} {} loaded from {}",
            self.name,
            entry.name,
            entry.version,
            path.display()
        );
        Ok(Resolution::Manifest(path))
    }
}

/// Where a dependency was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Provided by the host binary
    Host,
    /// Reused from a library another plugin already loaded
    Shared,
    /// Loaded from the plugin's manifest
    Manifest(PathBuf),
}

fn open_library(path: &Path) -> Result<Library, String> {
    // SAFETY: loading runs the library's initialisers. Plugin directories are
    // operator-controlled and only hold libraries built for this host.
    unsafe { Library::new(path) }.map_err(|e| e.to_string())
}

#[derive(Debug)]
enum SharedSource {
    Host,
    Library(Weak<Library>),
}

#[derive(Debug)]
struct SharedEntry {
    version: String,
    source: SharedSource,
}

/// Result of a shared registry lookup.
pub enum SharedHit {
    Host,
    Library(Arc<Library>),
}

/// Dependencies already present in the process: crates linked into the
/// host, and libraries some plugin has loaded and still holds.
///
/// Library entries are weak; once every context holding one is released the
/// entry stops matching.
#[derive(Debug, Default)]
pub struct SharedRegistry {
    entries: HashMap<String, Vec<SharedEntry>>,
}

impl SharedRegistry {
    /// Registry seeded with the crates every plugin links against.
    pub fn with_host_crates() -> Self {
        let mut registry = Self::default();
        registry.insert_host("keel-db", keel_db::VERSION);
        registry
    }

    pub fn insert_host(&mut self, name: &str, version: &str) {
        self.entries
            .entry(name.to_string())
            .or_default()
            .push(SharedEntry {
                version: version.to_string(),
                source: SharedSource::Host,
            });
    }

    fn insert_library(&mut self, name: &str, version: &str, library: &Arc<Library>) {
        self.entries
            .entry(name.to_string())
            .or_default()
            .push(SharedEntry {
                version: version.to_string(),
                source: SharedSource::Library(Arc::downgrade(library)),
            });
    }

    pub fn lookup(&mut self, name: &str, version: &str) -> Option<SharedHit> {
        let entries = self.entries.get_mut(name)?;
        entries.retain(|e| match &e.source {
            SharedSource::Host => true,
            SharedSource::Library(weak) => weak.strong_count() > 0,
        });
        entries
            .iter()
            .filter(|e| version_satisfies(version, &e.version))
            .find_map(|e| match &e.source {
                SharedSource::Host => Some(SharedHit::Host),
                SharedSource::Library(weak) => weak.upgrade().map(SharedHit::Library),
            })
    }

    pub fn contains(&mut self, name: &str, version: &str) -> bool {
        self.lookup(name, version).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MANIFEST_FILE;
    use tempfile::TempDir;

    const PGWIRE: DependencyDeclaration = DependencyDeclaration {
        name: "keel-pgwire",
        version: "0.3",
    };

    #[test]
    fn test_host_crates_resolve_first() {
        let dir = TempDir::new().unwrap();
        let mut context = PluginContext::create("postgres", dir.path());
        let mut shared = SharedRegistry::with_host_crates();
        let keel_db = DependencyDeclaration {
            name: "keel-db",
            version: "*",
        };
        assert_eq!(
            context.resolve_dependency(&mut shared, &keel_db).unwrap(),
            Resolution::Host
        );
        assert_eq!(context.library_count(), 0);
    }

    #[test]
    fn test_host_version_mismatch_falls_through() {
        let mut shared = SharedRegistry::with_host_crates();
        assert!(shared.contains("keel-db", keel_db::VERSION));
        assert!(!shared.contains("keel-db", "999"));
        assert!(!shared.contains("keel-pgwire", "*"));
    }

    #[test]
    fn test_unresolved_without_manifest() {
        let dir = TempDir::new().unwrap();
        let mut context = PluginContext::create("postgres", dir.path());
        let mut shared = SharedRegistry::default();
        let err = context.resolve_dependency(&mut shared, &PGWIRE).unwrap_err();
        match err {
            PluginError::DependencyUnresolved {
                plugin, root_cause, ..
            } => {
                assert_eq!(plugin, "postgres");
                assert!(root_cause.starts_with("no plugin.yml"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_unresolved_reports_creation_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "dependencies: {{{\n").unwrap();

        let mut context = PluginContext::create("postgres", dir.path());
        assert!(context.creation_error().is_some());

        let err = context
            .resolve_dependency(&mut SharedRegistry::default(), &PGWIRE)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("[P006]"));
        assert!(message.contains("malformed"), "{}", message);
        assert!(!message.contains("not listed"));
    }

    #[test]
    fn test_unlisted_dependency() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "dependencies: []\n").unwrap();
        let mut context = PluginContext::create("postgres", dir.path());
        let err = context
            .resolve_dependency(&mut SharedRegistry::default(), &PGWIRE)
            .unwrap_err();
        assert!(err.to_string().contains("keel-pgwire not listed in plugin.yml"));
    }

    #[test]
    fn test_manifest_dependency_is_opened_from_plugin_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "dependencies:\n  - name: keel-pgwire\n    version: \"0.3.1\"\n    path: deps/missing.so\n",
        )
        .unwrap();
        let mut context = PluginContext::create("postgres", dir.path());
        let err = context
            .resolve_dependency(&mut SharedRegistry::default(), &PGWIRE)
            .unwrap_err();
        match err {
            PluginError::LibraryLoad { path, .. } => {
                assert!(path.ends_with("missing.so"));
                assert!(path.starts_with(&dir.path().display().to_string()));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_library_path_defaults_to_platform_name() {
        let dir = TempDir::new().unwrap();
        let context = PluginContext::create("postgres", dir.path());
        let expected = dir
            .path()
            .join(libloading::library_filename("keel_postgres"));
        assert_eq!(context.library_path(), expected);

        std::fs::write(dir.path().join(MANIFEST_FILE), "library: custom.so\n").unwrap();
        let context = PluginContext::create("postgres", dir.path());
        assert_eq!(context.library_path(), dir.path().join("custom.so"));
    }

    #[test]
    fn test_missing_native_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "native:\n  - name: libpq\n    path: native/libpq.so.5\n",
        )
        .unwrap();
        let mut context = PluginContext::create("postgres", dir.path());
        assert!(matches!(
            context.load_natives().unwrap_err(),
            PluginError::NativeLibrary { .. }
        ));
    }
}
