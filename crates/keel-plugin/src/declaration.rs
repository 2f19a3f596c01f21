//! The symbol a plugin library exports
//!
//! Plugins are Rust dynamic libraries built against the same keel-db. The
//! loader reads [`PluginDeclaration`] from the `keel_plugin_declaration`
//! static that [`export_plugin!`](crate::export_plugin) generates.

use keel_db::AdapterFactory;

/// Bumped whenever [`PluginDeclaration`] or [`PluginRegistrar`] change shape.
pub const ABI_VERSION: u32 = 1;

/// keel-db version plugins are checked against.
pub const KEEL_DB_VERSION: &str = keel_db::VERSION;

/// Symbol name of the exported declaration, nul-terminated for dlsym.
pub const DECLARATION_SYMBOL: &[u8] = b"keel_plugin_declaration\0";

/// A managed dependency the plugin needs at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyDeclaration {
    pub name: &'static str,
    /// Required version; `*` accepts any
    pub version: &'static str,
}

/// Receives adapter factories from a plugin's `register` function.
pub trait PluginRegistrar {
    fn register_adapter(&mut self, platform: &str, factory: AdapterFactory);
}

#[derive(Clone, Copy)]
pub struct PluginDeclaration {
    pub abi_version: u32,
    pub keel_db_version: &'static str,
    pub dependencies: &'static [DependencyDeclaration],
    pub register: fn(&mut dyn PluginRegistrar),
}

impl std::fmt::Debug for PluginDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDeclaration")
            .field("abi_version", &self.abi_version)
            .field("keel_db_version", &self.keel_db_version)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Whether `available` satisfies `required`.
///
/// `*` matches anything; otherwise every component of `required` must equal
/// the matching leading component of `available` (`1.2` accepts `1.2.7`).
pub fn version_satisfies(required: &str, available: &str) -> bool {
    if required == "*" {
        return true;
    }
    let mut available = available.split('.');
    required
        .split('.')
        .all(|part| available.next() == Some(part))
}

/// Declare the plugin entry point of an adapter library.
///
/// ```ignore
/// fn register(registrar: &mut dyn keel_plugin::PluginRegistrar) {
///     registrar.register_adapter("postgres", postgres_factory());
/// }
///
/// keel_plugin::export_plugin!(register, [("keel-pgwire", "0.3")]);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($register:expr) => {
        $crate::export_plugin!($register, []);
    };
    ($register:expr, [$(($name:expr, $version:expr)),* $(,)?]) => {
        #[doc(hidden)]
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static keel_plugin_declaration: $crate::PluginDeclaration = $crate::PluginDeclaration {
            abi_version: $crate::ABI_VERSION,
            keel_db_version: $crate::KEEL_DB_VERSION,
            dependencies: &[$($crate::DependencyDeclaration {
                name: $name,
                version: $version,
            }),*],
            register: $register,
        };
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_nothing(_registrar: &mut dyn PluginRegistrar) {}

    mod exported {
        fn register(_registrar: &mut dyn crate::PluginRegistrar) {}
        crate::export_plugin!(register, [("keel-pgwire", "0.3"), ("keel-tls", "*")]);
    }

    #[test]
    fn test_export_plugin_fills_declaration() {
        let decl = exported::keel_plugin_declaration;
        assert_eq!(decl.abi_version, ABI_VERSION);
        assert_eq!(decl.keel_db_version, keel_db::VERSION);
        assert_eq!(decl.dependencies.len(), 2);
        assert_eq!(decl.dependencies[0].name, "keel-pgwire");
        assert_eq!(decl.dependencies[1].version, "*");
    }

    #[test]
    fn test_declaration_debug_omits_register() {
        let decl = PluginDeclaration {
            abi_version: 1,
            keel_db_version: "0.1.2",
            dependencies: &[],
            register: register_nothing,
        };
        let rendered = format!("{:?}", decl);
        assert!(rendered.contains("abi_version: 1"));
        assert!(!rendered.contains("register:"));
    }

    #[test]
    fn test_version_satisfies() {
        assert!(version_satisfies("*", "9.9.9"));
        assert!(version_satisfies("0.1.2", "0.1.2"));
        assert!(version_satisfies("0.1", "0.1.7"));
        assert!(!version_satisfies("0.1.2", "0.1"));
        assert!(!version_satisfies("0.2", "0.1.2"));
        assert!(!version_satisfies("1", "10.0"));
    }
}
