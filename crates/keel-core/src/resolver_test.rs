use super::*;
use tempfile::TempDir;

fn make_root(dirs: &[&str]) -> TempDir {
    let root = TempDir::new().unwrap();
    for d in dirs {
        std::fs::create_dir_all(root.path().join(d)).unwrap();
    }
    root
}

fn labels(dirs: &[VersionDir]) -> Vec<&str> {
    dirs.iter().map(|d| d.version.label()).collect()
}

fn v(label: &str) -> Version {
    Version::parse(label).unwrap()
}

#[test]
fn test_discover_sorts_semantically_and_skips_noise() {
    let root = make_root(&[
        "v1.10", "v0.00", "v1.2", "_init", "_pre", "_post", "notes", "v1.x", ".git",
    ]);
    std::fs::write(root.path().join("v9.9"), "a file, not a directory").unwrap();

    let resolver = VersionResolver::new(root.path());
    let dirs = resolver.discover().unwrap();
    assert_eq!(labels(&dirs), vec!["v0.00", "v1.2", "v1.10"]);
}

#[test]
fn test_select_pending_is_independent_of_enumeration_order() {
    let names = ["v0.00", "v0.01", "v0.02", "v1.00", "v1.01"];
    for shift in 0..names.len() {
        let dirs: Vec<VersionDir> = names
            .iter()
            .cycle()
            .skip(shift)
            .take(names.len())
            .map(|n| VersionDir {
                version: v(n),
                path: PathBuf::from(n),
            })
            .collect();
        let pending = select_pending(dirs, &v("v0.00"), Some(&v("v1.00"))).unwrap();
        assert_eq!(labels(&pending), vec!["v0.01", "v0.02", "v1.00"]);
    }
}

#[test]
fn test_pending_from_zero_without_target() {
    let root = make_root(&["v0.00", "v0.01"]);
    let resolver = VersionResolver::new(root.path());
    let pending = resolver.pending(&Version::zero(), None).unwrap();
    assert_eq!(labels(&pending), vec!["v0.00", "v0.01"]);
}

#[test]
fn test_target_equal_to_current_yields_nothing() {
    let root = make_root(&["v0.00", "v0.01"]);
    let resolver = VersionResolver::new(root.path());
    let pending = resolver.pending(&v("v0.01"), Some(&v("v0.01"))).unwrap();
    assert!(pending.is_empty());
}

#[test]
fn test_target_below_current_is_rejected() {
    let root = make_root(&["v0.00", "v0.01"]);
    let resolver = VersionResolver::new(root.path());
    let err = resolver.pending(&v("v0.01"), Some(&v("v0.00"))).unwrap_err();
    assert!(matches!(err, CoreError::TargetBelowApplied { .. }));
    assert!(err.is_validation());
}

#[test]
fn test_duplicate_versions_rejected() {
    let root = make_root(&["v1.0", "v1.00"]);
    let err = VersionResolver::new(root.path()).discover().unwrap_err();
    assert!(matches!(err, CoreError::DuplicateVersion { .. }));
}

#[test]
fn test_missing_root_is_validation_error() {
    let root = TempDir::new().unwrap();
    let resolver = VersionResolver::new(root.path().join("nope"));
    let err = resolver.discover().unwrap_err();
    assert!(matches!(err, CoreError::WorkspaceNotFound { .. }));
}

#[test]
fn test_lifecycle_units() {
    let root = make_root(&["_pre", "v0.00"]);
    std::fs::write(root.path().join("_pre/setup.sql"), "SELECT 1;").unwrap();

    let resolver = VersionResolver::new(root.path());
    let pre = resolver.lifecycle_unit(UnitKind::Pre).unwrap().unwrap();
    assert_eq!(pre.scripts.len(), 1);
    assert!(resolver.lifecycle_unit(UnitKind::Post).unwrap().is_none());
}

#[test]
fn test_empty_version_directory_still_loads() {
    let root = make_root(&["v0.00"]);
    let dirs = VersionResolver::new(root.path()).discover().unwrap();
    let unit = dirs[0].load().unwrap();
    assert!(unit.is_empty());
    assert!(unit.kind.is_recorded());
}
