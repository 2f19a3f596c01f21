//! Version discovery and pending-version selection
//!
//! The script root holds one subdirectory per version plus the optional
//! lifecycle directories. Anything else that does not parse as a version is
//! skipped with a warning.

use crate::error::{CoreError, CoreResult};
use crate::script::{MigrationUnit, UnitKind};
use crate::version::Version;
use std::path::{Path, PathBuf};

/// A discovered version directory.
#[derive(Debug, Clone)]
pub struct VersionDir {
    pub version: Version,
    pub path: PathBuf,
}

impl VersionDir {
    /// Read the scripts and data files of this version.
    pub fn load(&self) -> CoreResult<MigrationUnit> {
        MigrationUnit::load(UnitKind::Version(self.version.clone()), &self.path)
    }
}

/// Scans a script root for version directories.
#[derive(Debug, Clone)]
pub struct VersionResolver {
    root: PathBuf,
}

impl VersionResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every valid version directory, ascending.
    pub fn discover(&self) -> CoreResult<Vec<VersionDir>> {
        if !self.root.is_dir() {
            return Err(CoreError::WorkspaceNotFound {
                path: self.root.display().to_string(),
            });
        }

        let entries = std::fs::read_dir(&self.root).map_err(|e| CoreError::IoWithPath {
            path: self.root.display().to_string(),
            source: e,
        })?;

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                log::warn!("Skipping directory with non UTF-8 name: {}", path.display());
                continue;
            };
            if UnitKind::LIFECYCLE_DIRS.contains(&name) || name.starts_with('.') {
                continue;
            }
            match Version::parse(name) {
                Ok(version) => dirs.push(VersionDir { version, path }),
                Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        sort_unique(dirs)
    }

    /// Versions strictly above `current` and at or below `target`.
    pub fn pending(
        &self,
        current: &Version,
        target: Option<&Version>,
    ) -> CoreResult<Vec<VersionDir>> {
        select_pending(self.discover()?, current, target)
    }

    /// Load a lifecycle directory if it exists.
    pub fn lifecycle_unit(&self, kind: UnitKind) -> CoreResult<Option<MigrationUnit>> {
        let name = match kind {
            UnitKind::Init => "_init",
            UnitKind::Pre => "_pre",
            UnitKind::Post => "_post",
            UnitKind::Version(_) => return Ok(None),
        };
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Ok(None);
        }
        MigrationUnit::load(kind, &dir).map(Some)
    }
}

/// Sort ascending and reject two directories naming the same version.
pub fn sort_unique(mut dirs: Vec<VersionDir>) -> CoreResult<Vec<VersionDir>> {
    dirs.sort_by(|a, b| a.version.cmp(&b.version));
    if let Some(pair) = dirs.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(CoreError::DuplicateVersion {
            version: pair[0].version.to_string(),
            first: pair[0].path.display().to_string(),
            second: pair[1].path.display().to_string(),
        });
    }
    Ok(dirs)
}

/// Filter an ascending list down to what still needs applying.
///
/// A target below `current` is a downgrade request and fails; a target equal
/// to `current` yields nothing.
pub fn select_pending(
    dirs: Vec<VersionDir>,
    current: &Version,
    target: Option<&Version>,
) -> CoreResult<Vec<VersionDir>> {
    if let Some(target) = target {
        if target < current {
            return Err(CoreError::TargetBelowApplied {
                target: target.to_string(),
                applied: current.to_string(),
            });
        }
    }

    let dirs = sort_unique(dirs)?;
    Ok(dirs
        .into_iter()
        .filter(|d| &d.version > current)
        .filter(|d| target.map_or(true, |t| &d.version <= t))
        .collect())
}

#[cfg(test)]
#[path = "resolver_test.rs"]
mod tests;
