//! Script and data-file discovery within a single migration unit
//!
//! A unit is one version directory or one lifecycle directory (`_init`,
//! `_pre`, `_post`). Inside it, `.sql` files run in lexical order, then each
//! subdirectory recursively in lexical order. `.csv` / `.tsv` files in the
//! same traversal are bulk data files whose stem names the target table.

use crate::checksum::compute_checksum_all;
use crate::error::{CoreError, CoreResult};
use crate::version::Version;
use std::fmt;
use std::path::{Path, PathBuf};

/// What kind of directory a unit was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    /// `_init`: runs once, before the first version is ever applied
    Init,
    /// `_pre`: runs before pending versions
    Pre,
    /// A version directory; the only kind recorded in the ledger
    Version(Version),
    /// `_post`: runs after pending versions
    Post,
}

impl UnitKind {
    /// Lifecycle directory names, in the order they are considered.
    pub const LIFECYCLE_DIRS: [&'static str; 3] = ["_init", "_pre", "_post"];

    /// The version for version units.
    pub fn version(&self) -> Option<&Version> {
        match self {
            UnitKind::Version(v) => Some(v),
            _ => None,
        }
    }

    /// Whether completing this unit writes a ledger record.
    pub fn is_recorded(&self) -> bool {
        matches!(self, UnitKind::Version(_))
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Init => f.write_str("_init"),
            UnitKind::Pre => f.write_str("_pre"),
            UnitKind::Version(v) => write!(f, "{}", v),
            UnitKind::Post => f.write_str("_post"),
        }
    }
}

/// One `.sql` file, immutable after discovery.
#[derive(Debug, Clone)]
pub struct ScriptFile {
    /// Absolute path on disk
    pub path: PathBuf,

    /// Path relative to the unit directory, used in reports
    pub relative_path: String,

    /// Label of the owning unit
    pub owner: String,

    /// Position within the unit (0-based)
    pub ordinal: usize,

    /// Raw script text, before token substitution
    pub sql: String,
}

/// A tabular data file bound to a target table.
#[derive(Debug, Clone)]
pub struct BulkDataFile {
    /// Absolute path on disk
    pub path: PathBuf,

    /// Path relative to the unit directory
    pub relative_path: String,

    /// Label of the owning unit
    pub owner: String,

    /// Explicit schema when the file is named `schema.table.csv`
    pub schema: Option<String>,

    /// Target table name
    pub table: String,

    /// Field delimiter: `,` for `.csv`, tab for `.tsv`
    pub delimiter: u8,
}

impl BulkDataFile {
    /// Bind a data file to its target table from the file name.
    pub fn from_path(path: PathBuf, relative_path: String, owner: &str) -> CoreResult<Self> {
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
            _ => b',',
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::IoWithPath {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid file name"),
            })?;
        let (schema, table) = match stem.split_once('.') {
            Some((schema, table)) => (Some(schema.to_string()), table.to_string()),
            None => (None, stem.to_string()),
        };
        Ok(Self {
            path,
            relative_path,
            owner: owner.to_string(),
            schema,
            table,
            delimiter,
        })
    }

    /// `schema.table` using `default_schema` when the file named none.
    pub fn qualified_table(&self, default_schema: Option<&str>) -> String {
        match self.schema.as_deref().or(default_schema) {
            Some(s) => format!("{}.{}", s, self.table),
            None => self.table.clone(),
        }
    }
}

/// Everything discovered for one unit, in execution order.
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    pub kind: UnitKind,
    pub dir: PathBuf,
    pub scripts: Vec<ScriptFile>,
    pub data_files: Vec<BulkDataFile>,
}

impl MigrationUnit {
    /// Load scripts and data files beneath `dir`.
    pub fn load(kind: UnitKind, dir: &Path) -> CoreResult<Self> {
        let owner = kind.to_string();
        let mut unit = Self {
            kind,
            dir: dir.to_path_buf(),
            scripts: Vec::new(),
            data_files: Vec::new(),
        };
        collect_recursive(dir, dir, &owner, &mut unit)?;
        Ok(unit)
    }

    /// Label used in logs and the ledger.
    pub fn label(&self) -> String {
        self.kind.to_string()
    }

    /// Checksum over every script's raw text, in execution order.
    pub fn checksum(&self) -> String {
        compute_checksum_all(self.scripts.iter().map(|s| s.sql.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty() && self.data_files.is_empty()
    }
}

fn sorted_entries(dir: &Path) -> CoreResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| CoreError::IoWithPath {
        path: dir.display().to_string(),
        source: e,
    })?;
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CoreError::IoWithPath {
            path: dir.display().to_string(),
            source: e,
        })?;
    paths.sort();
    Ok(paths)
}

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Files of `dir` first, then each subdirectory.
fn collect_recursive(
    root: &Path,
    dir: &Path,
    owner: &str,
    unit: &mut MigrationUnit,
) -> CoreResult<()> {
    let entries = sorted_entries(dir)?;
    let (dirs, files): (Vec<_>, Vec<_>) = entries.into_iter().partition(|p| p.is_dir());

    for path in files {
        if has_extension(&path, &["sql"]) {
            let sql = std::fs::read_to_string(&path).map_err(|e| CoreError::IoWithPath {
                path: path.display().to_string(),
                source: e,
            })?;
            unit.scripts.push(ScriptFile {
                relative_path: relative(root, &path),
                owner: owner.to_string(),
                ordinal: unit.scripts.len(),
                path,
                sql,
            });
        } else if has_extension(&path, &["csv", "tsv"]) {
            let rel = relative(root, &path);
            unit.data_files.push(BulkDataFile::from_path(path, rel, owner)?);
        } else {
            log::debug!("Ignoring non-script file {}", path.display());
        }
    }

    for sub in dirs {
        collect_recursive(root, &sub, owner, unit)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "script_test.rs"]
mod tests;
