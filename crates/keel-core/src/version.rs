//! Semantic version labels used to name migration directories
//!
//! A label is `[v|V]<int>(.<int>){1,3}`, e.g. `v0.00`, `v1.2`, `v2.0.0.1`.
//! The original label text is preserved for display and for the ledger;
//! ordering is purely numeric.

use crate::error::{CoreError, CoreResult};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;

static VERSION_RE: OnceLock<Regex> = OnceLock::new();

fn version_re() -> &'static Regex {
    VERSION_RE.get_or_init(|| Regex::new(r"^[vV]?(\d+(?:\.\d+){1,3})$").expect("valid regex"))
}

/// A migration version: an ordered tuple of non-negative integers.
#[derive(Debug, Clone)]
pub struct Version {
    label: String,
    parts: Vec<u64>,
}

impl Version {
    /// Parse a version label such as `v1.02` or `1.2.3`.
    pub fn parse(label: &str) -> CoreResult<Self> {
        let invalid = || CoreError::InvalidVersion {
            label: label.to_string(),
        };
        let caps = version_re().captures(label.trim()).ok_or_else(invalid)?;
        let parts = caps[1]
            .split('.')
            .map(|p| p.parse::<u64>().map_err(|_| invalid()))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self {
            label: label.trim().to_string(),
            parts,
        })
    }

    /// The version every database starts at before anything is applied.
    pub fn zero() -> Self {
        Self {
            label: "v0".to_string(),
            parts: vec![0],
        }
    }

    /// True for [`Version::zero`].
    pub fn is_zero(&self) -> bool {
        self.parts == [0]
    }

    /// The label exactly as it appeared on disk.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Numeric components.
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }

    fn component(&self, idx: usize) -> u64 {
        self.parts.get(idx).copied().unwrap_or(0)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| o.is_ne())
            // `v1.0` and `v1.0.0` stay distinct so the order is total
            .unwrap_or_else(|| self.parts.len().cmp(&other.parts.len()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl FromStr for Version {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "version_test.rs"]
mod tests;
