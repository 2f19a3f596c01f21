//! `key=value;key=value` connection strings
//!
//! Keys compare case-insensitively and keep their original spelling and
//! order when the string is rendered back.

use crate::error::{DbError, DbResult};
use std::fmt;

/// An ordered set of connection string entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    entries: Vec<(String, String)>,
}

impl ConnectionString {
    /// Parse `key=value` pairs separated by `;`. Empty segments are ignored.
    pub fn parse(raw: &str) -> DbResult<Self> {
        let mut parsed = Self::default();
        for segment in raw.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                DbError::InvalidConnectionString(format!("'{}' is not key=value", segment))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(DbError::InvalidConnectionString(format!(
                    "'{}' has an empty key",
                    segment
                )));
            }
            parsed.set(key, value.trim());
        }
        Ok(parsed)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// First present key among `keys`.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    /// Replace the value of an existing key in place, or append it.
    pub fn set(&mut self, key: &str, value: &str) {
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.entries.remove(pos).1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}", rendered.join(";"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_get_case_insensitive() {
        let cs = ConnectionString::parse("Host=acme.snowflakecomputing.com; DB=SALES;;schema=ops").unwrap();
        assert_eq!(cs.get("host"), Some("acme.snowflakecomputing.com"));
        assert_eq!(cs.get("db"), Some("SALES"));
        assert_eq!(cs.get("SCHEMA"), Some("ops"));
        assert_eq!(cs.get_any(&["database", "db"]), Some("SALES"));
        assert!(cs.get("user").is_none());
    }

    #[test]
    fn test_set_keeps_position_and_spelling() {
        let mut cs = ConnectionString::parse("host=a;DB=x;user=u").unwrap();
        cs.set("db", "\"x\"");
        assert_eq!(cs.to_string(), "host=a;DB=\"x\";user=u");
        cs.set("role", "admin");
        assert_eq!(cs.to_string(), "host=a;DB=\"x\";user=u;role=admin");
    }

    #[test]
    fn test_remove() {
        let mut cs = ConnectionString::parse("host=a;db=x;schema=s").unwrap();
        assert_eq!(cs.remove("DB"), Some("x".to_string()));
        assert_eq!(cs.remove("db"), None);
        assert_eq!(cs.to_string(), "host=a;schema=s");
    }

    #[test]
    fn test_value_may_contain_equals() {
        let cs = ConnectionString::parse("password=a=b").unwrap();
        assert_eq!(cs.get("password"), Some("a=b"));
    }

    #[test]
    fn test_malformed_segments_rejected() {
        assert!(matches!(
            ConnectionString::parse("host").unwrap_err(),
            DbError::InvalidConnectionString(_)
        ));
        assert!(ConnectionString::parse("=value").is_err());
        assert!(ConnectionString::parse("").unwrap().is_empty());
    }
}
