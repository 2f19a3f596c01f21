//! SQL identifier validation
//!
//! Template placeholders are substituted textually, so the names that flow
//! into them (database, schema, ledger table) are checked here first.
//! Schema and table names appear bare in templates and must be plain
//! identifiers. Database names only ever appear quoted or inside string
//! literals, so file-derived names such as `my-app` are allowed.

use crate::error::{CoreError, CoreResult};

/// Check that `name` is a plain identifier: a letter or `_` followed by
/// letters, digits, `_` or `$`.
///
/// # Examples
/// ```
/// use keel_core::sql_utils::validate_identifier;
/// assert!(validate_identifier("schema", "sales_2024").is_ok());
/// assert!(validate_identifier("schema", "sales; DROP TABLE x").is_err());
/// ```
pub fn validate_identifier(kind: &'static str, name: &str) -> CoreResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(CoreError::InvalidIdentifier {
            kind,
            name: name.to_string(),
        })
    }
}

/// Check that `name` can sit between double quotes or single quotes
/// without closing them: non-empty, no quote characters, no `;`, no
/// backslash, no `${` and no control characters.
///
/// # Examples
/// ```
/// use keel_core::sql_utils::validate_quoted_name;
/// assert!(validate_quoted_name("database", "my-app.v2").is_ok());
/// assert!(validate_quoted_name("database", "x'; DROP DATABASE y").is_err());
/// ```
pub fn validate_quoted_name(kind: &'static str, name: &str) -> CoreResult<()> {
    let unsafe_char = name
        .chars()
        .any(|c| matches!(c, '"' | '\'' | '`' | ';' | '\\') || c.is_control());
    if name.trim().is_empty() || unsafe_char || name.contains("${") {
        Err(CoreError::InvalidQuotedName {
            kind,
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_accepts_plain_names() {
        for name in ["main", "PUBLIC", "_private", "__keel_versions", "t$1"] {
            assert!(validate_identifier("table", name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_validate_identifier_rejects_injection() {
        for name in ["", "1abc", "a b", "a\"b", "a;b", "a.b", "a'b", "${X}"] {
            let err = validate_identifier("schema", name).unwrap_err();
            assert!(err.is_validation(), "{name}");
        }
    }

    #[test]
    fn test_validate_quoted_name_accepts_file_stems() {
        for name in ["memory", "my-app", "2024", "app.v2", "Sales DB"] {
            assert!(validate_quoted_name("database", name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_validate_quoted_name_rejects_breakouts() {
        for name in ["", "  ", "a\"b", "a'b", "a;b", "a\\b", "${KEEL_SCHEMA_NAME}", "a\nb"] {
            let err = validate_quoted_name("database", name).unwrap_err();
            assert!(err.is_validation(), "{name}");
        }
    }
}
