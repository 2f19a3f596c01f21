//! `${NAME}` placeholder substitution
//!
//! Replacement is purely textual: values are inserted as-is with no
//! dialect-aware escaping, so anything that ends up in an identifier position
//! must be validated by the caller first (see [`crate::sql_utils`]).

use crate::error::{CoreError, CoreResult};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Reserved token holding the target database name.
pub const DB_NAME_TOKEN: &str = "KEEL_DB_NAME";
/// Reserved token holding the target schema name.
pub const SCHEMA_NAME_TOKEN: &str = "KEEL_SCHEMA_NAME";
/// Reserved token holding the ledger table name.
pub const TABLE_NAME_TOKEN: &str = "KEEL_TABLE_NAME";

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_.\-]+)\}").expect("valid regex"))
}

/// A single key/value substitution pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub key: String,
    pub value: String,
}

impl Token {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl FromStr for Token {
    type Err = CoreError;

    /// Parse `KEY=VALUE`; the value may itself contain `=`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => Ok(Token::new(key.trim(), value)),
            _ => Err(CoreError::InvalidToken { raw: s.to_string() }),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Substitutes `${NAME}` placeholders from an ordered, key-unique mapping.
#[derive(Debug, Clone)]
pub struct TokenReplacer {
    tokens: Vec<Token>,
    index: HashMap<String, usize>,
    strict: bool,
}

impl TokenReplacer {
    /// Build a replacer, rejecting duplicate keys.
    pub fn new(tokens: Vec<Token>) -> CoreResult<Self> {
        let mut index = HashMap::with_capacity(tokens.len());
        for (pos, token) in tokens.iter().enumerate() {
            if index.insert(token.key.clone(), pos).is_some() {
                return Err(CoreError::DuplicateToken {
                    key: token.key.clone(),
                });
            }
        }
        Ok(Self {
            tokens,
            index,
            strict: false,
        })
    }

    /// Fail on unresolved placeholders instead of leaving them verbatim.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Return a replacer with `extra` appended, still enforcing unique keys.
    pub fn with_tokens(&self, extra: impl IntoIterator<Item = Token>) -> CoreResult<Self> {
        let mut tokens = self.tokens.clone();
        tokens.extend(extra);
        Ok(Self::new(tokens)?.strict(self.strict))
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&i| self.tokens[i].value.as_str())
    }

    /// Substitute every known placeholder in `text`.
    ///
    /// `context` names the source (a script path, a template) for error
    /// messages. Substituted values are not rescanned.
    pub fn replace(&self, context: &str, text: &str) -> CoreResult<String> {
        if self.strict {
            let missing: BTreeSet<&str> = token_re()
                .captures_iter(text)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str())
                .filter(|key| self.lookup(key).is_none())
                .collect();
            if !missing.is_empty() {
                return Err(CoreError::UnresolvedTokens {
                    context: context.to_string(),
                    tokens: missing.into_iter().collect::<Vec<_>>().join(", "),
                });
            }
        }

        let replaced = token_re().replace_all(text, |caps: &Captures| {
            match self.lookup(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        });
        Ok(replaced.into_owned())
    }
}
