use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// An ordered sequence of key symbols, one `char` per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayoutString(String);

impl LayoutString {
    pub fn new(symbols: impl Into<String>) -> Self {
        Self(symbols.into())
    }

    /// Normalizes user input: whitespace is dropped and symbols are lower-cased.
    pub fn normalized(raw: &str) -> Self {
        let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        Self(cleaned.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn symbols(&self) -> std::str::Chars<'_> {
        self.0.chars()
    }

    /// Number of key symbols (not bytes).
    pub fn symbol_count(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LayoutString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LayoutString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LayoutString {
    fn from(symbols: &str) -> Self {
        Self(symbols.to_string())
    }
}

impl From<String> for LayoutString {
    fn from(symbols: String) -> Self {
        Self(symbols)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Layout has {actual} symbols, expected {expected}")]
    Length { expected: usize, actual: usize },

    #[error("Duplicates: \"{0}\"")]
    Duplicates(String),

    #[error("Unknown: \"{0}\"")]
    Unknown(String),

    #[error("Layout rejected by evaluator: {0}")]
    Rejected(String),
}
