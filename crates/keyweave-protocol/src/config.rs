use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString};

// Engine-owned text blobs. They are stored and forwarded, never parsed here.
macro_rules! opaque_blob {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(text: impl Into<String>) -> Self {
                Self(text.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(text: String) -> Self {
                Self(text)
            }
        }

        impl From<&str> for $name {
            fn from(text: &str) -> Self {
                Self(text.to_string())
            }
        }
    };
}

opaque_blob!(
    /// Cost-model parameters (metric weights, ngram mapper settings).
    EvaluationParameters
);
opaque_blob!(
    /// Keyboard geometry plus base layout.
    KeyboardConfiguration
);
opaque_blob!(
    /// Parameters of one optimization algorithm.
    OptimizationParameters
);

/// Where the ngram frequencies come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NgramSource {
    /// Pre-computed frequency tables stored under a corpus key.
    Prepared { corpus_key: String },
    /// Raw text the engine aggregates itself.
    Text { corpus_text: String },
}

impl NgramSource {
    pub fn prepared(corpus_key: impl Into<String>) -> Self {
        Self::Prepared {
            corpus_key: corpus_key.into(),
        }
    }

    pub fn text(corpus_text: impl Into<String>) -> Self {
        Self::Text {
            corpus_text: corpus_text.into(),
        }
    }
}

impl fmt::Display for NgramSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NgramSource::Prepared { corpus_key } => write!(f, "corpus '{}'", corpus_key),
            NgramSource::Text { corpus_text } => {
                write!(f, "custom text ({} chars)", corpus_text.chars().count())
            }
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OptimizationMode {
    /// Generational search, driven one step at a time by the caller.
    #[default]
    Genevo,
    /// Continuous annealing run that reports through callbacks.
    SimulatedAnnealing,
}
