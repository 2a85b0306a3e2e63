use crate::config::{EvaluationParameters, KeyboardConfiguration, NgramSource};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifies the configuration a set of evaluation results was computed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigFingerprint {
    pub hash: String,
}

impl ConfigFingerprint {
    pub fn from_parts(
        evaluation: Option<&EvaluationParameters>,
        source: Option<&NgramSource>,
        keyboard: Option<&KeyboardConfiguration>,
    ) -> Self {
        let mut hasher = Sha256::new();

        feed(&mut hasher, evaluation.map(|p| p.as_str()));
        let source_json = source.and_then(|s| serde_json::to_string(s).ok());
        feed(&mut hasher, source_json.as_deref());
        feed(&mut hasher, keyboard.map(|k| k.as_str()));

        let result = hasher.finalize();
        Self {
            hash: hex::encode(result),
        }
    }

    pub fn short(&self) -> &str {
        &self.hash[..self.hash.len().min(12)]
    }
}

// Length prefix keeps ("ab", "c") and ("a", "bc") apart.
fn feed(hasher: &mut Sha256, part: Option<&str>) {
    match part {
        Some(text) => {
            hasher.update([1u8]);
            hasher.update((text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}
