use crate::layout::LayoutString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw engine output for one layout; the breakdown is engine-defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDetails {
    pub total_cost: f64,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub printed: Option<String>,
    #[serde(default)]
    pub plot: Option<String>,
}

impl EvaluationDetails {
    pub fn new(total_cost: f64) -> Self {
        Self {
            total_cost,
            details: Value::Null,
            printed: None,
            plot: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub layout: LayoutString,
    pub total_cost: f64,
    pub details: Value,
    pub printed: Option<String>,
    pub plot: Option<String>,
}

impl EvaluationResult {
    /// Attaches engine output to the layout that produced it.
    pub fn from_details(layout: LayoutString, details: EvaluationDetails) -> Self {
        Self {
            layout,
            total_cost: details.total_cost,
            details: details.details,
            printed: details.printed,
            plot: details.plot,
        }
    }
}

/// Parameters reported by a freshly built generational optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerParameters {
    pub generation_limit: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OptimizerParameters {
    pub fn with_limit(generation_limit: u64) -> Self {
        Self {
            generation_limit,
            extra: Map::new(),
        }
    }
}

/// Annealing progress as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    pub step: u64,
    pub temperature: f64,
}
