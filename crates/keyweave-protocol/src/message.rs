use crate::config::{EvaluationParameters, KeyboardConfiguration, OptimizationParameters};
use crate::evaluation::{EvaluationResult, OptimizerParameters, ProgressInfo};
use crate::layout::{LayoutString, ValidationError};
use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;
use thiserror::Error;

pub type CallId = u64;

/// Contents of the `1-grams.txt`, `2-grams.txt` and `3-grams.txt` files of a prepared corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NgramTables {
    pub unigrams: String,
    pub bigrams: String,
    pub trigrams: String,
}

/// Ngram data as handed to the worker, after the host resolved any corpus key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NgramInput {
    Frequencies(NgramTables),
    Text { corpus_text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "method", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Request {
    Init,
    InitNgramProvider {
        params: EvaluationParameters,
        input: NgramInput,
    },
    /// Drops the provider and everything built on it.
    ResetProvider,
    InitEvaluator {
        keyboard: KeyboardConfiguration,
        params: EvaluationParameters,
    },
    Evaluate {
        layout: LayoutString,
    },
    PermutableKeys,
    InitOptimizer {
        layout: LayoutString,
        fixed: String,
        params: OptimizationParameters,
    },
    OptimizationStep,
    Anneal {
        layout: LayoutString,
        fixed: String,
        params: OptimizationParameters,
    },
    Plot {
        layout: LayoutString,
        layer: usize,
    },
}

impl Request {
    pub fn method(&self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Response {
    Done,
    Keys(Vec<String>),
    Evaluation(EvaluationResult),
    OptimizerParameters(OptimizerParameters),
    Step(Option<EvaluationResult>),
    Plot(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub call_id: CallId,
    pub request: Request,
}

/// Everything the worker sends back to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Reply {
        call_id: CallId,
        outcome: Result<Response, WorkerFault>,
    },
    Progress {
        call_id: CallId,
        info: ProgressInfo,
    },
    NewBest {
        call_id: CallId,
        layout: LayoutString,
        total_cost: f64,
    },
    /// The worker is gone; no further events follow.
    Crashed { reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerFault {
    #[error("Configuration rejected: {0}")]
    Config(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Out of order call: {0}")]
    Sequencing(String),

    #[error("Engine failure: {0}")]
    Engine(String),
}
