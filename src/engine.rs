//! Seam between the orchestration layer and the layout evaluation engine.
//!
//! The engine is loaded and driven on the worker thread only, so none of
//! its types need to be `Send`.

use keyweave_protocol::config::{EvaluationParameters, KeyboardConfiguration, OptimizationParameters};
use keyweave_protocol::evaluation::{
    EvaluationDetails, EvaluationResult, OptimizerParameters, ProgressInfo,
};
use keyweave_protocol::layout::LayoutString;
use keyweave_protocol::message::NgramTables;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;

/// Receives annealing progress while [`Engine::anneal`] runs.
pub trait AnnealObserver {
    fn on_progress(&mut self, info: ProgressInfo);
    fn on_new_best(&mut self, layout: &str, total_cost: f64);
}

pub trait Engine: 'static {
    type Provider;
    type Evaluator;
    type Optimizer;

    fn ngram_provider_with_frequencies(
        &mut self,
        params: &EvaluationParameters,
        tables: &NgramTables,
    ) -> EngineResult<Self::Provider>;

    fn ngram_provider_with_text(
        &mut self,
        params: &EvaluationParameters,
        corpus_text: &str,
    ) -> EngineResult<Self::Provider>;

    fn layout_evaluator(
        &mut self,
        keyboard: &KeyboardConfiguration,
        params: &EvaluationParameters,
        provider: &Self::Provider,
    ) -> EngineResult<Self::Evaluator>;

    fn evaluate(
        &mut self,
        evaluator: &Self::Evaluator,
        layout: &LayoutString,
    ) -> EngineResult<EvaluationDetails>;

    fn permutable_keys(&mut self, evaluator: &Self::Evaluator) -> Vec<String>;

    fn layout_optimizer(
        &mut self,
        evaluator: &Self::Evaluator,
        layout: &LayoutString,
        fixed: &str,
        params: &OptimizationParameters,
    ) -> EngineResult<Self::Optimizer>;

    fn optimizer_parameters(&self, optimizer: &Self::Optimizer) -> OptimizerParameters;

    /// Advances one generation. `None` means the optimizer has nothing more to offer.
    fn optimizer_step(
        &mut self,
        evaluator: &Self::Evaluator,
        optimizer: &mut Self::Optimizer,
    ) -> EngineResult<Option<EvaluationResult>>;

    /// Runs annealing to completion and returns the best layout found.
    fn anneal(
        &mut self,
        evaluator: &Self::Evaluator,
        layout: &LayoutString,
        fixed: &str,
        params: &OptimizationParameters,
        observer: &mut dyn AnnealObserver,
    ) -> EngineResult<LayoutString>;

    fn plot(
        &mut self,
        evaluator: &Self::Evaluator,
        layout: &LayoutString,
        layer: usize,
    ) -> EngineResult<String>;
}

/// Builds engines on demand. Called on the worker thread, once per channel.
pub trait EngineLoader: Send + Sync + 'static {
    type Engine: Engine;

    fn load(&self) -> EngineResult<Self::Engine>;
}
