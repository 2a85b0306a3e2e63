use crate::engine::{AnnealObserver, Engine, EngineError};
use crate::layout::validate;
use crate::worker::ChannelLifecycle;
use keyweave_protocol::config::{EvaluationParameters, KeyboardConfiguration, OptimizationParameters};
use keyweave_protocol::evaluation::{EvaluationResult, OptimizerParameters};
use keyweave_protocol::layout::{LayoutString, ValidationError};
use keyweave_protocol::message::{NgramInput, WorkerFault};
use tracing::{debug, info, warn};

pub type ContextResult<T> = Result<T, WorkerFault>;

struct OptimizerRun<O> {
    handle: O,
    limit: u64,
    produced: u64,
    exhausted: bool,
}

/// The evaluation pipeline owned by one worker thread.
///
/// Every `init_*` keeps the previous handle when the engine rejects the new input,
/// so a failed reconfiguration leaves the context usable.
pub struct EvaluationContext<E: Engine> {
    engine: E,
    provider: Option<E::Provider>,
    evaluator: Option<E::Evaluator>,
    permutable_keys: Vec<String>,
    optimizer: Option<OptimizerRun<E::Optimizer>>,
}

impl<E: Engine> EvaluationContext<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            provider: None,
            evaluator: None,
            permutable_keys: Vec::new(),
            optimizer: None,
        }
    }

    pub fn stage(&self) -> ChannelLifecycle {
        if self.evaluator.is_some() {
            ChannelLifecycle::EvaluatorReady
        } else if self.provider.is_some() {
            ChannelLifecycle::NgramProviderReady
        } else {
            ChannelLifecycle::EngineLoaded
        }
    }

    pub fn init_ngram_provider(
        &mut self,
        input: &NgramInput,
        params: &EvaluationParameters,
    ) -> ContextResult<()> {
        let provider = match input {
            NgramInput::Frequencies(tables) => {
                self.engine.ngram_provider_with_frequencies(params, tables)
            }
            NgramInput::Text { corpus_text } => {
                self.engine.ngram_provider_with_text(params, corpus_text)
            }
        }
        .map_err(config_fault)?;

        self.provider = Some(provider);
        info!("📚 Ngram provider ready");
        Ok(())
    }

    /// Back to a bare engine. Used when no accepted ngram source exists to fall back to.
    pub fn reset_provider(&mut self) {
        self.provider = None;
        self.evaluator = None;
        self.permutable_keys.clear();
        self.optimizer = None;
        info!("🧹 Ngram provider cleared");
    }

    pub fn init_evaluator(
        &mut self,
        keyboard: &KeyboardConfiguration,
        params: &EvaluationParameters,
    ) -> ContextResult<Vec<String>> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            WorkerFault::Sequencing("evaluator requested before ngram provider".into())
        })?;

        let evaluator = self
            .engine
            .layout_evaluator(keyboard, params, provider)
            .map_err(config_fault)?;
        let keys = self.engine.permutable_keys(&evaluator);

        self.evaluator = Some(evaluator);
        self.permutable_keys = keys.clone();
        // An optimizer built against the old evaluator is meaningless now.
        self.optimizer = None;
        info!("⌨️  Evaluator ready ({} permutable keys)", keys.len());
        Ok(keys)
    }

    pub fn permutable_keys(&self) -> ContextResult<Vec<String>> {
        if self.evaluator.is_none() {
            return Err(WorkerFault::Sequencing("evaluator not initialized".into()));
        }
        Ok(self.permutable_keys.clone())
    }

    pub fn evaluate(&mut self, layout: &LayoutString) -> ContextResult<EvaluationResult> {
        let evaluator = self
            .evaluator
            .as_ref()
            .ok_or_else(|| WorkerFault::Sequencing("evaluate requested before evaluator".into()))?;
        validate(layout, &self.permutable_keys)?;

        let details = self
            .engine
            .evaluate(evaluator, layout)
            .map_err(|e| WorkerFault::Validation(ValidationError::Rejected(e.0)))?;
        Ok(EvaluationResult::from_details(layout.clone(), details))
    }

    pub fn init_optimizer(
        &mut self,
        layout: &LayoutString,
        fixed: &str,
        params: &OptimizationParameters,
    ) -> ContextResult<OptimizerParameters> {
        let evaluator = self.evaluator.as_ref().ok_or_else(|| {
            WorkerFault::Sequencing("optimizer requested before evaluator".into())
        })?;
        validate(layout, &self.permutable_keys)?;

        let handle = self
            .engine
            .layout_optimizer(evaluator, layout, fixed, params)
            .map_err(config_fault)?;
        let parameters = self.engine.optimizer_parameters(&handle);
        debug!(
            "Optimizer built, generation limit {}",
            parameters.generation_limit
        );

        self.optimizer = Some(OptimizerRun {
            handle,
            limit: parameters.generation_limit,
            produced: 0,
            exhausted: parameters.generation_limit == 0,
        });
        Ok(parameters)
    }

    pub fn optimization_step(&mut self) -> ContextResult<Option<EvaluationResult>> {
        let evaluator = self.evaluator.as_ref().ok_or_else(|| {
            WorkerFault::Sequencing("optimization step requested before evaluator".into())
        })?;
        let run = self.optimizer.as_mut().ok_or_else(|| {
            WorkerFault::Sequencing("optimization step requested before optimizer".into())
        })?;

        if run.exhausted {
            return Ok(None);
        }

        let step = self
            .engine
            .optimizer_step(evaluator, &mut run.handle)
            .map_err(engine_fault)?;
        match step {
            Some(result) => {
                run.produced += 1;
                if run.produced >= run.limit {
                    run.exhausted = true;
                }
                Ok(Some(result))
            }
            None => {
                run.exhausted = true;
                Ok(None)
            }
        }
    }

    pub fn anneal(
        &mut self,
        layout: &LayoutString,
        fixed: &str,
        params: &OptimizationParameters,
        observer: &mut dyn AnnealObserver,
    ) -> ContextResult<LayoutString> {
        let evaluator = self.evaluator.as_ref().ok_or_else(|| {
            WorkerFault::Sequencing("annealing requested before evaluator".into())
        })?;
        validate(layout, &self.permutable_keys)?;

        self.engine
            .anneal(evaluator, layout, fixed, params, observer)
            .map_err(engine_fault)
    }

    pub fn plot(&mut self, layout: &LayoutString, layer: usize) -> ContextResult<String> {
        let evaluator = self.evaluator.as_ref().ok_or_else(|| {
            WorkerFault::Sequencing("plot requested before evaluator".into())
        })?;
        validate(layout, &self.permutable_keys)?;

        self.engine
            .plot(evaluator, layout, layer)
            .map_err(engine_fault)
    }
}

fn config_fault(err: EngineError) -> WorkerFault {
    warn!("⚠️ Engine rejected configuration: {}", err);
    WorkerFault::Config(err.0)
}

fn engine_fault(err: EngineError) -> WorkerFault {
    warn!("⚠️ Engine failure: {}", err);
    WorkerFault::Engine(err.0)
}
