use crate::error::{KeyWeaveError, KwResult};
use crate::lock;
use crate::worker::{AnnealCallbacks, ChannelTerminator, WorkerChannel};
use keyweave_protocol::config::{OptimizationMode, OptimizationParameters};
use keyweave_protocol::evaluation::{EvaluationResult, ProgressInfo};
use keyweave_protocol::layout::LayoutString;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running {
        mode: OptimizationMode,
        step: u64,
        total_steps: Option<u64>,
        /// Set once `cancel()` was called; the run is winding down.
        cancel_requested: bool,
    },
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running { .. })
    }
}

/// Receives updates while an optimization runs.
pub trait ProgressCallback: Send + Sync {
    /// A generation finished (generational mode only).
    fn on_step(&self, _step: u64, _total_steps: Option<u64>) {}

    /// Annealing progress (annealing mode only).
    fn on_progress(&self, _info: &ProgressInfo) {}

    fn on_new_best(&self, layout: &LayoutString, total_cost: f64);
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub layout: LayoutString,
    pub fixed: String,
    pub params: OptimizationParameters,
    pub mode: OptimizationMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestLayout {
    pub layout: LayoutString,
    pub total_cost: f64,
}

impl BestLayout {
    fn offer(slot: &mut BestLayout, layout: &LayoutString, total_cost: f64) {
        if total_cost < slot.total_cost {
            slot.layout = layout.clone();
            slot.total_cost = total_cost;
        }
    }
}

impl From<&EvaluationResult> for BestLayout {
    fn from(result: &EvaluationResult) -> Self {
        Self {
            layout: result.layout.clone(),
            total_cost: result.total_cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionOutcome {
    pub mode: OptimizationMode,
    pub steps: u64,
    pub best: Option<BestLayout>,
    pub cancelled: bool,
}

struct SessionInner {
    state: SessionState,
    terminator: Option<ChannelTerminator>,
}

/// Drives one optimization at a time against a worker channel.
///
/// Generational runs stop cooperatively between steps. Annealing cannot be
/// interrupted on the worker, so cancelling it terminates the channel; the
/// owner has to create and configure a new one afterwards.
#[derive(Clone)]
pub struct OptimizationSession {
    inner: Arc<Mutex<SessionInner>>,
}

impl Default for OptimizationSession {
    fn default() -> Self {
        Self::new()
    }
}

// Puts the session back to Idle however the run ends.
struct RunGuard {
    inner: Arc<Mutex<SessionInner>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        inner.state = SessionState::Idle;
        inner.terminator = None;
    }
}

impl OptimizationSession {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                state: SessionState::Idle,
                terminator: None,
            })),
        }
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner).state.is_running()
    }

    /// Requests cancellation of the current run. Returns false when idle.
    pub fn cancel(&self) -> bool {
        let terminator = {
            let mut inner = lock(&self.inner);
            match &mut inner.state {
                SessionState::Idle => return false,
                SessionState::Running {
                    cancel_requested, ..
                } => *cancel_requested = true,
            }
            inner.terminator.clone()
        };

        info!("✋ Optimization cancel requested");
        if let Some(terminator) = terminator {
            terminator.terminate();
        }
        true
    }

    pub async fn run(
        &self,
        channel: &WorkerChannel,
        request: RunRequest,
        callback: Arc<dyn ProgressCallback>,
    ) -> KwResult<SessionOutcome> {
        let _guard = self.begin(request.mode)?;
        info!(
            "🚀 Starting {} optimization from '{}'",
            request.mode, request.layout
        );

        // 1. The start layout must evaluate before any optimizer is built.
        let start = channel.evaluate(&request.layout).await?;
        let best = BestLayout::from(&start);

        if self.cancel_requested() {
            return Ok(SessionOutcome {
                mode: request.mode,
                steps: 0,
                best: Some(best),
                cancelled: true,
            });
        }

        // 2. Run the selected protocol.
        let outcome = match request.mode {
            OptimizationMode::Genevo => {
                self.run_generational(channel, &request, best, callback.clone())
                    .await?
            }
            OptimizationMode::SimulatedAnnealing => {
                self.run_annealing(channel, &request, best, callback.clone())
                    .await?
            }
        };

        if outcome.cancelled {
            info!("🛑 Optimization cancelled after {} steps", outcome.steps);
        } else {
            info!("🏁 Optimization finished after {} steps", outcome.steps);
        }
        Ok(outcome)
    }

    async fn run_generational(
        &self,
        channel: &WorkerChannel,
        request: &RunRequest,
        mut best: BestLayout,
        callback: Arc<dyn ProgressCallback>,
    ) -> KwResult<SessionOutcome> {
        let params = channel
            .init_optimizer(&request.layout, &request.fixed, &request.params)
            .await?;
        let limit = params.generation_limit;
        self.update_progress(0, Some(limit));

        let mut current = request.layout.clone();
        let mut steps = 0;
        let mut cancelled = false;

        loop {
            if self.cancel_requested() {
                cancelled = true;
                break;
            }
            let Some(result) = channel.optimization_step().await? else {
                break;
            };

            steps += 1;
            self.update_progress(steps, Some(limit));
            callback.on_step(steps, Some(limit));

            if result.layout != current {
                current = result.layout.clone();
                callback.on_new_best(&result.layout, result.total_cost);
            }
            BestLayout::offer(&mut best, &result.layout, result.total_cost);
        }

        Ok(SessionOutcome {
            mode: request.mode,
            steps,
            best: Some(best),
            cancelled,
        })
    }

    async fn run_annealing(
        &self,
        channel: &WorkerChannel,
        request: &RunRequest,
        best: BestLayout,
        callback: Arc<dyn ProgressCallback>,
    ) -> KwResult<SessionOutcome> {
        let seen = Arc::new(Mutex::new(best));
        let last_step = Arc::new(Mutex::new(0u64));

        let progress_cb = callback.clone();
        let progress_state = self.inner.clone();
        let progress_step = last_step.clone();
        let best_cb = callback;
        let best_seen = seen.clone();

        let callbacks = AnnealCallbacks::new(
            move |info: ProgressInfo| {
                *lock(&progress_step) = info.step;
                let mut inner = lock(&progress_state);
                if let SessionState::Running { step, .. } = &mut inner.state {
                    *step = info.step;
                }
                drop(inner);
                progress_cb.on_progress(&info);
            },
            move |layout: LayoutString, total_cost: f64| {
                BestLayout::offer(&mut lock(&best_seen), &layout, total_cost);
                best_cb.on_new_best(&layout, total_cost);
            },
        );

        // A cancel that raced us before the terminator was stored still has to stop the run.
        let cancel_now = {
            let mut inner = lock(&self.inner);
            inner.terminator = Some(channel.terminator());
            matches!(
                inner.state,
                SessionState::Running {
                    cancel_requested: true,
                    ..
                }
            )
        };
        if cancel_now {
            channel.terminate();
        }

        let result = channel
            .anneal(&request.layout, &request.fixed, &request.params, callbacks)
            .await;
        lock(&self.inner).terminator = None;

        let cancelled = match result {
            Ok(result) => {
                BestLayout::offer(&mut lock(&seen), &result.layout, result.total_cost);
                false
            }
            Err(err) if err.is_terminated() && self.cancel_requested() => true,
            Err(err) => {
                warn!("⚠️ Annealing failed: {}", err);
                return Err(err);
            }
        };

        let steps = *lock(&last_step);
        let best = lock(&seen).clone();
        Ok(SessionOutcome {
            mode: request.mode,
            steps,
            best: Some(best),
            cancelled,
        })
    }

    fn begin(&self, mode: OptimizationMode) -> KwResult<RunGuard> {
        let mut inner = lock(&self.inner);
        if inner.state.is_running() {
            return Err(KeyWeaveError::Busy(
                "an optimization is already running".into(),
            ));
        }
        inner.state = SessionState::Running {
            mode,
            step: 0,
            total_steps: None,
            cancel_requested: false,
        };
        Ok(RunGuard {
            inner: self.inner.clone(),
        })
    }

    fn cancel_requested(&self) -> bool {
        matches!(
            lock(&self.inner).state,
            SessionState::Running {
                cancel_requested: true,
                ..
            }
        )
    }

    fn update_progress(&self, current: u64, total: Option<u64>) {
        let mut inner = lock(&self.inner);
        if let SessionState::Running {
            step, total_steps, ..
        } = &mut inner.state
        {
            *step = current;
            *total_steps = total;
        }
    }
}
