use crate::broadcast::{ConfigChange, ConfigurationBroadcaster, Settings};
use crate::config::{ConfigBundle, WorkbenchConfig};
use crate::corpus::CorpusStore;
use crate::engine::EngineLoader;
use crate::error::{KeyWeaveError, KwResult};
use crate::layout::{feedback, random_layout, validate};
use crate::lock;
use crate::results::{AddOutcome, ResultSet};
use crate::session::{OptimizationSession, ProgressCallback, RunRequest, SessionOutcome};
use crate::worker::WorkerChannel;
use keyweave_protocol::config::{
    EvaluationParameters, KeyboardConfiguration, NgramSource, OptimizationMode,
    OptimizationParameters,
};
use keyweave_protocol::evaluation::{EvaluationResult, ProgressInfo};
use keyweave_protocol::fingerprint::ConfigFingerprint;
use keyweave_protocol::layout::LayoutString;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use strum_macros::Display;
use tokio::sync::{broadcast, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Everything a front end needs to render, pushed as it happens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    Notice {
        level: NoticeLevel,
        message: String,
    },
    Progress {
        step: u64,
        total_steps: Option<u64>,
        temperature: Option<f64>,
    },
    NewBest {
        layout: LayoutString,
        total_cost: f64,
    },
    /// The worker is being replaced; evaluations are unavailable until `Reloaded`.
    Reloading,
    Reloaded,
    OptimizationFinished(SessionOutcome),
}

// Bridges session callbacks -> UI events
struct UiBridge {
    events: broadcast::Sender<UiEvent>,
}

impl ProgressCallback for UiBridge {
    fn on_step(&self, step: u64, total_steps: Option<u64>) {
        let _ = self.events.send(UiEvent::Progress {
            step,
            total_steps,
            temperature: None,
        });
    }

    fn on_progress(&self, info: &ProgressInfo) {
        let _ = self.events.send(UiEvent::Progress {
            step: info.step,
            total_steps: None,
            temperature: Some(info.temperature),
        });
    }

    fn on_new_best(&self, layout: &LayoutString, total_cost: f64) {
        let _ = self.events.send(UiEvent::NewBest {
            layout: layout.clone(),
            total_cost,
        });
    }
}

/// Foreground state of one optimizer window: the worker, its configuration,
/// the evaluated layouts and the optimization session.
///
/// Share it behind an `Arc`; a running optimization can be stopped from another task.
///
/// Evaluations and configuration changes share the worker; an optimization or a
/// reload needs it alone. Whatever loses that race gets `Busy` instead of waiting.
pub struct Workbench<L: EngineLoader> {
    loader: Arc<L>,
    config: WorkbenchConfig,
    channel: RwLock<Arc<WorkerChannel>>,
    broadcaster: tokio::sync::Mutex<ConfigurationBroadcaster>,
    results: tokio::sync::Mutex<ResultSet>,
    session: OptimizationSession,
    opt_params: Mutex<HashMap<OptimizationMode, OptimizationParameters>>,
    mode: Mutex<OptimizationMode>,
    rng: Mutex<fastrand::Rng>,
    activity: tokio::sync::RwLock<()>,
    reloading: AtomicBool,
    events: broadcast::Sender<UiEvent>,
}

impl<L: EngineLoader> Workbench<L> {
    /// Spawns the worker and brings it up to the bundled configuration.
    pub async fn start(
        loader: Arc<L>,
        corpus: Arc<dyn CorpusStore>,
        config: WorkbenchConfig,
        bundle: ConfigBundle,
    ) -> KwResult<Self> {
        let settings = Settings {
            evaluation: bundle.evaluation,
            ngram_source: Some(config.default_source()),
            keyboard: bundle.keyboard,
        };

        let channel = WorkerChannel::create(loader.clone(), (&config).into())?;
        let mut broadcaster = ConfigurationBroadcaster::with_settings(corpus, settings);
        broadcaster.replay(&channel).await?;

        let mut results = ResultSet::new();
        results.stamp(broadcaster.settings().fingerprint());

        let (events, _) = broadcast::channel(256);
        info!("✅ Workbench ready ({} permutable keys)", broadcaster.permutable_keys().len());

        Ok(Self {
            loader,
            mode: Mutex::new(config.optimization_mode),
            config,
            channel: RwLock::new(Arc::new(channel)),
            broadcaster: tokio::sync::Mutex::new(broadcaster),
            results: tokio::sync::Mutex::new(results),
            session: OptimizationSession::new(),
            opt_params: Mutex::new(bundle.optimization),
            rng: Mutex::new(fastrand::Rng::new()),
            activity: tokio::sync::RwLock::new(()),
            reloading: AtomicBool::new(false),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    pub fn session(&self) -> &OptimizationSession {
        &self.session
    }

    /// The channel currently in use. It is replaced after a forced stop or a crash.
    pub fn channel(&self) -> Arc<WorkerChannel> {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn settings(&self) -> Settings {
        self.broadcaster.lock().await.settings().clone()
    }

    pub async fn permutable_keys(&self) -> Vec<String> {
        self.broadcaster.lock().await.permutable_keys().to_vec()
    }

    /// True between `UiEvent::Reloading` and the end of the reload.
    pub fn is_reloading(&self) -> bool {
        self.reloading.load(Ordering::Acquire)
    }

    pub async fn results(&self) -> Vec<EvaluationResult> {
        self.results.lock().await.iter().cloned().collect()
    }

    pub async fn results_fingerprint(&self) -> Option<ConfigFingerprint> {
        self.results.lock().await.fingerprint().cloned()
    }

    /// Normalizes, validates and evaluates a layout typed by the user.
    pub async fn evaluate_input(&self, raw: &str) -> KwResult<AddOutcome> {
        let _shared = self.shared_access()?;
        let layout = self.checked_layout(raw).await?;

        let channel = self.channel();
        let outcome = self.results.lock().await.add(&channel, &layout).await;
        match &outcome {
            Ok(AddOutcome::AlreadyPresent) => self.notify(
                NoticeLevel::Info,
                format!("Layout '{}' is already available", layout),
            ),
            Ok(AddOutcome::Added(result)) => {
                info!("📊 Evaluated '{}': {:.4}", layout, result.total_cost)
            }
            Err(err) => self.notify(NoticeLevel::Error, err.to_string()),
        }
        outcome
    }

    pub async fn remove_layout(&self, layout: &LayoutString) -> bool {
        self.results.lock().await.remove(layout)
    }

    /// A shuffle of the permutable keys that keeps the fixed symbols in place.
    pub async fn random_layout(&self) -> LayoutString {
        let keys = self.permutable_keys().await;
        random_layout(&mut lock(&self.rng), &keys, &self.config.fixed_chars)
    }

    pub async fn plot(&self, layout: &LayoutString, layer: usize) -> KwResult<String> {
        self.channel().plot(layout, layer).await
    }

    pub async fn update_eval_params(&self, params: EvaluationParameters) -> KwResult<()> {
        self.change_config(
            ConfigChange::EvaluationParameters(params),
            "evaluation parameters",
        )
        .await
    }

    pub async fn update_ngram_source(&self, source: NgramSource) -> KwResult<()> {
        self.change_config(ConfigChange::NgramSource(source), "ngram source")
            .await
    }

    pub async fn update_keyboard(&self, keyboard: KeyboardConfiguration) -> KwResult<()> {
        self.change_config(ConfigChange::Keyboard(keyboard), "keyboard configuration")
            .await
    }

    pub fn mode(&self) -> OptimizationMode {
        *lock(&self.mode)
    }

    pub fn select_mode(&self, mode: OptimizationMode) {
        *lock(&self.mode) = mode;
        info!("🎛️  Optimization mode: {}", mode);
    }

    pub fn update_opt_params(&self, mode: OptimizationMode, params: OptimizationParameters) {
        lock(&self.opt_params).insert(mode, params);
        self.notify(
            NoticeLevel::Info,
            format!("Saved {} optimization parameters", mode),
        );
    }

    /// Optimizes starting from `raw` with the selected mode, then adds the best layout
    /// to the results. Blocks until the run ends; use [`Self::stop_optimization`] to end it early.
    pub async fn start_optimization(&self, raw: &str) -> KwResult<SessionOutcome> {
        let _exclusive = self.exclusive_access()?;
        let layout = self.checked_layout(raw).await?;

        let mode = self.mode();
        let params = lock(&self.opt_params).get(&mode).cloned().ok_or_else(|| {
            KeyWeaveError::Config(format!("No optimization parameters for {}", mode))
        })?;

        let request = RunRequest {
            layout,
            fixed: self.config.fixed_chars.clone(),
            params,
            mode,
        };
        let bridge = Arc::new(UiBridge {
            events: self.events.clone(),
        });

        let channel = self.channel();
        let outcome = self.session.run(&channel, request, bridge).await;

        // A forced stop or a crash leaves the channel unusable.
        if channel.is_closed() {
            self.replace_worker().await?;
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("❌ Optimization failed: {}", err);
                self.notify(NoticeLevel::Error, err.to_string());
                return Err(err);
            }
        };

        if let Some(best) = &outcome.best {
            let channel = self.channel();
            if let Err(err) = self.results.lock().await.add(&channel, &best.layout).await {
                warn!("⚠️ Could not add best layout '{}': {}", best.layout, err);
                self.notify(NoticeLevel::Error, err.to_string());
            }
        }

        let _ = self
            .events
            .send(UiEvent::OptimizationFinished(outcome.clone()));
        Ok(outcome)
    }

    pub fn stop_optimization(&self) -> bool {
        self.session.cancel()
    }

    /// Replaces the worker with a fresh one configured like the old one.
    pub async fn reload(&self) -> KwResult<()> {
        let _exclusive = self.exclusive_access()?;
        self.replace_worker().await
    }

    // Caller holds exclusive access.
    async fn replace_worker(&self) -> KwResult<()> {
        self.reloading.store(true, Ordering::Release);
        let _ = self.events.send(UiEvent::Reloading);
        warn!("♻️  Reloading worker");

        let replaced = self.swap_and_replay().await;
        self.reloading.store(false, Ordering::Release);
        replaced?;

        let _ = self.events.send(UiEvent::Reloaded);
        Ok(())
    }

    async fn swap_and_replay(&self) -> KwResult<()> {
        let fresh = Arc::new(WorkerChannel::create(
            self.loader.clone(),
            (&self.config).into(),
        )?);
        let old = {
            let mut slot = self.channel.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, fresh.clone())
        };
        old.terminate();

        self.broadcaster.lock().await.replay(&fresh).await
    }

    async fn change_config(&self, change: ConfigChange, what: &str) -> KwResult<()> {
        let _shared = self.shared_access()?;
        let channel = self.channel();

        let mut broadcaster = self.broadcaster.lock().await;
        let mut results = self.results.lock().await;
        match broadcaster.apply(&channel, &mut results, change).await {
            Ok(()) => {
                self.notify(NoticeLevel::Info, format!("Saved {}", what));
                Ok(())
            }
            Err(err) => {
                self.notify(
                    NoticeLevel::Error,
                    format!("Did not update {}: {}", what, err),
                );
                Err(err)
            }
        }
    }

    async fn checked_layout(&self, raw: &str) -> KwResult<LayoutString> {
        let layout = LayoutString::normalized(raw);
        let keys = self.permutable_keys().await;
        if let Err(err) = validate(&layout, &keys) {
            let message = feedback(&layout, &keys).unwrap_or_else(|| err.to_string());
            self.notify(NoticeLevel::Warning, message);
            return Err(err.into());
        }
        Ok(layout)
    }

    // Held for the whole evaluation or configuration change.
    fn shared_access(&self) -> KwResult<RwLockReadGuard<'_, ()>> {
        if self.session.is_running() {
            return Err(self.busy());
        }
        self.activity.try_read().map_err(|_| self.busy())
    }

    // Held for the whole optimization or reload.
    fn exclusive_access(&self) -> KwResult<RwLockWriteGuard<'_, ()>> {
        if self.session.is_running() {
            return Err(self.busy());
        }
        self.activity.try_write().map_err(|_| self.busy())
    }

    fn busy(&self) -> KeyWeaveError {
        if self.is_reloading() {
            KeyWeaveError::Busy("the worker is reloading".into())
        } else {
            KeyWeaveError::Busy("the worker is in use".into())
        }
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        match level {
            NoticeLevel::Error => warn!("{}", message),
            _ => info!("{}", message),
        }
        let _ = self.events.send(UiEvent::Notice { level, message });
    }
}
