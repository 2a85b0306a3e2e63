use super::callbacks::{AnnealCallbacks, CallTable};
use super::{host, ChannelLifecycle};
use crate::engine::EngineLoader;
use crate::error::{ChannelError, KeyWeaveError, KwResult};
use crate::lock;
use keyweave_protocol::config::{EvaluationParameters, KeyboardConfiguration, OptimizationParameters};
use keyweave_protocol::evaluation::{EvaluationResult, OptimizerParameters};
use keyweave_protocol::layout::LayoutString;
use keyweave_protocol::message::{Envelope, NgramInput, Request, Response, WorkerEvent};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub name: String,
    pub queue_capacity: usize,
    /// Worker events buffered before the engine is made to wait for the foreground.
    pub event_capacity: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            name: "keyweave-worker".to_string(),
            queue_capacity: 64,
            event_capacity: 1024,
        }
    }
}

struct ChannelShared {
    label: String,
    table: Mutex<CallTable>,
    lifecycle: Mutex<ChannelLifecycle>,
    requests: Mutex<Option<mpsc::Sender<Envelope>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    halt: Arc<AtomicBool>,
}

impl ChannelShared {
    fn close(&self, err: ChannelError) {
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.is_closed() {
                return;
            }
            *lifecycle = match err {
                ChannelError::Terminated => ChannelLifecycle::Terminated,
                _ => ChannelLifecycle::Crashed,
            };
        }
        lock(&self.requests).take();
        lock(&self.table).fail_all(err);
    }

    fn terminate(&self) {
        self.halt.store(true, Ordering::Release);
        if let Some(handle) = lock(&self.dispatcher).take() {
            handle.abort();
        }
        if !lock(&self.lifecycle).is_closed() {
            info!("🛑 [{}] Terminating worker channel", self.label);
        }
        self.close(ChannelError::Terminated);
    }

    fn advance(&self, target: ChannelLifecycle) {
        let mut lifecycle = lock(&self.lifecycle);
        if !lifecycle.is_closed() && *lifecycle < target {
            *lifecycle = target;
        }
    }

    // Only for a worker that really dropped back, e.g. after a provider reset.
    fn settle(&self, stage: ChannelLifecycle) {
        let mut lifecycle = lock(&self.lifecycle);
        if !lifecycle.is_closed() {
            *lifecycle = stage;
        }
    }

    fn closed_reason(&self) -> ChannelError {
        lock(&self.table)
            .closed()
            .cloned()
            .unwrap_or(ChannelError::Disconnected)
    }
}

/// Cloneable handle that can tear a channel down from anywhere.
#[derive(Clone)]
pub struct ChannelTerminator {
    shared: Arc<ChannelShared>,
}

impl ChannelTerminator {
    pub fn terminate(&self) {
        self.shared.terminate();
    }
}

/// Foreground proxy to one worker thread.
///
/// Calls are queued FIFO and answered one at a time. After `terminate()` or a
/// worker crash every pending and future call fails; create a new channel to continue.
pub struct WorkerChannel {
    shared: Arc<ChannelShared>,
    next_call: AtomicU64,
    generation: u64,
}

impl WorkerChannel {
    /// Spawns the worker thread. Must be called from within a tokio runtime.
    pub fn create<L: EngineLoader>(loader: Arc<L>, options: ChannelOptions) -> KwResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            KeyWeaveError::Config("worker channels need a running tokio runtime".into())
        })?;

        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        let label = format!("{}#{}", options.name, generation);
        let (request_tx, request_rx) = mpsc::channel(options.queue_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(options.event_capacity.max(1));
        let halt = Arc::new(AtomicBool::new(false));

        let thread_label = label.clone();
        let thread_halt = halt.clone();
        std::thread::Builder::new()
            .name(label.clone())
            .spawn(move || host::run(thread_label, loader, request_rx, event_tx, thread_halt))?;

        let shared = Arc::new(ChannelShared {
            label: label.clone(),
            table: Mutex::new(CallTable::default()),
            lifecycle: Mutex::new(ChannelLifecycle::Uninitialized),
            requests: Mutex::new(Some(request_tx)),
            dispatcher: Mutex::new(None),
            halt,
        });

        let handle = runtime.spawn(dispatch(shared.clone(), event_rx));
        *lock(&shared.dispatcher) = Some(handle);

        info!("🧵 [{}] Worker channel created", label);
        Ok(Self {
            shared,
            next_call: AtomicU64::new(1),
            generation,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn lifecycle(&self) -> ChannelLifecycle {
        *lock(&self.shared.lifecycle)
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle().is_closed()
    }

    pub fn terminator(&self) -> ChannelTerminator {
        ChannelTerminator {
            shared: self.shared.clone(),
        }
    }

    /// Tears the channel down. Pending calls reject with `ChannelError::Terminated`
    /// and the worker abandons whatever it is running.
    pub fn terminate(&self) {
        self.shared.terminate();
    }

    pub async fn init(&self) -> KwResult<()> {
        match self.call(Request::Init, None).await? {
            Response::Done => {
                self.shared.advance(ChannelLifecycle::EngineLoaded);
                Ok(())
            }
            other => Err(unexpected("init", other)),
        }
    }

    pub async fn init_ngram_provider(
        &self,
        input: NgramInput,
        params: &EvaluationParameters,
    ) -> KwResult<()> {
        let request = Request::InitNgramProvider {
            params: params.clone(),
            input,
        };
        match self.call(request, None).await? {
            Response::Done => {
                self.shared.advance(ChannelLifecycle::NgramProviderReady);
                Ok(())
            }
            other => Err(unexpected("init_ngram_provider", other)),
        }
    }

    pub async fn reset_provider(&self) -> KwResult<()> {
        match self.call(Request::ResetProvider, None).await? {
            Response::Done => {
                self.shared.settle(ChannelLifecycle::EngineLoaded);
                Ok(())
            }
            other => Err(unexpected("reset_provider", other)),
        }
    }

    /// Returns the permutable keys of the new evaluator.
    pub async fn init_evaluator(
        &self,
        keyboard: &KeyboardConfiguration,
        params: &EvaluationParameters,
    ) -> KwResult<Vec<String>> {
        let request = Request::InitEvaluator {
            keyboard: keyboard.clone(),
            params: params.clone(),
        };
        match self.call(request, None).await? {
            Response::Keys(keys) => {
                self.shared.advance(ChannelLifecycle::EvaluatorReady);
                Ok(keys)
            }
            other => Err(unexpected("init_evaluator", other)),
        }
    }

    pub async fn evaluate(&self, layout: &LayoutString) -> KwResult<EvaluationResult> {
        let request = Request::Evaluate {
            layout: layout.clone(),
        };
        match self.call(request, None).await? {
            Response::Evaluation(result) => Ok(result),
            other => Err(unexpected("evaluate", other)),
        }
    }

    pub async fn permutable_keys(&self) -> KwResult<Vec<String>> {
        match self.call(Request::PermutableKeys, None).await? {
            Response::Keys(keys) => Ok(keys),
            other => Err(unexpected("permutable_keys", other)),
        }
    }

    pub async fn init_optimizer(
        &self,
        layout: &LayoutString,
        fixed: &str,
        params: &OptimizationParameters,
    ) -> KwResult<OptimizerParameters> {
        let request = Request::InitOptimizer {
            layout: layout.clone(),
            fixed: fixed.to_string(),
            params: params.clone(),
        };
        match self.call(request, None).await? {
            Response::OptimizerParameters(p) => Ok(p),
            other => Err(unexpected("init_optimizer", other)),
        }
    }

    pub async fn optimization_step(&self) -> KwResult<Option<EvaluationResult>> {
        match self.call(Request::OptimizationStep, None).await? {
            Response::Step(step) => Ok(step),
            other => Err(unexpected("optimization_step", other)),
        }
    }

    /// Runs annealing on the worker. `callbacks` fire on this side while the call is pending,
    /// always before the reply. Returns the evaluated best layout.
    pub async fn anneal(
        &self,
        layout: &LayoutString,
        fixed: &str,
        params: &OptimizationParameters,
        callbacks: AnnealCallbacks,
    ) -> KwResult<EvaluationResult> {
        let request = Request::Anneal {
            layout: layout.clone(),
            fixed: fixed.to_string(),
            params: params.clone(),
        };
        match self.call(request, Some(callbacks)).await? {
            Response::Evaluation(result) => Ok(result),
            other => Err(unexpected("anneal", other)),
        }
    }

    pub async fn plot(&self, layout: &LayoutString, layer: usize) -> KwResult<String> {
        let request = Request::Plot {
            layout: layout.clone(),
            layer,
        };
        match self.call(request, None).await? {
            Response::Plot(plot) => Ok(plot),
            other => Err(unexpected("plot", other)),
        }
    }

    async fn call(
        &self,
        request: Request,
        callbacks: Option<AnnealCallbacks>,
    ) -> KwResult<Response> {
        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let reply = lock(&self.shared.table).register(call_id, callbacks)?;

        let sender = lock(&self.shared.requests).clone();
        let Some(sender) = sender else {
            lock(&self.shared.table).forget(call_id);
            return Err(self.shared.closed_reason().into());
        };

        if sender.send(Envelope { call_id, request }).await.is_err() {
            lock(&self.shared.table).forget(call_id);
            return Err(self.shared.closed_reason().into());
        }
        drop(sender);

        match reply.await {
            Ok(Ok(outcome)) => Ok(outcome?),
            Ok(Err(channel_err)) => Err(channel_err.into()),
            Err(_) => Err(ChannelError::Disconnected.into()),
        }
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        // Releasing the request queue lets the worker thread and the dispatcher wind down.
        self.shared.halt.store(true, Ordering::Release);
        lock(&self.shared.requests).take();
    }
}

async fn dispatch(shared: Arc<ChannelShared>, mut events: mpsc::Receiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Reply { call_id, outcome } => {
                lock(&shared.table).resolve(call_id, outcome);
            }
            WorkerEvent::Progress { call_id, info } => {
                let callbacks = lock(&shared.table).callbacks_for(call_id);
                if let Some(callbacks) = callbacks {
                    let mut callbacks = lock(&callbacks);
                    (callbacks.on_progress)(info);
                }
            }
            WorkerEvent::NewBest {
                call_id,
                layout,
                total_cost,
            } => {
                let callbacks = lock(&shared.table).callbacks_for(call_id);
                if let Some(callbacks) = callbacks {
                    let mut callbacks = lock(&callbacks);
                    (callbacks.on_new_best)(layout, total_cost);
                }
            }
            WorkerEvent::Crashed { reason } => {
                warn!("💥 [{}] Worker crashed: {}", shared.label, reason);
                shared.close(ChannelError::Crashed(reason));
                return;
            }
        }
    }
    shared.close(ChannelError::Disconnected);
}

fn unexpected(method: &str, response: Response) -> KeyWeaveError {
    KeyWeaveError::Engine(format!(
        "unexpected reply to {}: {:?}",
        method, response
    ))
}
