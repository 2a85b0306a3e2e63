use crate::context::EvaluationContext;
use crate::engine::{AnnealObserver, EngineLoader};
use keyweave_protocol::evaluation::ProgressInfo;
use keyweave_protocol::layout::LayoutString;
use keyweave_protocol::message::{CallId, Envelope, Request, Response, WorkerEvent, WorkerFault};
use std::any::Any;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Unwind payload that carries the worker out of engine code once its channel is gone.
struct Abandoned;

fn abandon() -> ! {
    resume_unwind(Box::new(Abandoned))
}

/// Body of the worker thread: one request at a time, in arrival order.
///
/// `halt` is raised by the foreground on terminate. Queued requests are then
/// dropped, and a running anneal is abandoned at its next callback.
pub(crate) fn run<L: EngineLoader>(
    name: String,
    loader: Arc<L>,
    mut requests: mpsc::Receiver<Envelope>,
    events: mpsc::Sender<WorkerEvent>,
    halt: Arc<AtomicBool>,
) {
    let mut context: Option<EvaluationContext<L::Engine>> = None;

    while let Some(Envelope { call_id, request }) = requests.blocking_recv() {
        if halt.load(Ordering::Acquire) {
            break;
        }
        let method = request.method();
        debug!("[{}] call {} -> {}", name, call_id, method);

        let handled = catch_unwind(AssertUnwindSafe(|| {
            handle(&*loader, &mut context, call_id, request, &events, &halt)
        }));

        match handled {
            Ok(outcome) => {
                if events
                    .blocking_send(WorkerEvent::Reply { call_id, outcome })
                    .is_err()
                {
                    // Foreground is gone; nobody is waiting for us.
                    break;
                }
            }
            Err(payload) if is_abandoned(payload.as_ref()) => {
                info!("🗑️  [{}] Discarded {} after termination", name, method);
                return;
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!("💥 [{}] Engine panicked during {}: {}", name, method, reason);
                let _ = events.blocking_send(WorkerEvent::Crashed { reason });
                return;
            }
        }
    }

    info!("🛑 [{}] Worker thread exiting", name);
}

fn handle<L: EngineLoader>(
    loader: &L,
    context: &mut Option<EvaluationContext<L::Engine>>,
    call_id: CallId,
    request: Request,
    events: &mpsc::Sender<WorkerEvent>,
    halt: &AtomicBool,
) -> Result<Response, WorkerFault> {
    if let Request::Init = request {
        if context.is_none() {
            let engine = loader.load().map_err(|e| WorkerFault::Engine(e.0))?;
            *context = Some(EvaluationContext::new(engine));
            info!("🚀 Engine loaded");
        }
        return Ok(Response::Done);
    }

    let ctx = context
        .as_mut()
        .ok_or_else(|| WorkerFault::Sequencing("engine not loaded; call init first".into()))?;

    match request {
        Request::Init => Ok(Response::Done),
        Request::InitNgramProvider { params, input } => {
            ctx.init_ngram_provider(&input, &params)?;
            Ok(Response::Done)
        }
        Request::ResetProvider => {
            ctx.reset_provider();
            Ok(Response::Done)
        }
        Request::InitEvaluator { keyboard, params } => {
            Ok(Response::Keys(ctx.init_evaluator(&keyboard, &params)?))
        }
        Request::Evaluate { layout } => Ok(Response::Evaluation(ctx.evaluate(&layout)?)),
        Request::PermutableKeys => Ok(Response::Keys(ctx.permutable_keys()?)),
        Request::InitOptimizer {
            layout,
            fixed,
            params,
        } => Ok(Response::OptimizerParameters(
            ctx.init_optimizer(&layout, &fixed, &params)?,
        )),
        Request::OptimizationStep => Ok(Response::Step(ctx.optimization_step()?)),
        Request::Anneal {
            layout,
            fixed,
            params,
        } => {
            let mut observer = ChannelObserver {
                call_id,
                events,
                halt,
            };
            let best = ctx.anneal(&layout, &fixed, &params, &mut observer)?;
            if halt.load(Ordering::Acquire) {
                abandon();
            }
            Ok(Response::Evaluation(ctx.evaluate(&best)?))
        }
        Request::Plot { layout, layer } => Ok(Response::Plot(ctx.plot(&layout, layer)?)),
    }
}

/// Forwards engine callbacks to the foreground, tagged with the call they belong to.
/// Sends block while the event queue is full, which throttles a chatty engine.
struct ChannelObserver<'a> {
    call_id: CallId,
    events: &'a mpsc::Sender<WorkerEvent>,
    halt: &'a AtomicBool,
}

impl ChannelObserver<'_> {
    fn forward(&self, event: WorkerEvent) {
        if self.halt.load(Ordering::Acquire) || self.events.blocking_send(event).is_err() {
            abandon();
        }
    }
}

impl AnnealObserver for ChannelObserver<'_> {
    fn on_progress(&mut self, info: ProgressInfo) {
        self.forward(WorkerEvent::Progress {
            call_id: self.call_id,
            info,
        });
    }

    fn on_new_best(&mut self, layout: &str, total_cost: f64) {
        self.forward(WorkerEvent::NewBest {
            call_id: self.call_id,
            layout: LayoutString::from(layout),
            total_cost,
        });
    }
}

fn is_abandoned(payload: &(dyn Any + Send)) -> bool {
    payload.is::<Abandoned>()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
