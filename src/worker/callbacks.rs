use crate::error::ChannelError;
use keyweave_protocol::evaluation::ProgressInfo;
use keyweave_protocol::layout::LayoutString;
use keyweave_protocol::message::{CallId, Response, WorkerFault};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub(crate) type CallOutcome = Result<Result<Response, WorkerFault>, ChannelError>;

/// Foreground closures invoked while an annealing call is in flight.
pub struct AnnealCallbacks {
    pub on_progress: Box<dyn FnMut(ProgressInfo) + Send>,
    pub on_new_best: Box<dyn FnMut(LayoutString, f64) + Send>,
}

impl AnnealCallbacks {
    pub fn new(
        on_progress: impl FnMut(ProgressInfo) + Send + 'static,
        on_new_best: impl FnMut(LayoutString, f64) + Send + 'static,
    ) -> Self {
        Self {
            on_progress: Box::new(on_progress),
            on_new_best: Box::new(on_new_best),
        }
    }

    pub fn silent() -> Self {
        Self::new(|_| {}, |_, _| {})
    }
}

/// Pending replies and registered callbacks, keyed by call id.
#[derive(Default)]
pub(crate) struct CallTable {
    pending: HashMap<CallId, oneshot::Sender<CallOutcome>>,
    callbacks: HashMap<CallId, Arc<Mutex<AnnealCallbacks>>>,
    closed: Option<ChannelError>,
}

impl CallTable {
    pub fn register(
        &mut self,
        call_id: CallId,
        callbacks: Option<AnnealCallbacks>,
    ) -> Result<oneshot::Receiver<CallOutcome>, ChannelError> {
        if let Some(err) = &self.closed {
            return Err(err.clone());
        }
        let (tx, rx) = oneshot::channel();
        self.pending.insert(call_id, tx);
        if let Some(cb) = callbacks {
            self.callbacks.insert(call_id, Arc::new(Mutex::new(cb)));
        }
        Ok(rx)
    }

    /// Completes a call. Its callbacks are dropped with it.
    pub fn resolve(&mut self, call_id: CallId, outcome: Result<Response, WorkerFault>) -> bool {
        self.callbacks.remove(&call_id);
        match self.pending.remove(&call_id) {
            Some(tx) => tx.send(Ok(outcome)).is_ok(),
            None => false,
        }
    }

    /// Withdraws a call whose request never reached the worker.
    pub fn forget(&mut self, call_id: CallId) {
        self.callbacks.remove(&call_id);
        self.pending.remove(&call_id);
    }

    /// Handle to the callbacks of a call, to be invoked outside the table lock.
    pub fn callbacks_for(&self, call_id: CallId) -> Option<Arc<Mutex<AnnealCallbacks>>> {
        self.callbacks.get(&call_id).cloned()
    }

    /// Rejects every pending call and refuses new ones. The first reason wins.
    pub fn fail_all(&mut self, err: ChannelError) {
        if self.closed.is_some() {
            return;
        }
        self.callbacks.clear();
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(err.clone()));
        }
        self.closed = Some(err);
    }

    pub fn closed(&self) -> Option<&ChannelError> {
        self.closed.as_ref()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
