//! Background execution of the evaluation pipeline.
//!
//! A [`WorkerChannel`] owns one OS thread running an
//! [`EvaluationContext`](crate::context::EvaluationContext). The foreground
//! talks to it through serializable [`Envelope`](keyweave_protocol::message::Envelope)s
//! and receives [`WorkerEvent`](keyweave_protocol::message::WorkerEvent)s back.

mod callbacks;
mod channel;
mod host;

pub use callbacks::AnnealCallbacks;
pub use channel::{ChannelOptions, ChannelTerminator, WorkerChannel};

use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ChannelLifecycle {
    Uninitialized,
    EngineLoaded,
    NgramProviderReady,
    EvaluatorReady,
    Terminated,
    Crashed,
}

impl ChannelLifecycle {
    pub fn is_closed(self) -> bool {
        matches!(self, ChannelLifecycle::Terminated | ChannelLifecycle::Crashed)
    }
}
