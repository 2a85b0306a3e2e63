use keyweave_protocol::layout::ValidationError;
use keyweave_protocol::message::WorkerFault;
use thiserror::Error;

/// Why a call on a worker channel never got a reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("worker channel was terminated")]
    Terminated,

    #[error("worker crashed: {0}")]
    Crashed(String),

    #[error("worker channel disconnected")]
    Disconnected,
}

#[derive(Error, Debug)]
pub enum KeyWeaveError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Data Validation Error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Channel Error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Sequencing Error: {0}")]
    Sequencing(String),

    #[error("Engine Error: {0}")]
    Engine(String),

    #[error("Corpus Error: {0}")]
    Corpus(String),

    #[error("Busy: {0}")]
    Busy(String),
}

impl From<WorkerFault> for KeyWeaveError {
    fn from(fault: WorkerFault) -> Self {
        match fault {
            WorkerFault::Config(msg) => KeyWeaveError::Config(msg),
            WorkerFault::Validation(err) => KeyWeaveError::Validation(err),
            WorkerFault::Sequencing(msg) => KeyWeaveError::Sequencing(msg),
            WorkerFault::Engine(msg) => KeyWeaveError::Engine(msg),
        }
    }
}

impl KeyWeaveError {
    pub fn is_terminated(&self) -> bool {
        matches!(self, KeyWeaveError::Channel(ChannelError::Terminated))
    }

    pub fn is_channel_loss(&self) -> bool {
        matches!(self, KeyWeaveError::Channel(_))
    }
}

pub type KwResult<T> = Result<T, KeyWeaveError>;
