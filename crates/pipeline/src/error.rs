use std::sync::Arc;

use annota_core::{ConfigError, StageError};
use thiserror::Error;

/// Errors raised while building or running an annotation pipeline.
///
/// `Clone` so that one stage-construction failure can be handed to every
/// caller that was waiting on the same pool entry.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("circular stage dependency: {0}")]
    CyclicDependency(String),

    #[error("unsatisfiable stage list: {0}")]
    UnsatisfiableDependency(String),

    #[error("stage \"{stage}\" requires \"{requirement}\", which no earlier stage provides")]
    MissingRequirement { stage: String, requirement: String },

    #[error("failed to construct stage \"{stage}\": {message}")]
    StageConstruction { stage: String, message: String },

    #[error("stage \"{stage}\" failed: {source}")]
    StageApply {
        stage: String,
        #[source]
        source: Arc<StageError>,
    },

    #[error("transport error: {0}")]
    Transport(#[source] Arc<TransportError>),

    #[error("config error: {0}")]
    Config(String),

    #[error("scheduler has shut down")]
    Shutdown,

    #[error("worker failed: {0}")]
    Worker(String),
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<TransportError> for PipelineError {
    fn from(e: TransportError) -> Self {
        Self::Transport(Arc::new(e))
    }
}

/// Failures of one request/response exchange with a remote backend.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to encode document: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked with a non-string payload".to_string()
    }
}
