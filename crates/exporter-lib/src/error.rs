//! Error types shared across the exporter

use std::time::Duration;

/// Failure of a single container runtime call
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime transport error: {0}")]
    Transport(String),
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("runtime call timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to decode runtime response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<hyper::Error> for RuntimeError {
    fn from(err: hyper::Error) -> Self {
        RuntimeError::Transport(err.to_string())
    }
}

/// Failure writing to or registering a metric vector
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("label set rejected by metric {metric}: {source}")]
    LabelMismatch {
        metric: String,
        #[source]
        source: prometheus::Error,
    },
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),
}

/// Misuse of the label schema registry
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("label schema is already frozen")]
    AlreadyFrozen,
    #[error("label schema has not been frozen yet")]
    NotFrozen,
}

/// Failure that aborts a whole reconciliation cycle
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("failed to list containers: {0}")]
    List(#[source] RuntimeError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl CycleError {
    /// Whether the poller can carry on with the next tick
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CycleError::List(_))
    }
}

pub type Result<T> = std::result::Result<T, CycleError>;
