use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Timeout, connection loss, or a 5xx response. Retried with backoff.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// A 4xx response. Never retried; surfaced to the caller as data.
    #[error("request rejected by server: {0}")]
    PermanentRequest(String),

    #[error("action not found: {0}")]
    ActionNotFound(uuid::Uuid),

    #[error("no active pickup for entity {0}")]
    EntityNotTracked(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid http method: {0}")]
    InvalidMethod(String),

    #[error("queue store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// True if draining should retry this action on a later pass.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
