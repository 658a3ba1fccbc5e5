use thiserror::Error;
use ulid::Ulid;

/// Message shown to the end user when a slot is already taken.
pub const CONFLICT_MESSAGE: &str = "existing schedule conflict";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("existing schedule conflict (appointment {0})")]
    Conflict(Ulid),
    #[error("a client with this phone already exists: {0}")]
    DuplicateClient(Ulid),
    #[error("agenda {0} still has active appointments")]
    HasAppointments(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}
