//! Error types for the orchestrator.

use thiserror::Error;

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Durable store failure.
    #[error("store error: {0}")]
    Store(#[from] orrery_state::StoreError),

    /// Pending-due index failure.
    #[error("index error: {0}")]
    Queue(#[from] orrery_state::QueueError),

    /// Wire protocol failure.
    #[error("protocol error: {0}")]
    Proto(#[from] orrery_proto::ProtoError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
