//! Error types for the wire protocol.

use thiserror::Error;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Frame was not a valid JSON object of a known shape.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Identifier failed validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Frame could not be serialized.
    #[error("serialisation error: {0}")]
    Serialisation(String),
}
