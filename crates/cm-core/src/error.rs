//! # MediaError
//!
//! Centralized error handling for the card media store.
//! Maps storage, index, and offload failures to actionable error types.

use thiserror::Error;

/// The primary error type for all cm-core operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Source payload unreadable or vanished (fatal to the current save)
    #[error("read error: {0}")]
    Read(String),

    /// Inline payload that does not decode to bytes
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Managed directory or file could not be written (disk full, permissions)
    #[error("write error: {0}")]
    Write(String),

    /// Metadata index unreadable, corrupt, or its worker has gone away
    #[error("index error: {0}")]
    Index(String),

    /// Cloud upload failed (transport, timeout, non-success status)
    #[error("offload error: {0}")]
    Offload(String),

    /// Resource not found (e.g., image record, card record)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Card-data persistence failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Invalid or missing configuration for a plugin
    #[error("configuration error: {0}")]
    Config(String),
}

impl MediaError {
    /// Cloud failures are absorbed by the store and demoted to warnings;
    /// everything else means the operation did not happen.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MediaError::Offload(_))
    }
}

/// A specialized Result type for media store logic.
pub type Result<T> = std::result::Result<T, MediaError>;
