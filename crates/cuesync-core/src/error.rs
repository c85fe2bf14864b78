//! Error types for CueSync

use thiserror::Error;

use crate::CueId;

/// Core CueSync errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CueSyncError {
    // Wire errors
    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Invalid header: {0}")]
    InvalidHeader(&'static str),

    #[error("Payload length {declared} exceeds datagram ({available} bytes available)")]
    PayloadOverrun { declared: usize, available: usize },

    // Resource exhaustion
    #[error("Cue table full, cannot store {0}")]
    CueTableFull(CueId),

    #[error("Pending fire queue full, dropping fire for {0}")]
    FireQueueFull(CueId),

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    // Embedding errors
    #[error("Agent is not accepting commands: {0}")]
    CommandRejected(&'static str),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for CueSync operations
pub type CueSyncResult<T> = Result<T, CueSyncError>;
