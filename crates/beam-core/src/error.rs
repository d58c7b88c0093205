//! Error types for the Beam protocol

use thiserror::Error;

/// Wire-level errors: framing, identifiers, configuration of the framing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("invalid control frame: {0}")]
    InvalidControlFrame(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("invalid chunk size: {size} bytes (allowed 1..={max})")]
    InvalidChunkSize { size: usize, max: usize },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}

/// Errors affecting a single in-flight transfer
///
/// None of these are fatal to the session: the partial file is dropped and
/// the channel stays usable for the next transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("data frame of {len} bytes arrived with no transfer in progress")]
    Orphaned { len: usize },

    #[error("received {received} bytes but only {declared} were declared")]
    Overflow { declared: u64, received: u64 },

    #[error("transfer incomplete: {received} of {declared} bytes")]
    Incomplete { declared: u64, received: u64 },

    #[error("declared size {size} exceeds limit of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("channel closed with {received} of {declared} bytes received")]
    Interrupted { declared: u64, received: u64 },

    #[error("channel is not open")]
    NotConnected,

    #[error("channel send failed: {0}")]
    Channel(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
