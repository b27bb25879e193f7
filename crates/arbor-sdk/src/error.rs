//! Error types for the Arbor SDK.

use arbor_log::{LogError, SyncError};
use arbor_runtime::{ExecutionError, ModelError};
use thiserror::Error;

/// Failures of a sync transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The remote end went away before answering.
    #[error("Disconnected")]
    Disconnected,

    #[error("Wire encoding failed: {0}")]
    Codec(String),
}

impl From<NetworkError> for SyncError {
    fn from(err: NetworkError) -> Self {
        SyncError::Transport(err.to_string())
    }
}

/// Error type for SDK operations.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Log error: {0}")]
    Log(#[from] LogError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),
}

impl SdkError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SdkError::Sync(err) => err.is_retryable(),
            SdkError::Network(_) => true,
            _ => false,
        }
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
