//! Error types for the log, its store and the sync protocol.

use arbor_core::{CodecError, MessageId, SignatureError};
use arbor_merkle::MerkleError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`MessageStore`](crate::MessageStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Same identifier stored with different content: a hash-prefix
    /// collision or corruption. Never resolved silently.
    #[error("Conflicting content for message {0}")]
    Conflict(MessageId),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Codec(CodecError::from(err))
    }
}

/// Errors surfaced by [`GossipLog`](crate::GossipLog) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("Payload failed validation: {0}")]
    Validation(String),

    #[error("Signature rejected: {0}")]
    Signature(#[from] SignatureError),

    #[error("Log requires signatures but no signer was supplied")]
    SignerRequired,

    #[error("Message topic {found} does not match log topic {expected}")]
    TopicMismatch { expected: String, found: String },

    #[error("Invalid clock {found}, expected {expected}")]
    InvalidClock { expected: u64, found: u64 },

    /// A parent's clock leaves no room for a child.
    #[error("Parent clock {0} cannot be advanced")]
    ClockOverflow(u64),

    #[error("Conflicting content for message {0}")]
    Conflict(MessageId),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The message was logged but its handler failed; no effects applied.
    #[error("Message {id} was rejected: {reason}")]
    ActionExecution { id: MessageId, reason: String },
}

impl From<StoreError> for LogError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(id) => LogError::Conflict(id),
            other => LogError::Store(other),
        }
    }
}

/// Errors raised while reconciling with a remote log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A round exceeded its deadline.
    #[error("Sync round timed out after {0:?}")]
    Timeout(Duration),

    /// Rounds ran out while messages were still missing.
    #[error("Sync incomplete after {rounds} rounds ({missing} messages missing)")]
    Incomplete { rounds: usize, missing: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote holds conflicting content for {0}")]
    Conflict(MessageId),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The remote failed to serve a request.
    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Merkle error: {0}")]
    Merkle(#[from] MerkleError),
}

impl SyncError {
    /// Whether the scheduler should retry this exchange later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Timeout(_)
                | SyncError::Incomplete { .. }
                | SyncError::Transport(_)
                | SyncError::Remote(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LogError>;
