//! Error types for the runtime.

use arbor_core::SignatureError;
use thiserror::Error;

/// Errors raised by model validation and the model store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid value for model {model}: {reason}")]
    Schema { model: String, reason: String },

    #[error("Operation {operation} not allowed on model {model}")]
    WrongKind { model: String, operation: String },

    /// A commit failed for a reason that may not recur; the caller retries.
    #[error("Transient store failure: {0}")]
    Transient(String),

    #[error("Store failure: {0}")]
    Store(String),
}

impl ModelError {
    pub fn schema(model: &str, reason: impl Into<String>) -> Self {
        ModelError::Schema {
            model: model.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Transient(_))
    }
}

/// Errors raised while verifying sessions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No session signer matches address {0}")]
    UnsupportedAddress(String),

    #[error("Malformed address: {0}")]
    MalformedAddress(String),

    #[error("Session is for topic {found}, expected {expected}")]
    TopicMismatch { expected: String, found: String },

    #[error("Session key does not match message signer")]
    KeyMismatch,

    #[error("Invalid session authorization: {0}")]
    Authorization(#[from] SignatureError),
}

/// Reasons a message is rejected by the runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid action name: {0}")]
    MissingAction(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Action failed: {0}")]
    Handler(String),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

impl ExecutionError {
    /// Convenience for action implementations.
    pub fn handler(reason: impl Into<String>) -> Self {
        ExecutionError::Handler(reason.into())
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(err: serde_json::Error) -> Self {
        ExecutionError::InvalidPayload(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
