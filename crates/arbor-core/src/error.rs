//! Error types shared by the core data model.

use thiserror::Error;

/// Errors raised while encoding or decoding identifiers and messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid identifier length: {0}")]
    InvalidLength(usize),

    #[error("Invalid identifier character: {0:?}")]
    InvalidCharacter(char),

    #[error("Invalid clock prefix: {0}")]
    InvalidClock(u8),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        CodecError::Serialization(err.to_string())
    }
}

/// Errors raised while producing or checking signatures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Unsupported signature scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Malformed public key")]
    MalformedKey,

    #[error("Malformed signature bytes")]
    MalformedSignature,

    #[error("Signature does not match message")]
    Invalid,

    #[error("Signature required but missing")]
    Missing,

    #[error("Signature present on an unsigned log")]
    Unexpected,

    #[error("Encoding failed: {0}")]
    Encoding(#[from] CodecError),
}
