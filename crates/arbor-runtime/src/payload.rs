//! Message payloads understood by the runtime.

use crate::error::ExecutionError;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named action with JSON arguments, performed on behalf of `address`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub args: Value,
    pub address: String,
    /// Milliseconds since the epoch, as claimed by the author.
    pub timestamp: u64,
}

impl Action {
    pub fn new(name: impl Into<String>, args: Value, address: impl Into<String>, timestamp: u64) -> Self {
        Action {
            name: name.into(),
            args,
            address: address.into(),
            timestamp,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    Session(Session),
    Action(Action),
}

impl Payload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ExecutionError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ExecutionError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Log validator accepting only well-formed payloads.
pub fn is_valid_payload(bytes: &[u8]) -> bool {
    Payload::from_bytes(bytes).is_ok()
}
