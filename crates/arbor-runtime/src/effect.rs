//! Recorded model mutations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Write a mutable model value.
    Set,
    /// Delete a mutable model value.
    Delete,
    /// Insert an immutable, content-addressed value.
    Add,
    /// Remove an immutable value.
    Remove,
}

impl Operation {
    /// Whether the operation leaves a value behind.
    pub fn writes_value(&self) -> bool {
        matches!(self, Operation::Set | Operation::Add)
    }
}

/// One intended mutation produced by executing a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub model: String,
    pub operation: Operation,
    pub key: String,
    pub value: Option<Value>,
}

impl Effect {
    pub fn set(model: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Effect {
            model: model.into(),
            operation: Operation::Set,
            key: key.into(),
            value: Some(value),
        }
    }

    pub fn delete(model: impl Into<String>, key: impl Into<String>) -> Self {
        Effect {
            model: model.into(),
            operation: Operation::Delete,
            key: key.into(),
            value: None,
        }
    }

    pub fn add(model: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Effect {
            model: model.into(),
            operation: Operation::Add,
            key: key.into(),
            value: Some(value),
        }
    }

    pub fn remove(model: impl Into<String>, key: impl Into<String>) -> Self {
        Effect {
            model: model.into(),
            operation: Operation::Remove,
            key: key.into(),
            value: None,
        }
    }
}
