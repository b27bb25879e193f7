//! Messages and signatures.
//!
//! A message is immutable once built. Its canonical encoding (bincode over the
//! struct) is what gets signed and hashed into its identifier.

use crate::error::CodecError;
use crate::id::MessageId;
use serde::{Deserialize, Serialize};

/// One entry of a topic's causal log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Namespace of the log this message belongs to.
    pub topic: String,

    /// Logical clock: `1 + max(parent clocks)`, or 1 for a root message.
    pub clock: u64,

    /// Causal predecessors, sorted and deduplicated.
    pub parents: Vec<MessageId>,

    /// Opaque application payload.
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message, normalising the parent list.
    pub fn new(topic: impl Into<String>, clock: u64, mut parents: Vec<MessageId>, payload: Vec<u8>) -> Self {
        parents.sort();
        parents.dedup();
        Message {
            topic: topic.into(),
            clock,
            parents,
            payload,
        }
    }

    /// Canonical bytes used for signing and hashing.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Whether the parent list is strictly increasing (sorted, no duplicates).
    pub fn has_canonical_parents(&self) -> bool {
        self.parents.windows(2).all(|pair| pair[0] < pair[1])
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

/// A signature over a message's canonical bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Signature scheme name, e.g. `"ed25519"`.
    pub scheme: String,
    pub public_key: Vec<u8>,
    pub bytes: Vec<u8>,
}

impl Signature {
    pub fn new(scheme: impl Into<String>, public_key: Vec<u8>, bytes: Vec<u8>) -> Self {
        Signature {
            scheme: scheme.into(),
            public_key,
            bytes,
        }
    }
}
