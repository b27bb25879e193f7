//! Merkle nodes as exchanged between replicas.

use arbor_core::{Hash, MessageId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node key: `None` is the anchor at the left edge of each level.
pub type Key = Option<MessageId>;

/// A node of the Merkle search tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// 0 for leaves.
    pub level: u8,
    pub key: Key,
    pub hash: Hash,
}

impl Node {
    pub fn new(level: u8, key: Key, hash: Hash) -> Self {
        Node { level, key, hash }
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    pub fn is_anchor(&self) -> bool {
        self.key.is_none()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{{ {} | {} | {} }}", self.level, key.short(), self.hash.short()),
            None => write!(f, "{{ {} | null | {} }}", self.level, self.hash.short()),
        }
    }
}
