//! # arbor-merkle
//!
//! Merkle search tree over the identifiers of a causal log.
//!
//! Leaves are `(id, hash of stored message)` pairs. Each level groups the
//! nodes of the level below into runs that start at a *boundary*: a node whose
//! hash falls under a threshold derived from the configured fanout. The
//! leftmost node of every level is an *anchor* with key `None`, and the root
//! is the anchor of the first level that holds nothing else.
//!
//! Because boundaries depend only on content, two replicas holding the same
//! key/value set build the same tree, whatever order they inserted in, and an
//! insert or delete only rehashes the path above it.
//!
//! ## Example
//!
//! ```rust
//! use arbor_core::{Hasher, MessageId};
//! use arbor_merkle::MerkleTree;
//!
//! let mut a = MerkleTree::new();
//! let mut b = MerkleTree::new();
//!
//! let ids: Vec<_> = (1..=3u64)
//!     .map(|i| MessageId::new(i, &Hasher::hash(&i.to_le_bytes())))
//!     .collect();
//!
//! for id in &ids {
//!     a.insert(*id, Hasher::hash(id.as_bytes()));
//! }
//! for id in ids.iter().rev() {
//!     b.insert(*id, Hasher::hash(id.as_bytes()));
//! }
//!
//! assert_eq!(a.root(), b.root());
//! ```

mod node;
mod tree;

pub use arbor_core::Hash;
pub use node::{Key, Node};
pub use tree::{MerkleConfig, MerkleError, MerkleTree};
