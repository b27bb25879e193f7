//! Message storage.
//!
//! A [`MessageStore`] holds two disjoint areas:
//! - the committed keyspace, ordered by identifier, mirrored by the Merkle index
//! - the pending area, for messages whose parents have not all been committed,
//!   with a reverse index from each missing parent to the children it blocks

mod file;
mod memory;

pub use file::FileMessageStore;
pub use memory::MemoryMessageStore;

use crate::error::StoreError;
use arbor_core::{CodecError, Hash, Hasher, Message, MessageId, Signature};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// A stored message with its signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: MessageId,
    pub signature: Option<Signature>,
    pub message: Message,
}

impl Entry {
    pub fn new(id: MessageId, signature: Option<Signature>, message: Message) -> Self {
        Entry { id, signature, message }
    }

    /// Hash of the stored content; the Merkle leaf value for this entry.
    pub fn value_hash(&self) -> Result<Hash, CodecError> {
        let signature = bincode::serialize(&self.signature)?;
        Ok(Hasher::hash_all(&[&signature, &self.message.encode()?]))
    }
}

/// Identifier range with owned bounds.
pub type IdRange = (Bound<MessageId>, Bound<MessageId>);

/// Whether `range` selects nothing. Ordered maps panic on inverted ranges, so
/// backends check this before scanning.
pub fn is_empty_range(range: &IdRange) -> bool {
    use Bound::{Excluded, Included};
    match (&range.0, &range.1) {
        (Included(a), Included(b)) => a > b,
        (Included(a), Excluded(b)) | (Excluded(a), Included(b)) | (Excluded(a), Excluded(b)) => a >= b,
        _ => false,
    }
}

/// Storage backing one topic's log.
///
/// Only the owning [`GossipLog`](crate::GossipLog) writes to a store.
pub trait MessageStore: Send + Sync + 'static {
    /// Commit an entry. Returns `false` if identical content was already
    /// committed, and [`StoreError::Conflict`] if different content was.
    fn put(&mut self, entry: &Entry) -> Result<bool, StoreError>;

    fn get(&self, id: &MessageId) -> Result<Option<Entry>, StoreError>;

    fn contains(&self, id: &MessageId) -> bool;

    /// Up to `limit` committed entries within `range`, in identifier order
    /// (descending when `reverse`).
    fn scan(&self, range: &IdRange, reverse: bool, limit: usize) -> Result<Vec<Entry>, StoreError>;

    /// Number of committed entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hold an entry whose parents are not all committed.
    fn put_pending(&mut self, entry: &Entry) -> Result<(), StoreError>;

    fn is_pending(&self, id: &MessageId) -> bool;

    /// A held entry, if `id` is pending.
    fn get_pending(&self, id: &MessageId) -> Result<Option<Entry>, StoreError>;

    /// Remove an entry from the pending area, returning it.
    fn take_pending(&mut self, id: &MessageId) -> Result<Option<Entry>, StoreError>;

    fn record_missing_parent(&mut self, child: MessageId, parent: MessageId);

    /// Mark `parent` as arrived; returns the children left with no missing parent.
    fn resolve_missing_parent(&mut self, parent: &MessageId) -> BTreeSet<MessageId>;

    /// Pending children and the parents each is still waiting for.
    fn pending(&self) -> BTreeMap<MessageId, BTreeSet<MessageId>>;

    /// Every parent referenced by a pending entry but not committed.
    fn missing_parents(&self) -> BTreeSet<MessageId>;
}

/// Reverse index from missing parents to blocked children, plus the held
/// entries themselves. Shared by the store backends.
#[derive(Clone, Debug, Default)]
pub struct PendingIndex {
    entries: BTreeMap<MessageId, Entry>,
    waiting_on: BTreeMap<MessageId, BTreeSet<MessageId>>,
    blocks: BTreeMap<MessageId, BTreeSet<MessageId>>,
}

impl PendingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&mut self, entry: &Entry) {
        self.entries.entry(entry.id).or_insert_with(|| entry.clone());
        self.waiting_on.entry(entry.id).or_default();
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn take(&mut self, id: &MessageId) -> Option<Entry> {
        let entry = self.entries.remove(id)?;
        if let Some(parents) = self.waiting_on.remove(id) {
            for parent in parents {
                if let Some(children) = self.blocks.get_mut(&parent) {
                    children.remove(id);
                    if children.is_empty() {
                        self.blocks.remove(&parent);
                    }
                }
            }
        }
        Some(entry)
    }

    pub fn record(&mut self, child: MessageId, parent: MessageId) {
        self.waiting_on.entry(child).or_default().insert(parent);
        self.blocks.entry(parent).or_default().insert(child);
    }

    pub fn resolve(&mut self, parent: &MessageId) -> BTreeSet<MessageId> {
        let mut ready = BTreeSet::new();
        for child in self.blocks.remove(parent).unwrap_or_default() {
            if let Some(waiting) = self.waiting_on.get_mut(&child) {
                waiting.remove(parent);
                if waiting.is_empty() {
                    ready.insert(child);
                }
            }
        }
        ready
    }

    pub fn waiting(&self) -> BTreeMap<MessageId, BTreeSet<MessageId>> {
        self.waiting_on.clone()
    }

    pub fn missing(&self) -> BTreeSet<MessageId> {
        self.blocks.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(clock: u64, seed: &[u8]) -> MessageId {
        MessageId::new(clock, &Hasher::hash(seed))
    }

    fn entry(clock: u64, seed: &[u8]) -> Entry {
        let message = Message::new("topic", clock, vec![], seed.to_vec());
        Entry::new(id(clock, seed), None, message)
    }

    #[test]
    fn test_resolve_releases_only_fully_unblocked_children() {
        let mut index = PendingIndex::new();
        let (p1, p2) = (id(1, b"p1"), id(1, b"p2"));
        let child = entry(2, b"child");

        index.hold(&child);
        index.record(child.id, p1);
        index.record(child.id, p2);
        assert_eq!(index.missing(), BTreeSet::from([p1, p2]));

        assert!(index.resolve(&p1).is_empty());
        assert_eq!(index.resolve(&p2), BTreeSet::from([child.id]));
        assert_eq!(index.take(&child.id), Some(child));
        assert!(index.is_empty());
        assert!(index.missing().is_empty());
    }

    #[test]
    fn test_take_clears_reverse_index() {
        let mut index = PendingIndex::new();
        let parent = id(1, b"p");
        let child = entry(2, b"c");
        index.hold(&child);
        index.record(child.id, parent);

        index.take(&child.id);
        assert!(index.missing().is_empty());
        assert!(index.resolve(&parent).is_empty());
    }

    #[test]
    fn test_value_hash_covers_signature() {
        let plain = entry(1, b"x");
        let mut signed = plain.clone();
        signed.signature = Some(Signature::new("ed25519", vec![1], vec![2]));
        assert_ne!(plain.value_hash().unwrap(), signed.value_hash().unwrap());
    }
}
