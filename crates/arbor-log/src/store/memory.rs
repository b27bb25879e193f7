//! In-memory message store.

use super::{is_empty_range, Entry, IdRange, MessageStore, PendingIndex};
use crate::error::StoreError;
use arbor_core::MessageId;
use std::collections::{BTreeMap, BTreeSet};

/// Message store held entirely in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryMessageStore {
    committed: BTreeMap<MessageId, Entry>,
    pending: PendingIndex,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in the pending area.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn pending_entries(&self) -> impl Iterator<Item = &Entry> {
        self.pending.entries()
    }
}

impl MessageStore for MemoryMessageStore {
    fn put(&mut self, entry: &Entry) -> Result<bool, StoreError> {
        match self.committed.get(&entry.id) {
            Some(existing) if existing == entry => Ok(false),
            Some(_) => Err(StoreError::Conflict(entry.id)),
            None => {
                self.committed.insert(entry.id, entry.clone());
                Ok(true)
            }
        }
    }

    fn get(&self, id: &MessageId) -> Result<Option<Entry>, StoreError> {
        Ok(self.committed.get(id).cloned())
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.committed.contains_key(id)
    }

    fn scan(&self, range: &IdRange, reverse: bool, limit: usize) -> Result<Vec<Entry>, StoreError> {
        if is_empty_range(range) {
            return Ok(Vec::new());
        }
        let iter = self.committed.range(*range).map(|(_, entry)| entry.clone());
        Ok(if reverse {
            iter.rev().take(limit).collect()
        } else {
            iter.take(limit).collect()
        })
    }

    fn len(&self) -> usize {
        self.committed.len()
    }

    fn put_pending(&mut self, entry: &Entry) -> Result<(), StoreError> {
        if self.committed.contains_key(&entry.id) {
            return Ok(());
        }
        self.pending.hold(entry);
        Ok(())
    }

    fn is_pending(&self, id: &MessageId) -> bool {
        self.pending.contains(id)
    }

    fn get_pending(&self, id: &MessageId) -> Result<Option<Entry>, StoreError> {
        Ok(self.pending.get(id).cloned())
    }

    fn take_pending(&mut self, id: &MessageId) -> Result<Option<Entry>, StoreError> {
        Ok(self.pending.take(id))
    }

    fn record_missing_parent(&mut self, child: MessageId, parent: MessageId) {
        self.pending.record(child, parent);
    }

    fn resolve_missing_parent(&mut self, parent: &MessageId) -> BTreeSet<MessageId> {
        self.pending.resolve(parent)
    }

    fn pending(&self) -> BTreeMap<MessageId, BTreeSet<MessageId>> {
        self.pending.waiting()
    }

    fn missing_parents(&self) -> BTreeSet<MessageId> {
        self.pending.missing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{Hasher, Message};
    use std::ops::Bound::{Excluded, Included, Unbounded};

    fn entry(clock: u64, payload: &[u8]) -> Entry {
        let message = Message::new("topic", clock, vec![], payload.to_vec());
        let id = MessageId::for_message(None, &message).unwrap();
        Entry::new(id, None, message)
    }

    #[test]
    fn test_put_is_idempotent() {
        let mut store = MemoryMessageStore::new();
        let e = entry(1, b"foo");
        assert!(store.put(&e).unwrap());
        assert!(!store.put(&e).unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&e.id).unwrap(), Some(e));
    }

    #[test]
    fn test_put_conflicting_content() {
        let mut store = MemoryMessageStore::new();
        let e = entry(1, b"foo");
        store.put(&e).unwrap();

        let mut forged = entry(1, b"bar");
        forged.id = e.id;
        assert_eq!(store.put(&forged), Err(StoreError::Conflict(e.id)));
        assert_eq!(store.get(&e.id).unwrap(), Some(e));
    }

    #[test]
    fn test_scan_pages_in_both_directions() {
        let mut store = MemoryMessageStore::new();
        let mut ids: Vec<_> = (1..=10u64)
            .map(|i| {
                let e = entry(i, &i.to_le_bytes());
                store.put(&e).unwrap();
                e.id
            })
            .collect();
        ids.sort();

        let page = store.scan(&(Unbounded, Unbounded), false, 4).unwrap();
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), ids[..4].to_vec());

        // resume after the last entry of the previous page
        let page = store.scan(&(Excluded(ids[3]), Unbounded), false, 4).unwrap();
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), ids[4..8].to_vec());

        let page = store.scan(&(Included(ids[2]), Excluded(ids[6])), true, 10).unwrap();
        let expected: Vec<_> = ids[2..6].iter().rev().copied().collect();
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_pending_area_is_separate() {
        let mut store = MemoryMessageStore::new();
        let parent = MessageId::new(1, &Hasher::hash(b"absent"));
        let message = Message::new("topic", 2, vec![parent], b"child".to_vec());
        let child = Entry::new(MessageId::for_message(None, &message).unwrap(), None, message);

        store.put_pending(&child).unwrap();
        store.record_missing_parent(child.id, parent);

        assert!(store.is_pending(&child.id));
        assert!(!store.contains(&child.id));
        assert!(store.is_empty());
        assert_eq!(store.missing_parents(), BTreeSet::from([parent]));

        assert_eq!(store.resolve_missing_parent(&parent), BTreeSet::from([child.id]));
        assert_eq!(store.take_pending(&child.id).unwrap(), Some(child));
        assert_eq!(store.pending_len(), 0);
    }
}
