//! Append-only file store.
//!
//! Every commit or pending hold appends one record (`u32` little-endian length
//! followed by a bincode body) before the in-memory index is touched. Opening
//! the file replays the records; a torn record at the tail is cut off.

use super::{Entry, IdRange, MemoryMessageStore, MessageStore};
use crate::error::StoreError;
use arbor_core::MessageId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
enum Record {
    Commit(Entry),
    Pending(Entry),
}

/// Durable message store backed by a single record file.
#[derive(Debug)]
pub struct FileMessageStore {
    path: PathBuf,
    file: File,
    index: MemoryMessageStore,
    sync_writes: bool,
}

impl FileMessageStore {
    /// Open or create the record file at `path` and load its contents.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut index = MemoryMessageStore::new();
        let mut offset = 0usize;
        let mut records = 0usize;
        while offset + 4 <= bytes.len() {
            let mut len = [0u8; 4];
            len.copy_from_slice(&bytes[offset..offset + 4]);
            let len = u32::from_le_bytes(len) as usize;
            if offset + 4 + len > bytes.len() {
                break;
            }
            match bincode::deserialize::<Record>(&bytes[offset + 4..offset + 4 + len])? {
                Record::Commit(entry) => {
                    index.put(&entry)?;
                }
                Record::Pending(entry) => index.put_pending(&entry)?,
            }
            offset += 4 + len;
            records += 1;
        }

        if offset < bytes.len() {
            warn!(path = %path.display(), kept = offset, dropped = bytes.len() - offset, "truncating torn record");
            file.set_len(offset as u64)?;
        }

        // Committed records supersede earlier pending holds of the same entry.
        let held: Vec<Entry> = index.pending_entries().cloned().collect();
        for entry in held {
            if index.contains(&entry.id) {
                index.take_pending(&entry.id)?;
                continue;
            }
            for parent in &entry.message.parents {
                if !index.contains(parent) {
                    index.record_missing_parent(entry.id, *parent);
                }
            }
        }

        debug!(path = %path.display(), records, committed = index.len(), pending = index.pending_len(), "opened message file");

        Ok(FileMessageStore {
            path,
            file,
            index,
            sync_writes: false,
        })
    }

    /// Call `fsync` after every appended record.
    pub fn with_sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, record: &Record) -> Result<(), StoreError> {
        let body = bincode::serialize(record)?;
        let mut frame = Vec::with_capacity(body.len() + 4);
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        self.file.write_all(&frame)?;
        self.file.flush()?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

impl MessageStore for FileMessageStore {
    fn put(&mut self, entry: &Entry) -> Result<bool, StoreError> {
        match self.index.get(&entry.id)? {
            Some(existing) if existing == *entry => return Ok(false),
            Some(_) => return Err(StoreError::Conflict(entry.id)),
            None => {}
        }
        self.append(&Record::Commit(entry.clone()))?;
        self.index.put(entry)
    }

    fn get(&self, id: &MessageId) -> Result<Option<Entry>, StoreError> {
        self.index.get(id)
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.index.contains(id)
    }

    fn scan(&self, range: &IdRange, reverse: bool, limit: usize) -> Result<Vec<Entry>, StoreError> {
        self.index.scan(range, reverse, limit)
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn put_pending(&mut self, entry: &Entry) -> Result<(), StoreError> {
        if self.index.contains(&entry.id) || self.index.is_pending(&entry.id) {
            return Ok(());
        }
        self.append(&Record::Pending(entry.clone()))?;
        self.index.put_pending(entry)
    }

    fn is_pending(&self, id: &MessageId) -> bool {
        self.index.is_pending(id)
    }

    fn get_pending(&self, id: &MessageId) -> Result<Option<Entry>, StoreError> {
        self.index.get_pending(id)
    }

    // No record: a later commit supersedes the pending hold on reload, and a
    // hold without a commit is restored as pending.
    fn take_pending(&mut self, id: &MessageId) -> Result<Option<Entry>, StoreError> {
        self.index.take_pending(id)
    }

    fn record_missing_parent(&mut self, child: MessageId, parent: MessageId) {
        self.index.record_missing_parent(child, parent);
    }

    fn resolve_missing_parent(&mut self, parent: &MessageId) -> BTreeSet<MessageId> {
        self.index.resolve_missing_parent(parent)
    }

    fn pending(&self) -> BTreeMap<MessageId, BTreeSet<MessageId>> {
        self.index.pending()
    }

    fn missing_parents(&self) -> BTreeSet<MessageId> {
        self.index.missing_parents()
    }
}
