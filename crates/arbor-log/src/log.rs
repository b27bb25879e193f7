//! The causal log of one topic.
//!
//! A [`GossipLog`] owns a [`MessageStore`] and the Merkle index mirroring its
//! committed keyspace. All writes (`append`, `insert`, `replay`) run inside a
//! per-log critical section, so the store, the index, the frontier and the
//! handler observe each message as one unit. Reads go through a separate
//! read/write lock and never wait for a running handler.

use crate::config::LogConfig;
use crate::error::{LogError, Result};
use crate::event::LogEvent;
use crate::handler::{ApplyError, MessageHandler};
use crate::store::{Entry, IdRange, MemoryMessageStore, MessageStore};
use arbor_core::{verify_signature, AcceptAll, Hash, Message, MessageId, Signature, SignatureError, Signer, Validator};
use arbor_merkle::{Key, MerkleError, MerkleTree, Node};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::ops::Bound::{Excluded, Unbounded};
use std::ops::RangeBounds;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Entries fetched per store scan while iterating.
const PAGE_SIZE: usize = 256;

/// Outcome of a successful local append.
#[derive(Clone, Debug)]
pub struct Appended<T> {
    pub id: MessageId,
    pub signature: Option<Signature>,
    pub message: Message,
    /// What the handler returned for this message.
    pub output: T,
}

/// What [`GossipLog::insert`] did with a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertStatus {
    /// Committed and accepted by the handler.
    Applied,
    /// Committed, but the handler rejected it.
    ApplyFailed(String),
    /// Held until its missing parents arrive.
    Pending,
    /// Already committed or already pending.
    Duplicate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsertResult {
    pub id: MessageId,
    pub status: InsertStatus,
    /// Pending descendants committed as a consequence of this insert, in
    /// application order.
    pub unblocked: Vec<MessageId>,
}

impl InsertResult {
    /// Whether the log had not seen this message before.
    pub fn is_new(&self) -> bool {
        self.status != InsertStatus::Duplicate
    }
}

/// A pending message whose parents have been missing past the grace period.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StalledMessage {
    pub id: MessageId,
    pub missing: BTreeSet<MessageId>,
    pub waiting: Duration,
}

/// Summary of a log's state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogStats {
    pub messages: usize,
    pub pending: usize,
    pub frontier: usize,
    pub root: Hash,
}

struct LogState<S> {
    store: S,
    tree: MerkleTree,
    frontier: BTreeSet<MessageId>,
    pending_since: HashMap<MessageId, Instant>,
}

impl<S: MessageStore> LogState<S> {
    /// Store, index, and advance the frontier. Store first, index second.
    fn commit(&mut self, entry: &Entry) -> Result<bool> {
        let value = entry.value_hash()?;
        if !self.store.put(entry)? {
            return Ok(false);
        }
        self.tree.insert(entry.id, value);
        for parent in &entry.message.parents {
            self.frontier.remove(parent);
        }
        self.frontier.insert(entry.id);
        self.pending_since.remove(&entry.id);
        Ok(true)
    }
}

/// Append-only, causally ordered log of messages for one topic.
pub struct GossipLog<H: MessageHandler, S: MessageStore = MemoryMessageStore> {
    config: LogConfig,
    write_lock: Mutex<()>,
    state: RwLock<LogState<S>>,
    validator: Arc<dyn Validator>,
    handler: H,
    events: broadcast::Sender<LogEvent>,
}

impl<H: MessageHandler> GossipLog<H> {
    /// Open an empty in-memory log.
    pub async fn in_memory(config: LogConfig, handler: H) -> Result<Self> {
        Self::open(config, MemoryMessageStore::new(), handler).await
    }
}

impl<H: MessageHandler, S: MessageStore> GossipLog<H, S> {
    /// Open a log over `store`, accepting every payload.
    pub async fn open(config: LogConfig, store: S, handler: H) -> Result<Self> {
        Self::open_with_validator(config, store, Arc::new(AcceptAll), handler).await
    }

    /// Open a log over `store`.
    ///
    /// The frontier and the Merkle index are rebuilt from the committed
    /// entries. Pending entries whose parents are all committed are applied.
    /// Committed entries are not re-applied; see [`GossipLog::replay`].
    pub async fn open_with_validator(
        config: LogConfig,
        store: S,
        validator: Arc<dyn Validator>,
        handler: H,
    ) -> Result<Self> {
        let entries = store.scan(&(Unbounded, Unbounded), false, usize::MAX)?;

        let mut referenced = BTreeSet::new();
        let mut leaves = Vec::with_capacity(entries.len());
        for entry in &entries {
            referenced.extend(entry.message.parents.iter().copied());
            leaves.push((entry.id, entry.value_hash()?));
        }
        let frontier = entries
            .iter()
            .map(|entry| entry.id)
            .filter(|id| !referenced.contains(id))
            .collect();
        let tree = MerkleTree::from_leaves(config.merkle.clone(), leaves);

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let now = Instant::now();
        let pending_since = store.pending().into_keys().map(|id| (id, now)).collect();

        info!(topic = %config.topic, messages = entries.len(), root = %tree.root().hash.short(), "opened log");

        let log = GossipLog {
            config,
            write_lock: Mutex::new(()),
            state: RwLock::new(LogState {
                store,
                tree,
                frontier,
                pending_since,
            }),
            validator,
            handler,
            events,
        };

        let ready = {
            let mut state = log.state.write();
            let mut ready = BTreeSet::new();
            for (child, waiting) in state.store.pending() {
                if waiting.is_empty() {
                    ready.insert(child);
                }
            }
            for parent in state.store.missing_parents() {
                if state.store.contains(&parent) {
                    ready.extend(state.store.resolve_missing_parent(&parent));
                }
            }
            ready
        };
        if !ready.is_empty() {
            let _guard = log.write_lock.lock().await;
            log.promote(ready).await?;
        }
        Ok(log)
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    /// Append a local message on top of the current frontier.
    ///
    /// The message is committed before the handler runs. If the handler
    /// rejects it, the message stays in the log (replicas reach the same
    /// rejection) and [`LogError::ActionExecution`] is returned.
    pub async fn append(&self, payload: Vec<u8>, signer: Option<&dyn Signer>) -> Result<Appended<H::Output>> {
        if !self.validator.validate(&payload) {
            return Err(LogError::Validation("payload rejected by validator".to_string()));
        }
        if self.config.signatures && signer.is_none() {
            return Err(LogError::SignerRequired);
        }

        let _guard = self.write_lock.lock().await;

        let parents: Vec<MessageId> = self.state.read().frontier.iter().copied().collect();
        let message = Message::new(self.config.topic.clone(), next_clock(&parents)?, parents, payload);
        let signature = match signer {
            Some(signer) if self.config.signatures => Some(signer.sign(&message).await?),
            _ => None,
        };
        let id = MessageId::for_message(signature.as_ref(), &message)?;
        let entry = Entry::new(id, signature, message);

        debug!(topic = %self.config.topic, id = %id, clock = entry.message.clock, "appending message");
        let outcome = self.commit_and_apply(&entry).await?;
        let ready = self.state.write().store.resolve_missing_parent(&id);
        self.promote(ready).await?;

        match outcome {
            Some(Ok(output)) => Ok(Appended {
                id,
                signature: entry.signature,
                message: entry.message,
                output,
            }),
            Some(Err(err)) => Err(LogError::ActionExecution { id, reason: err.reason }),
            None => Err(LogError::Conflict(id)),
        }
    }

    /// Insert a message with explicit parents, typically received from a peer.
    ///
    /// Validation and signature failures abort before anything is stored. A
    /// message with missing parents is held and applied once they arrive.
    pub async fn insert(&self, signature: Option<Signature>, message: Message) -> Result<InsertResult> {
        self.check(signature.as_ref(), &message)?;
        let id = MessageId::for_message(signature.as_ref(), &message)?;
        let entry = Entry::new(id, signature, message);

        let _guard = self.write_lock.lock().await;

        let missing: Vec<MessageId> = {
            let mut state = self.state.write();
            if let Some(existing) = state.store.get(&id)? {
                if existing != entry {
                    warn!(topic = %self.config.topic, id = %id, "conflicting content for committed message");
                    return Err(LogError::Conflict(id));
                }
                return Ok(InsertResult {
                    id,
                    status: InsertStatus::Duplicate,
                    unblocked: Vec::new(),
                });
            }
            if let Some(held) = state.store.get_pending(&id)? {
                if held != entry {
                    warn!(topic = %self.config.topic, id = %id, "conflicting content for pending message");
                    return Err(LogError::Conflict(id));
                }
                return Ok(InsertResult {
                    id,
                    status: InsertStatus::Duplicate,
                    unblocked: Vec::new(),
                });
            }

            let missing: Vec<MessageId> = entry
                .message
                .parents
                .iter()
                .filter(|parent| !state.store.contains(parent))
                .copied()
                .collect();
            if !missing.is_empty() {
                state.store.put_pending(&entry)?;
                for parent in &missing {
                    state.store.record_missing_parent(id, *parent);
                }
                state.pending_since.insert(id, Instant::now());
            }
            missing
        };

        if !missing.is_empty() {
            debug!(topic = %self.config.topic, id = %id, missing = missing.len(), "holding message with missing parents");
            self.handler.queued(&id);
            let _ = self.events.send(LogEvent::MissingParents {
                child: id,
                parents: missing,
            });
            return Ok(InsertResult {
                id,
                status: InsertStatus::Pending,
                unblocked: Vec::new(),
            });
        }

        let status = match self.commit_and_apply(&entry).await? {
            Some(Ok(_)) => InsertStatus::Applied,
            Some(Err(err)) => InsertStatus::ApplyFailed(err.reason),
            None => InsertStatus::Duplicate,
        };
        let ready = self.state.write().store.resolve_missing_parent(&id);
        let unblocked = self.promote(ready).await?;

        Ok(InsertResult { id, status, unblocked })
    }

    /// Network entry point: insert and report only whether the message was
    /// accepted.
    pub async fn receive(&self, signature: Option<Signature>, message: Message) -> bool {
        match self.insert(signature, message).await {
            Ok(_) => true,
            Err(err) => {
                warn!(topic = %self.config.topic, error = %err, "rejected received message");
                false
            }
        }
    }

    /// Re-run the handler over every committed message in log order.
    ///
    /// Returns the number of messages the handler accepted.
    pub async fn replay(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut applied = 0;
        let mut cursor: IdRange = (Unbounded, Unbounded);
        loop {
            let page = self.state.read().store.scan(&cursor, false, PAGE_SIZE)?;
            let Some(last) = page.last() else { break };
            cursor = (Excluded(last.id), Unbounded);
            let full = page.len() == PAGE_SIZE;
            for entry in page {
                if self.apply(&entry).await.is_ok() {
                    applied += 1;
                }
            }
            if !full {
                break;
            }
        }
        info!(topic = %self.config.topic, applied, "replayed log");
        Ok(applied)
    }

    /// Iterate committed messages in identifier order within `range`.
    pub fn iterate<R: RangeBounds<MessageId>>(&self, range: R, reverse: bool) -> LogIterator<'_, S> {
        LogIterator {
            state: &self.state,
            range: (range.start_bound().cloned(), range.end_bound().cloned()),
            reverse,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn get(&self, id: &MessageId) -> Result<Option<Entry>> {
        Ok(self.state.read().store.get(id)?)
    }

    /// Whether `id` is committed.
    pub fn has(&self, id: &MessageId) -> bool {
        self.state.read().store.contains(id)
    }

    /// Whether `id` is committed or pending.
    pub fn knows(&self, id: &MessageId) -> bool {
        let state = self.state.read();
        state.store.contains(id) || state.store.is_pending(id)
    }

    /// Root of the Merkle index.
    pub fn root(&self) -> Node {
        self.state.read().tree.root()
    }

    pub fn get_node(&self, level: u8, key: &Key) -> Option<Node> {
        self.state.read().tree.get_node(level, key)
    }

    pub fn children(&self, level: u8, key: &Key) -> std::result::Result<Vec<Node>, MerkleError> {
        self.state.read().tree.children(level, key)
    }

    /// Current heads, sorted.
    pub fn frontier(&self) -> Vec<MessageId> {
        self.state.read().frontier.iter().copied().collect()
    }

    /// Parents referenced by pending messages but not yet received.
    pub fn missing_parents(&self) -> BTreeSet<MessageId> {
        self.state.read().store.missing_parents()
    }

    /// Pending messages whose parents have been missing past the grace period.
    pub fn stalled(&self, now: Instant) -> Vec<StalledMessage> {
        let state = self.state.read();
        let grace = self.config.pending_grace_period;
        state
            .store
            .pending()
            .into_iter()
            .filter_map(|(id, missing)| {
                let since = state.pending_since.get(&id).copied()?;
                let waiting = now.saturating_duration_since(since);
                (waiting >= grace).then_some(StalledMessage { id, missing, waiting })
            })
            .collect()
    }

    pub fn stats(&self) -> LogStats {
        let state = self.state.read();
        LogStats {
            messages: state.store.len(),
            pending: state.store.pending().len(),
            frontier: state.frontier.len(),
            root: state.tree.root().hash,
        }
    }

    /// Topic, parent order, validator, clock and signature checks.
    fn check(&self, signature: Option<&Signature>, message: &Message) -> Result<()> {
        if message.topic != self.config.topic {
            return Err(LogError::TopicMismatch {
                expected: self.config.topic.clone(),
                found: message.topic.clone(),
            });
        }
        if !message.has_canonical_parents() {
            return Err(LogError::Validation("parents are not sorted and unique".to_string()));
        }
        if !self.validator.validate(&message.payload) {
            return Err(LogError::Validation("payload rejected by validator".to_string()));
        }
        let expected = next_clock(&message.parents)?;
        if message.clock != expected {
            return Err(LogError::InvalidClock {
                expected,
                found: message.clock,
            });
        }
        match (self.config.signatures, signature) {
            (true, Some(signature)) => verify_signature(signature, message)?,
            (true, None) => return Err(SignatureError::Missing.into()),
            (false, Some(_)) => return Err(SignatureError::Unexpected.into()),
            (false, None) => {}
        }
        Ok(())
    }

    /// Commit an entry whose parents are all committed, then run the handler.
    /// Returns `None` if the entry was already committed.
    async fn commit_and_apply(&self, entry: &Entry) -> Result<Option<std::result::Result<H::Output, ApplyError>>> {
        if !self.state.write().commit(entry)? {
            return Ok(None);
        }
        Ok(Some(self.apply(entry).await))
    }

    async fn apply(&self, entry: &Entry) -> std::result::Result<H::Output, ApplyError> {
        let outcome = self
            .handler
            .apply(&entry.id, entry.signature.as_ref(), &entry.message)
            .await;
        let event = match &outcome {
            Ok(_) => LogEvent::Message {
                id: entry.id,
                signature: entry.signature.clone(),
                message: entry.message.clone(),
            },
            Err(err) => {
                warn!(topic = %self.config.topic, id = %entry.id, reason = %err, "handler rejected message");
                LogEvent::Rejected {
                    id: entry.id,
                    reason: err.reason.clone(),
                }
            }
        };
        let _ = self.events.send(event);
        outcome
    }

    /// Commit pending entries that no longer miss any parent, and everything
    /// they unblock in turn, lowest identifier first.
    async fn promote(&self, mut queue: BTreeSet<MessageId>) -> Result<Vec<MessageId>> {
        let mut committed = Vec::new();
        while let Some(id) = queue.pop_first() {
            let Some(entry) = self.state.write().store.take_pending(&id)? else {
                continue;
            };
            if self.commit_and_apply(&entry).await?.is_some() {
                debug!(topic = %self.config.topic, id = %id, "applied unblocked message");
                committed.push(id);
            }
            queue.extend(self.state.write().store.resolve_missing_parent(&id));
        }
        Ok(committed)
    }
}

/// `1 + max(parent clocks)`, or 1 for a root message.
pub(crate) fn next_clock(parents: &[MessageId]) -> Result<u64> {
    match parents.iter().map(MessageId::clock).max() {
        None => Ok(1),
        Some(clock) => clock.checked_add(1).ok_or(LogError::ClockOverflow(clock)),
    }
}

/// Lazy, paged iteration over committed entries.
///
/// Each page is read under a short read lock, so writers may interleave
/// between pages. Iteration resumes after the last entry returned.
pub struct LogIterator<'a, S> {
    state: &'a RwLock<LogState<S>>,
    range: IdRange,
    reverse: bool,
    page: VecDeque<Entry>,
    exhausted: bool,
}

impl<S: MessageStore> Iterator for LogIterator<'_, S> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            let page = match self.state.read().store.scan(&self.range, self.reverse, PAGE_SIZE) {
                Ok(page) => page,
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err.into()));
                }
            };
            self.exhausted = page.len() < PAGE_SIZE;
            if let Some(last) = page.last() {
                if self.reverse {
                    self.range.1 = Excluded(last.id);
                } else {
                    self.range.0 = Excluded(last.id);
                }
            }
            self.page.extend(page);
        }
        self.page.pop_front().map(Ok)
    }
}
