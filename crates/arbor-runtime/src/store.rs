//! Versioned model storage.

use crate::effect::{Effect, Operation};
use crate::error::ModelError;
use crate::resolver::Resolver;
use arbor_core::MessageId;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Stored state of one key: the winning version and its value, or a
/// tombstone (`value: None`) if the winning write was a deletion.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelRecord {
    pub version: MessageId,
    pub value: Option<Value>,
}

/// Storage for model values.
///
/// Reads may run concurrently with commits. Commits are serialized by the
/// runtime of the owning topic.
pub trait ModelStore: Send + Sync + 'static {
    fn get(&self, model: &str, key: &str) -> Result<Option<Value>, ModelError>;

    /// The record for a key, including tombstones.
    fn record(&self, model: &str, key: &str) -> Result<Option<ModelRecord>, ModelError>;

    /// Live `(key, value)` pairs of a model, in key order.
    fn entries(&self, model: &str) -> Result<Vec<(String, Value)>, ModelError>;

    /// Atomically apply one message's effects at `version`.
    ///
    /// A write to a key whose current version wins under `resolver` is
    /// dropped. Returns `false` without changes if `version` was already
    /// applied.
    fn apply_effects(&self, effects: &[Effect], version: MessageId, resolver: &dyn Resolver) -> Result<bool, ModelError>;

    fn is_applied(&self, version: &MessageId) -> bool;
}

#[derive(Debug, Default)]
struct Tables {
    records: BTreeMap<(String, String), ModelRecord>,
    applied: BTreeSet<MessageId>,
}

/// Model store held in memory.
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    tables: RwLock<Tables>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, tombstones included; used to compare replicas.
    pub fn snapshot(&self) -> BTreeMap<(String, String), ModelRecord> {
        self.tables.read().records.clone()
    }
}

impl ModelStore for MemoryModelStore {
    fn get(&self, model: &str, key: &str) -> Result<Option<Value>, ModelError> {
        Ok(self.record(model, key)?.and_then(|record| record.value))
    }

    fn record(&self, model: &str, key: &str) -> Result<Option<ModelRecord>, ModelError> {
        let tables = self.tables.read();
        Ok(tables.records.get(&(model.to_string(), key.to_string())).cloned())
    }

    fn entries(&self, model: &str) -> Result<Vec<(String, Value)>, ModelError> {
        let tables = self.tables.read();
        Ok(tables
            .records
            .iter()
            .filter(|((m, _), _)| m == model)
            .filter_map(|((_, key), record)| record.value.clone().map(|value| (key.clone(), value)))
            .collect())
    }

    fn apply_effects(&self, effects: &[Effect], version: MessageId, resolver: &dyn Resolver) -> Result<bool, ModelError> {
        for effect in effects {
            if effect.operation.writes_value() && effect.value.is_none() {
                return Err(ModelError::schema(&effect.model, "write effect without value"));
            }
        }

        let mut tables = self.tables.write();
        if !tables.applied.insert(version) {
            return Ok(false);
        }

        for effect in effects {
            let slot = (effect.model.clone(), effect.key.clone());
            if let Some(current) = tables.records.get_mut(&slot) {
                if !resolver.wins(&version, &current.version) {
                    continue;
                }
                // Content-addressed values are identical under the same key;
                // only the version moves, so removals compare against the
                // highest add.
                if effect.operation == Operation::Add && current.value.is_some() {
                    current.version = version;
                    continue;
                }
            }
            tables.records.insert(
                slot,
                ModelRecord {
                    version,
                    value: effect.value.clone(),
                },
            );
        }
        Ok(true)
    }

    fn is_applied(&self, version: &MessageId) -> bool {
        self.tables.read().applied.contains(version)
    }
}
