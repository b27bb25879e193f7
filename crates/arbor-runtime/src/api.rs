//! The database facade handed to actions.

use crate::effect::{Effect, Operation};
use crate::error::ModelError;
use crate::model::{ModelKind, ModelSchema};
use crate::store::ModelStore;
use serde_json::Value;
use std::collections::BTreeMap;

/// Records an action's writes as effects instead of applying them.
///
/// Reads see the action's own pending writes first, then the store. Only
/// the last write per key is kept.
pub struct ModelApi<'a> {
    schema: &'a ModelSchema,
    store: &'a dyn ModelStore,
    pending: BTreeMap<(String, String), Effect>,
}

impl<'a> ModelApi<'a> {
    pub fn new(schema: &'a ModelSchema, store: &'a dyn ModelStore) -> Self {
        ModelApi {
            schema,
            store,
            pending: BTreeMap::new(),
        }
    }

    pub fn get(&self, model: &str, key: &str) -> Result<Option<Value>, ModelError> {
        self.schema.get(model)?;
        match self.pending.get(&(model.to_string(), key.to_string())) {
            Some(effect) => Ok(effect.value.clone()),
            None => self.store.get(model, key),
        }
    }

    /// Write a mutable model value under its primary key.
    pub fn set(&mut self, model: &str, value: Value) -> Result<(), ModelError> {
        let definition = self.schema.get(model)?;
        if !definition.is_mutable() {
            return Err(wrong_kind(model, Operation::Set));
        }
        definition.validate(&value)?;
        let key = definition.key_of(&value)?;
        self.record(Effect::set(model, key, value));
        Ok(())
    }

    pub fn delete(&mut self, model: &str, key: &str) -> Result<(), ModelError> {
        if !self.schema.get(model)?.is_mutable() {
            return Err(wrong_kind(model, Operation::Delete));
        }
        self.record(Effect::delete(model, key));
        Ok(())
    }

    /// Insert an immutable value, returning its content key.
    pub fn add(&mut self, model: &str, value: Value) -> Result<String, ModelError> {
        let definition = self.schema.get(model)?;
        if definition.kind != ModelKind::Immutable {
            return Err(wrong_kind(model, Operation::Add));
        }
        definition.validate(&value)?;
        let key = definition.key_of(&value)?;
        self.record(Effect::add(model, key.clone(), value));
        Ok(key)
    }

    pub fn remove(&mut self, model: &str, key: &str) -> Result<(), ModelError> {
        if self.schema.get(model)?.kind != ModelKind::Immutable {
            return Err(wrong_kind(model, Operation::Remove));
        }
        self.record(Effect::remove(model, key));
        Ok(())
    }

    pub fn effects(&self) -> impl Iterator<Item = &Effect> {
        self.pending.values()
    }

    pub fn into_effects(self) -> Vec<Effect> {
        self.pending.into_values().collect()
    }

    fn record(&mut self, effect: Effect) {
        self.pending
            .insert((effect.model.clone(), effect.key.clone()), effect);
    }
}

fn wrong_kind(model: &str, operation: Operation) -> ModelError {
    ModelError::WrongKind {
        model: model.to_string(),
        operation: format!("{operation:?}").to_lowercase(),
    }
}
