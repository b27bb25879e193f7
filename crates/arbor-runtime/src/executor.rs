//! The action execution capability.

use crate::api::ModelApi;
use crate::error::ExecutionError;
use arbor_core::MessageId;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// What an action knows about the message that carries it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionContext {
    pub id: MessageId,
    pub topic: String,
    pub address: String,
    /// Key that signed the message, if the log is signed.
    pub public_key: Option<Vec<u8>>,
    pub timestamp: u64,
}

/// Runs named actions against a recording model facade.
///
/// An action must be deterministic in its arguments, its context and what it
/// reads through `db`.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    fn has_action(&self, name: &str) -> bool;

    async fn execute(
        &self,
        name: &str,
        args: &Value,
        context: &ActionContext,
        db: &mut ModelApi<'_>,
    ) -> Result<Value, ExecutionError>;
}

type ActionFn = Box<dyn Fn(&mut ModelApi<'_>, &Value, &ActionContext) -> Result<Value, ExecutionError> + Send + Sync>;

/// Executor over a registry of native functions.
#[derive(Default)]
pub struct FunctionExecutor {
    actions: HashMap<String, ActionFn>,
}

impl FunctionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action` under `name`, replacing any previous one.
    pub fn action<F>(mut self, name: &str, action: F) -> Self
    where
        F: Fn(&mut ModelApi<'_>, &Value, &ActionContext) -> Result<Value, ExecutionError> + Send + Sync + 'static,
    {
        self.actions.insert(name.to_string(), Box::new(action));
        self
    }

    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for FunctionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionExecutor")
            .field("actions", &self.action_names())
            .finish()
    }
}

#[async_trait]
impl Executor for FunctionExecutor {
    fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    async fn execute(
        &self,
        name: &str,
        args: &Value,
        context: &ActionContext,
        db: &mut ModelApi<'_>,
    ) -> Result<Value, ExecutionError> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| ExecutionError::MissingAction(name.to_string()))?;
        action(db, args, context)
    }
}
