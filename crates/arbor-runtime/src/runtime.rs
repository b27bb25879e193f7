//! Folding the ordered log into model state.

use crate::ancestry::Ancestry;
use crate::api::ModelApi;
use crate::effect::Effect;
use crate::error::{ExecutionError, SessionError};
use crate::executor::{ActionContext, Executor};
use crate::model::ModelSchema;
use crate::payload::{Action, Payload};
use crate::resolver::{IdOrder, Resolver};
use crate::session::{address_key, Ed25519SessionVerifier, Session, SessionCache, SessionSigner};
use crate::store::{MemoryModelStore, ModelStore};
use arbor_core::{Message, MessageId, Signature};
use arbor_log::{ApplyError, MessageHandler};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What to do with an action whose name the executor does not know.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingActionPolicy {
    /// Commit the message with no effects.
    Skip,
    /// Reject the message.
    #[default]
    Reject,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub missing_actions: MissingActionPolicy,
    /// Retries of a commit that failed with a transient store error.
    pub commit_retries: u32,
    /// Reject actions carried by unsigned messages.
    pub require_sessions: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            missing_actions: MissingActionPolicy::Reject,
            commit_retries: 3,
            require_sessions: false,
        }
    }
}

/// Lifecycle of a message inside the runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageState {
    /// Held by the log until its parents arrive.
    Queued,
    Executing,
    /// Terminal: effects committed.
    Committed,
    /// Terminal: no effects.
    Rejected(String),
}

/// Executes actions from committed messages and commits their effects.
///
/// Plugged into a log as its [`MessageHandler`]. Rejections are reported to
/// the log, which keeps the message and moves on.
///
/// A signed action is authorized by a session carried in its own causal
/// history, so a session that is merely concurrent with the action never
/// counts, whichever of the two a replica happens to apply first.
pub struct Runtime<E: Executor, M: ModelStore = MemoryModelStore> {
    config: RuntimeConfig,
    schema: ModelSchema,
    executor: E,
    store: Arc<M>,
    resolver: Arc<dyn Resolver>,
    signers: Vec<Arc<dyn SessionSigner>>,
    sessions: SessionCache,
    ancestry: RwLock<Ancestry>,
    states: RwLock<HashMap<MessageId, MessageState>>,
}

impl<E: Executor, M: ModelStore> Runtime<E, M> {
    pub fn new(schema: ModelSchema, executor: E, store: Arc<M>) -> Self {
        Runtime {
            config: RuntimeConfig::default(),
            schema,
            executor,
            store,
            resolver: Arc::new(IdOrder),
            signers: vec![Arc::new(Ed25519SessionVerifier)],
            sessions: SessionCache::new(),
            ancestry: RwLock::new(Ancestry::default()),
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Register an additional session signer; the first one matching an
    /// address verifies its sessions.
    pub fn with_session_signer(mut self, signer: Arc<dyn SessionSigner>) -> Self {
        self.signers.push(signer);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    pub fn store(&self) -> &Arc<M> {
        &self.store
    }

    /// Sessions seen in the log so far.
    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    pub fn state(&self, id: &MessageId) -> Option<MessageState> {
        self.states.read().get(id).cloned()
    }

    /// Rejected messages and their reasons, in identifier order.
    pub fn rejected(&self) -> Vec<(MessageId, String)> {
        let mut rejected: Vec<_> = self
            .states
            .read()
            .iter()
            .filter_map(|(id, state)| match state {
                MessageState::Rejected(reason) => Some((*id, reason.clone())),
                _ => None,
            })
            .collect();
        rejected.sort();
        rejected
    }

    fn set_state(&self, id: MessageId, state: MessageState) {
        self.states.write().insert(id, state);
    }

    async fn run(&self, id: &MessageId, signature: Option<&Signature>, message: &Message) -> Result<Value, ExecutionError> {
        match Payload::from_bytes(&message.payload)? {
            Payload::Session(session) => {
                self.apply_session(id, &message.topic, signature, session)?;
                Ok(Value::Null)
            }
            Payload::Action(action) => self.apply_action(id, signature, message, action).await,
        }
    }

    fn apply_session(
        &self,
        id: &MessageId,
        topic: &str,
        signature: Option<&Signature>,
        session: Session,
    ) -> Result<(), ExecutionError> {
        let signer = self
            .signers
            .iter()
            .find(|signer| signer.matches(&session.address))
            .ok_or_else(|| SessionError::UnsupportedAddress(session.address.clone()))?;
        signer.verify_session(topic, &session)?;
        if let Some(signature) = signature {
            if signature.public_key != session.public_key {
                return Err(SessionError::KeyMismatch.into());
            }
        }
        debug!(topic, address = %session.address, "registered session");
        self.ancestry.write().add_session(*id, session.clone());
        self.sessions.insert(session);
        Ok(())
    }

    fn authorize(&self, message: &Message, signature: Option<&Signature>, action: &Action) -> Result<(), ExecutionError> {
        let Some(signature) = signature else {
            if self.config.require_sessions {
                return Err(ExecutionError::Unauthorized("unsigned action".to_string()));
            }
            return Ok(());
        };
        // Signed directly by the account key.
        if address_key(&action.address).ok().as_deref() == Some(signature.public_key.as_slice()) {
            return Ok(());
        }
        let session = self.ancestry.read().session_in_history(
            &message.parents,
            &message.topic,
            &action.address,
            &signature.public_key,
            action.timestamp,
        );
        if session.is_some() {
            return Ok(());
        }
        Err(ExecutionError::Unauthorized(format!(
            "no session for {} valid at {} in the action's history",
            action.address, action.timestamp
        )))
    }

    async fn apply_action(
        &self,
        id: &MessageId,
        signature: Option<&Signature>,
        message: &Message,
        action: Action,
    ) -> Result<Value, ExecutionError> {
        self.authorize(message, signature, &action)?;

        if self.store.is_applied(id) {
            debug!(id = %id, "effects already committed");
            return Ok(Value::Null);
        }
        if !self.executor.has_action(&action.name) {
            return match self.config.missing_actions {
                MissingActionPolicy::Skip => {
                    debug!(id = %id, action = %action.name, "skipping unknown action");
                    Ok(Value::Null)
                }
                MissingActionPolicy::Reject => Err(ExecutionError::MissingAction(action.name)),
            };
        }

        let context = ActionContext {
            id: *id,
            topic: message.topic.clone(),
            address: action.address.clone(),
            public_key: signature.map(|signature| signature.public_key.clone()),
            timestamp: action.timestamp,
        };

        let (result, effects) = {
            let mut db = ModelApi::new(&self.schema, self.store.as_ref());
            let result = self
                .executor
                .execute(&action.name, &action.args, &context, &mut db)
                .await?;
            (result, db.into_effects())
        };

        self.commit(&effects, *id)?;
        debug!(id = %id, action = %action.name, effects = effects.len(), "committed effects");
        Ok(result)
    }

    fn commit(&self, effects: &[Effect], version: MessageId) -> Result<(), ExecutionError> {
        let mut attempt = 0;
        loop {
            match self.store.apply_effects(effects, version, self.resolver.as_ref()) {
                Ok(_) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.config.commit_retries => {
                    attempt += 1;
                    warn!(id = %version, attempt, error = %err, "retrying commit");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[async_trait]
impl<E: Executor, M: ModelStore> MessageHandler for Runtime<E, M> {
    type Output = Value;

    async fn apply(&self, id: &MessageId, signature: Option<&Signature>, message: &Message) -> Result<Value, ApplyError> {
        self.ancestry.write().record(*id, &message.parents);
        self.set_state(*id, MessageState::Executing);
        match self.run(id, signature, message).await {
            Ok(result) => {
                self.set_state(*id, MessageState::Committed);
                Ok(result)
            }
            Err(err) => {
                let reason = err.to_string();
                self.set_state(*id, MessageState::Rejected(reason.clone()));
                Err(ApplyError::new(reason))
            }
        }
    }

    fn queued(&self, id: &MessageId) {
        self.set_state(*id, MessageState::Queued);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::executor::FunctionExecutor;
    use crate::model::{Property, PropertyType};
    use crate::session::Ed25519SessionSigner;
    use arbor_core::{Ed25519Signer, Hasher, Signer};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn schema() -> ModelSchema {
        ModelSchema::new().mutable("posts", "id", vec![Property::new("content", PropertyType::String)])
    }

    fn executor() -> FunctionExecutor {
        FunctionExecutor::new()
            .action("post", |db, args, _| {
                db.set("posts", args.clone())?;
                Ok(json!("ok"))
            })
            .action("fail", |db, args, _| {
                db.set("posts", args.clone())?;
                Err(ExecutionError::handler("nope"))
            })
    }

    fn message(payload: &Payload) -> Message {
        Message::new("t", 1, vec![], payload.to_bytes().unwrap())
    }

    fn id_of(message: &Message) -> MessageId {
        MessageId::for_message(None, message).unwrap()
    }

    #[tokio::test]
    async fn test_action_commits_effects() {
        let runtime = Runtime::new(schema(), executor(), Arc::new(MemoryModelStore::new()));
        let message = message(&Payload::Action(Action::new("post", json!({"id": "a", "content": "hi"}), "anyone", 1)));
        let id = id_of(&message);

        assert_eq!(runtime.apply(&id, None, &message).await.unwrap(), json!("ok"));
        assert_eq!(runtime.state(&id), Some(MessageState::Committed));
        assert_eq!(runtime.store().get("posts", "a").unwrap().unwrap()["content"], "hi");
    }

    #[tokio::test]
    async fn test_failed_action_writes_nothing() {
        let runtime = Runtime::new(schema(), executor(), Arc::new(MemoryModelStore::new()));
        let message = message(&Payload::Action(Action::new("fail", json!({"id": "a", "content": "hi"}), "x", 1)));
        let id = id_of(&message);

        let err = runtime.apply(&id, None, &message).await.unwrap_err();
        assert!(err.reason.contains("nope"));
        assert!(matches!(runtime.state(&id), Some(MessageState::Rejected(_))));
        assert_eq!(runtime.store().get("posts", "a").unwrap(), None);
        assert_eq!(runtime.rejected().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_action_policy() {
        let payload = Payload::Action(Action::new("unknown", json!(null), "x", 1));
        let message = message(&payload);
        let id = id_of(&message);

        let strict = Runtime::new(schema(), executor(), Arc::new(MemoryModelStore::new()));
        let err = strict.apply(&id, None, &message).await.unwrap_err();
        assert_eq!(err.reason, "Invalid action name: unknown");

        let lenient = Runtime::new(schema(), executor(), Arc::new(MemoryModelStore::new())).with_config(RuntimeConfig {
            missing_actions: MissingActionPolicy::Skip,
            ..Default::default()
        });
        assert_eq!(lenient.apply(&id, None, &message).await.unwrap(), Value::Null);
        assert_eq!(lenient.state(&id), Some(MessageState::Committed));
    }

    #[tokio::test]
    async fn test_sessions_authorize_actions() {
        let runtime = Runtime::new(schema(), executor(), Arc::new(MemoryModelStore::new()));
        let account = Ed25519SessionSigner::new(Ed25519Signer::generate(), Some(1_000), Arc::new(SessionCache::new()));
        let key = account.message_signer();

        let action = |timestamp, parents: Vec<MessageId>| {
            let payload = Payload::Action(Action::new(
                "post",
                json!({"id": "a", "content": "hi"}),
                account.address(),
                timestamp,
            ));
            let clock = if parents.is_empty() { 1 } else { 2 };
            let message = Message::new("t", clock, parents, payload.to_bytes().unwrap());
            let signature = key.sign_message(&message).unwrap();
            (MessageId::for_message(Some(&signature), &message).unwrap(), signature, message)
        };

        // No session yet.
        let (id, signature, msg) = action(100, vec![]);
        let err = runtime.apply(&id, Some(&signature), &msg).await.unwrap_err();
        assert!(err.reason.starts_with("Unauthorized"));

        let (session, _) = account.get_session("t", 0);
        let session_message = message(&Payload::Session(session));
        let session_signature = key.sign_message(&session_message).unwrap();
        let session_id = MessageId::for_message(Some(&session_signature), &session_message).unwrap();
        runtime
            .apply(&session_id, Some(&session_signature), &session_message)
            .await
            .unwrap();
        assert_eq!(runtime.sessions().len(), 1);

        let (id, signature, msg) = action(500, vec![session_id]);
        runtime.apply(&id, Some(&signature), &msg).await.unwrap();

        // Known to this runtime, but not in the action's history.
        let (id, signature, msg) = action(600, vec![]);
        assert!(runtime.apply(&id, Some(&signature), &msg).await.is_err());

        // Past the session's duration.
        let (id, signature, msg) = action(1_500, vec![session_id]);
        assert!(runtime.apply(&id, Some(&signature), &msg).await.is_err());
    }

    #[tokio::test]
    async fn test_held_message_is_queued() {
        let runtime = Runtime::new(schema(), executor(), Arc::new(MemoryModelStore::new()));
        let message = message(&Payload::Action(Action::new("post", json!({"id": "a", "content": "hi"}), "x", 1)));
        let id = id_of(&message);

        runtime.queued(&id);
        assert_eq!(runtime.state(&id), Some(MessageState::Queued));
        runtime.apply(&id, None, &message).await.unwrap();
        assert_eq!(runtime.state(&id), Some(MessageState::Committed));
    }

    #[tokio::test]
    async fn test_session_key_must_sign_its_session() {
        let runtime = Runtime::new(schema(), executor(), Arc::new(MemoryModelStore::new()));
        let account = Ed25519SessionSigner::new(Ed25519Signer::generate(), None, Arc::new(SessionCache::new()));
        let (session, _) = account.get_session("t", 0);

        let message = message(&Payload::Session(session));
        let intruder = Ed25519Signer::generate();
        let signature = intruder.sign_message(&message).unwrap();
        let id = MessageId::for_message(Some(&signature), &message).unwrap();

        let err = runtime.apply(&id, Some(&signature), &message).await.unwrap_err();
        assert_eq!(err.reason, "Session error: Session key does not match message signer");
        assert!(runtime.sessions().is_empty());
        assert_ne!(intruder.public_key(), account.message_signer().public_key());
    }

    /// Fails the first `failures` commits with a transient error.
    struct Flaky {
        inner: MemoryModelStore,
        failures: AtomicU32,
    }

    impl ModelStore for Flaky {
        fn get(&self, model: &str, key: &str) -> Result<Option<Value>, ModelError> {
            self.inner.get(model, key)
        }

        fn record(&self, model: &str, key: &str) -> Result<Option<crate::store::ModelRecord>, ModelError> {
            self.inner.record(model, key)
        }

        fn entries(&self, model: &str) -> Result<Vec<(String, Value)>, ModelError> {
            self.inner.entries(model)
        }

        fn apply_effects(&self, effects: &[Effect], version: MessageId, resolver: &dyn Resolver) -> Result<bool, ModelError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ModelError::Transient("disk busy".into()));
            }
            self.inner.apply_effects(effects, version, resolver)
        }

        fn is_applied(&self, version: &MessageId) -> bool {
            self.inner.is_applied(version)
        }
    }

    #[tokio::test]
    async fn test_transient_commit_failures_are_retried() {
        let flaky = |failures| {
            Arc::new(Flaky {
                inner: MemoryModelStore::new(),
                failures: AtomicU32::new(failures),
            })
        };
        let message = message(&Payload::Action(Action::new("post", json!({"id": "a", "content": "hi"}), "x", 1)));
        let id = MessageId::new(1, &Hasher::hash(b"v"));

        let runtime = Runtime::new(schema(), executor(), flaky(2));
        assert!(runtime.apply(&id, None, &message).await.is_ok());
        assert!(runtime.store().is_applied(&id));

        let runtime = Runtime::new(schema(), executor(), flaky(10));
        let err = runtime.apply(&id, None, &message).await.unwrap_err();
        assert!(err.reason.contains("disk busy"));
        assert!(!runtime.store().is_applied(&id));
    }
}
