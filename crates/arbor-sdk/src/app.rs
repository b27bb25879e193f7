//! One replicated application: a topic's log driving a runtime.

use crate::config::AppConfig;
use crate::error::Result;
use crate::network::{MemoryChannel, PeerId, RemoteLog, SyncChannel};
use arbor_core::{Ed25519Signer, Signer};
use arbor_log::{
    sync, GossipLog, LogEvent, LogStats, MemoryMessageStore, MessageStore, SyncReport,
};
use arbor_runtime::{
    is_valid_payload, Action, Ed25519SessionSigner, Executor, MemoryModelStore, ModelSchema, ModelStore, Payload,
    Runtime, SessionCache,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Address used for actions of an app without an account.
pub const ANONYMOUS_ADDRESS: &str = "anonymous";

/// Milliseconds since the epoch.
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// A topic's log, the runtime it feeds and the account acting on it.
///
/// # Example
///
/// ```rust
/// use arbor_sdk::{App, AppConfig};
/// use arbor_runtime::{FunctionExecutor, ModelSchema, ModelStore, Property, PropertyType};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let schema = ModelSchema::new().mutable("notes", "id", vec![Property::new("text", PropertyType::String)]);
/// let executor = FunctionExecutor::new().action("write", |db, args, _| {
///     db.set("notes", args.clone())?;
///     Ok(json!(null))
/// });
///
/// let app = App::in_memory(AppConfig::new("notes"), schema, executor).await.unwrap();
/// app.act("write", json!({"id": "a", "text": "hello"})).await.unwrap();
/// assert_eq!(app.get("notes", "a").unwrap().unwrap()["text"], "hello");
/// # });
/// ```
pub struct App<E: Executor, M: ModelStore = MemoryModelStore, S: MessageStore = MemoryMessageStore> {
    config: AppConfig,
    log: Arc<GossipLog<Arc<Runtime<E, M>>, S>>,
    runtime: Arc<Runtime<E, M>>,
    account: Option<Ed25519SessionSigner>,
    sessions: Arc<SessionCache>,
}

impl<E: Executor> App<E> {
    /// An app with in-memory message and model stores.
    pub async fn in_memory(config: AppConfig, schema: ModelSchema, executor: E) -> Result<Self> {
        Self::open(
            config,
            schema,
            executor,
            Arc::new(MemoryModelStore::new()),
            MemoryMessageStore::new(),
        )
        .await
    }
}

impl<E: Executor, M: ModelStore, S: MessageStore> App<E, M, S> {
    /// Open an app over existing stores.
    ///
    /// Messages already in `messages` are not re-executed; call
    /// [`App::replay`] when `models` does not hold their effects.
    pub async fn open(config: AppConfig, schema: ModelSchema, executor: E, models: Arc<M>, messages: S) -> Result<Self> {
        let runtime = Arc::new(Runtime::new(schema, executor, models).with_config(config.runtime.clone()));
        let log = GossipLog::open_with_validator(
            config.log.clone(),
            messages,
            Arc::new(is_valid_payload),
            runtime.clone(),
        )
        .await?;
        Ok(Self {
            config,
            log: Arc::new(log),
            runtime,
            account: None,
            sessions: Arc::new(SessionCache::new()),
        })
    }

    /// Act for `account`, signing through session keys it authorizes.
    pub fn with_account(mut self, account: Ed25519Signer) -> Self {
        self.account = Some(Ed25519SessionSigner::new(
            account,
            self.config.session_duration,
            self.sessions.clone(),
        ));
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn topic(&self) -> &str {
        self.config.topic()
    }

    pub fn log(&self) -> &Arc<GossipLog<Arc<Runtime<E, M>>, S>> {
        &self.log
    }

    pub fn runtime(&self) -> &Arc<Runtime<E, M>> {
        &self.runtime
    }

    pub fn address(&self) -> String {
        self.account
            .as_ref()
            .map_or_else(|| ANONYMOUS_ADDRESS.to_string(), Ed25519SessionSigner::address)
    }

    /// Perform an action now, publishing a session first if the account
    /// has no valid one. Returns the action's result.
    pub async fn act(&self, name: &str, args: Value) -> Result<Value> {
        self.act_at(name, args, now_millis()).await
    }

    /// Perform an action with an explicit timestamp.
    pub async fn act_at(&self, name: &str, args: Value, timestamp: u64) -> Result<Value> {
        let signer = match &self.account {
            Some(account) => {
                let (session, fresh) = account.get_session(self.topic(), timestamp);
                if fresh {
                    debug!(topic = %self.topic(), address = %session.address, "publishing session");
                    let payload = Payload::Session(session).to_bytes()?;
                    self.log
                        .append(payload, Some(account.message_signer() as &dyn Signer))
                        .await?;
                }
                Some(account.message_signer() as &dyn Signer)
            }
            None => None,
        };

        let action = Payload::Action(Action::new(name, args, self.address(), timestamp));
        let appended = self.log.append(action.to_bytes()?, signer).await?;
        Ok(appended.output)
    }

    pub fn get(&self, model: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.runtime.store().get(model, key)?)
    }

    pub fn entries(&self, model: &str) -> Result<Vec<(String, Value)>> {
        Ok(self.runtime.store().entries(model)?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.log.subscribe()
    }

    pub fn stats(&self) -> LogStats {
        self.log.stats()
    }

    /// Re-run every logged action against the model store.
    pub async fn replay(&self) -> Result<usize> {
        Ok(self.log.replay().await?)
    }

    /// Pull what the peer behind `channel` has and this app lacks.
    pub async fn sync_with(&self, channel: &dyn SyncChannel) -> Result<SyncReport> {
        let report = sync(&*self.log, &RemoteLog::new(channel), &self.config.sync.options()).await?;
        Ok(report)
    }

    /// Serve this app's log to in-process peers as `peer`.
    pub fn serve(&self, peer: PeerId) -> (MemoryChannel, JoinHandle<()>) {
        MemoryChannel::serve(peer, self.log.clone())
    }
}
