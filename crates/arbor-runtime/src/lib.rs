//! # arbor-runtime
//!
//! Deterministic execution of the actions carried by a causal log.
//!
//! This crate provides:
//! - `ModelSchema`: mutable (primary-keyed) and immutable (content-addressed) models
//! - `ModelApi`: the database facade an action writes through, recording effects
//! - `ModelStore`: versioned storage applying a message's effects atomically,
//!   with a `Resolver` deciding between concurrent writes to one key
//! - Sessions: account addresses delegating message signing to session keys;
//!   an action counts only sessions from its own causal history
//! - `Runtime`: a `MessageHandler` folding committed messages into model state
//!
//! Replicas that commit the same set of messages end with the same model
//! state. Per-key writes converge through the resolver; values an action
//! *reads* reflect the application order of the replica executing it.
//!
//! ## Example
//!
//! ```rust
//! use arbor_runtime::{
//!     Action, FunctionExecutor, MemoryModelStore, ModelSchema, ModelStore, Payload, Property, PropertyType, Runtime,
//! };
//! use arbor_log::{GossipLog, LogConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let schema = ModelSchema::new().mutable("notes", "id", vec![Property::new("text", PropertyType::String)]);
//! let executor = FunctionExecutor::new().action("write", |db, args, _| {
//!     db.set("notes", args.clone())?;
//!     Ok(json!(null))
//! });
//! let store = Arc::new(MemoryModelStore::new());
//! let runtime = Arc::new(Runtime::new(schema, executor, store.clone()));
//! let log = GossipLog::in_memory(LogConfig::new("notes"), runtime).await.unwrap();
//!
//! let action = Payload::Action(Action::new("write", json!({"id": "a", "text": "hi"}), "anyone", 0));
//! log.append(action.to_bytes().unwrap(), None).await.unwrap();
//!
//! assert_eq!(store.get("notes", "a").unwrap().unwrap()["text"], "hi");
//! # });
//! ```

mod ancestry;
mod api;
mod effect;
mod error;
mod executor;
mod model;
mod payload;
mod resolver;
mod runtime;
mod session;
mod store;

pub use api::ModelApi;
pub use effect::{Effect, Operation};
pub use error::{ExecutionError, ModelError, Result, SessionError};
pub use executor::{ActionContext, Executor, FunctionExecutor};
pub use model::{content_key, Model, ModelKind, ModelSchema, Property, PropertyType};
pub use payload::{is_valid_payload, Action, Payload};
pub use resolver::{IdOrder, Resolver};
pub use runtime::{MessageState, MissingActionPolicy, Runtime, RuntimeConfig};
pub use session::{
    address_key, Ed25519SessionSigner, Ed25519SessionVerifier, Session, SessionCache, SessionSigner,
    ED25519_ADDRESS_PREFIX,
};
pub use store::{MemoryModelStore, ModelRecord, ModelStore};
