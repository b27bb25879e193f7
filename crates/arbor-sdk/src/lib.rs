//! Arbor SDK - building replicated applications on causal logs
//!
//! An [`App`] is one topic: a [`GossipLog`](arbor_log::GossipLog) whose
//! committed messages drive a deterministic [`Runtime`](arbor_runtime::Runtime).
//! Peers exchange messages through [`SyncChannel`]s, and a [`SyncManager`]
//! keeps pulling from a set of peers with backoff.
//!
//! # Quick Start
//!
//! ```rust
//! use arbor_sdk::{App, AppConfig, PeerId};
//! use arbor_runtime::{FunctionExecutor, ModelSchema, Property, PropertyType};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let schema = || ModelSchema::new().mutable("notes", "id", vec![Property::new("text", PropertyType::String)]);
//! let executor = || {
//!     FunctionExecutor::new().action("write", |db, args, _| {
//!         db.set("notes", args.clone())?;
//!         Ok(json!(null))
//!     })
//! };
//!
//! let alice = App::in_memory(AppConfig::new("notes"), schema(), executor()).await.unwrap();
//! let bob = App::in_memory(AppConfig::new("notes"), schema(), executor()).await.unwrap();
//!
//! alice.act("write", json!({"id": "a", "text": "hi"})).await.unwrap();
//!
//! let (to_alice, _server) = alice.serve(PeerId::new("alice"));
//! bob.sync_with(&to_alice).await.unwrap();
//! assert_eq!(bob.get("notes", "a").unwrap(), alice.get("notes", "a").unwrap());
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`app`] - One topic's log, runtime and acting account
//! - [`network`] - Sync transport abstraction and an in-memory channel
//! - [`sync`] - Peer scheduling with exponential backoff
//! - [`config`] - Application and sync configuration
//! - [`error`] - Error types

pub mod app;
pub mod config;
pub mod error;
pub mod network;
pub mod sync;

pub use app::{now_millis, App, ANONYMOUS_ADDRESS};
pub use config::{AppConfig, AppConfigBuilder, SyncConfig, SyncConfigBuilder};
pub use error::{NetworkError, Result, SdkError};
pub use network::{MemoryChannel, PeerId, RemoteLog, SyncChannel};
pub use sync::{PeerSyncState, SyncEvent, SyncManager};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::app::App;
    pub use crate::config::{AppConfig, SyncConfig};
    pub use crate::error::SdkError;
    pub use crate::network::{MemoryChannel, PeerId, SyncChannel};
    pub use crate::sync::SyncManager;
    pub use arbor_runtime::{FunctionExecutor, ModelSchema, Property, PropertyType};
}
