//! # arbor-log
//!
//! The causal message log of a topic and its replication protocol.
//!
//! This crate provides:
//! - `MessageStore`: committed entries keyed by identifier plus a pending area
//!   for messages whose parents have not arrived, with in-memory and
//!   append-only file backends
//! - `GossipLog`: append/insert with frontier tracking, parent-closure
//!   checks and ordered iteration, feeding a `MessageHandler`
//! - The sync protocol: request/response types, a responder and a pull driver
//!   that walks the Merkle index top-down and fetches only what differs
//!
//! ## Example
//!
//! ```rust
//! use arbor_log::{sync, GossipLog, LogConfig, NoopHandler, SyncOptions};
//!
//! # tokio_test::block_on(async {
//! let alice = GossipLog::in_memory(LogConfig::new("chat"), NoopHandler).await.unwrap();
//! let bob = GossipLog::in_memory(LogConfig::new("chat"), NoopHandler).await.unwrap();
//!
//! alice.append(b"hello".to_vec(), None).await.unwrap();
//! sync(&bob, &alice, &SyncOptions::default()).await.unwrap();
//!
//! assert_eq!(alice.root(), bob.root());
//! # });
//! ```

mod config;
mod error;
mod event;
mod handler;
mod log;
pub mod store;
pub mod sync;

pub use config::{LogConfig, LogConfigBuilder};
pub use error::{LogError, Result, StoreError, SyncError};
pub use event::LogEvent;
pub use handler::{ApplyError, MessageHandler, NoopHandler};
pub use log::{Appended, GossipLog, InsertResult, InsertStatus, LogIterator, LogStats, StalledMessage};
pub use store::{Entry, FileMessageStore, MemoryMessageStore, MessageStore};
pub use sync::{respond, sync, SyncOptions, SyncReport, SyncRequest, SyncResponse, SyncSource};
