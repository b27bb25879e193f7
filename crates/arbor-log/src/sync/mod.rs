//! Merkle-diff synchronization between two logs of the same topic.

mod driver;
mod protocol;

pub use driver::{sync, SyncOptions, SyncReport};
pub use protocol::{respond, SyncRequest, SyncResponse, SyncSource, MAX_MESSAGES_PER_REQUEST};
