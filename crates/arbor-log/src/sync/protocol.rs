//! Request/response messages of the sync exchange and the responder side.

use crate::error::SyncError;
use crate::handler::MessageHandler;
use crate::log::GossipLog;
use crate::store::{Entry, MessageStore};
use arbor_core::MessageId;
use arbor_merkle::{Key, Node};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Largest number of messages served per request.
pub const MAX_MESSAGES_PER_REQUEST: usize = 512;

/// A request from the initiator of a sync exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncRequest {
    /// Root node of the responder's Merkle index.
    Root,
    /// Children of the node at `(level, key)`.
    Children { level: u8, key: Key },
    /// Full entries for these identifiers.
    Messages { ids: Vec<MessageId> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncResponse {
    Root(Node),
    Children(Vec<Node>),
    /// Entries the responder has, in request order; unknown ids are omitted.
    Messages(Vec<Entry>),
    Error(String),
}

/// The remote side of a sync exchange as seen by the initiator.
///
/// Implemented directly by [`GossipLog`] for in-process peers; transports
/// implement it by shipping [`SyncRequest`]s to a remote [`respond`].
#[async_trait]
pub trait SyncSource: Send + Sync {
    async fn root(&self) -> Result<Node, SyncError>;

    async fn children(&self, level: u8, key: Key) -> Result<Vec<Node>, SyncError>;

    async fn messages(&self, ids: Vec<MessageId>) -> Result<Vec<Entry>, SyncError>;
}

/// Serve one sync request from `log`. Reads only; never takes the write lock.
pub fn respond<H: MessageHandler, S: MessageStore>(log: &GossipLog<H, S>, request: SyncRequest) -> SyncResponse {
    match request {
        SyncRequest::Root => SyncResponse::Root(log.root()),
        SyncRequest::Children { level, key } => match log.children(level, &key) {
            Ok(children) => SyncResponse::Children(children),
            Err(err) => SyncResponse::Error(err.to_string()),
        },
        SyncRequest::Messages { ids } => {
            let mut entries = Vec::with_capacity(ids.len().min(MAX_MESSAGES_PER_REQUEST));
            for id in ids.iter().take(MAX_MESSAGES_PER_REQUEST) {
                match log.get(id) {
                    Ok(Some(entry)) => entries.push(entry),
                    Ok(None) => {}
                    Err(err) => return SyncResponse::Error(err.to_string()),
                }
            }
            debug!(topic = %log.topic(), requested = ids.len(), served = entries.len(), "served messages");
            SyncResponse::Messages(entries)
        }
    }
}

impl SyncResponse {
    pub fn into_root(self) -> Result<Node, SyncError> {
        match self {
            SyncResponse::Root(node) => Ok(node),
            other => Err(unexpected("root", other)),
        }
    }

    pub fn into_children(self) -> Result<Vec<Node>, SyncError> {
        match self {
            SyncResponse::Children(nodes) => Ok(nodes),
            other => Err(unexpected("children", other)),
        }
    }

    pub fn into_messages(self) -> Result<Vec<Entry>, SyncError> {
        match self {
            SyncResponse::Messages(entries) => Ok(entries),
            other => Err(unexpected("messages", other)),
        }
    }
}

fn unexpected(wanted: &str, response: SyncResponse) -> SyncError {
    match response {
        SyncResponse::Error(reason) => SyncError::Remote(reason),
        _ => SyncError::Protocol(format!("expected {wanted} response")),
    }
}

#[async_trait]
impl<H: MessageHandler, S: MessageStore> SyncSource for GossipLog<H, S> {
    async fn root(&self) -> Result<Node, SyncError> {
        respond(self, SyncRequest::Root).into_root()
    }

    async fn children(&self, level: u8, key: Key) -> Result<Vec<Node>, SyncError> {
        respond(self, SyncRequest::Children { level, key }).into_children()
    }

    async fn messages(&self, ids: Vec<MessageId>) -> Result<Vec<Entry>, SyncError> {
        respond(self, SyncRequest::Messages { ids }).into_messages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::handler::NoopHandler;
    use arbor_core::{Hasher, Message};

    #[tokio::test]
    async fn test_respond() {
        let log = GossipLog::in_memory(LogConfig::new("t"), NoopHandler).await.unwrap();
        let appended = log.append(b"hello".to_vec(), None).await.unwrap();
        let ghost = MessageId::new(1, &Hasher::hash(b"ghost"));

        let root = respond(&log, SyncRequest::Root).into_root().unwrap();
        assert_eq!(root, log.root());

        let children = respond(
            &log,
            SyncRequest::Children {
                level: root.level,
                key: None,
            },
        )
        .into_children()
        .unwrap();
        assert!(children.iter().any(|node| node.key.is_none()));

        let entries = respond(
            &log,
            SyncRequest::Messages {
                ids: vec![ghost, appended.id],
            },
        )
        .into_messages()
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, Message::new("t", 1, vec![], b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_respond_unknown_node() {
        let log = GossipLog::in_memory(LogConfig::new("t"), NoopHandler).await.unwrap();
        let response = respond(&log, SyncRequest::Children { level: 9, key: None });
        assert!(matches!(response.clone(), SyncResponse::Error(_)));
        assert!(matches!(response.into_children(), Err(SyncError::Remote(_))));
        assert!(matches!(
            SyncResponse::Children(vec![]).into_root(),
            Err(SyncError::Protocol(_))
        ));
    }
}
