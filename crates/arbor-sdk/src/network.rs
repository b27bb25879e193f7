//! Transport abstractions for sync exchanges.
//!
//! A [`SyncChannel`] carries one request to a peer and returns its answer.
//! Framing, encryption and discovery belong to the channel implementation;
//! [`RemoteLog`] adapts any channel into the [`SyncSource`] the sync driver
//! walks.

use crate::error::NetworkError;
use arbor_core::MessageId;
use arbor_log::store::Entry;
use arbor_log::{respond, GossipLog, MessageHandler, MessageStore, SyncError, SyncRequest, SyncResponse, SyncSource};
use arbor_merkle::{Key, Node};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Unique identifier for a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Duplex request/response primitive to one peer.
#[async_trait]
pub trait SyncChannel: Send + Sync + 'static {
    /// The peer on the other end.
    fn peer(&self) -> &PeerId;

    async fn request(&self, request: SyncRequest) -> Result<SyncResponse, NetworkError>;
}

/// The remote log behind a channel, as seen by the sync driver.
pub struct RemoteLog<'a> {
    channel: &'a dyn SyncChannel,
}

impl<'a> RemoteLog<'a> {
    pub fn new(channel: &'a dyn SyncChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl SyncSource for RemoteLog<'_> {
    async fn root(&self) -> Result<Node, SyncError> {
        self.channel.request(SyncRequest::Root).await?.into_root()
    }

    async fn children(&self, level: u8, key: Key) -> Result<Vec<Node>, SyncError> {
        self.channel
            .request(SyncRequest::Children { level, key })
            .await?
            .into_children()
    }

    async fn messages(&self, ids: Vec<MessageId>) -> Result<Vec<Entry>, SyncError> {
        self.channel
            .request(SyncRequest::Messages { ids })
            .await?
            .into_messages()
    }
}

type Envelope = (SyncRequest, oneshot::Sender<SyncResponse>);

/// In-memory channel served by a task answering from a shared log.
///
/// With wire encoding enabled, requests and responses pass through their
/// `bincode` form the way a network transport would ship them.
#[derive(Clone)]
pub struct MemoryChannel {
    peer: PeerId,
    sender: mpsc::Sender<Envelope>,
    wire_encoding: bool,
}

impl MemoryChannel {
    /// Serve `log` as `peer`. The task ends once every channel handle is
    /// dropped.
    pub fn serve<H, S>(peer: PeerId, log: Arc<GossipLog<H, S>>) -> (Self, JoinHandle<()>)
    where
        H: MessageHandler,
        S: MessageStore,
    {
        let (sender, mut receiver) = mpsc::channel::<Envelope>(64);
        let name = peer.clone();
        let task = tokio::spawn(async move {
            while let Some((request, reply)) = receiver.recv().await {
                let response = respond(&*log, request);
                if reply.send(response).is_err() {
                    debug!(peer = %name, "requester went away before the reply");
                }
            }
            debug!(peer = %name, "memory channel closed");
        });
        (
            Self {
                peer,
                sender,
                wire_encoding: false,
            },
            task,
        )
    }

    pub fn with_wire_encoding(mut self, enabled: bool) -> Self {
        self.wire_encoding = enabled;
        self
    }
}

fn round_trip<T: Serialize + serde::de::DeserializeOwned>(value: T) -> Result<T, NetworkError> {
    let bytes = bincode::serialize(&value).map_err(|err| NetworkError::Codec(err.to_string()))?;
    bincode::deserialize(&bytes).map_err(|err| NetworkError::Codec(err.to_string()))
}

#[async_trait]
impl SyncChannel for MemoryChannel {
    fn peer(&self) -> &PeerId {
        &self.peer
    }

    async fn request(&self, request: SyncRequest) -> Result<SyncResponse, NetworkError> {
        let request = if self.wire_encoding { round_trip(request)? } else { request };
        let (reply, response) = oneshot::channel();
        self.sender
            .send((request, reply))
            .await
            .map_err(|_| NetworkError::Disconnected)?;
        let response = response.await.map_err(|_| NetworkError::Disconnected)?;
        if self.wire_encoding {
            round_trip(response)
        } else {
            Ok(response)
        }
    }
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("peer", &self.peer)
            .field("wire_encoding", &self.wire_encoding)
            .finish()
    }
}
