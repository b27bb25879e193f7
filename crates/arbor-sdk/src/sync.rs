//! Scheduling sync exchanges with peers.

use crate::config::SyncConfig;
use crate::error::{Result, SdkError};
use crate::network::{PeerId, RemoteLog, SyncChannel};
use arbor_log::{sync, GossipLog, MessageHandler, MessageStore, SyncReport};
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Events emitted by the sync manager.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    SyncCompleted { peer: PeerId, report: SyncReport },
    SyncFailed { peer: PeerId, error: String, retry_in: Duration },
}

/// Sync state for a peer.
#[derive(Clone, Debug, Default)]
pub struct PeerSyncState {
    pub last_success: Option<Instant>,
    pub consecutive_failures: u32,
    /// Earliest time of the next attempt; `None` means now.
    pub next_attempt: Option<Instant>,
    pub last_report: Option<SyncReport>,
}

impl PeerSyncState {
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_attempt.map_or(true, |at| at <= now)
    }
}

struct PeerLink<C> {
    channel: Arc<C>,
    state: PeerSyncState,
}

/// Pulls from a set of peers, backing off from the ones that fail.
pub struct SyncManager<C: SyncChannel> {
    config: SyncConfig,
    peers: RwLock<HashMap<PeerId, PeerLink<C>>>,
    events: broadcast::Sender<SyncEvent>,
}

impl<C: SyncChannel> SyncManager<C> {
    pub fn new(config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            peers: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Add a peer reachable through `channel`, replacing any previous link.
    pub fn add_peer(&self, channel: Arc<C>) {
        let peer = channel.peer().clone();
        self.peers.write().insert(
            peer,
            PeerLink {
                channel,
                state: PeerSyncState::default(),
            },
        );
    }

    pub fn remove_peer(&self, peer: &PeerId) -> bool {
        self.peers.write().remove(peer).is_some()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.peers.read().keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn peer_state(&self, peer: &PeerId) -> Option<PeerSyncState> {
        self.peers.read().get(peer).map(|link| link.state.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Pull from `peer` now, regardless of its backoff.
    pub async fn sync_peer<H, S>(&self, log: &GossipLog<H, S>, peer: &PeerId) -> Result<SyncReport>
    where
        H: MessageHandler,
        S: MessageStore,
    {
        let channel = self
            .peers
            .read()
            .get(peer)
            .map(|link| link.channel.clone())
            .ok_or_else(|| SdkError::PeerNotFound(peer.to_string()))?;

        let outcome = sync(log, &RemoteLog::new(channel.as_ref()), &self.config.options()).await;
        let now = Instant::now();

        let mut peers = self.peers.write();
        let Some(link) = peers.get_mut(peer) else {
            return outcome.map_err(SdkError::from);
        };
        match outcome {
            Ok(report) => {
                info!(peer = %peer, received = report.received, rounds = report.rounds, "synced with peer");
                link.state.last_success = Some(now);
                link.state.consecutive_failures = 0;
                link.state.next_attempt = None;
                link.state.last_report = Some(report.clone());
                let _ = self.events.send(SyncEvent::SyncCompleted {
                    peer: peer.clone(),
                    report: report.clone(),
                });
                Ok(report)
            }
            Err(err) => {
                link.state.consecutive_failures = link.state.consecutive_failures.saturating_add(1);
                let retry_in = self.config.backoff(link.state.consecutive_failures);
                link.state.next_attempt = Some(now + retry_in);
                warn!(
                    peer = %peer,
                    failures = link.state.consecutive_failures,
                    retry_in_ms = retry_in.as_millis() as u64,
                    error = %err,
                    "sync with peer failed"
                );
                let _ = self.events.send(SyncEvent::SyncFailed {
                    peer: peer.clone(),
                    error: err.to_string(),
                    retry_in,
                });
                Err(err.into())
            }
        }
    }

    /// Pull from every peer whose backoff has elapsed, concurrently.
    pub async fn sync_due<H, S>(&self, log: &GossipLog<H, S>) -> Vec<(PeerId, Result<SyncReport>)>
    where
        H: MessageHandler,
        S: MessageStore,
    {
        let now = Instant::now();
        let due: Vec<PeerId> = {
            let peers = self.peers.read();
            let mut due: Vec<PeerId> = peers
                .iter()
                .filter(|(_, link)| link.state.is_due(now))
                .map(|(peer, _)| peer.clone())
                .collect();
            due.sort();
            due
        };

        let results = join_all(due.iter().map(|peer| self.sync_peer(log, peer))).await;
        due.into_iter().zip(results).collect()
    }

    /// Run [`SyncManager::sync_due`] every `interval` until the handle is
    /// aborted.
    pub fn spawn<H, S>(self: Arc<Self>, log: Arc<GossipLog<H, S>>, interval: Duration) -> JoinHandle<()>
    where
        H: MessageHandler,
        S: MessageStore,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sync_due(&*log).await;
            }
        })
    }
}
