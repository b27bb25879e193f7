//! Initiator side of the sync exchange.
//!
//! Each round compares Merkle roots, descends only into remote subtrees whose
//! hash differs from the local node at the same position, and collects the
//! leaf identifiers the local log does not know. Those messages, and any
//! parents the log reports missing afterwards, are fetched in batches and fed
//! through [`GossipLog::receive`] in identifier order, so parents always
//! arrive before children within a batch.
//!
//! A sync pulls only. Running it on both replicas reconciles in both
//! directions.

use super::protocol::SyncSource;
use crate::error::SyncError;
use crate::handler::MessageHandler;
use crate::log::GossipLog;
use crate::store::MessageStore;
use arbor_core::MessageId;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

/// Limits of one sync exchange.
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Deadline for one round.
    pub round_timeout: Duration,
    /// Rounds before giving up with [`SyncError::Incomplete`].
    pub max_rounds: usize,
    /// Identifiers requested per message fetch.
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            round_timeout: Duration::from_secs(10),
            max_rounds: 8,
            batch_size: 128,
        }
    }
}

/// Outcome of a completed sync exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub rounds: usize,
    /// Messages the local log accepted.
    pub received: usize,
    /// Messages the local log refused (validation or signature failures).
    pub rejected: Vec<MessageId>,
    /// Merkle nodes fetched while descending.
    pub nodes_visited: usize,
    /// Whether the roots matched at the end.
    pub converged: bool,
}

#[derive(Default)]
struct Round {
    wanted: usize,
    received: usize,
    nodes_visited: usize,
    converged: bool,
}

/// Pull everything `remote` has that `log` lacks.
pub async fn sync<H, S>(
    log: &GossipLog<H, S>,
    remote: &dyn SyncSource,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError>
where
    H: MessageHandler,
    S: MessageStore,
{
    let mut report = SyncReport::default();
    let mut rejected = BTreeSet::new();

    for round in 1..=options.max_rounds.max(1) {
        let outcome = tokio::time::timeout(options.round_timeout, run_round(log, remote, options, &mut rejected))
            .await
            .map_err(|_| SyncError::Timeout(options.round_timeout))??;

        report.rounds = round;
        report.received += outcome.received;
        report.nodes_visited += outcome.nodes_visited;
        debug!(topic = %log.topic(), round, wanted = outcome.wanted, received = outcome.received, "sync round finished");

        if outcome.converged || (outcome.wanted == 0 && log.missing_parents().is_empty()) {
            report.converged = outcome.converged;
            report.rejected = rejected.into_iter().collect();
            info!(
                topic = %log.topic(),
                rounds = report.rounds,
                received = report.received,
                converged = report.converged,
                "sync complete"
            );
            return Ok(report);
        }
    }

    Err(SyncError::Incomplete {
        rounds: report.rounds,
        missing: log.missing_parents().len(),
    })
}

async fn run_round<H, S>(
    log: &GossipLog<H, S>,
    remote: &dyn SyncSource,
    options: &SyncOptions,
    rejected: &mut BTreeSet<MessageId>,
) -> Result<Round, SyncError>
where
    H: MessageHandler,
    S: MessageStore,
{
    let mut round = Round::default();

    let remote_root = remote.root().await?;
    if remote_root.hash == log.root().hash {
        round.converged = true;
        return Ok(round);
    }

    let mut wanted = BTreeSet::new();
    let mut stack = vec![remote_root];
    while let Some(node) = stack.pop() {
        round.nodes_visited += 1;
        let local = log.get_node(node.level, &node.key);
        if local.map(|local| local.hash) == Some(node.hash) {
            continue;
        }

        if node.is_leaf() {
            let Some(id) = node.key else { continue };
            if local.is_some() {
                return Err(SyncError::Conflict(id));
            }
            if !log.knows(&id) && !rejected.contains(&id) {
                wanted.insert(id);
            }
            continue;
        }

        let children = remote.children(node.level, node.key).await?;
        if children.iter().any(|child| node.level.checked_sub(1) != Some(child.level)) {
            return Err(SyncError::Protocol("child level does not match parent".to_string()));
        }
        stack.extend(children.into_iter().rev());
    }

    // Parents still missing from earlier rounds or earlier gossip.
    wanted.extend(log.missing_parents().into_iter().filter(|id| !rejected.contains(id)));

    round.wanted = wanted.len();
    let mut attempted = BTreeSet::new();
    while !wanted.is_empty() {
        let batch: Vec<MessageId> = wanted.iter().copied().take(options.batch_size.max(1)).collect();
        for id in &batch {
            wanted.remove(id);
            attempted.insert(*id);
        }

        let mut entries = remote.messages(batch).await?;
        entries.sort_by_key(|entry| entry.id);
        for entry in entries {
            let id = entry.id;
            if log.knows(&id) {
                continue;
            }
            if log.receive(entry.signature, entry.message).await {
                round.received += 1;
            } else {
                rejected.insert(id);
            }
        }

        // Parents referenced by what just arrived.
        for parent in log.missing_parents() {
            if !attempted.contains(&parent) && !rejected.contains(&parent) {
                wanted.insert(parent);
            }
        }
    }

    round.converged = remote_root.hash == log.root().hash;
    Ok(round)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::handler::NoopHandler;

    #[tokio::test]
    async fn test_identical_logs_finish_in_one_round() {
        let a = GossipLog::in_memory(LogConfig::new("t"), NoopHandler).await.unwrap();
        let b = GossipLog::in_memory(LogConfig::new("t"), NoopHandler).await.unwrap();

        let report = sync(&a, &b, &SyncOptions::default()).await.unwrap();
        assert!(report.converged);
        assert_eq!(report.rounds, 1);
        assert_eq!(report.received, 0);
        assert_eq!(report.nodes_visited, 0);
    }

    #[tokio::test]
    async fn test_pull_chain() {
        let local = GossipLog::in_memory(LogConfig::new("t"), NoopHandler).await.unwrap();
        let remote = GossipLog::in_memory(LogConfig::new("t"), NoopHandler).await.unwrap();
        for i in 0..20u8 {
            remote.append(vec![i], None).await.unwrap();
        }

        let options = SyncOptions {
            batch_size: 3,
            ..Default::default()
        };
        let report = sync(&local, &remote, &options).await.unwrap();
        assert!(report.converged);
        assert_eq!(report.received, 20);
        assert_eq!(local.root(), remote.root());
        assert_eq!(local.frontier(), remote.frontier());
    }
}
