//! Causal history of the messages a runtime has applied.
//!
//! The log hands messages to the runtime parents first, so by the time an
//! action runs every one of its ancestors has been recorded here. Lookups
//! only follow parent links and therefore give the same answer on every
//! replica, whatever else has arrived concurrently.

use crate::session::Session;
use arbor_core::MessageId;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Default)]
pub(crate) struct Ancestry {
    parents: HashMap<MessageId, Vec<MessageId>>,
    /// Sessions by `(topic, address)`, with the message that carried them.
    sessions: HashMap<(String, String), Vec<(MessageId, Session)>>,
}

impl Ancestry {
    pub(crate) fn record(&mut self, id: MessageId, parents: &[MessageId]) {
        self.parents.entry(id).or_insert_with(|| parents.to_vec());
    }

    pub(crate) fn add_session(&mut self, id: MessageId, session: Session) {
        let slot = self
            .sessions
            .entry((session.topic.clone(), session.address.clone()))
            .or_default();
        if !slot.iter().any(|(known, _)| *known == id) {
            slot.push((id, session));
        }
    }

    /// A session for `address` with key `public_key`, valid at `timestamp`,
    /// carried by an ancestor of a message with `parents`.
    pub(crate) fn session_in_history(
        &self,
        parents: &[MessageId],
        topic: &str,
        address: &str,
        public_key: &[u8],
        timestamp: u64,
    ) -> Option<MessageId> {
        self.sessions
            .get(&(topic.to_string(), address.to_string()))?
            .iter()
            .filter(|(_, session)| session.public_key == public_key && session.is_valid_at(timestamp))
            .map(|(id, _)| *id)
            .find(|id| self.reaches(parents, id))
    }

    /// Whether `target` is one of `parents` or one of their ancestors.
    pub(crate) fn reaches(&self, parents: &[MessageId], target: &MessageId) -> bool {
        // Ancestors have strictly lower clocks.
        let floor = target.clock();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<MessageId> = parents.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            if current == *target {
                return true;
            }
            if current.clock() <= floor || !seen.insert(current) {
                continue;
            }
            if let Some(next) = self.parents.get(&current) {
                queue.extend(next.iter().copied());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::Hasher;

    fn id(clock: u64, seed: &[u8]) -> MessageId {
        MessageId::new(clock, &Hasher::hash(seed))
    }

    fn session(key: u8) -> Session {
        Session {
            address: "ed25519:aa".into(),
            public_key: vec![key],
            topic: "t".into(),
            timestamp: 0,
            duration: Some(100),
            authorization: vec![],
        }
    }

    #[test]
    fn test_reaches_follows_parents_only() {
        let mut ancestry = Ancestry::default();
        let root = id(1, b"root");
        let side = id(1, b"side");
        let mid = id(2, b"mid");
        ancestry.record(root, &[]);
        ancestry.record(side, &[]);
        ancestry.record(mid, &[root]);

        assert!(ancestry.reaches(&[mid], &root));
        assert!(ancestry.reaches(&[mid], &mid));
        assert!(!ancestry.reaches(&[mid], &side));
        assert!(!ancestry.reaches(&[], &root));
    }

    #[test]
    fn test_concurrent_session_is_not_found() {
        let mut ancestry = Ancestry::default();
        let carrier = id(1, b"session");
        let other = id(1, b"other");
        ancestry.record(carrier, &[]);
        ancestry.record(other, &[]);
        ancestry.add_session(carrier, session(7));

        assert_eq!(ancestry.session_in_history(&[carrier], "t", "ed25519:aa", &[7], 50), Some(carrier));
        assert_eq!(ancestry.session_in_history(&[other], "t", "ed25519:aa", &[7], 50), None);
        // Wrong key, expired, other topic.
        assert_eq!(ancestry.session_in_history(&[carrier], "t", "ed25519:aa", &[8], 50), None);
        assert_eq!(ancestry.session_in_history(&[carrier], "t", "ed25519:aa", &[7], 150), None);
        assert_eq!(ancestry.session_in_history(&[carrier], "u", "ed25519:aa", &[7], 50), None);
    }
}
