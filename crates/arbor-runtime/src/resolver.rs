//! Total orders over versions for picking concurrent-write winners.

use arbor_core::MessageId;
use std::cmp::Ordering;

/// Deterministic total order over versions. The greater version wins a
/// write to the same key.
pub trait Resolver: Send + Sync {
    fn compare(&self, a: &MessageId, b: &MessageId) -> Ordering;

    /// Whether a write at `candidate` replaces one at `current`.
    fn wins(&self, candidate: &MessageId, current: &MessageId) -> bool {
        self.compare(candidate, current) == Ordering::Greater
    }
}

impl<F> Resolver for F
where
    F: Fn(&MessageId, &MessageId) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &MessageId, b: &MessageId) -> Ordering {
        self(a, b)
    }
}

/// Identifier byte order: the later clock wins, ties broken by hash.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdOrder;

impl Resolver for IdOrder {
    fn compare(&self, a: &MessageId, b: &MessageId) -> Ordering {
        a.cmp(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::Hasher;

    #[test]
    fn test_id_order_prefers_later_clock() {
        let early = MessageId::new(1, &Hasher::hash(b"zzz"));
        let late = MessageId::new(2, &Hasher::hash(b"aaa"));
        assert!(IdOrder.wins(&late, &early));
        assert!(!IdOrder.wins(&early, &late));
        assert!(!IdOrder.wins(&late, &late));
    }

    #[test]
    fn test_closure_resolver() {
        let reversed = |a: &MessageId, b: &MessageId| b.cmp(a);
        let early = MessageId::new(1, &Hasher::hash(b"x"));
        let late = MessageId::new(2, &Hasher::hash(b"x"));
        assert!(reversed.wins(&early, &late));
    }
}
