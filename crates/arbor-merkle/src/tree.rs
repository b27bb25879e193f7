//! Merkle search tree with incremental maintenance.

use crate::node::{Key, Node};
use arbor_core::{Hash, Hasher, MessageId};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Included, Unbounded};
use thiserror::Error;

/// Errors returned by tree queries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Node not found at level {level}")]
    NodeNotFound { level: u8, key: Key },

    #[error("Level {0} exceeds tree height")]
    LevelOutOfRange(u8),
}

/// Tuning for node boundaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleConfig {
    /// Expected number of children per internal node.
    pub fanout: u32,
}

impl Default for MerkleConfig {
    fn default() -> Self {
        MerkleConfig { fanout: 32 }
    }
}

impl MerkleConfig {
    fn limit(&self) -> u32 {
        u32::MAX / self.fanout.max(2)
    }
}

/// Merkle search tree keyed by message identifier.
///
/// `levels[0]` holds the leaves; every level holds the anchor under key
/// `None`. The structure is derived data: it can always be rebuilt from the
/// leaf set with [`MerkleTree::from_leaves`].
#[derive(Clone, Debug)]
pub struct MerkleTree {
    config: MerkleConfig,
    levels: Vec<BTreeMap<Key, Hash>>,
}

impl MerkleTree {
    pub fn new() -> Self {
        Self::with_config(MerkleConfig::default())
    }

    pub fn with_config(config: MerkleConfig) -> Self {
        let mut leaves = BTreeMap::new();
        leaves.insert(None, anchor_leaf_hash());
        MerkleTree {
            config,
            levels: vec![leaves],
        }
    }

    /// Build a tree in one pass from `(id, value)` leaves.
    pub fn from_leaves<I>(config: MerkleConfig, leaves: I) -> Self
    where
        I: IntoIterator<Item = (MessageId, Hash)>,
    {
        let mut tree = Self::with_config(config);
        for (id, value) in leaves {
            tree.levels[0].insert(Some(id), leaf_hash(&id, &value));
        }

        let limit = tree.config.limit();
        let mut level = 0;
        while tree.levels[level].len() > 1 {
            let mut upper = BTreeMap::new();
            let mut current: Option<(Key, Hasher)> = None;
            for (key, hash) in &tree.levels[level] {
                if key.is_none() || hash.leading_u32() < limit {
                    if let Some((parent, hasher)) = current.take() {
                        upper.insert(parent, hasher.finalize());
                    }
                    current = Some((*key, Hasher::new()));
                }
                if let Some((_, hasher)) = current.as_mut() {
                    hasher.update(hash.as_bytes());
                }
            }
            if let Some((parent, hasher)) = current {
                upper.insert(parent, hasher.finalize());
            }
            tree.levels.push(upper);
            level += 1;
        }
        tree
    }

    pub fn config(&self) -> &MerkleConfig {
        &self.config
    }

    /// Number of leaves, excluding the anchor.
    pub fn len(&self) -> usize {
        self.levels[0].len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Height of the tree; the root sits at `height() - 1`.
    pub fn height(&self) -> usize {
        self.levels.len()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.levels[0].contains_key(&Some(*id))
    }

    /// Insert or update a leaf. Returns `false` if the leaf was already present
    /// with the same value.
    pub fn insert(&mut self, id: MessageId, value: Hash) -> bool {
        let hash = leaf_hash(&id, &value);
        if self.levels[0].get(&Some(id)) == Some(&hash) {
            return false;
        }
        self.levels[0].insert(Some(id), hash);
        self.rehash(BTreeSet::from([Some(id)]));
        true
    }

    /// Remove a leaf. Returns `false` if it was absent.
    pub fn delete(&mut self, id: &MessageId) -> bool {
        if self.levels[0].remove(&Some(*id)).is_none() {
            return false;
        }
        self.rehash(BTreeSet::from([Some(*id)]));
        true
    }

    pub fn root(&self) -> Node {
        let level = self.levels.len() - 1;
        let hash = self.levels[level].get(&None).copied().unwrap_or_default();
        Node::new(level as u8, None, hash)
    }

    pub fn get_node(&self, level: u8, key: &Key) -> Option<Node> {
        self.levels
            .get(level as usize)
            .and_then(|nodes| nodes.get(key))
            .map(|hash| Node::new(level, *key, *hash))
    }

    /// Children of the node at `(level, key)`, in key order.
    pub fn children(&self, level: u8, key: &Key) -> Result<Vec<Node>, MerkleError> {
        let nodes = self
            .levels
            .get(level as usize)
            .ok_or(MerkleError::LevelOutOfRange(level))?;
        if !nodes.contains_key(key) {
            return Err(MerkleError::NodeNotFound { level, key: *key });
        }
        if level == 0 {
            return Ok(Vec::new());
        }

        let next = nodes.range((Excluded(*key), Unbounded)).next().map(|(k, _)| *k);
        let lower = &self.levels[level as usize - 1];
        let upper_bound = match next {
            Some(next) => Excluded(next),
            None => Unbounded,
        };
        Ok(lower
            .range((Included(*key), upper_bound))
            .map(|(k, h)| Node::new(level - 1, *k, *h))
            .collect())
    }

    /// Leaf identifiers in order.
    pub fn keys(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.levels[0].keys().filter_map(|key| *key)
    }

    /// Recompute the levels above a set of changed leaves.
    fn rehash(&mut self, mut dirty: BTreeSet<Key>) {
        let limit = self.config.limit();
        let mut level = 0;

        loop {
            if self.levels[level].len() == 1 {
                self.levels.truncate(level + 1);
                return;
            }
            if self.levels.len() == level + 1 {
                self.levels.push(BTreeMap::new());
                dirty.extend(self.levels[level].keys().copied());
            }

            let (below, above) = self.levels.split_at_mut(level + 1);
            let lower = &below[level];
            let upper = &mut above[0];
            let mut parents = BTreeSet::new();

            for key in &dirty {
                let promoted = match lower.get(key) {
                    Some(hash) => key.is_none() || hash.leading_u32() < limit,
                    None => false,
                };
                if promoted {
                    if !upper.contains_key(key) {
                        upper.insert(*key, Hash::default());
                        // The previous run now ends before this key.
                        if let Some((prev, _)) = upper.range(..*key).next_back() {
                            parents.insert(*prev);
                        }
                    }
                    parents.insert(*key);
                } else if upper.remove(key).is_some() {
                    parents.insert(*key);
                }
            }

            for key in &dirty {
                if let Some((owner, _)) = upper.range(..=*key).next_back() {
                    parents.insert(*owner);
                }
            }

            for parent in &parents {
                if !upper.contains_key(parent) {
                    continue;
                }
                let next = upper.range((Excluded(*parent), Unbounded)).next().map(|(k, _)| *k);
                let upper_bound = match next {
                    Some(next) => Excluded(next),
                    None => Unbounded,
                };
                let mut hasher = Hasher::new();
                for (_, hash) in lower.range((Included(*parent), upper_bound)) {
                    hasher.update(hash.as_bytes());
                }
                upper.insert(*parent, hasher.finalize());
            }

            dirty = parents;
            level += 1;
        }
    }
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for MerkleTree {
    fn eq(&self, other: &Self) -> bool {
        self.levels == other.levels
    }
}

impl Eq for MerkleTree {}

fn anchor_leaf_hash() -> Hash {
    Hasher::hash(&[])
}

fn leaf_hash(id: &MessageId, value: &Hash) -> Hash {
    Hasher::hash_all(&[id.as_bytes(), value.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn leaf(i: u64) -> (MessageId, Hash) {
        let hash = Hasher::hash(&i.to_le_bytes());
        (MessageId::new(i / 3 + 1, &hash), hash)
    }

    #[test]
    fn test_empty_tree_root() {
        let tree = MerkleTree::new();
        let root = tree.root();
        assert_eq!(root.level, 0);
        assert!(root.is_anchor());
        assert_eq!(root.hash, anchor_leaf_hash());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut tree = MerkleTree::new();
        let (id, value) = leaf(1);
        assert!(tree.insert(id, value));
        let root = tree.root();
        assert!(!tree.insert(id, value));
        assert_eq!(tree.root(), root);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_insert_order_independent() {
        let leaves: Vec<_> = (0..500).map(leaf).collect();

        let mut forward = MerkleTree::new();
        for (id, value) in &leaves {
            forward.insert(*id, *value);
        }

        let mut shuffled = leaves.clone();
        shuffled.shuffle(&mut rand::rngs::StdRng::seed_from_u64(7));
        let mut backward = MerkleTree::new();
        for (id, value) in &shuffled {
            backward.insert(*id, *value);
        }

        assert_eq!(forward.root(), backward.root());
        assert_eq!(forward, backward);
        assert_eq!(forward, MerkleTree::from_leaves(MerkleConfig::default(), leaves));
        assert!(forward.height() > 1);
    }

    #[test]
    fn test_delete_restores_previous_root() {
        let mut tree = MerkleTree::new();
        for i in 0..200 {
            let (id, value) = leaf(i);
            tree.insert(id, value);
        }
        let before = tree.root();

        let (extra, value) = leaf(10_000);
        tree.insert(extra, value);
        assert_ne!(tree.root(), before);

        assert!(tree.delete(&extra));
        assert_eq!(tree.root(), before);
        assert!(!tree.delete(&extra));
    }

    #[test]
    fn test_children_cover_every_leaf() {
        let leaves: Vec<_> = (0..300).map(leaf).collect();
        let tree = MerkleTree::from_leaves(MerkleConfig { fanout: 4 }, leaves.clone());

        let mut stack = vec![tree.root()];
        let mut found = Vec::new();
        while let Some(node) = stack.pop() {
            if node.is_leaf() {
                if let Some(key) = node.key {
                    found.push(key);
                }
                continue;
            }
            let children = tree.children(node.level, &node.key).unwrap();
            assert!(!children.is_empty());
            assert_eq!(children[0].key, node.key);

            let mut hasher = Hasher::new();
            for child in &children {
                hasher.update(child.hash.as_bytes());
            }
            assert_eq!(hasher.finalize(), node.hash);
            stack.extend(children);
        }

        found.sort();
        let mut expected: Vec<_> = leaves.iter().map(|(id, _)| *id).collect();
        expected.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_children_of_missing_node() {
        let tree = MerkleTree::new();
        let (id, _) = leaf(1);
        assert_eq!(
            tree.children(0, &Some(id)),
            Err(MerkleError::NodeNotFound { level: 0, key: Some(id) })
        );
        assert_eq!(tree.children(9, &None), Err(MerkleError::LevelOutOfRange(9)));
    }

    #[test]
    fn test_value_change_changes_root() {
        let mut tree = MerkleTree::new();
        let (id, value) = leaf(5);
        tree.insert(id, value);
        let before = tree.root();
        tree.insert(id, Hasher::hash(b"other"));
        assert_ne!(tree.root(), before);
    }

    proptest! {
        #[test]
        fn prop_incremental_matches_rebuild(
            inserts in prop::collection::vec(0u64..400, 0..120),
            deletes in prop::collection::vec(0u64..400, 0..60),
            fanout in 2u32..9,
        ) {
            let config = MerkleConfig { fanout };
            let mut tree = MerkleTree::with_config(config.clone());
            let mut expected = BTreeMap::new();

            for i in &inserts {
                let (id, value) = leaf(*i);
                tree.insert(id, value);
                expected.insert(id, value);
            }
            for i in &deletes {
                let (id, _) = leaf(*i);
                tree.delete(&id);
                expected.remove(&id);
            }

            let rebuilt = MerkleTree::from_leaves(config, expected);
            prop_assert_eq!(tree.root(), rebuilt.root());
            prop_assert!(tree == rebuilt);
        }
    }
}
