//! # Node Locator
//!
//! Consistent-hash ring mapping keys to cache nodes.
//!
//! Each node is placed on the ring `mutations` times by hashing
//! `"{host:port}-{i}"`. A key belongs to the first ring position whose hash is
//! greater than or equal to the key's hash, wrapping to the start of the ring.
//! Adding or removing a node therefore only moves the keys that fall next to
//! that node's positions.
//!
//! The ring itself is immutable. Membership changes build a new ring and
//! publish it through `SharedLocator`, so lookups never see a half-built one.

use std::hash::Hasher;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;
use twox_hash::XxHash32;

use mcline_common::{ClientError, ClientResult, ServerNode};

/// Ring positions per node when the configuration does not say otherwise.
pub const DEFAULT_MUTATIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RingEntry {
    hash: u32,
    node: usize,
}

/// Immutable hash ring over a fixed node set.
#[derive(Debug, Clone)]
pub struct NodeLocator {
    nodes: Vec<ServerNode>,
    ring: Vec<RingEntry>,
    mutations: usize,
}

impl NodeLocator {
    /// Builds the ring. Duplicate endpoints are collapsed and a mutation
    /// count of zero is treated as one.
    pub fn new(nodes: impl IntoIterator<Item = ServerNode>, mutations: usize) -> Self {
        let mutations = mutations.max(1);
        let mut unique: Vec<ServerNode> = Vec::new();
        for node in nodes {
            if !unique.contains(&node) {
                unique.push(node);
            }
        }

        let mut ring = Vec::with_capacity(unique.len() * mutations);
        for (index, node) in unique.iter().enumerate() {
            let identity = node.identity();
            for variant in 0..mutations {
                let position = format!("{}-{}", identity, variant);
                ring.push(RingEntry {
                    hash: hash_key(position.as_bytes()),
                    node: index,
                });
            }
        }
        // Stable sort keeps insertion order among equal hashes, so the
        // collision survivor is always the earlier node.
        ring.sort_by_key(|entry| entry.hash);
        ring.dedup_by_key(|entry| entry.hash);

        NodeLocator {
            nodes: unique,
            ring,
            mutations,
        }
    }

    /// Resolves the node that owns `key`.
    ///
    /// # Errors
    /// Returns `ClientError::NoAvailableNode` when the ring is empty.
    pub fn locate(&self, key: &[u8]) -> ClientResult<&ServerNode> {
        let first = self.ring.first().ok_or(ClientError::NoAvailableNode)?;
        let hash = hash_key(key);
        let index = self.ring.partition_point(|entry| entry.hash < hash);
        let entry = self.ring.get(index).unwrap_or(first);
        Ok(&self.nodes[entry.node])
    }

    #[inline]
    pub fn nodes(&self) -> &[ServerNode] {
        &self.nodes
    }

    #[inline]
    pub fn mutations(&self) -> usize {
        self.mutations
    }

    /// Number of positions on the ring after collision removal.
    #[inline]
    pub fn ring_len(&self) -> usize {
        self.ring.len()
    }
}

/// Ring hash shared by node positions and keys (32-bit xxHash, seed 0).
pub fn hash_key(data: &[u8]) -> u32 {
    let mut hasher = XxHash32::with_seed(0);
    hasher.write(data);
    hasher.finish() as u32
}

/// Locator handle that can be rebuilt while other threads keep resolving keys.
pub struct SharedLocator {
    current: ArcSwap<NodeLocator>,
}

impl SharedLocator {
    pub fn new(locator: NodeLocator) -> Self {
        SharedLocator {
            current: ArcSwap::from_pointee(locator),
        }
    }

    /// Resolves `key` against the ring that is current at call time.
    pub fn locate(&self, key: &[u8]) -> ClientResult<ServerNode> {
        self.current.load().locate(key).cloned()
    }

    /// Replaces the ring with one built from `nodes`.
    pub fn rebuild(&self, nodes: Vec<ServerNode>, mutations: usize) {
        let locator = NodeLocator::new(nodes, mutations);
        info!(
            nodes = locator.nodes().len(),
            ring = locator.ring_len(),
            "rebuilt node locator"
        );
        self.current.store(Arc::new(locator));
    }

    /// The ring currently in use.
    pub fn snapshot(&self) -> Arc<NodeLocator> {
        self.current.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn nodes(count: usize) -> Vec<ServerNode> {
        (0..count)
            .map(|i| ServerNode::new(format!("10.0.0.{}", i + 1), 11211))
            .collect()
    }

    fn sample_keys(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("user:{}:profile", i)).collect()
    }

    #[test]
    fn empty_ring_has_no_node() {
        let locator = NodeLocator::new(Vec::new(), DEFAULT_MUTATIONS);
        assert!(matches!(
            locator.locate(b"anything"),
            Err(ClientError::NoAvailableNode)
        ));
    }

    #[test]
    fn single_node_owns_every_key() {
        let node = ServerNode::new("127.0.0.1", 11211);
        let locator = NodeLocator::new(vec![node.clone()], DEFAULT_MUTATIONS);
        for key in sample_keys(200) {
            assert_eq!(locator.locate(key.as_bytes()).unwrap(), &node);
        }
    }

    #[test]
    fn lookup_is_deterministic() {
        let a = NodeLocator::new(nodes(5), 50);
        let b = NodeLocator::new(nodes(5), 50);
        for key in sample_keys(1000) {
            let first = a.locate(key.as_bytes()).unwrap();
            assert_eq!(first, a.locate(key.as_bytes()).unwrap());
            assert_eq!(first, b.locate(key.as_bytes()).unwrap());
        }
    }

    #[test]
    fn ring_has_mutations_per_node() {
        let locator = NodeLocator::new(nodes(3), 10);
        assert_eq!(locator.mutations(), 10);
        // Collisions are possible in principle but not among 30 positions.
        assert_eq!(locator.ring_len(), 30);
        assert!(locator.ring.windows(2).all(|w| w[0].hash < w[1].hash));
    }

    #[test]
    fn zero_mutations_still_places_nodes() {
        let locator = NodeLocator::new(nodes(2), 0);
        assert_eq!(locator.mutations(), 1);
        assert_eq!(locator.ring_len(), 2);
        assert!(locator.locate(b"key").is_ok());
    }

    #[test]
    fn duplicate_nodes_are_collapsed() {
        let mut list = nodes(2);
        list.push(list[0].clone());
        let locator = NodeLocator::new(list, 20);
        assert_eq!(locator.nodes().len(), 2);
        assert_eq!(locator.ring_len(), 40);
    }

    #[test]
    fn keys_past_the_last_position_wrap_to_the_first() {
        let locator = NodeLocator::new(nodes(3), 5);
        let last = locator.ring.last().unwrap().hash;
        let first_owner = &locator.nodes[locator.ring[0].node];

        let wrapped = (0..100_000)
            .map(|i| format!("wrap-{}", i))
            .find(|key| hash_key(key.as_bytes()) > last)
            .expect("some key hashes past the last ring position");
        assert_eq!(locator.locate(wrapped.as_bytes()).unwrap(), first_owner);
    }

    #[test]
    fn keys_spread_across_nodes() {
        let locator = NodeLocator::new(nodes(4), DEFAULT_MUTATIONS);
        let mut counts: HashMap<ServerNode, usize> = HashMap::new();
        let keys = sample_keys(20_000);
        for key in &keys {
            *counts
                .entry(locator.locate(key.as_bytes()).unwrap().clone())
                .or_insert(0) += 1;
        }

        assert_eq!(counts.len(), 4);
        for (node, count) in counts {
            let share = count as f64 / keys.len() as f64;
            assert!(
                (0.15..0.35).contains(&share),
                "{} owns {:.3} of the keys",
                node,
                share
            );
        }
    }

    #[test]
    fn adding_a_node_moves_about_one_share() {
        let before = NodeLocator::new(nodes(4), DEFAULT_MUTATIONS);
        let grown = nodes(5);
        let added = grown[4].clone();
        let after = NodeLocator::new(grown, DEFAULT_MUTATIONS);

        let keys = sample_keys(20_000);
        let mut moved = 0usize;
        for key in &keys {
            let old = before.locate(key.as_bytes()).unwrap();
            let new = after.locate(key.as_bytes()).unwrap();
            if old != new {
                // Keys only ever move onto the new node.
                assert_eq!(new, &added);
                moved += 1;
            }
        }

        // Expected 1/(N+1) = 0.2.
        let fraction = moved as f64 / keys.len() as f64;
        assert!(
            (0.10..0.30).contains(&fraction),
            "moved fraction {:.3}",
            fraction
        );
    }

    #[test]
    fn shared_locator_swaps_rings() {
        let shared = SharedLocator::new(NodeLocator::new(Vec::new(), DEFAULT_MUTATIONS));
        assert!(matches!(
            shared.locate(b"key"),
            Err(ClientError::NoAvailableNode)
        ));

        let node = ServerNode::new("127.0.0.1", 11211);
        shared.rebuild(vec![node.clone()], DEFAULT_MUTATIONS);
        assert_eq!(shared.locate(b"key").unwrap(), node);

        let held = shared.snapshot();
        shared.rebuild(Vec::new(), DEFAULT_MUTATIONS);
        // A snapshot taken earlier keeps resolving against the old ring.
        assert_eq!(held.locate(b"key").unwrap(), &node);
        assert!(shared.locate(b"key").is_err());
    }
}
