//! Node store
//!
//! Per node-type map of known nodes, fed by heartbeats and by the
//! authoritative list downloaded from the management daemon.

use crate::node::Node;
use pairfs_common::types::{NodeNumId, NodeType};
use pairfs_common::OpsErr;
use pairfs_wire::msgs::NodeDesc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Outcome of `add_or_update_node`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStoreResult {
    Added,
    Updated,
}

/// Concurrent-safe store of nodes of one type.
pub struct NodeStore {
    store_type: NodeType,
    nodes: RwLock<HashMap<NodeNumId, Arc<Node>>>,
    local_num_id: RwLock<Option<NodeNumId>>,
    /// Numeric ID 0 is rejected everywhere except the management
    /// daemon's own bootstrap store.
    allow_zero_id: bool,
    conn_pool_size: usize,
}

impl NodeStore {
    #[must_use]
    pub fn new(store_type: NodeType, conn_pool_size: usize) -> Self {
        Self {
            store_type,
            nodes: RwLock::new(HashMap::new()),
            local_num_id: RwLock::new(None),
            allow_zero_id: false,
            conn_pool_size,
        }
    }

    /// Store variant used by the management daemon to register itself
    /// before any IDs were assigned.
    #[must_use]
    pub fn new_bootstrap(store_type: NodeType, conn_pool_size: usize) -> Self {
        Self {
            allow_zero_id: true,
            ..Self::new(store_type, conn_pool_size)
        }
    }

    /// Mark the node this process runs as. It survives `sync_nodes`
    /// even when missing from the downloaded list.
    pub fn set_local_node(&self, num_id: NodeNumId) {
        *self.local_num_id.write() = Some(num_id);
    }

    /// Insert or merge a node by numeric ID.
    pub fn add_or_update_node(&self, desc: &NodeDesc) -> Result<NodeStoreResult, OpsErr> {
        if desc.num_id.is_zero() && !self.allow_zero_id {
            warn!(
                store = %self.store_type,
                node = %desc.node_id,
                "rejecting node with reserved numeric ID 0"
            );
            return Err(OpsErr::InvalidArg);
        }

        let mut nodes = self.nodes.write();
        if let Some(existing) = nodes.get(&desc.num_id) {
            existing.update_endpoints(desc);
            Ok(NodeStoreResult::Updated)
        } else {
            nodes.insert(
                desc.num_id,
                Arc::new(Node::from_desc(desc, self.conn_pool_size)),
            );
            Ok(NodeStoreResult::Added)
        }
    }

    /// Replace the store contents with an authoritative list, returning
    /// the delta for logging. The local node is never removed.
    pub fn sync_nodes(&self, list: &[NodeDesc]) -> (Vec<NodeNumId>, Vec<NodeNumId>) {
        let local = *self.local_num_id.read();
        let mut nodes = self.nodes.write();

        let mut added = Vec::new();
        for desc in list {
            if desc.num_id.is_zero() && !self.allow_zero_id {
                continue;
            }
            if let Some(existing) = nodes.get(&desc.num_id) {
                existing.update_endpoints(desc);
            } else {
                nodes.insert(
                    desc.num_id,
                    Arc::new(Node::from_desc(desc, self.conn_pool_size)),
                );
                added.push(desc.num_id);
            }
        }

        let keep: std::collections::HashSet<NodeNumId> =
            list.iter().map(|d| d.num_id).collect();
        let mut removed = Vec::new();
        nodes.retain(|id, _| {
            if keep.contains(id) || Some(*id) == local {
                true
            } else {
                removed.push(*id);
                false
            }
        });

        (added, removed)
    }

    /// Shared reference to a node; the caller may hold it across
    /// network calls while the store keeps mutating.
    #[must_use]
    pub fn reference_node(&self, num_id: NodeNumId) -> Option<Arc<Node>> {
        self.nodes.read().get(&num_id).cloned()
    }

    pub fn remove_node(&self, num_id: NodeNumId) -> Option<Arc<Node>> {
        self.nodes.write().remove(&num_id)
    }

    #[must_use]
    pub fn node_exists(&self, num_id: NodeNumId) -> bool {
        self.nodes.read().contains_key(&num_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    #[must_use]
    pub fn all_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().values().cloned().collect()
    }

    #[must_use]
    pub fn descs(&self) -> Vec<NodeDesc> {
        let mut descs: Vec<NodeDesc> =
            self.nodes.read().values().map(|n| n.to_desc()).collect();
        descs.sort_by_key(|d| d.num_id);
        descs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairfs_common::types::NicAddress;

    fn desc(num_id: u32, name: &str) -> NodeDesc {
        NodeDesc {
            node_id: name.to_string(),
            num_id: NodeNumId(num_id),
            node_type: NodeType::Meta,
            tcp_port: 8005,
            udp_port: 8006,
            nics: vec![NicAddress::new("127.0.0.1".parse().unwrap(), "lo")],
            feature_flags: 0,
        }
    }

    #[test]
    fn test_add_then_update() {
        let store = NodeStore::new(NodeType::Meta, 4);
        assert_eq!(
            store.add_or_update_node(&desc(1, "meta01")).unwrap(),
            NodeStoreResult::Added
        );
        assert_eq!(
            store.add_or_update_node(&desc(1, "meta01")).unwrap(),
            NodeStoreResult::Updated
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_zero_id_rejected_except_bootstrap() {
        let store = NodeStore::new(NodeType::Mgmt, 4);
        assert_eq!(
            store.add_or_update_node(&desc(0, "mgmtd")),
            Err(OpsErr::InvalidArg)
        );

        let bootstrap = NodeStore::new_bootstrap(NodeType::Mgmt, 4);
        assert_eq!(
            bootstrap.add_or_update_node(&desc(0, "mgmtd")).unwrap(),
            NodeStoreResult::Added
        );
    }

    #[test]
    fn test_sync_computes_delta_and_keeps_local() {
        let store = NodeStore::new(NodeType::Meta, 4);
        store.add_or_update_node(&desc(1, "meta01")).unwrap();
        store.add_or_update_node(&desc(2, "meta02")).unwrap();
        store.set_local_node(NodeNumId(2));

        let (added, removed) = store.sync_nodes(&[desc(1, "meta01"), desc(3, "meta03")]);
        assert_eq!(added, vec![NodeNumId(3)]);
        // node 2 is local, so only kept-by-exception; nothing else removed
        assert!(removed.is_empty());
        assert!(store.node_exists(NodeNumId(2)));
        assert!(store.node_exists(NodeNumId(3)));

        let (_, removed) = store.sync_nodes(&[desc(3, "meta03")]);
        assert_eq!(removed, vec![NodeNumId(1)]);
        assert!(store.node_exists(NodeNumId(2)));
    }

    #[test]
    fn test_reference_survives_removal() {
        let store = NodeStore::new(NodeType::Meta, 4);
        store.add_or_update_node(&desc(1, "meta01")).unwrap();
        let node = store.reference_node(NodeNumId(1)).unwrap();
        store.remove_node(NodeNumId(1));
        // the referenced node stays usable for the holder
        assert_eq!(node.num_id(), NodeNumId(1));
        assert!(store.reference_node(NodeNumId(1)).is_none());
    }
}
