//! Target-to-node mapping

use pairfs_common::OpsErr;
use pairfs_common::types::{NodeNumId, PoolId, TargetId};
use pairfs_wire::msgs::TargetMapping;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TargetInfo {
    node: NodeNumId,
    pool: PoolId,
}

/// Maps storage/metadata targets to their owning node and pool.
/// Many targets may map to one node.
#[derive(Default)]
pub struct TargetMapper {
    targets: RwLock<HashMap<TargetId, TargetInfo>>,
}

impl TargetMapper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a target to a node. Re-mapping an existing target is
    /// allowed (last-writer-wins) and reported as non-new.
    pub fn map_target(
        &self,
        target: TargetId,
        node: NodeNumId,
        pool: PoolId,
    ) -> (OpsErr, bool) {
        if node.is_zero() {
            return (OpsErr::UnknownNode, false);
        }

        let mut targets = self.targets.write();
        let is_new = targets.insert(target, TargetInfo { node, pool }).is_none();
        (OpsErr::Success, is_new)
    }

    #[must_use]
    pub fn node_of(&self, target: TargetId) -> Option<NodeNumId> {
        self.targets.read().get(&target).map(|info| info.node)
    }

    #[must_use]
    pub fn pool_of(&self, target: TargetId) -> Option<PoolId> {
        self.targets.read().get(&target).map(|info| info.pool)
    }

    #[must_use]
    pub fn target_exists(&self, target: TargetId) -> bool {
        self.targets.read().contains_key(&target)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }

    /// All mappings, sorted by target ID for stable wire output.
    #[must_use]
    pub fn mappings(&self) -> Vec<TargetMapping> {
        let mut out: Vec<TargetMapping> = self
            .targets
            .read()
            .iter()
            .map(|(target, info)| TargetMapping {
                target: *target,
                node: info.node,
                pool: info.pool,
            })
            .collect();
        out.sort_by_key(|m| m.target);
        out
    }

    /// Atomic bulk replacement from a downloaded authoritative list.
    pub fn sync_from_list(&self, mappings: &[TargetMapping]) {
        let mut targets = self.targets.write();
        targets.clear();
        for m in mappings {
            targets.insert(
                m.target,
                TargetInfo {
                    node: m.node,
                    pool: m.pool,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_target_remap_is_not_new() {
        let mapper = TargetMapper::new();

        let (res, is_new) = mapper.map_target(TargetId(30), NodeNumId(5), PoolId::DEFAULT);
        assert_eq!(res, OpsErr::Success);
        assert!(is_new);

        let (res, is_new) = mapper.map_target(TargetId(30), NodeNumId(5), PoolId::DEFAULT);
        assert_eq!(res, OpsErr::Success);
        assert!(!is_new);

        assert_eq!(mapper.len(), 1);
        assert_eq!(mapper.node_of(TargetId(30)), Some(NodeNumId(5)));
    }

    #[test]
    fn test_remap_last_writer_wins() {
        let mapper = TargetMapper::new();
        mapper.map_target(TargetId(1), NodeNumId(5), PoolId::DEFAULT);
        let (res, is_new) = mapper.map_target(TargetId(1), NodeNumId(9), PoolId(2));
        assert_eq!(res, OpsErr::Success);
        assert!(!is_new);
        assert_eq!(mapper.node_of(TargetId(1)), Some(NodeNumId(9)));
        assert_eq!(mapper.pool_of(TargetId(1)), Some(PoolId(2)));
    }

    #[test]
    fn test_zero_node_rejected() {
        let mapper = TargetMapper::new();
        let (res, _) = mapper.map_target(TargetId(1), NodeNumId::ZERO, PoolId::DEFAULT);
        assert_eq!(res, OpsErr::UnknownNode);
        assert!(!mapper.target_exists(TargetId(1)));
    }
}
