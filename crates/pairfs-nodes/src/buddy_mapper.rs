//! Mirror buddy group mapper
//!
//! Maps a buddy group ID to its (primary, secondary) target pair. For
//! metadata mirroring the "targets" are metadata node numeric IDs, so
//! the mapper validates membership against a node store instead of a
//! target mapper.

use crate::store::NodeStore;
use crate::target_mapper::TargetMapper;
use pairfs_common::OpsErr;
use pairfs_common::types::{BuddyGroupId, NodeNumId, TargetId};
use pairfs_wire::msgs::BuddyGroupDesc;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct MirrorBuddyGroup {
    primary: TargetId,
    secondary: TargetId,
}

/// Validates that a buddy-group member actually exists.
enum MemberCheck {
    Targets(Arc<TargetMapper>),
    Nodes(Arc<NodeStore>),
    None,
}

pub struct BuddyGroupMapper {
    groups: RwLock<HashMap<BuddyGroupId, MirrorBuddyGroup>>,
    member_check: MemberCheck,
    /// Set when the local node is a member of one of the groups.
    local_node: RwLock<Option<NodeNumId>>,
}

impl BuddyGroupMapper {
    /// Mapper for storage targets, validating against the target mapper.
    #[must_use]
    pub fn new_for_targets(target_mapper: Arc<TargetMapper>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            member_check: MemberCheck::Targets(target_mapper),
            local_node: RwLock::new(None),
        }
    }

    /// Mapper for metadata nodes, validating against the node store.
    #[must_use]
    pub fn new_for_nodes(node_store: Arc<NodeStore>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            member_check: MemberCheck::Nodes(node_store),
            local_node: RwLock::new(None),
        }
    }

    /// Mapper fed purely by downloaded lists; no membership validation.
    #[must_use]
    pub fn new_detached() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            member_check: MemberCheck::None,
            local_node: RwLock::new(None),
        }
    }

    pub fn set_local_node(&self, num_id: NodeNumId) {
        *self.local_node.write() = Some(num_id);
    }

    fn member_exists(&self, target: TargetId) -> Result<(), OpsErr> {
        match &self.member_check {
            MemberCheck::Targets(mapper) => {
                if mapper.target_exists(target) {
                    Ok(())
                } else {
                    Err(OpsErr::UnknownTarget)
                }
            }
            MemberCheck::Nodes(store) => {
                if store.node_exists(NodeNumId(u32::from(target.value()))) {
                    Ok(())
                } else {
                    Err(OpsErr::UnknownNode)
                }
            }
            MemberCheck::None => Ok(()),
        }
    }

    /// Create or update a buddy group.
    ///
    /// With `forced_id` 0 an unused random ID is generated. Fails with
    /// `Exists` if the forced ID is taken and `allow_update` is false,
    /// `InvalidArg` if primary equals secondary, `UnknownTarget`/
    /// `UnknownNode` for nonexistent members, and `InUse` if a member
    /// already belongs to a different group. That last check is what
    /// keeps any target from being primary in one group and secondary
    /// in another.
    pub fn add_group(
        &self,
        primary: TargetId,
        secondary: TargetId,
        forced_id: BuddyGroupId,
        allow_update: bool,
    ) -> (OpsErr, BuddyGroupId) {
        if primary == secondary {
            return (OpsErr::InvalidArg, BuddyGroupId(0));
        }

        if let Err(e) = self.member_exists(primary) {
            return (e, BuddyGroupId(0));
        }
        if let Err(e) = self.member_exists(secondary) {
            return (e, BuddyGroupId(0));
        }

        let mut groups = self.groups.write();

        if !forced_id.is_auto() && !allow_update && groups.contains_key(&forced_id) {
            return (OpsErr::Exists, BuddyGroupId(0));
        }

        for (id, group) in groups.iter() {
            let member =
                group.primary == primary
                    || group.secondary == primary
                    || group.primary == secondary
                    || group.secondary == secondary;
            if member && *id != forced_id {
                return (OpsErr::InUse, BuddyGroupId(0));
            }
        }

        let group_id = if forced_id.is_auto() {
            generate_unused_id(&groups)
        } else {
            forced_id
        };

        groups.insert(group_id, MirrorBuddyGroup { primary, secondary });
        info!(%group_id, %primary, %secondary, "mapped mirror buddy group");

        (OpsErr::Success, group_id)
    }

    /// O(1) lookup; `None` for unknown groups.
    #[must_use]
    pub fn primary_of(&self, group: BuddyGroupId) -> Option<TargetId> {
        self.groups.read().get(&group).map(|g| g.primary)
    }

    #[must_use]
    pub fn secondary_of(&self, group: BuddyGroupId) -> Option<TargetId> {
        self.groups.read().get(&group).map(|g| g.secondary)
    }

    /// The group a target belongs to, plus whether it is the primary.
    #[must_use]
    pub fn group_of(&self, target: TargetId) -> Option<(BuddyGroupId, bool)> {
        self.groups
            .read()
            .iter()
            .find_map(|(id, g)| {
                if g.primary == target {
                    Some((*id, true))
                } else if g.secondary == target {
                    Some((*id, false))
                } else {
                    None
                }
            })
    }

    /// The other member of a target's group.
    #[must_use]
    pub fn buddy_of(&self, target: TargetId) -> Option<TargetId> {
        self.groups.read().values().find_map(|g| {
            if g.primary == target {
                Some(g.secondary)
            } else if g.secondary == target {
                Some(g.primary)
            } else {
                None
            }
        })
    }

    /// Group of the local node, if the local node is set and a member.
    #[must_use]
    pub fn local_group(&self) -> Option<(BuddyGroupId, bool)> {
        let local = (*self.local_node.read())?;
        self.group_of(TargetId(local.value() as u16))
    }

    /// Swap primary and secondary of a group. The caller is responsible
    /// for checking that the new primary is promotable (see
    /// `TargetStateStore::change_consistency_states`).
    pub fn switchover(&self, group: BuddyGroupId) -> OpsErr {
        let mut groups = self.groups.write();
        let Some(entry) = groups.get_mut(&group) else {
            return OpsErr::UnknownTarget;
        };
        std::mem::swap(&mut entry.primary, &mut entry.secondary);
        info!(
            %group,
            new_primary = %entry.primary,
            new_secondary = %entry.secondary,
            "buddy group switchover"
        );
        OpsErr::Success
    }

    /// All groups, sorted by ID for stable wire output.
    #[must_use]
    pub fn groups(&self) -> Vec<BuddyGroupDesc> {
        let mut out: Vec<BuddyGroupDesc> = self
            .groups
            .read()
            .iter()
            .map(|(id, g)| BuddyGroupDesc {
                group_id: *id,
                primary: g.primary,
                secondary: g.secondary,
            })
            .collect();
        out.sort_by_key(|g| g.group_id);
        out
    }

    /// Atomic bulk replacement from a downloaded list. Readers see
    /// either the fully-old or fully-new mapping, never a partial one.
    pub fn sync_from_list(&self, descs: &[BuddyGroupDesc]) {
        let mut fresh = HashMap::with_capacity(descs.len());
        for desc in descs {
            fresh.insert(
                desc.group_id,
                MirrorBuddyGroup {
                    primary: desc.primary,
                    secondary: desc.secondary,
                },
            );
        }
        *self.groups.write() = fresh;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}

fn generate_unused_id(groups: &HashMap<BuddyGroupId, MirrorBuddyGroup>) -> BuddyGroupId {
    let mut rng = rand::thread_rng();
    loop {
        let candidate = BuddyGroupId(rng.gen_range(1..=u16::MAX));
        if !groups.contains_key(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_group_forced_id_exists() {
        let mapper = BuddyGroupMapper::new_detached();

        let (res, id) = mapper.add_group(TargetId(1), TargetId(2), BuddyGroupId(5), false);
        assert_eq!(res, OpsErr::Success);
        assert_eq!(id, BuddyGroupId(5));

        // second identical call must fail and leave the mapping alone
        let (res, _) = mapper.add_group(TargetId(1), TargetId(2), BuddyGroupId(5), false);
        assert_eq!(res, OpsErr::Exists);
        assert_eq!(mapper.primary_of(BuddyGroupId(5)), Some(TargetId(1)));
        assert_eq!(mapper.secondary_of(BuddyGroupId(5)), Some(TargetId(2)));
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    fn test_add_group_same_member_rejected() {
        let mapper = BuddyGroupMapper::new_detached();
        let (res, _) = mapper.add_group(TargetId(1), TargetId(1), BuddyGroupId(0), false);
        assert_eq!(res, OpsErr::InvalidArg);
    }

    #[test]
    fn test_member_in_other_group_rejected() {
        let mapper = BuddyGroupMapper::new_detached();
        mapper.add_group(TargetId(1), TargetId(2), BuddyGroupId(5), false);

        // target 2 is already a secondary; it must not become a primary
        let (res, _) = mapper.add_group(TargetId(2), TargetId(3), BuddyGroupId(0), false);
        assert_eq!(res, OpsErr::InUse);

        let (res, _) = mapper.add_group(TargetId(4), TargetId(1), BuddyGroupId(0), false);
        assert_eq!(res, OpsErr::InUse);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let mapper = BuddyGroupMapper::new_detached();
        let (_, a) = mapper.add_group(TargetId(1), TargetId(2), BuddyGroupId(0), false);
        let (_, b) = mapper.add_group(TargetId(3), TargetId(4), BuddyGroupId(0), false);
        assert_ne!(a, BuddyGroupId(0));
        assert_ne!(b, BuddyGroupId(0));
        assert_ne!(a, b);
    }

    #[test]
    fn test_allow_update_remaps() {
        let mapper = BuddyGroupMapper::new_detached();
        mapper.add_group(TargetId(1), TargetId(2), BuddyGroupId(5), false);
        let (res, id) = mapper.add_group(TargetId(2), TargetId(1), BuddyGroupId(5), true);
        assert_eq!(res, OpsErr::Success);
        assert_eq!(id, BuddyGroupId(5));
        assert_eq!(mapper.primary_of(BuddyGroupId(5)), Some(TargetId(2)));
    }

    #[test]
    fn test_switchover() {
        let mapper = BuddyGroupMapper::new_detached();
        mapper.add_group(TargetId(10), TargetId(20), BuddyGroupId(1), false);

        assert_eq!(mapper.switchover(BuddyGroupId(1)), OpsErr::Success);
        assert_eq!(mapper.primary_of(BuddyGroupId(1)), Some(TargetId(20)));
        assert_eq!(mapper.secondary_of(BuddyGroupId(1)), Some(TargetId(10)));

        assert_eq!(mapper.switchover(BuddyGroupId(9)), OpsErr::UnknownTarget);
    }

    #[test]
    fn test_group_of_and_buddy_of() {
        let mapper = BuddyGroupMapper::new_detached();
        mapper.add_group(TargetId(10), TargetId(20), BuddyGroupId(1), false);

        assert_eq!(mapper.group_of(TargetId(10)), Some((BuddyGroupId(1), true)));
        assert_eq!(
            mapper.group_of(TargetId(20)),
            Some((BuddyGroupId(1), false))
        );
        assert_eq!(mapper.buddy_of(TargetId(10)), Some(TargetId(20)));
        assert_eq!(mapper.buddy_of(TargetId(30)), None);
    }

    #[test]
    fn test_sync_from_list_replaces_atomically() {
        let mapper = BuddyGroupMapper::new_detached();
        mapper.add_group(TargetId(1), TargetId(2), BuddyGroupId(1), false);

        mapper.sync_from_list(&[BuddyGroupDesc {
            group_id: BuddyGroupId(7),
            primary: TargetId(8),
            secondary: TargetId(9),
        }]);

        assert_eq!(mapper.primary_of(BuddyGroupId(1)), None);
        assert_eq!(mapper.primary_of(BuddyGroupId(7)), Some(TargetId(8)));
        assert_eq!(mapper.len(), 1);
    }
}
