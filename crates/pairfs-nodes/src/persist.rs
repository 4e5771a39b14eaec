//! Best-effort persistence of mirroring topology
//!
//! The management daemon periodically flushes target states, target
//! mappings and buddy groups to a local state file so a restart does
//! not lose the mirroring topology. Persistence failures are logged
//! and never fail the in-memory update.

use crate::buddy_mapper::BuddyGroupMapper;
use crate::state_store::TargetStateStore;
use crate::target_mapper::TargetMapper;
use pairfs_common::types::{
    BuddyGroupId, CombinedTargetState, ConsistencyState, NodeNumId, PoolId, ReachabilityState,
    TargetId,
};
use pairfs_wire::msgs::{BuddyGroupDesc, TargetMapping};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const STATE_FORMAT_VERSION: u32 = 1;

/// Snapshot written to the state file. Internal format; not meant to be
/// read by anything but this module.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedState {
    version: u32,
    mappings: Vec<(u16, u32, u16)>,
    states: Vec<(u16, u8, u8)>,
    meta_groups: Vec<(u16, u16, u16)>,
    storage_groups: Vec<(u16, u16, u16)>,
}

fn capture_groups(mapper: &BuddyGroupMapper) -> Vec<(u16, u16, u16)> {
    mapper
        .groups()
        .iter()
        .map(|g| (g.group_id.value(), g.primary.value(), g.secondary.value()))
        .collect()
}

fn restore_groups(raw: &[(u16, u16, u16)], mapper: &BuddyGroupMapper) {
    mapper.sync_from_list(
        &raw.iter()
            .map(|(group_id, primary, secondary)| BuddyGroupDesc {
                group_id: BuddyGroupId(*group_id),
                primary: TargetId(*primary),
                secondary: TargetId(*secondary),
            })
            .collect::<Vec<_>>(),
    );
}

impl PersistedState {
    #[must_use]
    pub fn capture(
        target_mapper: &TargetMapper,
        state_store: &TargetStateStore,
        meta_buddy_mapper: &BuddyGroupMapper,
        storage_buddy_mapper: &BuddyGroupMapper,
    ) -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            mappings: target_mapper
                .mappings()
                .iter()
                .map(|m| (m.target.value(), m.node.value(), m.pool.value()))
                .collect(),
            states: state_store
                .reports()
                .iter()
                .map(|r| (r.target.value(), r.reachability, r.consistency))
                .collect(),
            meta_groups: capture_groups(meta_buddy_mapper),
            storage_groups: capture_groups(storage_buddy_mapper),
        }
    }

    /// Load the snapshot back into the stores.
    pub fn apply(
        &self,
        target_mapper: &TargetMapper,
        state_store: &TargetStateStore,
        meta_buddy_mapper: &BuddyGroupMapper,
        storage_buddy_mapper: &BuddyGroupMapper,
    ) {
        target_mapper.sync_from_list(
            &self
                .mappings
                .iter()
                .map(|(target, node, pool)| TargetMapping {
                    target: TargetId(*target),
                    node: NodeNumId(*node),
                    pool: PoolId(*pool),
                })
                .collect::<Vec<_>>(),
        );

        for (target, reachability, consistency) in &self.states {
            let (Some(reachability), Some(consistency)) = (
                ReachabilityState::from_code(*reachability),
                ConsistencyState::from_code(*consistency),
            ) else {
                warn!(target, "skipping persisted state with unknown codes");
                continue;
            };
            state_store.set_state(
                TargetId(*target),
                CombinedTargetState::new(reachability, consistency),
            );
        }

        restore_groups(&self.meta_groups, meta_buddy_mapper);
        restore_groups(&self.storage_groups, storage_buddy_mapper);
    }
}

/// Writes and loads the state file.
pub struct StatePersister {
    path: PathBuf,
}

impl StatePersister {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort save: failure is logged, not returned, because the
    /// in-memory update this trails must not be rolled back.
    pub fn save(&self, state: &PersistedState) {
        if let Err(e) = self.try_save(state) {
            warn!(path = %self.path.display(), error = %e, "failed to persist state file");
        }
    }

    fn try_save(&self, state: &PersistedState) -> std::io::Result<()> {
        let encoded = bincode::serialize(state)
            .map_err(|e| std::io::Error::other(format!("encode state: {e}")))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // write-then-rename so a crash never leaves a torn file
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Load the state file; `None` if missing or unreadable.
    #[must_use]
    pub fn load(&self) -> Option<PersistedState> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read state file");
                return None;
            }
        };

        match bincode::deserialize::<PersistedState>(&raw) {
            Ok(state) if state.version == STATE_FORMAT_VERSION => {
                info!(path = %self.path.display(), "loaded persisted mirroring topology");
                Some(state)
            }
            Ok(state) => {
                warn!(
                    path = %self.path.display(),
                    version = state.version,
                    "state file has unsupported version, ignoring"
                );
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt state file, ignoring");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairfs_common::OpsErr;

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let persister = StatePersister::new(dir.path().join("mgmtd.state"));

        let target_mapper = TargetMapper::new();
        target_mapper.map_target(TargetId(10), NodeNumId(1), PoolId::DEFAULT);
        target_mapper.map_target(TargetId(20), NodeNumId(2), PoolId::DEFAULT);

        let state_store = TargetStateStore::new();
        state_store.set_state(
            TargetId(10),
            CombinedTargetState::new(ReachabilityState::Online, ConsistencyState::Good),
        );
        state_store.set_state(
            TargetId(20),
            CombinedTargetState::new(ReachabilityState::Online, ConsistencyState::NeedsResync),
        );

        let meta_buddies = BuddyGroupMapper::new_detached();
        let (res, group) =
            meta_buddies.add_group(TargetId(10), TargetId(20), BuddyGroupId(0), false);
        assert_eq!(res, OpsErr::Success);

        let storage_buddies = BuddyGroupMapper::new_detached();
        storage_buddies.add_group(TargetId(100), TargetId(200), BuddyGroupId(3), false);

        persister.save(&PersistedState::capture(
            &target_mapper,
            &state_store,
            &meta_buddies,
            &storage_buddies,
        ));

        let restored_targets = TargetMapper::new();
        let restored_states = TargetStateStore::new();
        let restored_meta = BuddyGroupMapper::new_detached();
        let restored_storage = BuddyGroupMapper::new_detached();
        persister.load().unwrap().apply(
            &restored_targets,
            &restored_states,
            &restored_meta,
            &restored_storage,
        );

        assert_eq!(restored_targets.node_of(TargetId(10)), Some(NodeNumId(1)));
        assert_eq!(
            restored_states.get_state(TargetId(20)).unwrap().consistency,
            ConsistencyState::NeedsResync
        );
        assert_eq!(restored_meta.primary_of(group), Some(TargetId(10)));
        assert_eq!(restored_meta.secondary_of(group), Some(TargetId(20)));
        assert_eq!(
            restored_storage.primary_of(BuddyGroupId(3)),
            Some(TargetId(100))
        );
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let persister = StatePersister::new(dir.path().join("nope.state"));
        assert!(persister.load().is_none());
    }

    #[test]
    fn test_corrupt_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.state");
        std::fs::write(&path, b"not a state file").unwrap();
        assert!(StatePersister::new(&path).load().is_none());
    }
}
