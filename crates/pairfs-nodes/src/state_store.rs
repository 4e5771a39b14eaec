//! Combined target state store
//!
//! Tracks reachability (heartbeat-driven) and consistency (message-
//! driven) per target. Consistency changes validate the caller's
//! last-observed state so that two nodes reporting concurrently cannot
//! silently overwrite each other, and a primary degrading to
//! needs-resync triggers a buddy-group switchover so the mapper never
//! promotes a target that must not serve.

use crate::buddy_mapper::BuddyGroupMapper;
use pairfs_common::OpsErr;
use pairfs_common::types::{
    CombinedTargetState, ConsistencyState, ReachabilityState, TargetId,
};
use pairfs_wire::msgs::TargetStateReport;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Default)]
pub struct TargetStateStore {
    states: RwLock<HashMap<TargetId, CombinedTargetState>>,
}

impl TargetStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get_state(&self, target: TargetId) -> Option<CombinedTargetState> {
        self.states.read().get(&target).copied()
    }

    /// Register a target (first heartbeat / first mapping), defaulting
    /// to offline/good until state reports arrive.
    pub fn add_if_missing(&self, target: TargetId) {
        self.states
            .write()
            .entry(target)
            .or_insert_with(CombinedTargetState::default);
    }

    pub fn set_state(&self, target: TargetId, state: CombinedTargetState) {
        self.states.write().insert(target, state);
    }

    pub fn set_reachability(&self, target: TargetId, reachability: ReachabilityState) {
        let mut states = self.states.write();
        let entry = states.entry(target).or_default();
        if entry.reachability != reachability {
            info!(%target, old = %entry.reachability, new = %reachability, "target reachability changed");
            entry.reachability = reachability;
        }
    }

    pub fn set_consistency(&self, target: TargetId, consistency: ConsistencyState) {
        let mut states = self.states.write();
        let entry = states.entry(target).or_default();
        if entry.consistency != consistency {
            info!(%target, old = %entry.consistency, new = %consistency, "target consistency changed");
            entry.consistency = consistency;
        }
    }

    /// Apply a consistency change with optimistic old-state validation.
    ///
    /// All targets are validated against the caller-supplied old states
    /// before anything is applied; a single mismatch fails the whole
    /// call with `Again` and changes nothing. When a change degrades a
    /// group primary to needs-resync, the buddy mapper is asked to
    /// switch the group over, but only if the current secondary is
    /// promotable (consistency good).
    pub fn change_consistency_states(
        &self,
        targets: &[TargetId],
        old_states: &[ConsistencyState],
        new_states: &[ConsistencyState],
        buddy_mapper: Option<&BuddyGroupMapper>,
    ) -> OpsErr {
        if targets.len() != old_states.len() || targets.len() != new_states.len() {
            return OpsErr::InvalidArg;
        }

        let mut degraded_primaries = Vec::new();

        {
            let mut states = self.states.write();

            for (target, old) in targets.iter().zip(old_states) {
                let Some(current) = states.get(target) else {
                    warn!(%target, "consistency change for unknown target");
                    return OpsErr::UnknownTarget;
                };
                if current.consistency != *old {
                    return OpsErr::Again;
                }
            }

            for (target, new) in targets.iter().zip(new_states) {
                let entry = states
                    .get_mut(target)
                    .expect("validated above while holding the lock");
                if entry.consistency != *new {
                    info!(%target, old = %entry.consistency, new = %new, "target consistency changed");
                    entry.consistency = *new;
                    if *new == ConsistencyState::NeedsResync {
                        degraded_primaries.push(*target);
                    }
                }
            }

            if let Some(mapper) = buddy_mapper {
                for target in degraded_primaries {
                    let Some((group, is_primary)) = mapper.group_of(target) else {
                        continue;
                    };
                    if !is_primary {
                        continue;
                    }
                    let promotable = mapper
                        .secondary_of(group)
                        .and_then(|secondary| states.get(&secondary))
                        .is_some_and(|s| s.consistency == ConsistencyState::Good);
                    if promotable {
                        mapper.switchover(group);
                    } else {
                        warn!(
                            %group, %target,
                            "primary needs resync but secondary is not promotable"
                        );
                    }
                }
            }
        }

        OpsErr::Success
    }

    /// All states, sorted by target ID for stable wire output.
    #[must_use]
    pub fn reports(&self) -> Vec<TargetStateReport> {
        let mut out: Vec<TargetStateReport> = self
            .states
            .read()
            .iter()
            .map(|(target, state)| TargetStateReport {
                target: *target,
                reachability: state.reachability.code(),
                consistency: state.consistency.code(),
            })
            .collect();
        out.sort_by_key(|r| r.target);
        out
    }

    /// Replace from downloaded reports; unknown codes are skipped with
    /// a warning rather than poisoning the whole sync.
    pub fn sync_from_reports(&self, reports: &[TargetStateReport]) {
        let mut fresh = HashMap::with_capacity(reports.len());
        for report in reports {
            let (Some(reachability), Some(consistency)) = (
                ReachabilityState::from_code(report.reachability),
                ConsistencyState::from_code(report.consistency),
            ) else {
                warn!(target = %report.target, "skipping state report with unknown codes");
                continue;
            };
            fresh.insert(
                report.target,
                CombinedTargetState::new(reachability, consistency),
            );
        }
        *self.states.write() = fresh;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairfs_common::types::BuddyGroupId;

    fn online_good() -> CombinedTargetState {
        CombinedTargetState::new(ReachabilityState::Online, ConsistencyState::Good)
    }

    #[test]
    fn test_optimistic_check_rejects_stale_old_state() {
        let store = TargetStateStore::new();
        store.set_state(TargetId(1), online_good());

        let res = store.change_consistency_states(
            &[TargetId(1)],
            &[ConsistencyState::NeedsResync],
            &[ConsistencyState::Good],
            None,
        );
        assert_eq!(res, OpsErr::Again);
        assert_eq!(
            store.get_state(TargetId(1)).unwrap().consistency,
            ConsistencyState::Good
        );
    }

    #[test]
    fn test_unknown_target_reported() {
        let store = TargetStateStore::new();
        let res = store.change_consistency_states(
            &[TargetId(9)],
            &[ConsistencyState::Good],
            &[ConsistencyState::Bad],
            None,
        );
        assert_eq!(res, OpsErr::UnknownTarget);
    }

    #[test]
    fn test_mismatch_applies_nothing() {
        let store = TargetStateStore::new();
        store.set_state(TargetId(1), online_good());
        store.set_state(TargetId(2), online_good());

        let res = store.change_consistency_states(
            &[TargetId(1), TargetId(2)],
            &[ConsistencyState::Good, ConsistencyState::Bad],
            &[ConsistencyState::NeedsResync, ConsistencyState::NeedsResync],
            None,
        );
        assert_eq!(res, OpsErr::Again);
        assert_eq!(
            store.get_state(TargetId(1)).unwrap().consistency,
            ConsistencyState::Good
        );
    }

    #[test]
    fn test_degraded_primary_triggers_switchover() {
        let store = TargetStateStore::new();
        store.set_state(TargetId(10), online_good());
        store.set_state(TargetId(20), online_good());

        let mapper = BuddyGroupMapper::new_detached();
        mapper.add_group(TargetId(10), TargetId(20), BuddyGroupId(1), false);

        let res = store.change_consistency_states(
            &[TargetId(10)],
            &[ConsistencyState::Good],
            &[ConsistencyState::NeedsResync],
            Some(&mapper),
        );
        assert_eq!(res, OpsErr::Success);
        // the good secondary was promoted
        assert_eq!(mapper.primary_of(BuddyGroupId(1)), Some(TargetId(20)));
    }

    #[test]
    fn test_needs_resync_secondary_is_never_promoted() {
        let store = TargetStateStore::new();
        store.set_state(TargetId(10), online_good());
        store.set_state(
            TargetId(20),
            CombinedTargetState::new(ReachabilityState::Online, ConsistencyState::NeedsResync),
        );

        let mapper = BuddyGroupMapper::new_detached();
        mapper.add_group(TargetId(10), TargetId(20), BuddyGroupId(1), false);

        let res = store.change_consistency_states(
            &[TargetId(10)],
            &[ConsistencyState::Good],
            &[ConsistencyState::NeedsResync],
            Some(&mapper),
        );
        assert_eq!(res, OpsErr::Success);
        // no switchover: the secondary itself needs resync
        assert_eq!(mapper.primary_of(BuddyGroupId(1)), Some(TargetId(10)));
    }

    #[test]
    fn test_degraded_secondary_no_switchover() {
        let store = TargetStateStore::new();
        store.set_state(TargetId(10), online_good());
        store.set_state(TargetId(20), online_good());

        let mapper = BuddyGroupMapper::new_detached();
        mapper.add_group(TargetId(10), TargetId(20), BuddyGroupId(1), false);

        let res = store.change_consistency_states(
            &[TargetId(20)],
            &[ConsistencyState::Good],
            &[ConsistencyState::NeedsResync],
            Some(&mapper),
        );
        assert_eq!(res, OpsErr::Success);
        assert_eq!(mapper.primary_of(BuddyGroupId(1)), Some(TargetId(10)));
    }
}
