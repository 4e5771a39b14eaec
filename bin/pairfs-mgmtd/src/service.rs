//! Management service: the authoritative node/target/buddy directory
//!
//! Keeps the cluster's membership, target mappings, per-target states
//! and buddy groups; answers downloads from all node types; derives
//! reachability from heartbeat presence; persists the mirroring
//! topology to the state file.

use dashmap::DashMap;
use pairfs_common::OpsErr;
use pairfs_common::config::MgmtdConfig;
use pairfs_common::types::{
    ConsistencyState, NodeNumId, NodeType, ReachabilityState, TargetId,
};
use pairfs_nodes::{
    BuddyGroupMapper, NodeStore, PersistedState, StatePersister, TargetMapper, TargetStateStore,
};
use pairfs_wire::header::MsgHeader;
use pairfs_wire::msgs::{
    Ack, AnyMsg, GetMirrorBuddyGroupsResp, GetNodesResp, GetTargetMappingsResp,
    GetTargetStatesResp, MapTargetsResp, NodeDesc, SetMirrorBuddyGroupResp,
    SetTargetConsistencyStatesResp,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct MgmtApp {
    pub cfg: MgmtdConfig,
    meta_nodes: Arc<NodeStore>,
    storage_nodes: Arc<NodeStore>,
    client_nodes: Arc<NodeStore>,
    pub target_mapper: Arc<TargetMapper>,
    pub target_states: TargetStateStore,
    pub meta_buddy_mapper: Arc<BuddyGroupMapper>,
    pub storage_buddy_mapper: Arc<BuddyGroupMapper>,
    /// Last heartbeat per node, feeding the reachability sweep.
    last_seen: DashMap<(NodeType, NodeNumId), Instant>,
    pub persister: StatePersister,
    shutdown_tx: watch::Sender<bool>,
}

impl MgmtApp {
    #[must_use]
    pub fn new(cfg: MgmtdConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);

        let pool_size = 4;
        let meta_nodes = Arc::new(NodeStore::new(NodeType::Meta, pool_size));
        let storage_nodes = Arc::new(NodeStore::new(NodeType::Storage, pool_size));
        let client_nodes = Arc::new(NodeStore::new(NodeType::Client, pool_size));

        let target_mapper = Arc::new(TargetMapper::new());
        let target_states = TargetStateStore::new();
        // meta mirroring keys groups by node numeric ID, so membership
        // is checked against the meta node store
        let meta_buddy_mapper = Arc::new(BuddyGroupMapper::new_for_nodes(meta_nodes.clone()));
        let storage_buddy_mapper =
            Arc::new(BuddyGroupMapper::new_for_targets(target_mapper.clone()));

        let persister = StatePersister::new(cfg.persistence.state_file.clone());
        if let Some(state) = persister.load() {
            state.apply(
                &target_mapper,
                &target_states,
                &meta_buddy_mapper,
                &storage_buddy_mapper,
            );
        }

        Arc::new(Self {
            cfg,
            meta_nodes,
            storage_nodes,
            client_nodes,
            target_mapper,
            target_states,
            meta_buddy_mapper,
            storage_buddy_mapper,
            last_seen: DashMap::new(),
            persister,
            shutdown_tx,
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    #[must_use]
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    fn node_store(&self, node_type: NodeType) -> &NodeStore {
        match node_type {
            NodeType::Meta | NodeType::Mgmt => &self.meta_nodes,
            NodeType::Storage => &self.storage_nodes,
            NodeType::Client => &self.client_nodes,
        }
    }

    fn buddy_mapper(&self, node_type: NodeType) -> &BuddyGroupMapper {
        match node_type {
            NodeType::Storage => &self.storage_buddy_mapper,
            _ => &self.meta_buddy_mapper,
        }
    }

    /// Targets driven by one node's heartbeat presence: metadata nodes
    /// are their own target, storage nodes own mapped targets.
    fn targets_of_node(&self, node_type: NodeType, num_id: NodeNumId) -> Vec<TargetId> {
        match node_type {
            NodeType::Meta => vec![TargetId(num_id.value() as u16)],
            NodeType::Storage => self
                .target_mapper
                .mappings()
                .into_iter()
                .filter(|m| m.node == num_id)
                .map(|m| m.target)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn persist_now(&self) {
        self.persister.save(&PersistedState::capture(
            &self.target_mapper,
            &self.target_states,
            &self.meta_buddy_mapper,
            &self.storage_buddy_mapper,
        ));
    }

    /// One reachability sweep over all nodes we have seen heartbeats
    /// from. Online -> probably-offline -> offline as silence grows.
    pub fn sweep_reachability(&self) {
        let probably = std::time::Duration::from_secs(self.cfg.sweep.probably_offline_secs);
        let offline = std::time::Duration::from_secs(self.cfg.sweep.offline_secs);

        for entry in &self.last_seen {
            let (node_type, num_id) = *entry.key();
            let silence = entry.value().elapsed();

            let reachability = if silence >= offline {
                ReachabilityState::Offline
            } else if silence >= probably {
                ReachabilityState::ProbablyOffline
            } else {
                ReachabilityState::Online
            };

            for target in self.targets_of_node(node_type, num_id) {
                self.target_states.set_reachability(target, reachability);
            }
        }
    }
}

pub async fn dispatch(app: &Arc<MgmtApp>, _hdr: MsgHeader, msg: AnyMsg) -> Option<AnyMsg> {
    match msg {
        AnyMsg::Heartbeat(hb) => {
            let desc = NodeDesc {
                node_id: hb.node_id.clone(),
                num_id: hb.num_id,
                node_type: hb.node_type,
                tcp_port: hb.tcp_port,
                udp_port: hb.udp_port,
                nics: hb.nics.clone(),
                feature_flags: hb.feature_flags,
            };
            match app.node_store(hb.node_type).add_or_update_node(&desc) {
                Ok(result) => {
                    app.last_seen
                        .insert((hb.node_type, hb.num_id), Instant::now());
                    for target in app.targets_of_node(hb.node_type, hb.num_id) {
                        app.target_states.add_if_missing(target);
                        app.target_states
                            .set_reachability(target, ReachabilityState::Online);
                    }
                    if result == pairfs_nodes::NodeStoreResult::Added {
                        info!(node = %hb.node_id, num_id = %hb.num_id, node_type = %hb.node_type, "node registered");
                    }
                }
                Err(e) => {
                    warn!(node = %hb.node_id, error = %e, "rejected heartbeat");
                }
            }
            Some(AnyMsg::Ack(Ack { ack_id: hb.ack_id }))
        }

        AnyMsg::RemoveNode(m) => {
            if app.node_store(m.node_type).remove_node(m.num_id).is_some() {
                info!(num_id = %m.num_id, node_type = %m.node_type, "node removed");
                app.last_seen.remove(&(m.node_type, m.num_id));
            }
            Some(AnyMsg::Ack(Ack { ack_id: m.ack_id }))
        }

        AnyMsg::GetNodes(m) => Some(AnyMsg::GetNodesResp(GetNodesResp {
            nodes: app.node_store(m.node_type).descs(),
            root_info: None,
        })),

        AnyMsg::MapTargets(m) => {
            let mut results = Vec::with_capacity(m.mappings.len());
            for mapping in &m.mappings {
                let (result, is_new) =
                    app.target_mapper
                        .map_target(mapping.target, mapping.node, mapping.pool);
                if result.is_success() {
                    app.target_states.add_if_missing(mapping.target);
                    if is_new {
                        info!(target = %mapping.target, node = %mapping.node, "target mapped");
                    }
                }
                results.push((mapping.target, result.code()));
            }
            Some(AnyMsg::MapTargetsResp(MapTargetsResp { results }))
        }

        AnyMsg::GetTargetMappings(_) => {
            Some(AnyMsg::GetTargetMappingsResp(GetTargetMappingsResp {
                mappings: app.target_mapper.mappings(),
            }))
        }

        AnyMsg::GetTargetStates(_) => Some(AnyMsg::GetTargetStatesResp(GetTargetStatesResp {
            states: app.target_states.reports(),
        })),

        AnyMsg::SetTargetConsistencyStates(m) => {
            let result = handle_set_consistency_states(app, &m);
            Some(AnyMsg::SetTargetConsistencyStatesResp(
                SetTargetConsistencyStatesResp {
                    result: result.code(),
                },
            ))
        }

        AnyMsg::SetMirrorBuddyGroup(m) => {
            let (result, group_id) = app.buddy_mapper(m.node_type).add_group(
                m.primary,
                m.secondary,
                m.group_id,
                m.allow_update,
            );
            if result.is_success() {
                app.target_states.add_if_missing(m.primary);
                app.target_states.add_if_missing(m.secondary);
                app.persist_now();
            }
            Some(AnyMsg::SetMirrorBuddyGroupResp(SetMirrorBuddyGroupResp {
                result: result.code(),
                group_id,
            }))
        }

        AnyMsg::GetMirrorBuddyGroups(m) => {
            Some(AnyMsg::GetMirrorBuddyGroupsResp(GetMirrorBuddyGroupsResp {
                groups: app.buddy_mapper(m.node_type).groups(),
            }))
        }

        other => {
            warn!(msg_type = ?other.msg_type(), "message type not served by the management daemon");
            None
        }
    }
}

fn handle_set_consistency_states(
    app: &Arc<MgmtApp>,
    msg: &pairfs_wire::msgs::SetTargetConsistencyStates,
) -> OpsErr {
    if msg.targets.is_empty() || msg.targets.len() != msg.new_states.len() {
        return OpsErr::InvalidArg;
    }
    if !msg.old_states.is_empty() && msg.old_states.len() != msg.targets.len() {
        return OpsErr::InvalidArg;
    }

    let Some(new_states) = decode_states(&msg.new_states) else {
        return OpsErr::InvalidArg;
    };

    for target in &msg.targets {
        app.target_states.add_if_missing(*target);
    }

    // an empty old-state list means the sender is authoritative (a
    // group primary reporting about its own buddy); substitute the
    // current states so the change always validates
    let old_states = if msg.old_states.is_empty() {
        msg.targets
            .iter()
            .map(|t| {
                app.target_states
                    .get_state(*t)
                    .map_or(ConsistencyState::Good, |s| s.consistency)
            })
            .collect()
    } else {
        match decode_states(&msg.old_states) {
            Some(states) => states,
            None => return OpsErr::InvalidArg,
        }
    };

    let result = app.target_states.change_consistency_states(
        &msg.targets,
        &old_states,
        &new_states,
        Some(app.buddy_mapper(msg.node_type)),
    );

    if result.is_success() {
        if msg.set_online {
            for target in &msg.targets {
                app.target_states
                    .set_reachability(*target, ReachabilityState::Online);
            }
        }
        app.persist_now();
    }

    result
}

fn decode_states(raw: &[u8]) -> Option<Vec<ConsistencyState>> {
    raw.iter()
        .map(|code| ConsistencyState::from_code(*code))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairfs_common::types::{BuddyGroupId, NicAddress, PoolId};
    use pairfs_wire::header::MsgType;
    use pairfs_wire::msgs::{
        Heartbeat, MapTargets, SetMirrorBuddyGroup, SetTargetConsistencyStates, TargetMapping,
    };

    fn test_app() -> (Arc<MgmtApp>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = MgmtdConfig::default();
        cfg.persistence.state_file = dir.path().join("mgmtd.state");
        cfg.sweep.probably_offline_secs = 1;
        cfg.sweep.offline_secs = 1;
        (MgmtApp::new(cfg), dir)
    }

    fn hdr() -> MsgHeader {
        MsgHeader::new(MsgType::Heartbeat)
    }

    async fn heartbeat(app: &Arc<MgmtApp>, node_type: NodeType, num_id: u32) {
        let resp = dispatch(
            app,
            hdr(),
            AnyMsg::Heartbeat(Heartbeat {
                node_id: format!("node{num_id}"),
                num_id: NodeNumId(num_id),
                node_type,
                tcp_port: 8005,
                udp_port: 8006,
                nics: vec![NicAddress::new("127.0.0.1".parse().unwrap(), "lo")],
                feature_flags: 0,
                root_info: None,
                ack_id: String::new(),
            }),
        )
        .await;
        assert!(matches!(resp, Some(AnyMsg::Ack(_))));
    }

    #[tokio::test]
    async fn test_first_heartbeat_registers_node() {
        let (app, _dir) = test_app();
        heartbeat(&app, NodeType::Meta, 1).await;

        let resp = dispatch(
            &app,
            hdr(),
            AnyMsg::GetNodes(pairfs_wire::msgs::GetNodes {
                node_type: NodeType::Meta,
            }),
        )
        .await;
        match resp {
            Some(AnyMsg::GetNodesResp(r)) => {
                assert_eq!(r.nodes.len(), 1);
                assert_eq!(r.nodes[0].num_id, NodeNumId(1));
            }
            other => panic!("unexpected response: {other:?}"),
        }

        // meta nodes are their own target; heartbeat puts them online
        let state = app.target_states.get_state(TargetId(1)).unwrap();
        assert_eq!(state.reachability, ReachabilityState::Online);
    }

    #[tokio::test]
    async fn test_map_target_twice_is_not_new() {
        let (app, _dir) = test_app();
        heartbeat(&app, NodeType::Storage, 5).await;

        for expect_len in [1usize, 1] {
            let resp = dispatch(
                &app,
                hdr(),
                AnyMsg::MapTargets(MapTargets {
                    mappings: vec![TargetMapping {
                        target: TargetId(30),
                        node: NodeNumId(5),
                        pool: PoolId::DEFAULT,
                    }],
                    ack_id: String::new(),
                }),
            )
            .await;
            match resp {
                Some(AnyMsg::MapTargetsResp(r)) => {
                    assert_eq!(r.results.len(), 1);
                    assert_eq!(OpsErr::from_code(r.results[0].1), OpsErr::Success);
                }
                other => panic!("unexpected response: {other:?}"),
            }
            assert_eq!(app.target_mapper.len(), expect_len);
        }
    }

    #[tokio::test]
    async fn test_forced_group_id_conflict() {
        let (app, _dir) = test_app();
        heartbeat(&app, NodeType::Meta, 1).await;
        heartbeat(&app, NodeType::Meta, 2).await;

        let set_group = AnyMsg::SetMirrorBuddyGroup(SetMirrorBuddyGroup {
            node_type: NodeType::Meta,
            primary: TargetId(1),
            secondary: TargetId(2),
            group_id: BuddyGroupId(5),
            allow_update: false,
            ack_id: String::new(),
        });

        match dispatch(&app, hdr(), set_group.clone()).await {
            Some(AnyMsg::SetMirrorBuddyGroupResp(r)) => {
                assert_eq!(OpsErr::from_code(r.result), OpsErr::Success);
                assert_eq!(r.group_id, BuddyGroupId(5));
            }
            other => panic!("unexpected response: {other:?}"),
        }

        match dispatch(&app, hdr(), set_group).await {
            Some(AnyMsg::SetMirrorBuddyGroupResp(r)) => {
                assert_eq!(OpsErr::from_code(r.result), OpsErr::Exists);
            }
            other => panic!("unexpected response: {other:?}"),
        }

        // mapping unchanged
        assert_eq!(
            app.meta_buddy_mapper.primary_of(BuddyGroupId(5)),
            Some(TargetId(1))
        );
    }

    #[tokio::test]
    async fn test_consistency_change_with_stale_old_state() {
        let (app, _dir) = test_app();
        heartbeat(&app, NodeType::Meta, 1).await;

        let msg = SetTargetConsistencyStates {
            node_type: NodeType::Meta,
            targets: vec![TargetId(1)],
            old_states: vec![ConsistencyState::NeedsResync.code()],
            new_states: vec![ConsistencyState::Good.code()],
            set_online: false,
            ack_id: String::new(),
        };
        assert_eq!(handle_set_consistency_states(&app, &msg), OpsErr::Again);

        // forced (empty old list) applies
        let forced = SetTargetConsistencyStates {
            old_states: Vec::new(),
            new_states: vec![ConsistencyState::NeedsResync.code()],
            ..msg
        };
        assert_eq!(handle_set_consistency_states(&app, &forced), OpsErr::Success);
        assert_eq!(
            app.target_states.get_state(TargetId(1)).unwrap().consistency,
            ConsistencyState::NeedsResync
        );
    }

    #[tokio::test]
    async fn test_sweep_degrades_silent_nodes() {
        let (app, _dir) = test_app();
        heartbeat(&app, NodeType::Meta, 1).await;

        // fresh heartbeat keeps the node online
        app.sweep_reachability();
        assert_eq!(
            app.target_states.get_state(TargetId(1)).unwrap().reachability,
            ReachabilityState::Online
        );

        // let the heartbeat age past the (test-tuned) offline threshold
        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
        app.sweep_reachability();
        assert_eq!(
            app.target_states.get_state(TargetId(1)).unwrap().reachability,
            ReachabilityState::Offline
        );
    }
}
