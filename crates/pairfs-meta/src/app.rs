//! Application context
//!
//! One `App` per daemon process, constructed at startup and passed by
//! `Arc` into every component. There is no ambient global lookup.

use crate::candidates::SyncCandidateStore;
use crate::locks::EntryLockStore;
use crate::resync::BuddyResyncer;
use crate::session::SessionStore;
use crate::store::MetaStore;
use crate::syncer::InternodeSyncer;
use pairfs_common::config::MetaConfig;
use pairfs_common::types::{NodeNumId, NodeType, TargetId};
use pairfs_nodes::{BuddyGroupMapper, NodeStore, TargetStateStore};
use pairfs_wire::NodeConnPool;
use std::net::AddrParseError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct App {
    pub cfg: MetaConfig,
    pub local_node_id: NodeNumId,
    /// Pooled connections to the management daemon.
    pub mgmt_pool: NodeConnPool,
    /// Peer metadata nodes (buddy included), synced from mgmtd.
    pub meta_nodes: Arc<NodeStore>,
    pub buddy_mapper: Arc<BuddyGroupMapper>,
    /// Local view of per-target states, synced from mgmtd and updated
    /// eagerly when forwarding fails.
    pub target_states: TargetStateStore,
    pub store: MetaStore,
    pub entry_locks: EntryLockStore,
    pub sessions: SessionStore,
    pub candidates: SyncCandidateStore,
    pub resyncer: BuddyResyncer,
    pub syncer: InternodeSyncer,
    shutdown_tx: watch::Sender<bool>,
}

impl App {
    pub fn new(cfg: MetaConfig) -> Result<Arc<Self>, AddrParseError> {
        let mgmt_addr = cfg.network.mgmtd_endpoint.parse()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let local_node_id = NodeNumId(cfg.node.num_id);
        let meta_nodes = Arc::new(NodeStore::new(NodeType::Meta, cfg.network.conn_pool_size));
        meta_nodes.set_local_node(local_node_id);

        let buddy_mapper = Arc::new(BuddyGroupMapper::new_for_nodes(meta_nodes.clone()));
        buddy_mapper.set_local_node(local_node_id);

        Ok(Arc::new(Self {
            mgmt_pool: NodeConnPool::new(mgmt_addr, cfg.network.conn_pool_size),
            local_node_id,
            meta_nodes,
            buddy_mapper,
            target_states: TargetStateStore::new(),
            store: MetaStore::new(),
            entry_locks: EntryLockStore::new(shutdown_rx),
            sessions: SessionStore::new(),
            candidates: SyncCandidateStore::new(),
            resyncer: BuddyResyncer::new(),
            syncer: InternodeSyncer::new(),
            shutdown_tx,
            cfg,
        }))
    }

    /// The local node's target ID in buddy-group terms (metadata
    /// mirroring keys groups by node numeric ID).
    #[must_use]
    pub fn local_target(&self) -> TargetId {
        TargetId(self.local_node_id.value() as u16)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.network.request_timeout_secs)
    }

    /// Begin cooperative shutdown: all blocked lock acquisitions and
    /// server loops observe the flipped watch value.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    #[must_use]
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}
