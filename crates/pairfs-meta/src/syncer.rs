//! Internode syncer
//!
//! Periodic loop that refreshes the node/target directory from the
//! management daemon, reaps idle pooled connections, retries pending
//! needs-resync reports, and kicks off a resync when the local node is
//! a primary whose buddy needs one. Also owns the resync gate the
//! mirrored-op engine consults before forwarding.

use crate::app::App;
use crate::mirror;
use pairfs_common::OpsErr;
use pairfs_common::types::{ConsistencyState, NodeType, ReachabilityState, TargetId};
use pairfs_wire::header::MsgType;
use pairfs_wire::msgs::{AnyMsg, GetMirrorBuddyGroups, GetNodes, GetTargetStates};
use pairfs_wire::FrameMeta;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Attempts per download before giving up until the next loop tick.
/// Kept low with a short timeout so a transiently unreachable mgmtd
/// does not spam the log.
const DOWNLOAD_RETRIES: u32 = 3;
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(2);

pub struct InternodeSyncer {
    /// True while a resync runs. Mirrored ops hold the read side
    /// across their queue-candidate decision; the resync job takes the
    /// write side to flip the flag and to quiesce ops at its barriers.
    resync_gate: RwLock<bool>,
    /// Needs-resync report that could not reach mgmtd yet.
    pending_needs_resync: Mutex<Option<TargetId>>,
}

impl Default for InternodeSyncer {
    fn default() -> Self {
        Self::new()
    }
}

impl InternodeSyncer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            resync_gate: RwLock::new(false),
            pending_needs_resync: Mutex::new(None),
        }
    }

    /// Non-blocking check; a write-held gate means a resync barrier is
    /// active, which counts as in-progress.
    #[must_use]
    pub fn resync_in_progress(&self) -> bool {
        self.resync_gate.try_read().map_or(true, |gate| *gate)
    }

    pub async fn gate_read(&self) -> RwLockReadGuard<'_, bool> {
        self.resync_gate.read().await
    }

    pub async fn gate_write(&self) -> RwLockWriteGuard<'_, bool> {
        self.resync_gate.write().await
    }

    pub fn set_pending_needs_resync(&self, target: TargetId) {
        *self.pending_needs_resync.lock() = Some(target);
    }

    fn take_pending_needs_resync(&self) -> Option<TargetId> {
        self.pending_needs_resync.lock().take()
    }

    /// The periodic loop. Runs until shutdown.
    pub async fn run(app: Arc<App>) {
        let interval = Duration::from_secs(app.cfg.tuning.sync_interval_secs.max(1));
        let mut shutdown = app.shutdown_rx();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }

            Self::tick(&app).await;
        }

        debug!("internode syncer stopped");
    }

    /// One sync round; also called directly by tests.
    pub async fn tick(app: &Arc<App>) {
        // flush a pending needs-resync report before downloading states,
        // so the download does not clobber what we know
        if let Some(target) = app.syncer.take_pending_needs_resync() {
            if !mirror::report_consistency_to_mgmtd(app, target, ConsistencyState::NeedsResync)
                .await
            {
                app.syncer.set_pending_needs_resync(target);
            }
        }

        Self::download_nodes(app).await;
        Self::download_target_states(app).await;
        Self::download_buddy_groups(app).await;

        Self::reap_idle_conns(app).await;
        app.entry_locks.shrink();

        Self::maybe_start_resync(app);
    }

    async fn download<F>(app: &App, msg: AnyMsg, expected: MsgType, apply: F) -> bool
    where
        F: Fn(&App, AnyMsg),
    {
        for attempt in 1..=DOWNLOAD_RETRIES {
            match app
                .mgmt_pool
                .request_expect(&msg, FrameMeta::default(), DOWNLOAD_TIMEOUT, expected)
                .await
            {
                Ok((hdr, resp)) if hdr.msg_type == expected => {
                    apply(app, resp);
                    return true;
                }
                Ok(_) => {
                    debug!(?expected, "management daemon sent a generic response");
                    return false;
                }
                Err(e) if attempt == DOWNLOAD_RETRIES => {
                    debug!(?expected, error = %e, "download from mgmtd failed");
                }
                Err(_) => {}
            }
        }
        false
    }

    async fn download_nodes(app: &App) {
        Self::download(
            app,
            AnyMsg::GetNodes(GetNodes {
                node_type: NodeType::Meta,
            }),
            MsgType::GetNodesResp,
            |app, resp| {
                let AnyMsg::GetNodesResp(resp) = resp else {
                    return;
                };
                let (added, removed) = app.meta_nodes.sync_nodes(&resp.nodes);
                if !added.is_empty() || !removed.is_empty() {
                    info!(?added, ?removed, "metadata node list changed");
                }
            },
        )
        .await;
    }

    async fn download_target_states(app: &App) {
        Self::download(
            app,
            AnyMsg::GetTargetStates(GetTargetStates {
                node_type: NodeType::Meta,
            }),
            MsgType::GetTargetStatesResp,
            |app, resp| {
                let AnyMsg::GetTargetStatesResp(resp) = resp else {
                    return;
                };
                app.target_states.sync_from_reports(&resp.states);
            },
        )
        .await;
    }

    async fn download_buddy_groups(app: &App) {
        Self::download(
            app,
            AnyMsg::GetMirrorBuddyGroups(GetMirrorBuddyGroups {
                node_type: NodeType::Meta,
            }),
            MsgType::GetMirrorBuddyGroupsResp,
            |app, resp| {
                let AnyMsg::GetMirrorBuddyGroupsResp(resp) = resp else {
                    return;
                };
                app.buddy_mapper.sync_from_list(&resp.groups);
            },
        )
        .await;
    }

    async fn reap_idle_conns(app: &App) {
        let max_idle = Duration::from_secs(app.cfg.network.conn_idle_secs);
        app.mgmt_pool.drop_idle_older_than(max_idle).await;
        for node in app.meta_nodes.all_nodes() {
            node.conn_pool().drop_idle_older_than(max_idle).await;
        }
    }

    /// Start a resync when we are the primary of a group whose
    /// secondary is reachable but needs one.
    fn maybe_start_resync(app: &Arc<App>) {
        let Some((group, is_primary)) = app.buddy_mapper.local_group() else {
            return;
        };
        if !is_primary {
            return;
        }
        let Some(secondary) = app.buddy_mapper.secondary_of(group) else {
            return;
        };
        let Some(state) = app.target_states.get_state(secondary) else {
            return;
        };

        if state.consistency == ConsistencyState::NeedsResync
            && state.reachability == ReachabilityState::Online
        {
            match app.resyncer.start(app) {
                OpsErr::Success => info!(%group, %secondary, "starting buddy resync"),
                OpsErr::InUse => {}
                err => warn!(%group, %secondary, %err, "cannot start buddy resync"),
            }
        }
    }
}
