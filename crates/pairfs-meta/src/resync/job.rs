//! One buddy resync run
//!
//! Restores a secondary after it missed mirrored writes:
//!
//! 1. announce the run (the secondary drops its mirrored sessions),
//! 2. walk the full namespace bucket by bucket, sending a repair
//!    snapshot per entry, while concurrently draining the live
//!    change-set queue that mirrored writes keep filling,
//! 3. quiesce mirrored ops at the gate, drain stragglers, stream the
//!    session table wholesale,
//! 4. with zero errors, flip the secondary's consistency back to good;
//!    otherwise leave it at needs-resync and report failure.

use crate::app::App;
use crate::candidates::SyncCandidate;
use crate::mirror;
use crate::store;
use pairfs_common::OpsErr;
use pairfs_common::types::{BuddyGroupId, ConsistencyState, EntryType, NodeNumId, TargetId};
use pairfs_nodes::Node;
use pairfs_wire::header::MsgType;
use pairfs_wire::msgs::{AnyMsg, ResyncEntry, ResyncStarted};
use pairfs_wire::FrameMeta;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// How long the change-set drain waits for new candidates before
/// checking whether the bucket walk has finished.
const DRAIN_IDLE: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResyncJobState {
    NotStarted,
    Running,
    Success,
    Failure,
    Interrupted,
}

#[derive(Default)]
struct ResyncStats {
    dirs_synced: AtomicU64,
    files_synced: AtomicU64,
    errors: AtomicU64,
}

/// Counters of a finished or running job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResyncStatsSnapshot {
    pub dirs_synced: u64,
    pub files_synced: u64,
    pub errors: u64,
}

/// A single resync run. Never reused: the resyncer creates a fresh job
/// object per run.
pub struct BuddyResyncJob {
    group: BuddyGroupId,
    secondary: TargetId,
    buddy_node: NodeNumId,
    state: Mutex<ResyncJobState>,
    abort_requested: AtomicBool,
    stats: ResyncStats,
}

impl BuddyResyncJob {
    #[must_use]
    pub fn new(group: BuddyGroupId, secondary: TargetId, buddy_node: NodeNumId) -> Self {
        Self {
            group,
            secondary,
            buddy_node,
            state: Mutex::new(ResyncJobState::NotStarted),
            abort_requested: AtomicBool::new(false),
            stats: ResyncStats::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ResyncJobState {
        *self.state.lock()
    }

    fn set_state(&self, state: ResyncJobState) {
        *self.state.lock() = state;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            ResyncJobState::NotStarted | ResyncJobState::Running
        )
    }

    pub fn abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
    }

    fn aborted(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    fn errors(&self) -> u64 {
        self.stats.errors.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stats(&self) -> ResyncStatsSnapshot {
        ResyncStatsSnapshot {
            dirs_synced: self.stats.dirs_synced.load(Ordering::Relaxed),
            files_synced: self.stats.files_synced.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }
}

pub(crate) async fn run(app: Arc<App>, job: Arc<BuddyResyncJob>) {
    info!(
        group = %job.group,
        secondary = %job.secondary,
        "buddy resync starting"
    );
    job.set_state(ResyncJobState::Running);

    // raise the gate: mirrored ops now queue change-set candidates
    // instead of forwarding directly
    {
        let mut gate = app.syncer.gate_write().await;
        *gate = true;
    }
    app.candidates.clear();

    let final_state = run_phases(&app, &job).await;

    job.set_state(final_state);
    let stats = job.stats();
    match final_state {
        ResyncJobState::Success => info!(
            group = %job.group,
            dirs = stats.dirs_synced,
            files = stats.files_synced,
            "buddy resync finished successfully"
        ),
        state => warn!(
            group = %job.group,
            ?state,
            dirs = stats.dirs_synced,
            files = stats.files_synced,
            errors = stats.errors,
            "buddy resync did not complete"
        ),
    }
}

async fn run_phases(app: &Arc<App>, job: &Arc<BuddyResyncJob>) -> ResyncJobState {
    let Some(node) = app.meta_nodes.reference_node(job.buddy_node) else {
        warn!(buddy = %job.buddy_node, "unable to resolve buddy node, resync will not start");
        let mut gate = app.syncer.gate_write().await;
        *gate = false;
        return ResyncJobState::Failure;
    };

    // announce; the secondary clears its mirrored sessions in response
    if !announce(app, job, &node).await {
        let mut gate = app.syncer.gate_write().await;
        *gate = false;
        return ResyncJobState::Failure;
    }

    // bulk walk and live change-set drain run concurrently: an entry
    // modified after the walker passed it is re-sent by the drain
    let walk_done = AtomicBool::new(false);
    let walk = async {
        for bucket in 0..store::SYNC_BUCKETS {
            if job.aborted() {
                break;
            }
            for snapshot in app.store.bucket_snapshots(bucket) {
                if job.aborted() {
                    break;
                }
                send_repair(app, job, &node, snapshot).await;
            }
        }
        walk_done.store(true, Ordering::SeqCst);
    };
    let drain = async {
        loop {
            if job.aborted() {
                break;
            }
            match app.candidates.pop_or_idle(DRAIN_IDLE).await {
                Some(candidate) => {
                    let snapshot = snapshot_candidate(app, &candidate);
                    send_repair(app, job, &node, snapshot).await;
                }
                None => {
                    if walk_done.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
    };
    tokio::join!(walk, drain);

    // quiescent phase: holding the gate write lock pauses mirrored ops,
    // so the session table cannot change under the stream and no
    // candidate can be lost
    let mut gate = app.syncer.gate_write().await;

    while let Some(candidate) = app.candidates.try_pop() {
        if job.aborted() {
            break;
        }
        let snapshot = snapshot_candidate(app, &candidate);
        send_repair(app, job, &node, snapshot).await;
    }

    if job.aborted() {
        *gate = false;
        return ResyncJobState::Interrupted;
    }

    if job.errors() == 0 {
        sync_session_store(app, job, &node).await;
    }

    let final_state = if job.errors() == 0 {
        // the local view flips immediately so forwarding resumes; the
        // management daemon is told best-effort and the internode
        // syncer reconciles if that report is lost
        app.target_states
            .set_consistency(job.secondary, ConsistencyState::Good);
        if !mirror::report_consistency_to_mgmtd(app, job.secondary, ConsistencyState::Good).await {
            warn!(secondary = %job.secondary, "could not report resync completion to mgmtd");
        }
        ResyncJobState::Success
    } else {
        ResyncJobState::Failure
    };

    *gate = false;
    final_state
}

async fn announce(app: &Arc<App>, job: &Arc<BuddyResyncJob>, node: &Arc<Node>) -> bool {
    let msg = AnyMsg::ResyncStarted(ResyncStarted {
        primary_node: app.local_node_id,
    });
    match node
        .conn_pool()
        .request_expect(
            &msg,
            FrameMeta::default(),
            app.request_timeout(),
            MsgType::ResyncStartedResp,
        )
        .await
    {
        Ok((_, AnyMsg::ResyncStartedResp(resp)))
            if OpsErr::from_code(resp.result).is_success() =>
        {
            true
        }
        Ok(_) => {
            warn!(group = %job.group, "buddy rejected the resync announcement");
            false
        }
        Err(e) => {
            warn!(group = %job.group, error = %e, "unable to notify buddy about resync attempt");
            false
        }
    }
}

fn snapshot_candidate(app: &App, candidate: &SyncCandidate) -> ResyncEntry {
    // snapshot at send time: the candidate identifies the entry, the
    // store provides its current (possibly newer) state or a tombstone
    app.store.snapshot_or_tombstone(
        &candidate.entry_id,
        &candidate.parent_id,
        &candidate.name,
        candidate.entry_type,
    )
}

async fn send_repair(
    app: &Arc<App>,
    job: &Arc<BuddyResyncJob>,
    node: &Arc<Node>,
    snapshot: ResyncEntry,
) {
    let max_attempts = app.cfg.tuning.resync_retries.max(1);
    let msg = AnyMsg::ResyncEntry(snapshot.clone());

    for attempt in 1..=max_attempts {
        match node
            .conn_pool()
            .request_expect(
                &msg,
                FrameMeta::default(),
                app.request_timeout(),
                MsgType::ResyncEntryResp,
            )
            .await
        {
            Ok((_, AnyMsg::ResyncEntryResp(resp)))
                if OpsErr::from_code(resp.result).is_success() =>
            {
                match snapshot.entry_type {
                    EntryType::Directory => {
                        job.stats.dirs_synced.fetch_add(1, Ordering::Relaxed);
                    }
                    EntryType::File => {
                        job.stats.files_synced.fetch_add(1, Ordering::Relaxed);
                    }
                }
                return;
            }
            result => {
                if attempt == max_attempts {
                    warn!(
                        entry = %snapshot.entry_id,
                        ?result,
                        "resync candidate failed terminally"
                    );
                    job.stats.errors.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

async fn sync_session_store(app: &Arc<App>, job: &Arc<BuddyResyncJob>, node: &Arc<Node>) {
    let data = app.sessions.serialize_for_resync();

    match node
        .conn_pool()
        .request_stream(MsgType::ResyncSessionStore, &data, app.request_timeout())
        .await
    {
        Ok((_, AnyMsg::ResyncSessionStoreResp(resp)))
            if OpsErr::from_code(resp.result).is_success() =>
        {
            info!(bytes = data.len(), "session store resynced to buddy");
        }
        result => {
            warn!(?result, "session store resync failed");
            job.stats.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_job_lifecycle() {
        let job = BuddyResyncJob::new(BuddyGroupId(1), TargetId(20), NodeNumId(20));
        assert_eq!(job.state(), ResyncJobState::NotStarted);
        assert!(job.is_running());

        job.set_state(ResyncJobState::Running);
        assert!(job.is_running());

        job.set_state(ResyncJobState::Success);
        assert!(!job.is_running());
    }

    #[test]
    fn test_abort_flag() {
        let job = BuddyResyncJob::new(BuddyGroupId(1), TargetId(20), NodeNumId(20));
        assert!(!job.aborted());
        job.abort();
        assert!(job.aborted());
    }
}
