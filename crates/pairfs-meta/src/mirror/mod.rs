//! Mirrored-operation engine
//!
//! Drives every replicated write through the same state machine:
//! lock, sequence-slot claim, local execution, forwarding of the
//! augmented copy to the buddy secondary, response aggregation, and
//! exactly one response to the requestor.
//!
//! When communication with the secondary fails, the secondary is
//! marked needs-resync and the client still receives the primary's
//! authoritative result; consistency is restored asynchronously by the
//! resync job. The operation is never rolled back on the primary.

pub mod ops;

pub use ops::{
    AckNotifyOp, CloseFileOp, FLockOp, MirroredOp, MkDirOp, OpenFileOp, RenameOp, ResponseState,
    RmDirOp, SetAttrOp, TruncFileOp,
};

use crate::app::App;
use crate::resync::ResyncJobState;
use crate::session::{SessionStore, SlotAcquire, StoredResponse};
use pairfs_common::OpsErr;
use pairfs_common::types::{ConsistencyState, NodeNumId, NodeType, TargetId};
use pairfs_nodes::Node;
use pairfs_wire::header::{
    FLAG_BUDDY_MIRROR_SECOND, FLAG_HAS_SEQUENCE_NUMBER, FLAG_IS_SELECTIVE_ACK, MsgHeader, MsgType,
};
use pairfs_wire::msgs::{
    AckNotify, AnyMsg, GenericRespCode, GenericResponse, SetTargetConsistencyStates,
};
use pairfs_wire::FrameMeta;
use std::sync::Arc;
use tracing::{debug, warn};

/// Run one operation through the mirrored state machine and produce
/// the single response for the requestor.
pub async fn run_mirrored<M: MirroredOp>(app: &Arc<App>, mut op: M, hdr: &MsgHeader) -> AnyMsg {
    let mirrored = op.is_mirrored();
    let is_secondary = hdr.is_buddy_mirror_second();

    // the identical lock kinds are taken on primary and secondary, so
    // forwarded operations apply in the primary's acquisition order
    let lock_state = if mirrored {
        match op.lock(&app.entry_locks).await {
            Ok(state) => Some(state),
            Err(err) => {
                return AnyMsg::GenericResponse(GenericResponse::new(
                    GenericRespCode::IndirectCommErrNotAgain,
                    format!("lock acquisition failed: {err}"),
                ));
            }
        }
    } else {
        None
    };
    let _lock_state = lock_state;

    let session = mirrored.then(|| {
        app.sessions
            .reference_session(NodeNumId(hdr.requestor))
    });

    if let Some(session) = &session {
        if hdr.has_sequence_number() {
            // a client that has not been told where to start gets the
            // base and no processing
            if hdr.seq == 0 {
                let base = session.lock().seq_base;
                return AnyMsg::GenericResponse(GenericResponse::new_seq_base(base));
            }

            match SessionStore::acquire_slot(
                session,
                hdr.seq,
                hdr.seq_done,
                hdr.is_selective_ack(),
            ) {
                SlotAcquire::DuplicateDone(stored) => {
                    debug!(seq = hdr.seq, "replaying stored response for retried request");
                    return stored.response;
                }
                SlotAcquire::DuplicateInProgress => {
                    return AnyMsg::GenericResponse(GenericResponse::new(
                        GenericRespCode::TryAgain,
                        "request for the same sequence number is currently in progress",
                    ));
                }
                SlotAcquire::New => {}
            }
        }
    }

    let state = op.execute_locally(app, NodeNumId(hdr.requestor), mirrored && is_secondary);

    if mirrored && !is_secondary {
        if state.result.is_success() && state.changes_state {
            // while a resync runs, the live change-set queue covers
            // this operation instead of direct forwarding
            let gate = app.syncer.gate_read().await;
            if *gate {
                app.candidates.push_all(state.candidates.iter().cloned());
                drop(gate);
            } else {
                drop(gate);
                forward_to_secondary(app, &op, &state, hdr).await;
            }
        } else if hdr.has_sequence_number() {
            // nothing to forward, but the secondary must still retire
            // the sequence slot
            notify_secondary_of_ack(app, op.mirror_log_context(), hdr).await;
        }
    }

    if let Some(session) = &session {
        if hdr.has_sequence_number() {
            SessionStore::complete_slot(
                session,
                hdr.seq,
                StoredResponse {
                    result: state.result,
                    response: state.response.clone(),
                },
            );
        }
    }

    state.response
}

/// Resolve the local group's secondary if it may receive forwarded
/// traffic right now. Anything but online/good means the secondary has
/// already missed something important and is flagged for resync.
async fn resolve_viable_secondary(
    app: &Arc<App>,
    ctx: &'static str,
) -> Option<(Arc<Node>, TargetId)> {
    let Some((group, is_primary)) = app.buddy_mapper.local_group() else {
        warn!(target: "mirroring", context = ctx, "mirrored operation but local node is in no buddy group");
        return None;
    };
    if !is_primary {
        // the requestor followed a stale mapping; the current primary
        // will bring us back in line
        warn!(target: "mirroring", context = ctx, %group, "received primary traffic while mapped as secondary");
        return None;
    }
    let secondary = app.buddy_mapper.secondary_of(group)?;

    let viable = app
        .target_states
        .get_state(secondary)
        .is_some_and(|s| s.is_online_and_good());
    if !viable {
        // a finished successful resync may simply not have reached the
        // management daemon yet; in that one case the secondary is fine
        if app.resyncer.job_state() != Some(ResyncJobState::Success) {
            set_buddy_needs_resync(app, secondary, ctx).await;
            return None;
        }
    }

    let node = app
        .meta_nodes
        .reference_node(NodeNumId(u32::from(secondary.value())));
    match node {
        Some(node) => Some((node, secondary)),
        None => {
            warn!(target: "mirroring", context = ctx, %secondary, "secondary node unknown");
            set_buddy_needs_resync(app, secondary, ctx).await;
            None
        }
    }
}

async fn forward_to_secondary<M: MirroredOp>(
    app: &Arc<App>,
    op: &M,
    state: &ResponseState,
    hdr: &MsgHeader,
) {
    let ctx = op.mirror_log_context();
    let Some((node, secondary)) = resolve_viable_secondary(app, ctx).await else {
        return;
    };

    let msg = op.forward_msg(state);
    let flags = FLAG_BUDDY_MIRROR_SECOND
        | (hdr.flags & (FLAG_HAS_SEQUENCE_NUMBER | FLAG_IS_SELECTIVE_ACK));
    let meta = FrameMeta::forwarded_from(hdr, flags);

    match node
        .conn_pool()
        .request(&msg, meta, app.request_timeout())
        .await
    {
        Err(e) => {
            // the operation already succeeded here and may have moved
            // state that cannot be rolled back; mark the secondary for
            // resync instead of failing the client operation
            warn!(
                target: "mirroring",
                context = ctx,
                %secondary,
                error = %e,
                "communication with secondary failed, resync will be required"
            );
            set_buddy_needs_resync(app, secondary, ctx).await;
        }
        Ok((_, resp)) => {
            let secondary_result = M::response_result(&resp);
            if secondary_result != state.result {
                // primary and secondary did different things; the
                // secondary may be arbitrarily out of sync now
                warn!(
                    target: "mirroring",
                    context = ctx,
                    %secondary,
                    primary_result = %state.result,
                    secondary_result = %secondary_result,
                    "different results from primary and secondary, setting secondary to needs-resync"
                );
                set_buddy_needs_resync(app, secondary, ctx).await;
            }
        }
    }
}

/// Tell the secondary an operation completed without observable state
/// change so it can retire the sequence slot anyway.
async fn notify_secondary_of_ack(app: &Arc<App>, ctx: &'static str, hdr: &MsgHeader) {
    if app.syncer.resync_in_progress() {
        return;
    }
    let Some((node, secondary)) = resolve_viable_secondary(app, ctx).await else {
        return;
    };

    let flags = FLAG_BUDDY_MIRROR_SECOND
        | (hdr.flags & (FLAG_HAS_SEQUENCE_NUMBER | FLAG_IS_SELECTIVE_ACK));
    let meta = FrameMeta::forwarded_from(hdr, flags);

    let result = node
        .conn_pool()
        .request_expect(
            &AnyMsg::AckNotify(AckNotify),
            meta,
            app.request_timeout(),
            MsgType::AckNotifyResp,
        )
        .await;

    if let Err(e) = result {
        warn!(
            target: "mirroring",
            context = ctx,
            %secondary,
            error = %e,
            "ack notification to secondary failed"
        );
        set_buddy_needs_resync(app, secondary, ctx).await;
    }
}

/// Flag the secondary as needs-resync: locally right away (so the next
/// forward skips it) and at the management daemon. A failed report is
/// remembered and retried by the internode syncer.
pub(crate) async fn set_buddy_needs_resync(app: &Arc<App>, secondary: TargetId, ctx: &str) {
    app.target_states
        .set_consistency(secondary, ConsistencyState::NeedsResync);

    if !report_consistency_to_mgmtd(app, secondary, ConsistencyState::NeedsResync).await {
        warn!(
            target: "mirroring",
            context = ctx,
            %secondary,
            "could not report needs-resync to mgmtd, will retry"
        );
        app.syncer.set_pending_needs_resync(secondary);
    }
}

/// Report a consistency state to the management daemon. An empty
/// old-state list skips the optimistic check (the sender is the
/// group's primary and authoritative about its buddy).
pub(crate) async fn report_consistency_to_mgmtd(
    app: &Arc<App>,
    target: TargetId,
    state: ConsistencyState,
) -> bool {
    let msg = AnyMsg::SetTargetConsistencyStates(SetTargetConsistencyStates {
        node_type: NodeType::Meta,
        targets: vec![target],
        old_states: Vec::new(),
        new_states: vec![state.code()],
        set_online: false,
        ack_id: String::new(),
    });

    match app
        .mgmt_pool
        .request_expect(
            &msg,
            FrameMeta::default(),
            app.request_timeout(),
            MsgType::SetTargetConsistencyStatesResp,
        )
        .await
    {
        Ok((_, AnyMsg::SetTargetConsistencyStatesResp(resp))) => {
            OpsErr::from_code(resp.result).is_success()
        }
        _ => false,
    }
}
