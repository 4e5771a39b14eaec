//! Incoming message dispatch
//!
//! Maps decoded frames onto the mirrored-op engine or the resync /
//! directory handlers. Returns `None` for messages this daemon does
//! not serve; the connection is closed in that case.

use crate::app::App;
use crate::mirror::{
    self, AckNotifyOp, CloseFileOp, FLockOp, MkDirOp, OpenFileOp, RenameOp, RmDirOp, SetAttrOp,
    TruncFileOp,
};
use pairfs_common::types::NodeType;
use pairfs_wire::header::MsgHeader;
use pairfs_wire::msgs::{
    Ack, AnyMsg, GetNodesResp, ResyncEntryResp, ResyncSessionStoreResp, ResyncStartedResp,
    RootInfo,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub async fn dispatch(app: &Arc<App>, hdr: MsgHeader, msg: AnyMsg) -> Option<AnyMsg> {
    match msg {
        // mirrored metadata operations
        AnyMsg::MkDir(m) => Some(mirror::run_mirrored(app, MkDirOp::new(m), &hdr).await),
        AnyMsg::RmDir(m) => Some(mirror::run_mirrored(app, RmDirOp::new(m), &hdr).await),
        AnyMsg::Rename(m) => Some(mirror::run_mirrored(app, RenameOp::new(m), &hdr).await),
        AnyMsg::SetAttr(m) => Some(mirror::run_mirrored(app, SetAttrOp::new(m), &hdr).await),
        AnyMsg::OpenFile(m) => Some(mirror::run_mirrored(app, OpenFileOp::new(m), &hdr).await),
        AnyMsg::CloseFile(m) => {
            Some(mirror::run_mirrored(app, CloseFileOp::new(m), &hdr).await)
        }
        AnyMsg::TruncFile(m) => {
            Some(mirror::run_mirrored(app, TruncFileOp::new(m), &hdr).await)
        }
        AnyMsg::FLock(m) => Some(mirror::run_mirrored(app, FLockOp::new(m), &hdr).await),
        AnyMsg::AckNotify(_) => Some(mirror::run_mirrored(app, AckNotifyOp, &hdr).await),

        // resync traffic from the buddy primary
        AnyMsg::ResyncStarted(m) => {
            info!(primary = %m.primary_node, "buddy resync announced, clearing mirrored sessions");
            app.sessions.clear_all();
            Some(AnyMsg::ResyncStartedResp(ResyncStartedResp {
                result: pairfs_common::OpsErr::Success.code(),
            }))
        }
        AnyMsg::ResyncEntry(m) => {
            let result = app.store.apply_resync_entry(&m);
            Some(AnyMsg::ResyncEntryResp(ResyncEntryResp {
                result: result.code(),
            }))
        }
        AnyMsg::ResyncSessionStore(m) => {
            let result = app.sessions.apply_resync(&m.session_data);
            Some(AnyMsg::ResyncSessionStoreResp(ResyncSessionStoreResp {
                result: result.code(),
            }))
        }

        // directory traffic
        AnyMsg::Heartbeat(hb) => {
            if hb.node_type == NodeType::Meta && !hb.num_id.is_zero() {
                let desc = pairfs_wire::msgs::NodeDesc {
                    node_id: hb.node_id.clone(),
                    num_id: hb.num_id,
                    node_type: hb.node_type,
                    tcp_port: hb.tcp_port,
                    udp_port: hb.udp_port,
                    nics: hb.nics.clone(),
                    feature_flags: hb.feature_flags,
                };
                if let Err(e) = app.meta_nodes.add_or_update_node(&desc) {
                    warn!(node = %hb.node_id, error = %e, "rejected heartbeat");
                }
            }
            Some(AnyMsg::Ack(Ack { ack_id: hb.ack_id }))
        }
        AnyMsg::GetNodes(_) => Some(AnyMsg::GetNodesResp(GetNodesResp {
            nodes: app.meta_nodes.descs(),
            root_info: Some(RootInfo {
                owner: app.local_node_id,
                is_buddy_mirrored: app.buddy_mapper.local_group().is_some(),
            }),
        })),

        other => {
            debug!(msg_type = ?other.msg_type(), "message type not served by the metadata daemon");
            None
        }
    }
}
