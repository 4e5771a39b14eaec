//! Two-node mirroring scenarios over loopback TCP
//!
//! Spins up real metadata daemon cores (primary + secondary) plus a
//! minimal management endpoint, and drives them through the wire
//! protocol exactly like a client would.

use pairfs_common::OpsErr;
use pairfs_common::config::MetaConfig;
use pairfs_common::types::{
    BuddyGroupId, CombinedTargetState, ConsistencyState, ENTRY_FLAG_BUDDYMIRRORED, EntryAttrs,
    EntryId, EntryInfo, EntryOwner, EntryType, NicAddress, NodeNumId, NodeType,
    ReachabilityState, TargetId,
};
use pairfs_meta::{App, ResyncJobState, server};
use pairfs_wire::framing::{self, FrameMeta};
use pairfs_wire::header::{FLAG_HAS_SEQUENCE_NUMBER, MsgHeader, MsgType};
use pairfs_wire::msgs::{
    AnyMsg, BuddyGroupDesc, GenericRespCode, MkDir, NodeDesc, OPEN_CREATE, OpenFile,
    SetAttrResp, SetTargetConsistencyStatesResp, TruncFile,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

const CLIENT_ID: u32 = 301;
const GROUP: BuddyGroupId = BuddyGroupId(1);
const PRIMARY_ID: u32 = 10;
const SECONDARY_ID: u32 = 20;

/// Minimal management endpoint: acknowledges consistency-state reports
/// so the needs-resync path completes without a full mgmtd.
async fn spawn_mock_mgmtd() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                while let Ok((hdr, msg)) = framing::read_msg(&mut stream).await {
                    let resp = match msg {
                        AnyMsg::SetTargetConsistencyStates(_) => {
                            AnyMsg::SetTargetConsistencyStatesResp(
                                SetTargetConsistencyStatesResp {
                                    result: OpsErr::Success.code(),
                                },
                            )
                        }
                        _ => AnyMsg::SetTargetConsistencyStatesResp(
                            SetTargetConsistencyStatesResp {
                                result: OpsErr::Internal.code(),
                            },
                        ),
                    };
                    let meta = FrameMeta {
                        requestor: hdr.requestor,
                        seq: hdr.seq,
                        ..FrameMeta::default()
                    };
                    if framing::write_msg(&mut stream, &resp, meta).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

fn node_desc(num_id: u32, port: u16) -> NodeDesc {
    NodeDesc {
        node_id: format!("meta{num_id}"),
        num_id: NodeNumId(num_id),
        node_type: NodeType::Meta,
        tcp_port: port,
        udp_port: port,
        nics: vec![NicAddress::new("127.0.0.1".parse().unwrap(), "lo")],
        feature_flags: 0,
    }
}

/// Build one daemon core and start serving it on an ephemeral port.
async fn spawn_meta(num_id: u32, mgmtd: SocketAddr) -> (Arc<App>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut cfg = MetaConfig::default();
    cfg.node.name = format!("meta{num_id}");
    cfg.node.num_id = num_id;
    cfg.network.listen = addr.to_string();
    cfg.network.mgmtd_endpoint = mgmtd.to_string();
    cfg.network.request_timeout_secs = 2;

    let app = App::new(cfg).unwrap();
    tokio::spawn(server::serve(app.clone(), listener));
    (app, addr)
}

/// Seed one daemon's directory with the buddy pair.
fn seed_directory(app: &Arc<App>, primary_port: u16, secondary_port: u16) {
    app.meta_nodes
        .add_or_update_node(&node_desc(PRIMARY_ID, primary_port))
        .unwrap();
    app.meta_nodes
        .add_or_update_node(&node_desc(SECONDARY_ID, secondary_port))
        .unwrap();

    app.buddy_mapper.sync_from_list(&[BuddyGroupDesc {
        group_id: GROUP,
        primary: TargetId(PRIMARY_ID as u16),
        secondary: TargetId(SECONDARY_ID as u16),
    }]);

    for target in [TargetId(PRIMARY_ID as u16), TargetId(SECONDARY_ID as u16)] {
        app.target_states.set_state(
            target,
            CombinedTargetState::new(ReachabilityState::Online, ConsistencyState::Good),
        );
    }
}

/// A buddy pair with the secondary initially unreachable (its
/// registered port has no listener).
async fn spawn_pair_with_dead_secondary() -> (Arc<App>, SocketAddr, u16) {
    let mgmtd = spawn_mock_mgmtd().await;
    let (primary, primary_addr) = spawn_meta(PRIMARY_ID, mgmtd).await;

    // reserve a port and drop the listener: connects are refused fast
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);

    seed_directory(&primary, primary_addr.port(), dead_port);
    (primary, primary_addr, dead_port)
}

/// A healthy buddy pair, both serving.
async fn spawn_healthy_pair() -> (Arc<App>, SocketAddr, Arc<App>, SocketAddr) {
    let mgmtd = spawn_mock_mgmtd().await;
    let (primary, primary_addr) = spawn_meta(PRIMARY_ID, mgmtd).await;
    let (secondary, secondary_addr) = spawn_meta(SECONDARY_ID, mgmtd).await;

    seed_directory(&primary, primary_addr.port(), secondary_addr.port());
    seed_directory(&secondary, primary_addr.port(), secondary_addr.port());

    (primary, primary_addr, secondary, secondary_addr)
}

struct Client {
    stream: TcpStream,
    seq: u64,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Self { stream, seq: 0 };
        client.fetch_seq_base().await;
        client
    }

    /// Ask the server for a fresh sequence-number base (seq 0 probe).
    async fn fetch_seq_base(&mut self) {
        let probe = AnyMsg::MkDir(MkDir {
            parent: mirrored_root(),
            name: "probe".to_string(),
            attrs: attrs(),
            new_entry_id: String::new(),
            timestamps: None,
        });
        let meta = FrameMeta {
            flags: FLAG_HAS_SEQUENCE_NUMBER,
            requestor: CLIENT_ID,
            seq: 0,
            seq_done: 0,
        };
        framing::write_msg(&mut self.stream, &probe, meta)
            .await
            .unwrap();
        let (_, resp) = framing::read_msg(&mut self.stream).await.unwrap();
        match resp {
            AnyMsg::GenericResponse(generic)
                if generic.code == GenericRespCode::NewSeqNoBase =>
            {
                self.seq = generic.new_seq_base;
            }
            other => panic!("expected NewSeqNoBase, got {other:?}"),
        }
    }

    /// Send a request under the next sequence number.
    async fn request(&mut self, msg: &AnyMsg) -> (MsgHeader, AnyMsg) {
        self.seq += 1;
        self.request_with_seq(msg, self.seq).await
    }

    async fn request_with_seq(&mut self, msg: &AnyMsg, seq: u64) -> (MsgHeader, AnyMsg) {
        let meta = FrameMeta {
            flags: FLAG_HAS_SEQUENCE_NUMBER,
            requestor: CLIENT_ID,
            seq,
            seq_done: 0,
        };
        framing::write_msg(&mut self.stream, msg, meta)
            .await
            .unwrap();
        framing::read_msg(&mut self.stream).await.unwrap()
    }
}

fn attrs() -> EntryAttrs {
    EntryAttrs {
        mode: 0o755,
        uid: 1000,
        gid: 1000,
        size: 0,
    }
}

fn mirrored_root() -> EntryInfo {
    EntryInfo {
        owner: EntryOwner::Group(GROUP),
        parent_id: EntryId::root(),
        entry_id: EntryId::root(),
        name: String::new(),
        entry_type: EntryType::Directory,
        feature_flags: ENTRY_FLAG_BUDDYMIRRORED,
    }
}

fn mkdir_msg(name: &str) -> AnyMsg {
    AnyMsg::MkDir(MkDir {
        parent: mirrored_root(),
        name: name.to_string(),
        attrs: attrs(),
        new_entry_id: String::new(),
        timestamps: None,
    })
}

async fn wait_for_job_end(app: &Arc<App>) -> ResyncJobState {
    for _ in 0..200 {
        match app.resyncer.job_state() {
            Some(ResyncJobState::Running) | Some(ResyncJobState::NotStarted) | None => {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Some(state) => return state,
        }
    }
    panic!("resync job did not finish in time");
}

#[tokio::test]
async fn test_mirrored_mkdir_converges_on_both_replicas() {
    let (primary, primary_addr, secondary, _) = spawn_healthy_pair().await;
    let mut client = Client::connect(primary_addr).await;

    let (_, resp) = client.request(&mkdir_msg("data")).await;
    let entry = match resp {
        AnyMsg::MkDirResp(resp) => {
            assert_eq!(OpsErr::from_code(resp.result), OpsErr::Success);
            resp.entry.unwrap()
        }
        other => panic!("unexpected response: {other:?}"),
    };

    // both replicas store the identical entry, timestamps included
    let on_primary = primary.store.stat(&entry.entry_id).unwrap();
    let on_secondary = secondary.store.stat(&entry.entry_id).unwrap();
    assert_eq!(on_primary, on_secondary);
    assert_eq!(primary.store.dump(), secondary.store.dump());

    // and the secondary stays good
    assert_eq!(
        primary
            .target_states
            .get_state(TargetId(SECONDARY_ID as u16))
            .unwrap()
            .consistency,
        ConsistencyState::Good
    );
}

#[tokio::test]
async fn test_duplicate_sequence_number_replays_without_reapplying() {
    let (primary, primary_addr, _secondary, _) = spawn_healthy_pair().await;
    let mut client = Client::connect(primary_addr).await;

    let msg = mkdir_msg("once");
    let (_, first) = client.request(&msg).await;
    let first_entry = match first {
        AnyMsg::MkDirResp(resp) => resp.entry.unwrap(),
        other => panic!("unexpected response: {other:?}"),
    };

    // client retransmission with the same sequence number
    let seq = client.seq;
    let (_, replayed) = client.request_with_seq(&msg, seq).await;
    match replayed {
        AnyMsg::MkDirResp(resp) => {
            assert_eq!(OpsErr::from_code(resp.result), OpsErr::Success);
            // same response, not an Exists error from double-applying
            assert_eq!(resp.entry.unwrap(), first_entry);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    assert_eq!(primary.store.list_dir(&EntryId::root()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreachable_secondary_marks_needs_resync_but_op_succeeds() {
    // secondary dies before the forward
    let (primary, primary_addr, _dead_port) = spawn_pair_with_dead_secondary().await;
    let mut client = Client::connect(primary_addr).await;

    let (_, resp) = client.request(&mkdir_msg("survives")).await;
    match resp {
        AnyMsg::MkDirResp(resp) => {
            assert_eq!(OpsErr::from_code(resp.result), OpsErr::Success);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    // the client saw success and the secondary is flagged for resync
    assert!(primary.store.lookup(&EntryId::root(), "survives").is_some());
    assert_eq!(
        primary
            .target_states
            .get_state(TargetId(SECONDARY_ID as u16))
            .unwrap()
            .consistency,
        ConsistencyState::NeedsResync
    );
}

#[tokio::test]
async fn test_resync_restores_secondary_and_flips_state_to_good() {
    // accumulate divergence against a dead buddy, then resync
    let (primary, primary_addr, _dead_port) = spawn_pair_with_dead_secondary().await;
    let mut client = Client::connect(primary_addr).await;

    client.request(&mkdir_msg("lost-1")).await;
    assert_eq!(
        primary
            .target_states
            .get_state(TargetId(SECONDARY_ID as u16))
            .unwrap()
            .consistency,
        ConsistencyState::NeedsResync
    );

    // five more mutations while the buddy is degraded
    for i in 0..3 {
        client.request(&mkdir_msg(&format!("lost-dir-{i}"))).await;
    }
    let (_, resp) = client
        .request(&AnyMsg::OpenFile(OpenFile {
            entry: EntryInfo {
                owner: EntryOwner::Group(GROUP),
                parent_id: EntryId::root(),
                entry_id: EntryId::root(),
                name: "lost-file".to_string(),
                entry_type: EntryType::File,
                feature_flags: ENTRY_FLAG_BUDDYMIRRORED,
            },
            access_flags: OPEN_CREATE,
            handle_id: String::new(),
            new_entry_id: String::new(),
            timestamps: None,
        }))
        .await;
    let AnyMsg::OpenFileResp(open_resp) = resp else {
        panic!("unexpected response: {resp:?}");
    };
    assert_eq!(OpsErr::from_code(open_resp.result), OpsErr::Success);

    let (file_id, _) = primary
        .store
        .lookup(&EntryId::root(), "lost-file")
        .unwrap();
    client
        .request(&AnyMsg::TruncFile(TruncFile {
            entry: EntryInfo {
                owner: EntryOwner::Group(GROUP),
                parent_id: EntryId::root(),
                entry_id: file_id,
                name: "lost-file".to_string(),
                entry_type: EntryType::File,
                feature_flags: ENTRY_FLAG_BUDDYMIRRORED,
            },
            size: 8192,
            timestamps: None,
        }))
        .await;

    // the secondary comes back on its registered port
    let secondary_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let secondary_addr = secondary_listener.local_addr().unwrap();
    let mut cfg = MetaConfig::default();
    cfg.node.name = "meta20".to_string();
    cfg.node.num_id = SECONDARY_ID;
    cfg.network.listen = secondary_addr.to_string();
    cfg.network.request_timeout_secs = 2;
    let secondary = App::new(cfg).unwrap();
    tokio::spawn(server::serve(secondary.clone(), secondary_listener));

    primary
        .meta_nodes
        .add_or_update_node(&node_desc(SECONDARY_ID, secondary_addr.port()))
        .unwrap();
    primary.target_states.set_reachability(
        TargetId(SECONDARY_ID as u16),
        ReachabilityState::Online,
    );

    assert_eq!(primary.resyncer.start(&primary), OpsErr::Success);
    assert_eq!(wait_for_job_end(&primary).await, ResyncJobState::Success);

    // consistency restored, and a listing of the secondary matches the
    // primary exactly
    assert_eq!(
        primary
            .target_states
            .get_state(TargetId(SECONDARY_ID as u16))
            .unwrap()
            .consistency,
        ConsistencyState::Good
    );
    assert_eq!(primary.store.dump(), secondary.store.dump());

    let stats = primary.resyncer.current_job().unwrap().stats();
    assert_eq!(stats.errors, 0);
    assert!(stats.dirs_synced >= 4);
    assert!(stats.files_synced >= 1);

    // session table was streamed wholesale
    assert_eq!(secondary.sessions.len(), primary.sessions.len());
}

#[tokio::test]
async fn test_second_resync_while_running_returns_inuse() {
    let (primary, _primary_addr, _dead) = spawn_pair_with_dead_secondary().await;
    primary.target_states.set_consistency(
        TargetId(SECONDARY_ID as u16),
        ConsistencyState::NeedsResync,
    );

    assert_eq!(primary.resyncer.start(&primary), OpsErr::Success);
    // the fresh job occupies the resyncer before it even runs
    assert_eq!(primary.resyncer.start(&primary), OpsErr::InUse);

    // with the secondary unreachable this run ends in failure and the
    // state stays needs-resync
    assert_eq!(wait_for_job_end(&primary).await, ResyncJobState::Failure);
    assert_eq!(
        primary
            .target_states
            .get_state(TargetId(SECONDARY_ID as u16))
            .unwrap()
            .consistency,
        ConsistencyState::NeedsResync
    );
}

#[tokio::test]
async fn test_writes_during_resync_reach_the_secondary() {
    // a mutation racing the walk must still be replayed
    let (primary, primary_addr, secondary, _) = spawn_healthy_pair().await;
    let mut client = Client::connect(primary_addr).await;

    for i in 0..20 {
        client.request(&mkdir_msg(&format!("pre-{i}"))).await;
    }

    primary.target_states.set_consistency(
        TargetId(SECONDARY_ID as u16),
        ConsistencyState::NeedsResync,
    );
    assert_eq!(primary.resyncer.start(&primary), OpsErr::Success);

    // mutations while the job is running land in the change-set queue
    for i in 0..5 {
        client.request(&mkdir_msg(&format!("during-{i}"))).await;
    }

    assert_eq!(wait_for_job_end(&primary).await, ResyncJobState::Success);
    assert_eq!(primary.store.dump(), secondary.store.dump());
}

#[tokio::test]
async fn test_result_mismatch_marks_secondary_needs_resync() {
    // structural divergence: the secondary cannot apply the forward
    let (primary, primary_addr, secondary, _) = spawn_healthy_pair().await;

    // plant a conflicting entry directly on the secondary
    secondary
        .store
        .mkdir(&EntryId::root(), "conflict", attrs(), None, None)
        .unwrap();

    let mut client = Client::connect(primary_addr).await;
    let (_, resp) = client.request(&mkdir_msg("conflict")).await;

    // the primary's result stands for the client
    match resp {
        AnyMsg::MkDirResp(resp) => {
            assert_eq!(OpsErr::from_code(resp.result), OpsErr::Success);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    assert_eq!(
        primary
            .target_states
            .get_state(TargetId(SECONDARY_ID as u16))
            .unwrap()
            .consistency,
        ConsistencyState::NeedsResync
    );
}

#[tokio::test]
async fn test_non_mirrored_op_skips_sequence_machinery() {
    let (_, primary_addr, _, _) = spawn_healthy_pair().await;

    // unmirrored parent info: plain execution, no NewSeqNoBase dance
    let mut stream = TcpStream::connect(primary_addr).await.unwrap();
    let msg = AnyMsg::MkDir(MkDir {
        parent: EntryInfo {
            owner: EntryOwner::Node(NodeNumId(PRIMARY_ID)),
            parent_id: EntryId::root(),
            entry_id: EntryId::root(),
            name: String::new(),
            entry_type: EntryType::Directory,
            feature_flags: 0,
        },
        name: "plain".to_string(),
        attrs: attrs(),
        new_entry_id: String::new(),
        timestamps: None,
    });
    framing::write_msg(&mut stream, &msg, FrameMeta::default())
        .await
        .unwrap();
    let (hdr, resp) = framing::read_msg(&mut stream).await.unwrap();
    assert_eq!(hdr.msg_type, MsgType::MkDirResp);
    match resp {
        AnyMsg::MkDirResp(resp) => {
            assert_eq!(OpsErr::from_code(resp.result), OpsErr::Success);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn test_setattr_converges_attributes() {
    let (primary, primary_addr, secondary, _) = spawn_healthy_pair().await;
    let mut client = Client::connect(primary_addr).await;

    let (_, resp) = client.request(&mkdir_msg("styled")).await;
    let AnyMsg::MkDirResp(resp) = resp else {
        panic!("unexpected response: {resp:?}");
    };
    let entry = resp.entry.unwrap();

    let (_, resp) = client
        .request(&AnyMsg::SetAttr(pairfs_wire::msgs::SetAttr {
            entry: entry.clone(),
            attrs: EntryAttrs {
                mode: 0o700,
                uid: 42,
                gid: 42,
                size: 0,
            },
            valid: pairfs_wire::msgs::SETATTR_MODE | pairfs_wire::msgs::SETATTR_UID,
            timestamps: None,
        }))
        .await;
    match resp {
        AnyMsg::SetAttrResp(SetAttrResp { result }) => {
            assert_eq!(OpsErr::from_code(result), OpsErr::Success);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let on_primary = primary.store.stat(&entry.entry_id).unwrap();
    let on_secondary = secondary.store.stat(&entry.entry_id).unwrap();
    assert_eq!(on_primary, on_secondary);
    assert_eq!(on_primary.0.mode, 0o700);
    assert_eq!(on_primary.0.uid, 42);
}
