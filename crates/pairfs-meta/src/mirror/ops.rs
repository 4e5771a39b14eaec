//! Concrete mirrored operations
//!
//! Each operation wraps its wire message and implements the
//! `MirroredOp` capability: how to lock, how to execute against the
//! local stores, what the augmented forwarded copy looks like, and how
//! to read the secondary's result out of its response.
//!
//! Lock acquisition order (see `locks`): directory ID, then
//! parent+name, then file ID. Operations touching two directories take
//! both directory locks in entry-ID order.

use crate::app::App;
use crate::candidates::SyncCandidate;
use crate::locks::{EntryLockState, EntryLockStore};
use crate::session::OpenFileHandle;
use pairfs_common::OpsErr;
use pairfs_common::types::{EntryId, EntryInfo, EntryType, NodeNumId, Timestamps};
use pairfs_wire::msgs::{
    AckNotify, AckNotifyResp, AnyMsg, CloseFile, CloseFileResp, FLock, FLockResp, MkDir,
    MkDirResp, OpenFile, OpenFileResp, Rename, RenameResp, RmDir, RmDirResp, SetAttr,
    SetAttrResp, TruncFile, TruncFileResp,
};
use uuid::Uuid;

/// Outcome of local execution, captured for forwarding, slot storage
/// and the final response.
pub struct ResponseState {
    pub result: OpsErr,
    pub response: AnyMsg,
    /// False when the operation changed nothing observable (errors,
    /// no-op locks); such operations are acked, not forwarded.
    pub changes_state: bool,
    /// Change-set entries queued for the resync job when a resync is
    /// running while this op executes on the primary.
    pub candidates: Vec<SyncCandidate>,
}

impl ResponseState {
    fn ok(response: AnyMsg, candidates: Vec<SyncCandidate>) -> Self {
        Self {
            result: OpsErr::Success,
            response,
            changes_state: true,
            candidates,
        }
    }

    fn failed(result: OpsErr, response: AnyMsg) -> Self {
        Self {
            result,
            response,
            changes_state: false,
            candidates: Vec::new(),
        }
    }
}

/// Capability interface of a mirrored operation; implemented by the
/// op structs via composition instead of a message class hierarchy.
pub trait MirroredOp: Send + Sync {
    fn is_mirrored(&self) -> bool;

    /// Tag for the dedicated mirror log context.
    fn mirror_log_context(&self) -> &'static str;

    /// Acquire the entry locks this operation needs, in the documented
    /// order. Fails fast with `Interrupted` during shutdown.
    fn lock(
        &self,
        locks: &EntryLockStore,
    ) -> impl Future<Output = Result<EntryLockState, OpsErr>> + Send;

    /// Run the actual mutation. On the primary this also augments the
    /// wrapped message (generated IDs, resolved timestamps) for
    /// forwarding.
    fn execute_locally(
        &mut self,
        app: &App,
        requestor: NodeNumId,
        is_secondary: bool,
    ) -> ResponseState;

    /// The augmented copy to send to the secondary.
    fn forward_msg(&self, state: &ResponseState) -> AnyMsg;

    /// Extract the result code from the secondary's response; anything
    /// unrecognizable counts as a communication failure.
    fn response_result(resp: &AnyMsg) -> OpsErr
    where
        Self: Sized;
}

fn candidate(
    entry_id: &EntryId,
    parent_id: &EntryId,
    name: &str,
    entry_type: EntryType,
    deleted: bool,
) -> SyncCandidate {
    SyncCandidate {
        entry_id: entry_id.clone(),
        parent_id: parent_id.clone(),
        name: name.to_string(),
        entry_type,
        deleted,
    }
}

/// Self-referencing candidate for a directory whose own attributes or
/// timestamps changed (typically a parent after a child mutation).
fn touched_dir(info: &EntryInfo) -> SyncCandidate {
    candidate(
        &info.entry_id,
        &info.parent_id,
        &info.name,
        EntryType::Directory,
        false,
    )
}

fn forced_ts(msg_ts: Option<Timestamps>, is_secondary: bool) -> Option<Timestamps> {
    if is_secondary { msg_ts } else { None }
}

/// Parse a primary-chosen entry ID carried by a forwarded message.
fn forced_id(raw: &str, is_secondary: bool) -> Result<Option<EntryId>, OpsErr> {
    if !is_secondary || raw.is_empty() {
        return Ok(None);
    }
    EntryId::parse(raw).map(Some).map_err(|_| OpsErr::InvalidArg)
}

fn keep_ts(app: &App, ts: Timestamps) -> Option<Timestamps> {
    app.cfg.tuning.mirror_timestamps.then_some(ts)
}

// ── mkdir ─────────────────────────────────────────────────────────────

pub struct MkDirOp {
    msg: MkDir,
}

impl MkDirOp {
    #[must_use]
    pub fn new(msg: MkDir) -> Self {
        Self { msg }
    }
}

impl MirroredOp for MkDirOp {
    fn is_mirrored(&self) -> bool {
        self.msg.parent.is_buddy_mirrored()
    }

    fn mirror_log_context(&self) -> &'static str {
        "mkdir"
    }

    async fn lock(&self, locks: &EntryLockStore) -> Result<EntryLockState, OpsErr> {
        let mut state = EntryLockState::new();
        state.push(locks.lock_dir(&self.msg.parent.entry_id, true).await?);
        state.push(
            locks
                .lock_name(&self.msg.parent.entry_id, &self.msg.name)
                .await?,
        );
        Ok(state)
    }

    fn execute_locally(
        &mut self,
        app: &App,
        _requestor: NodeNumId,
        is_secondary: bool,
    ) -> ResponseState {
        let fail = |result: OpsErr| {
            ResponseState::failed(
                result,
                AnyMsg::MkDirResp(MkDirResp {
                    result: result.code(),
                    entry: None,
                }),
            )
        };

        let forced_id = match forced_id(&self.msg.new_entry_id, is_secondary) {
            Ok(id) => id,
            Err(e) => return fail(e),
        };

        match app.store.mkdir(
            &self.msg.parent.entry_id,
            &self.msg.name,
            self.msg.attrs,
            forced_id,
            forced_ts(self.msg.timestamps, is_secondary),
        ) {
            Ok((entry_id, ts)) => {
                if !is_secondary {
                    self.msg.new_entry_id = entry_id.as_str().to_string();
                    self.msg.timestamps = keep_ts(app, ts);
                }

                let entry = EntryInfo {
                    owner: self.msg.parent.owner,
                    parent_id: self.msg.parent.entry_id.clone(),
                    entry_id: entry_id.clone(),
                    name: self.msg.name.clone(),
                    entry_type: EntryType::Directory,
                    feature_flags: self.msg.parent.feature_flags,
                };

                ResponseState::ok(
                    AnyMsg::MkDirResp(MkDirResp {
                        result: OpsErr::Success.code(),
                        entry: Some(entry),
                    }),
                    vec![
                        candidate(
                            &entry_id,
                            &self.msg.parent.entry_id,
                            &self.msg.name,
                            EntryType::Directory,
                            false,
                        ),
                        touched_dir(&self.msg.parent),
                    ],
                )
            }
            Err(e) => fail(e),
        }
    }

    fn forward_msg(&self, _state: &ResponseState) -> AnyMsg {
        AnyMsg::MkDir(self.msg.clone())
    }

    fn response_result(resp: &AnyMsg) -> OpsErr {
        match resp {
            AnyMsg::MkDirResp(r) => OpsErr::from_code(r.result),
            _ => OpsErr::Communication,
        }
    }
}

// ── rmdir ─────────────────────────────────────────────────────────────

pub struct RmDirOp {
    msg: RmDir,
}

impl RmDirOp {
    #[must_use]
    pub fn new(msg: RmDir) -> Self {
        Self { msg }
    }
}

impl MirroredOp for RmDirOp {
    fn is_mirrored(&self) -> bool {
        self.msg.parent.is_buddy_mirrored()
    }

    fn mirror_log_context(&self) -> &'static str {
        "rmdir"
    }

    async fn lock(&self, locks: &EntryLockStore) -> Result<EntryLockState, OpsErr> {
        let mut state = EntryLockState::new();
        state.push(locks.lock_dir(&self.msg.parent.entry_id, true).await?);
        state.push(
            locks
                .lock_name(&self.msg.parent.entry_id, &self.msg.name)
                .await?,
        );
        Ok(state)
    }

    fn execute_locally(
        &mut self,
        app: &App,
        _requestor: NodeNumId,
        is_secondary: bool,
    ) -> ResponseState {
        match app.store.rmdir(
            &self.msg.parent.entry_id,
            &self.msg.name,
            forced_ts(self.msg.timestamps, is_secondary),
        ) {
            Ok((removed_id, ts)) => {
                if !is_secondary {
                    self.msg.timestamps = keep_ts(app, ts);
                }
                ResponseState::ok(
                    AnyMsg::RmDirResp(RmDirResp {
                        result: OpsErr::Success.code(),
                    }),
                    vec![
                        candidate(
                            &removed_id,
                            &self.msg.parent.entry_id,
                            &self.msg.name,
                            EntryType::Directory,
                            true,
                        ),
                        touched_dir(&self.msg.parent),
                    ],
                )
            }
            Err(e) => ResponseState::failed(
                e,
                AnyMsg::RmDirResp(RmDirResp { result: e.code() }),
            ),
        }
    }

    fn forward_msg(&self, _state: &ResponseState) -> AnyMsg {
        AnyMsg::RmDir(self.msg.clone())
    }

    fn response_result(resp: &AnyMsg) -> OpsErr {
        match resp {
            AnyMsg::RmDirResp(r) => OpsErr::from_code(r.result),
            _ => OpsErr::Communication,
        }
    }
}

// ── rename ────────────────────────────────────────────────────────────

pub struct RenameOp {
    msg: Rename,
}

impl RenameOp {
    #[must_use]
    pub fn new(msg: Rename) -> Self {
        Self { msg }
    }
}

impl MirroredOp for RenameOp {
    fn is_mirrored(&self) -> bool {
        self.msg.from_parent.is_buddy_mirrored()
    }

    fn mirror_log_context(&self) -> &'static str {
        "rename"
    }

    async fn lock(&self, locks: &EntryLockStore) -> Result<EntryLockState, OpsErr> {
        let mut state = EntryLockState::new();

        let from = &self.msg.from_parent.entry_id;
        let to = &self.msg.to_parent.entry_id;

        // both directory locks in entry-ID order; one lock if same dir
        if from == to {
            state.push(locks.lock_dir(from, true).await?);
        } else if from < to {
            state.push(locks.lock_dir(from, true).await?);
            state.push(locks.lock_dir(to, true).await?);
        } else {
            state.push(locks.lock_dir(to, true).await?);
            state.push(locks.lock_dir(from, true).await?);
        }

        // name locks, also in stable order
        let old_key = (from, self.msg.old_name.as_str());
        let new_key = (to, self.msg.new_name.as_str());
        if old_key == new_key {
            state.push(locks.lock_name(from, &self.msg.old_name).await?);
        } else if old_key < new_key {
            state.push(locks.lock_name(from, &self.msg.old_name).await?);
            state.push(locks.lock_name(to, &self.msg.new_name).await?);
        } else {
            state.push(locks.lock_name(to, &self.msg.new_name).await?);
            state.push(locks.lock_name(from, &self.msg.old_name).await?);
        }

        Ok(state)
    }

    fn execute_locally(
        &mut self,
        app: &App,
        _requestor: NodeNumId,
        is_secondary: bool,
    ) -> ResponseState {
        match app.store.rename(
            &self.msg.from_parent.entry_id,
            &self.msg.old_name,
            &self.msg.to_parent.entry_id,
            &self.msg.new_name,
            forced_ts(self.msg.timestamps, is_secondary),
        ) {
            Ok((moved_id, ts)) => {
                if !is_secondary {
                    self.msg.timestamps = keep_ts(app, ts);
                }

                let moved_type = app
                    .store
                    .stat(&moved_id)
                    .map_or(EntryType::File, |(_, _, t)| t);

                let mut candidates = vec![
                    candidate(
                        &moved_id,
                        &self.msg.to_parent.entry_id,
                        &self.msg.new_name,
                        moved_type,
                        false,
                    ),
                    touched_dir(&self.msg.from_parent),
                ];
                if self.msg.to_parent.entry_id != self.msg.from_parent.entry_id {
                    candidates.push(touched_dir(&self.msg.to_parent));
                }

                ResponseState::ok(
                    AnyMsg::RenameResp(RenameResp {
                        result: OpsErr::Success.code(),
                    }),
                    candidates,
                )
            }
            Err(e) => ResponseState::failed(
                e,
                AnyMsg::RenameResp(RenameResp { result: e.code() }),
            ),
        }
    }

    fn forward_msg(&self, _state: &ResponseState) -> AnyMsg {
        AnyMsg::Rename(self.msg.clone())
    }

    fn response_result(resp: &AnyMsg) -> OpsErr {
        match resp {
            AnyMsg::RenameResp(r) => OpsErr::from_code(r.result),
            _ => OpsErr::Communication,
        }
    }
}

// ── setattr ───────────────────────────────────────────────────────────

pub struct SetAttrOp {
    msg: SetAttr,
}

impl SetAttrOp {
    #[must_use]
    pub fn new(msg: SetAttr) -> Self {
        Self { msg }
    }
}

impl MirroredOp for SetAttrOp {
    fn is_mirrored(&self) -> bool {
        self.msg.entry.is_buddy_mirrored()
    }

    fn mirror_log_context(&self) -> &'static str {
        "setattr"
    }

    async fn lock(&self, locks: &EntryLockStore) -> Result<EntryLockState, OpsErr> {
        let mut state = EntryLockState::new();
        match self.msg.entry.entry_type {
            EntryType::Directory => {
                state.push(locks.lock_dir(&self.msg.entry.entry_id, true).await?);
            }
            EntryType::File => {
                state.push(locks.lock_file(&self.msg.entry.entry_id).await?);
            }
        }
        Ok(state)
    }

    fn execute_locally(
        &mut self,
        app: &App,
        _requestor: NodeNumId,
        is_secondary: bool,
    ) -> ResponseState {
        match app.store.set_attr(
            &self.msg.entry.entry_id,
            &self.msg.attrs,
            self.msg.valid,
            forced_ts(self.msg.timestamps, is_secondary),
        ) {
            Ok(ts) => {
                if !is_secondary {
                    self.msg.timestamps = keep_ts(app, ts);
                }
                ResponseState::ok(
                    AnyMsg::SetAttrResp(SetAttrResp {
                        result: OpsErr::Success.code(),
                    }),
                    vec![candidate(
                        &self.msg.entry.entry_id,
                        &self.msg.entry.parent_id,
                        &self.msg.entry.name,
                        self.msg.entry.entry_type,
                        false,
                    )],
                )
            }
            Err(e) => ResponseState::failed(
                e,
                AnyMsg::SetAttrResp(SetAttrResp { result: e.code() }),
            ),
        }
    }

    fn forward_msg(&self, _state: &ResponseState) -> AnyMsg {
        AnyMsg::SetAttr(self.msg.clone())
    }

    fn response_result(resp: &AnyMsg) -> OpsErr {
        match resp {
            AnyMsg::SetAttrResp(r) => OpsErr::from_code(r.result),
            _ => OpsErr::Communication,
        }
    }
}

// ── open ──────────────────────────────────────────────────────────────

pub struct OpenFileOp {
    msg: OpenFile,
}

impl OpenFileOp {
    #[must_use]
    pub fn new(msg: OpenFile) -> Self {
        Self { msg }
    }
}

impl MirroredOp for OpenFileOp {
    fn is_mirrored(&self) -> bool {
        self.msg.entry.is_buddy_mirrored()
    }

    fn mirror_log_context(&self) -> &'static str {
        "open"
    }

    async fn lock(&self, locks: &EntryLockStore) -> Result<EntryLockState, OpsErr> {
        let mut state = EntryLockState::new();
        state.push(locks.lock_dir(&self.msg.entry.parent_id, true).await?);
        state.push(
            locks
                .lock_name(&self.msg.entry.parent_id, &self.msg.entry.name)
                .await?,
        );
        Ok(state)
    }

    fn execute_locally(
        &mut self,
        app: &App,
        requestor: NodeNumId,
        is_secondary: bool,
    ) -> ResponseState {
        let fail = |result: OpsErr| {
            ResponseState::failed(
                result,
                AnyMsg::OpenFileResp(OpenFileResp {
                    result: result.code(),
                    handle_id: String::new(),
                }),
            )
        };

        let forced_id = match forced_id(&self.msg.new_entry_id, is_secondary) {
            Ok(id) => id,
            Err(e) => return fail(e),
        };

        match app.store.open_file(
            &self.msg.entry.parent_id,
            &self.msg.entry.name,
            self.msg.access_flags,
            forced_id,
            forced_ts(self.msg.timestamps, is_secondary),
        ) {
            Ok((entry_id, ts, created)) => {
                let handle_id = if is_secondary {
                    self.msg.handle_id.clone()
                } else {
                    format!("fh-{}", Uuid::new_v4().as_simple())
                };
                if handle_id.is_empty() {
                    return fail(OpsErr::InvalidArg);
                }

                let session = app.sessions.reference_session(requestor);
                session.lock().open_files.insert(
                    handle_id.clone(),
                    OpenFileHandle {
                        entry_id: entry_id.clone(),
                        access_flags: self.msg.access_flags,
                    },
                );

                if !is_secondary {
                    self.msg.handle_id = handle_id.clone();
                    if created {
                        self.msg.new_entry_id = entry_id.as_str().to_string();
                    }
                    self.msg.timestamps = keep_ts(app, ts);
                }

                let mut candidates = vec![candidate(
                    &entry_id,
                    &self.msg.entry.parent_id,
                    &self.msg.entry.name,
                    EntryType::File,
                    false,
                )];
                if created {
                    candidates.push(SyncCandidate {
                        entry_id: self.msg.entry.parent_id.clone(),
                        parent_id: self.msg.entry.parent_id.clone(),
                        name: String::new(),
                        entry_type: EntryType::Directory,
                        deleted: false,
                    });
                }

                ResponseState::ok(
                    AnyMsg::OpenFileResp(OpenFileResp {
                        result: OpsErr::Success.code(),
                        handle_id,
                    }),
                    candidates,
                )
            }
            Err(e) => fail(e),
        }
    }

    fn forward_msg(&self, _state: &ResponseState) -> AnyMsg {
        AnyMsg::OpenFile(self.msg.clone())
    }

    fn response_result(resp: &AnyMsg) -> OpsErr {
        match resp {
            AnyMsg::OpenFileResp(r) => OpsErr::from_code(r.result),
            _ => OpsErr::Communication,
        }
    }
}

// ── close ─────────────────────────────────────────────────────────────

pub struct CloseFileOp {
    msg: CloseFile,
}

impl CloseFileOp {
    #[must_use]
    pub fn new(msg: CloseFile) -> Self {
        Self { msg }
    }
}

impl MirroredOp for CloseFileOp {
    fn is_mirrored(&self) -> bool {
        self.msg.entry.is_buddy_mirrored()
    }

    fn mirror_log_context(&self) -> &'static str {
        "close"
    }

    async fn lock(&self, locks: &EntryLockStore) -> Result<EntryLockState, OpsErr> {
        let mut state = EntryLockState::new();
        state.push(locks.lock_file(&self.msg.entry.entry_id).await?);
        Ok(state)
    }

    fn execute_locally(
        &mut self,
        app: &App,
        requestor: NodeNumId,
        _is_secondary: bool,
    ) -> ResponseState {
        let session = app.sessions.reference_session(requestor);
        let removed = session.lock().open_files.remove(&self.msg.handle_id);

        match removed {
            Some(open) => {
                app.store
                    .release_locks_for_handle(&open.entry_id, &self.msg.handle_id);
                ResponseState::ok(
                    AnyMsg::CloseFileResp(CloseFileResp {
                        result: OpsErr::Success.code(),
                    }),
                    Vec::new(),
                )
            }
            None => ResponseState::failed(
                OpsErr::NotOwner,
                AnyMsg::CloseFileResp(CloseFileResp {
                    result: OpsErr::NotOwner.code(),
                }),
            ),
        }
    }

    fn forward_msg(&self, _state: &ResponseState) -> AnyMsg {
        AnyMsg::CloseFile(self.msg.clone())
    }

    fn response_result(resp: &AnyMsg) -> OpsErr {
        match resp {
            AnyMsg::CloseFileResp(r) => OpsErr::from_code(r.result),
            _ => OpsErr::Communication,
        }
    }
}

// ── trunc ─────────────────────────────────────────────────────────────

pub struct TruncFileOp {
    msg: TruncFile,
}

impl TruncFileOp {
    #[must_use]
    pub fn new(msg: TruncFile) -> Self {
        Self { msg }
    }
}

impl MirroredOp for TruncFileOp {
    fn is_mirrored(&self) -> bool {
        self.msg.entry.is_buddy_mirrored()
    }

    fn mirror_log_context(&self) -> &'static str {
        "trunc"
    }

    async fn lock(&self, locks: &EntryLockStore) -> Result<EntryLockState, OpsErr> {
        let mut state = EntryLockState::new();
        state.push(locks.lock_file(&self.msg.entry.entry_id).await?);
        Ok(state)
    }

    fn execute_locally(
        &mut self,
        app: &App,
        _requestor: NodeNumId,
        is_secondary: bool,
    ) -> ResponseState {
        match app.store.truncate(
            &self.msg.entry.entry_id,
            self.msg.size,
            forced_ts(self.msg.timestamps, is_secondary),
        ) {
            Ok(ts) => {
                if !is_secondary {
                    self.msg.timestamps = keep_ts(app, ts);
                }
                ResponseState::ok(
                    AnyMsg::TruncFileResp(TruncFileResp {
                        result: OpsErr::Success.code(),
                    }),
                    vec![candidate(
                        &self.msg.entry.entry_id,
                        &self.msg.entry.parent_id,
                        &self.msg.entry.name,
                        EntryType::File,
                        false,
                    )],
                )
            }
            Err(e) => ResponseState::failed(
                e,
                AnyMsg::TruncFileResp(TruncFileResp { result: e.code() }),
            ),
        }
    }

    fn forward_msg(&self, _state: &ResponseState) -> AnyMsg {
        AnyMsg::TruncFile(self.msg.clone())
    }

    fn response_result(resp: &AnyMsg) -> OpsErr {
        match resp {
            AnyMsg::TruncFileResp(r) => OpsErr::from_code(r.result),
            _ => OpsErr::Communication,
        }
    }
}

// ── flock ─────────────────────────────────────────────────────────────

pub struct FLockOp {
    msg: FLock,
}

impl FLockOp {
    #[must_use]
    pub fn new(msg: FLock) -> Self {
        Self { msg }
    }
}

impl MirroredOp for FLockOp {
    fn is_mirrored(&self) -> bool {
        self.msg.entry.is_buddy_mirrored()
    }

    fn mirror_log_context(&self) -> &'static str {
        "flock"
    }

    async fn lock(&self, locks: &EntryLockStore) -> Result<EntryLockState, OpsErr> {
        let mut state = EntryLockState::new();
        state.push(locks.lock_file(&self.msg.entry.entry_id).await?);
        Ok(state)
    }

    fn execute_locally(
        &mut self,
        app: &App,
        _requestor: NodeNumId,
        _is_secondary: bool,
    ) -> ResponseState {
        let result = app.store.flock(
            &self.msg.entry.entry_id,
            &self.msg.handle_id,
            self.msg.client,
            self.msg.lock_type,
        );

        let response = AnyMsg::FLockResp(FLockResp {
            result: result.code(),
        });
        if result.is_success() {
            // lock-table changes are observable and must reach the
            // secondary, but they are session state, not tree state
            ResponseState::ok(response, Vec::new())
        } else {
            ResponseState::failed(result, response)
        }
    }

    fn forward_msg(&self, _state: &ResponseState) -> AnyMsg {
        AnyMsg::FLock(self.msg.clone())
    }

    fn response_result(resp: &AnyMsg) -> OpsErr {
        match resp {
            AnyMsg::FLockResp(r) => OpsErr::from_code(r.result),
            _ => OpsErr::Communication,
        }
    }
}

// ── ack notify ────────────────────────────────────────────────────────

/// No-op mirrored message: exists so a sequence slot can be retired on
/// the secondary through the ordinary dedup machinery.
pub struct AckNotifyOp;

impl MirroredOp for AckNotifyOp {
    fn is_mirrored(&self) -> bool {
        true
    }

    fn mirror_log_context(&self) -> &'static str {
        "ack-notify"
    }

    async fn lock(&self, _locks: &EntryLockStore) -> Result<EntryLockState, OpsErr> {
        Ok(EntryLockState::new())
    }

    fn execute_locally(
        &mut self,
        _app: &App,
        _requestor: NodeNumId,
        _is_secondary: bool,
    ) -> ResponseState {
        ResponseState {
            result: OpsErr::Success,
            response: AnyMsg::AckNotifyResp(AckNotifyResp {
                result: OpsErr::Success.code(),
            }),
            changes_state: false,
            candidates: Vec::new(),
        }
    }

    fn forward_msg(&self, _state: &ResponseState) -> AnyMsg {
        AnyMsg::AckNotify(AckNotify)
    }

    fn response_result(resp: &AnyMsg) -> OpsErr {
        match resp {
            AnyMsg::AckNotifyResp(r) => OpsErr::from_code(r.result),
            _ => OpsErr::Communication,
        }
    }
}
