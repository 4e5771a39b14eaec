//! Typed message payloads
//!
//! `AnyMsg` is the tagged union of every payload the protocol knows.
//! Handlers match on the variant; the framing layer maps it to and from
//! the header's message-type field.

mod meta;
mod nodes;
mod resync;

pub use meta::*;
pub use nodes::*;
pub use resync::*;

use crate::error::WireError;
use crate::header::MsgType;
use bytes::{Bytes, BytesMut};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnyMsg {
    Heartbeat(Heartbeat),
    Ack(Ack),
    RemoveNode(RemoveNode),
    GetNodes(GetNodes),
    GetNodesResp(GetNodesResp),
    MapTargets(MapTargets),
    MapTargetsResp(MapTargetsResp),
    GetTargetMappings(GetTargetMappings),
    GetTargetMappingsResp(GetTargetMappingsResp),
    GetTargetStates(GetTargetStates),
    GetTargetStatesResp(GetTargetStatesResp),
    SetTargetConsistencyStates(SetTargetConsistencyStates),
    SetTargetConsistencyStatesResp(SetTargetConsistencyStatesResp),
    SetMirrorBuddyGroup(SetMirrorBuddyGroup),
    SetMirrorBuddyGroupResp(SetMirrorBuddyGroupResp),
    GetMirrorBuddyGroups(GetMirrorBuddyGroups),
    GetMirrorBuddyGroupsResp(GetMirrorBuddyGroupsResp),
    GenericResponse(GenericResponse),

    MkDir(MkDir),
    MkDirResp(MkDirResp),
    RmDir(RmDir),
    RmDirResp(RmDirResp),
    Rename(Rename),
    RenameResp(RenameResp),
    SetAttr(SetAttr),
    SetAttrResp(SetAttrResp),
    OpenFile(OpenFile),
    OpenFileResp(OpenFileResp),
    CloseFile(CloseFile),
    CloseFileResp(CloseFileResp),
    TruncFile(TruncFile),
    TruncFileResp(TruncFileResp),
    FLock(FLock),
    FLockResp(FLockResp),
    AckNotify(AckNotify),
    AckNotifyResp(AckNotifyResp),

    ResyncEntry(ResyncEntry),
    ResyncEntryResp(ResyncEntryResp),
    ResyncSessionStore(ResyncSessionStore),
    ResyncSessionStoreResp(ResyncSessionStoreResp),
    ResyncStarted(ResyncStarted),
    ResyncStartedResp(ResyncStartedResp),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            AnyMsg::Heartbeat($inner) => $body,
            AnyMsg::Ack($inner) => $body,
            AnyMsg::RemoveNode($inner) => $body,
            AnyMsg::GetNodes($inner) => $body,
            AnyMsg::GetNodesResp($inner) => $body,
            AnyMsg::MapTargets($inner) => $body,
            AnyMsg::MapTargetsResp($inner) => $body,
            AnyMsg::GetTargetMappings($inner) => $body,
            AnyMsg::GetTargetMappingsResp($inner) => $body,
            AnyMsg::GetTargetStates($inner) => $body,
            AnyMsg::GetTargetStatesResp($inner) => $body,
            AnyMsg::SetTargetConsistencyStates($inner) => $body,
            AnyMsg::SetTargetConsistencyStatesResp($inner) => $body,
            AnyMsg::SetMirrorBuddyGroup($inner) => $body,
            AnyMsg::SetMirrorBuddyGroupResp($inner) => $body,
            AnyMsg::GetMirrorBuddyGroups($inner) => $body,
            AnyMsg::GetMirrorBuddyGroupsResp($inner) => $body,
            AnyMsg::GenericResponse($inner) => $body,
            AnyMsg::MkDir($inner) => $body,
            AnyMsg::MkDirResp($inner) => $body,
            AnyMsg::RmDir($inner) => $body,
            AnyMsg::RmDirResp($inner) => $body,
            AnyMsg::Rename($inner) => $body,
            AnyMsg::RenameResp($inner) => $body,
            AnyMsg::SetAttr($inner) => $body,
            AnyMsg::SetAttrResp($inner) => $body,
            AnyMsg::OpenFile($inner) => $body,
            AnyMsg::OpenFileResp($inner) => $body,
            AnyMsg::CloseFile($inner) => $body,
            AnyMsg::CloseFileResp($inner) => $body,
            AnyMsg::TruncFile($inner) => $body,
            AnyMsg::TruncFileResp($inner) => $body,
            AnyMsg::FLock($inner) => $body,
            AnyMsg::FLockResp($inner) => $body,
            AnyMsg::AckNotify($inner) => $body,
            AnyMsg::AckNotifyResp($inner) => $body,
            AnyMsg::ResyncEntry($inner) => $body,
            AnyMsg::ResyncEntryResp($inner) => $body,
            AnyMsg::ResyncSessionStore($inner) => $body,
            AnyMsg::ResyncSessionStoreResp($inner) => $body,
            AnyMsg::ResyncStarted($inner) => $body,
            AnyMsg::ResyncStartedResp($inner) => $body,
        }
    };
}

/// Implemented by every payload struct.
pub trait Payload: Sized {
    const MSG_TYPE: MsgType;

    fn encode(&self, buf: &mut BytesMut);
    fn decode(buf: &mut Bytes) -> Result<Self, WireError>;
}

impl AnyMsg {
    #[must_use]
    pub fn msg_type(&self) -> MsgType {
        dispatch!(self, inner => {
            fn ty<P: Payload>(_: &P) -> MsgType {
                P::MSG_TYPE
            }
            ty(inner)
        })
    }

    pub fn encode_payload(&self, buf: &mut BytesMut) {
        dispatch!(self, inner => inner.encode(buf));
    }

    pub fn decode(msg_type: MsgType, mut payload: Bytes) -> Result<Self, WireError> {
        let buf = &mut payload;
        Ok(match msg_type {
            MsgType::Heartbeat => Self::Heartbeat(Heartbeat::decode(buf)?),
            MsgType::Ack => Self::Ack(Ack::decode(buf)?),
            MsgType::RemoveNode => Self::RemoveNode(RemoveNode::decode(buf)?),
            MsgType::GetNodes => Self::GetNodes(GetNodes::decode(buf)?),
            MsgType::GetNodesResp => Self::GetNodesResp(GetNodesResp::decode(buf)?),
            MsgType::MapTargets => Self::MapTargets(MapTargets::decode(buf)?),
            MsgType::MapTargetsResp => Self::MapTargetsResp(MapTargetsResp::decode(buf)?),
            MsgType::GetTargetMappings => {
                Self::GetTargetMappings(GetTargetMappings::decode(buf)?)
            }
            MsgType::GetTargetMappingsResp => {
                Self::GetTargetMappingsResp(GetTargetMappingsResp::decode(buf)?)
            }
            MsgType::GetTargetStates => Self::GetTargetStates(GetTargetStates::decode(buf)?),
            MsgType::GetTargetStatesResp => {
                Self::GetTargetStatesResp(GetTargetStatesResp::decode(buf)?)
            }
            MsgType::SetTargetConsistencyStates => {
                Self::SetTargetConsistencyStates(SetTargetConsistencyStates::decode(buf)?)
            }
            MsgType::SetTargetConsistencyStatesResp => {
                Self::SetTargetConsistencyStatesResp(SetTargetConsistencyStatesResp::decode(buf)?)
            }
            MsgType::SetMirrorBuddyGroup => {
                Self::SetMirrorBuddyGroup(SetMirrorBuddyGroup::decode(buf)?)
            }
            MsgType::SetMirrorBuddyGroupResp => {
                Self::SetMirrorBuddyGroupResp(SetMirrorBuddyGroupResp::decode(buf)?)
            }
            MsgType::GetMirrorBuddyGroups => {
                Self::GetMirrorBuddyGroups(GetMirrorBuddyGroups::decode(buf)?)
            }
            MsgType::GetMirrorBuddyGroupsResp => {
                Self::GetMirrorBuddyGroupsResp(GetMirrorBuddyGroupsResp::decode(buf)?)
            }
            MsgType::GenericResponse => Self::GenericResponse(GenericResponse::decode(buf)?),
            MsgType::MkDir => Self::MkDir(MkDir::decode(buf)?),
            MsgType::MkDirResp => Self::MkDirResp(MkDirResp::decode(buf)?),
            MsgType::RmDir => Self::RmDir(RmDir::decode(buf)?),
            MsgType::RmDirResp => Self::RmDirResp(RmDirResp::decode(buf)?),
            MsgType::Rename => Self::Rename(Rename::decode(buf)?),
            MsgType::RenameResp => Self::RenameResp(RenameResp::decode(buf)?),
            MsgType::SetAttr => Self::SetAttr(SetAttr::decode(buf)?),
            MsgType::SetAttrResp => Self::SetAttrResp(SetAttrResp::decode(buf)?),
            MsgType::OpenFile => Self::OpenFile(OpenFile::decode(buf)?),
            MsgType::OpenFileResp => Self::OpenFileResp(OpenFileResp::decode(buf)?),
            MsgType::CloseFile => Self::CloseFile(CloseFile::decode(buf)?),
            MsgType::CloseFileResp => Self::CloseFileResp(CloseFileResp::decode(buf)?),
            MsgType::TruncFile => Self::TruncFile(TruncFile::decode(buf)?),
            MsgType::TruncFileResp => Self::TruncFileResp(TruncFileResp::decode(buf)?),
            MsgType::FLock => Self::FLock(FLock::decode(buf)?),
            MsgType::FLockResp => Self::FLockResp(FLockResp::decode(buf)?),
            MsgType::AckNotify => Self::AckNotify(AckNotify::decode(buf)?),
            MsgType::AckNotifyResp => Self::AckNotifyResp(AckNotifyResp::decode(buf)?),
            MsgType::ResyncEntry => Self::ResyncEntry(ResyncEntry::decode(buf)?),
            MsgType::ResyncEntryResp => Self::ResyncEntryResp(ResyncEntryResp::decode(buf)?),
            MsgType::ResyncSessionStore => {
                Self::ResyncSessionStore(ResyncSessionStore::decode(buf)?)
            }
            MsgType::ResyncSessionStoreResp => {
                Self::ResyncSessionStoreResp(ResyncSessionStoreResp::decode(buf)?)
            }
            MsgType::ResyncStarted => Self::ResyncStarted(ResyncStarted::decode(buf)?),
            MsgType::ResyncStartedResp => Self::ResyncStartedResp(ResyncStartedResp::decode(buf)?),
        })
    }
}
