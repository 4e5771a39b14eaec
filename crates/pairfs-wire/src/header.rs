//! Fixed binary message header
//!
//! Layout (little-endian, 36 bytes total):
//!
//! ```text
//! offset  size  field
//!      0     4  magic
//!      4     4  total length (header + payload)
//!      8     2  message type
//!     10     2  message flags
//!     12     2  feature flags (negotiated capabilities)
//!     14     2  reserved
//!     16     4  requestor numeric node ID (originating session)
//!     20     8  sequence number
//!     28     8  sequence number done (retire-up-to acknowledgement)
//! ```
//!
//! The requestor field survives primary-to-secondary forwarding, so
//! the secondary applies sequence tracking against the originating
//! client's session rather than the forwarding primary's.

use crate::error::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const MSG_MAGIC: u32 = 0x5046_5301;
pub const HEADER_LEN: usize = 36;

/// Upper bound for a single message; larger frames are rejected before
/// the payload is read.
pub const MAX_MSG_LEN: usize = 64 * 1024 * 1024;

/// The message is the forwarded copy a primary sends to its secondary.
pub const FLAG_BUDDY_MIRROR_SECOND: u16 = 1 << 0;
/// The sequence-number fields of the header are meaningful.
pub const FLAG_HAS_SEQUENCE_NUMBER: u16 = 1 << 1;
/// `seq_done` retires exactly that slot instead of the whole prefix.
pub const FLAG_IS_SELECTIVE_ACK: u16 = 1 << 2;

/// All message types of the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MsgType {
    Heartbeat = 1,
    Ack = 2,
    RemoveNode = 3,
    GetNodes = 4,
    GetNodesResp = 5,
    MapTargets = 6,
    MapTargetsResp = 7,
    GetTargetMappings = 8,
    GetTargetMappingsResp = 9,
    GetTargetStates = 10,
    GetTargetStatesResp = 11,
    SetTargetConsistencyStates = 12,
    SetTargetConsistencyStatesResp = 13,
    SetMirrorBuddyGroup = 14,
    SetMirrorBuddyGroupResp = 15,
    GetMirrorBuddyGroups = 16,
    GetMirrorBuddyGroupsResp = 17,
    GenericResponse = 18,

    MkDir = 32,
    MkDirResp = 33,
    RmDir = 34,
    RmDirResp = 35,
    Rename = 36,
    RenameResp = 37,
    SetAttr = 38,
    SetAttrResp = 39,
    OpenFile = 40,
    OpenFileResp = 41,
    CloseFile = 42,
    CloseFileResp = 43,
    TruncFile = 44,
    TruncFileResp = 45,
    FLock = 46,
    FLockResp = 47,
    AckNotify = 48,
    AckNotifyResp = 49,

    ResyncEntry = 64,
    ResyncEntryResp = 65,
    ResyncSessionStore = 66,
    ResyncSessionStoreResp = 67,
    ResyncStarted = 68,
    ResyncStartedResp = 69,
}

impl MsgType {
    #[must_use]
    pub const fn from_u16(raw: u16) -> Option<Self> {
        Some(match raw {
            1 => Self::Heartbeat,
            2 => Self::Ack,
            3 => Self::RemoveNode,
            4 => Self::GetNodes,
            5 => Self::GetNodesResp,
            6 => Self::MapTargets,
            7 => Self::MapTargetsResp,
            8 => Self::GetTargetMappings,
            9 => Self::GetTargetMappingsResp,
            10 => Self::GetTargetStates,
            11 => Self::GetTargetStatesResp,
            12 => Self::SetTargetConsistencyStates,
            13 => Self::SetTargetConsistencyStatesResp,
            14 => Self::SetMirrorBuddyGroup,
            15 => Self::SetMirrorBuddyGroupResp,
            16 => Self::GetMirrorBuddyGroups,
            17 => Self::GetMirrorBuddyGroupsResp,
            18 => Self::GenericResponse,
            32 => Self::MkDir,
            33 => Self::MkDirResp,
            34 => Self::RmDir,
            35 => Self::RmDirResp,
            36 => Self::Rename,
            37 => Self::RenameResp,
            38 => Self::SetAttr,
            39 => Self::SetAttrResp,
            40 => Self::OpenFile,
            41 => Self::OpenFileResp,
            42 => Self::CloseFile,
            43 => Self::CloseFileResp,
            44 => Self::TruncFile,
            45 => Self::TruncFileResp,
            46 => Self::FLock,
            47 => Self::FLockResp,
            48 => Self::AckNotify,
            49 => Self::AckNotifyResp,
            64 => Self::ResyncEntry,
            65 => Self::ResyncEntryResp,
            66 => Self::ResyncSessionStore,
            67 => Self::ResyncSessionStoreResp,
            68 => Self::ResyncStarted,
            69 => Self::ResyncStartedResp,
            _ => return None,
        })
    }
}

/// Decoded message header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgHeader {
    pub msg_type: MsgType,
    pub flags: u16,
    pub feature_flags: u16,
    /// Numeric node ID of the originating requestor.
    pub requestor: u32,
    pub seq: u64,
    pub seq_done: u64,
    pub payload_len: u32,
}

impl MsgHeader {
    #[must_use]
    pub const fn new(msg_type: MsgType) -> Self {
        Self {
            msg_type,
            flags: 0,
            feature_flags: 0,
            requestor: 0,
            seq: 0,
            seq_done: 0,
            payload_len: 0,
        }
    }

    #[must_use]
    pub const fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    #[must_use]
    pub const fn is_buddy_mirror_second(&self) -> bool {
        self.has_flag(FLAG_BUDDY_MIRROR_SECOND)
    }

    #[must_use]
    pub const fn has_sequence_number(&self) -> bool {
        self.has_flag(FLAG_HAS_SEQUENCE_NUMBER)
    }

    #[must_use]
    pub const fn is_selective_ack(&self) -> bool {
        self.has_flag(FLAG_IS_SELECTIVE_ACK)
    }

    /// Encode into `buf`, `payload_len` taken from `self`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(MSG_MAGIC);
        buf.put_u32_le(HEADER_LEN as u32 + self.payload_len);
        buf.put_u16_le(self.msg_type as u16);
        buf.put_u16_le(self.flags);
        buf.put_u16_le(self.feature_flags);
        buf.put_u16_le(0);
        buf.put_u32_le(self.requestor);
        buf.put_u64_le(self.seq);
        buf.put_u64_le(self.seq_done);
    }

    /// Decode from exactly `HEADER_LEN` bytes.
    pub fn decode(mut buf: Bytes) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Truncated);
        }

        let magic = buf.get_u32_le();
        if magic != MSG_MAGIC {
            return Err(WireError::BadMagic);
        }

        let total_len = buf.get_u32_le() as usize;
        if total_len < HEADER_LEN {
            return Err(WireError::Truncated);
        }
        if total_len > MAX_MSG_LEN {
            return Err(WireError::TooLarge(total_len));
        }

        let raw_type = buf.get_u16_le();
        let msg_type = MsgType::from_u16(raw_type).ok_or(WireError::UnknownMsgType(raw_type))?;
        let flags = buf.get_u16_le();
        let feature_flags = buf.get_u16_le();
        let _reserved = buf.get_u16_le();
        let requestor = buf.get_u32_le();
        let seq = buf.get_u64_le();
        let seq_done = buf.get_u64_le();

        Ok(Self {
            msg_type,
            flags,
            feature_flags,
            requestor,
            seq,
            seq_done,
            payload_len: (total_len - HEADER_LEN) as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let hdr = MsgHeader {
            msg_type: MsgType::MkDir,
            flags: FLAG_HAS_SEQUENCE_NUMBER | FLAG_BUDDY_MIRROR_SECOND,
            feature_flags: 0x0102,
            requestor: 301,
            seq: 42,
            seq_done: 17,
            payload_len: 100,
        };

        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);

        let decoded = MsgHeader::decode(buf.freeze()).unwrap();
        assert_eq!(decoded, hdr);
        assert!(decoded.is_buddy_mirror_second());
        assert!(decoded.has_sequence_number());
        assert!(!decoded.is_selective_ack());
    }

    #[test]
    fn test_header_bad_magic() {
        let mut buf = BytesMut::new();
        MsgHeader::new(MsgType::Ack).encode(&mut buf);
        buf[0] ^= 0xff;
        assert!(matches!(
            MsgHeader::decode(buf.freeze()),
            Err(WireError::BadMagic)
        ));
    }

    #[test]
    fn test_header_oversized_rejected() {
        let mut buf = BytesMut::new();
        let mut hdr = MsgHeader::new(MsgType::Ack);
        hdr.payload_len = (MAX_MSG_LEN + 1) as u32;
        hdr.encode(&mut buf);
        assert!(matches!(
            MsgHeader::decode(buf.freeze()),
            Err(WireError::TooLarge(_))
        ));
    }
}
