//! Mirrored metadata operation messages
//!
//! Every mutating operation carries an `EntryInfo` addressing tuple. On
//! the forwarded copy (header flag `FLAG_BUDDY_MIRROR_SECOND`) the
//! optional timestamps and primary-chosen IDs are filled in, so the
//! secondary stores exactly what the primary stored.

use crate::error::WireError;
use crate::header::MsgType;
use crate::msgs::Payload;
use crate::serialize::{
    get_attrs, get_bool, get_entry_info, get_i32, get_node_id, get_opt_timestamps, get_str,
    get_u8, get_u32, get_u64, put_attrs, put_bool, put_entry_info, put_node_id,
    put_opt_timestamps, put_str,
};
use bytes::{BufMut, Bytes, BytesMut};
use pairfs_common::types::{EntryAttrs, EntryInfo, NodeNumId, Timestamps};

/// Which attributes a `SetAttr` actually changes.
pub const SETATTR_MODE: u32 = 1 << 0;
pub const SETATTR_UID: u32 = 1 << 1;
pub const SETATTR_GID: u32 = 1 << 2;
pub const SETATTR_SIZE: u32 = 1 << 3;

/// File lock kinds carried by `FLock`.
pub const FLOCK_UNLOCK: u8 = 0;
pub const FLOCK_SHARED: u8 = 1;
pub const FLOCK_EXCLUSIVE: u8 = 2;

/// `OpenFile` access flags.
pub const OPEN_READ: u32 = 1 << 0;
pub const OPEN_WRITE: u32 = 1 << 1;
pub const OPEN_CREATE: u32 = 1 << 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MkDir {
    /// The parent directory the new entry is created in.
    pub parent: EntryInfo,
    pub name: String,
    pub attrs: EntryAttrs,
    /// Empty on the client leg; the primary fills in its generated ID
    /// before forwarding so both replicas agree.
    pub new_entry_id: String,
    pub timestamps: Option<Timestamps>,
}

impl Payload for MkDir {
    const MSG_TYPE: MsgType = MsgType::MkDir;

    fn encode(&self, buf: &mut BytesMut) {
        put_entry_info(buf, &self.parent);
        put_str(buf, &self.name);
        put_attrs(buf, &self.attrs);
        put_str(buf, &self.new_entry_id);
        put_opt_timestamps(buf, self.timestamps.as_ref());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            parent: get_entry_info(buf)?,
            name: get_str(buf)?,
            attrs: get_attrs(buf)?,
            new_entry_id: get_str(buf)?,
            timestamps: get_opt_timestamps(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MkDirResp {
    pub result: i32,
    pub entry: Option<EntryInfo>,
}

impl Payload for MkDirResp {
    const MSG_TYPE: MsgType = MsgType::MkDirResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
        match &self.entry {
            Some(entry) => {
                put_bool(buf, true);
                put_entry_info(buf, entry);
            }
            None => put_bool(buf, false),
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let result = get_i32(buf)?;
        let entry = if get_bool(buf)? {
            Some(get_entry_info(buf)?)
        } else {
            None
        };
        Ok(Self { result, entry })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RmDir {
    pub parent: EntryInfo,
    pub name: String,
    /// Parent mtime fix on the forwarded copy.
    pub timestamps: Option<Timestamps>,
}

impl Payload for RmDir {
    const MSG_TYPE: MsgType = MsgType::RmDir;

    fn encode(&self, buf: &mut BytesMut) {
        put_entry_info(buf, &self.parent);
        put_str(buf, &self.name);
        put_opt_timestamps(buf, self.timestamps.as_ref());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            parent: get_entry_info(buf)?,
            name: get_str(buf)?,
            timestamps: get_opt_timestamps(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RmDirResp {
    pub result: i32,
}

impl Payload for RmDirResp {
    const MSG_TYPE: MsgType = MsgType::RmDirResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            result: get_i32(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rename {
    pub from_parent: EntryInfo,
    pub old_name: String,
    pub to_parent: EntryInfo,
    pub new_name: String,
    pub timestamps: Option<Timestamps>,
}

impl Payload for Rename {
    const MSG_TYPE: MsgType = MsgType::Rename;

    fn encode(&self, buf: &mut BytesMut) {
        put_entry_info(buf, &self.from_parent);
        put_str(buf, &self.old_name);
        put_entry_info(buf, &self.to_parent);
        put_str(buf, &self.new_name);
        put_opt_timestamps(buf, self.timestamps.as_ref());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            from_parent: get_entry_info(buf)?,
            old_name: get_str(buf)?,
            to_parent: get_entry_info(buf)?,
            new_name: get_str(buf)?,
            timestamps: get_opt_timestamps(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenameResp {
    pub result: i32,
}

impl Payload for RenameResp {
    const MSG_TYPE: MsgType = MsgType::RenameResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            result: get_i32(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetAttr {
    pub entry: EntryInfo,
    pub attrs: EntryAttrs,
    /// `SETATTR_*` bits selecting the fields to apply.
    pub valid: u32,
    pub timestamps: Option<Timestamps>,
}

impl Payload for SetAttr {
    const MSG_TYPE: MsgType = MsgType::SetAttr;

    fn encode(&self, buf: &mut BytesMut) {
        put_entry_info(buf, &self.entry);
        put_attrs(buf, &self.attrs);
        buf.put_u32_le(self.valid);
        put_opt_timestamps(buf, self.timestamps.as_ref());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            entry: get_entry_info(buf)?,
            attrs: get_attrs(buf)?,
            valid: get_u32(buf)?,
            timestamps: get_opt_timestamps(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetAttrResp {
    pub result: i32,
}

impl Payload for SetAttrResp {
    const MSG_TYPE: MsgType = MsgType::SetAttrResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            result: get_i32(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenFile {
    /// Addresses the file by (parent, name); the entry ID inside is
    /// advisory and may be the parent's for create-on-open.
    pub entry: EntryInfo,
    pub access_flags: u32,
    /// Empty on the client leg; primary-generated, forwarded verbatim.
    pub handle_id: String,
    /// Set by the primary when `OPEN_CREATE` created the file, so the
    /// secondary creates it with the same ID.
    pub new_entry_id: String,
    pub timestamps: Option<Timestamps>,
}

impl Payload for OpenFile {
    const MSG_TYPE: MsgType = MsgType::OpenFile;

    fn encode(&self, buf: &mut BytesMut) {
        put_entry_info(buf, &self.entry);
        buf.put_u32_le(self.access_flags);
        put_str(buf, &self.handle_id);
        put_str(buf, &self.new_entry_id);
        put_opt_timestamps(buf, self.timestamps.as_ref());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            entry: get_entry_info(buf)?,
            access_flags: get_u32(buf)?,
            handle_id: get_str(buf)?,
            new_entry_id: get_str(buf)?,
            timestamps: get_opt_timestamps(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenFileResp {
    pub result: i32,
    pub handle_id: String,
}

impl Payload for OpenFileResp {
    const MSG_TYPE: MsgType = MsgType::OpenFileResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
        put_str(buf, &self.handle_id);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            result: get_i32(buf)?,
            handle_id: get_str(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFile {
    pub entry: EntryInfo,
    pub handle_id: String,
    pub timestamps: Option<Timestamps>,
}

impl Payload for CloseFile {
    const MSG_TYPE: MsgType = MsgType::CloseFile;

    fn encode(&self, buf: &mut BytesMut) {
        put_entry_info(buf, &self.entry);
        put_str(buf, &self.handle_id);
        put_opt_timestamps(buf, self.timestamps.as_ref());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            entry: get_entry_info(buf)?,
            handle_id: get_str(buf)?,
            timestamps: get_opt_timestamps(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFileResp {
    pub result: i32,
}

impl Payload for CloseFileResp {
    const MSG_TYPE: MsgType = MsgType::CloseFileResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            result: get_i32(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TruncFile {
    pub entry: EntryInfo,
    pub size: u64,
    pub timestamps: Option<Timestamps>,
}

impl Payload for TruncFile {
    const MSG_TYPE: MsgType = MsgType::TruncFile;

    fn encode(&self, buf: &mut BytesMut) {
        put_entry_info(buf, &self.entry);
        buf.put_u64_le(self.size);
        put_opt_timestamps(buf, self.timestamps.as_ref());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            entry: get_entry_info(buf)?,
            size: get_u64(buf)?,
            timestamps: get_opt_timestamps(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TruncFileResp {
    pub result: i32,
}

impl Payload for TruncFileResp {
    const MSG_TYPE: MsgType = MsgType::TruncFileResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            result: get_i32(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FLock {
    pub entry: EntryInfo,
    pub handle_id: String,
    pub client: NodeNumId,
    /// One of `FLOCK_UNLOCK`, `FLOCK_SHARED`, `FLOCK_EXCLUSIVE`.
    pub lock_type: u8,
}

impl Payload for FLock {
    const MSG_TYPE: MsgType = MsgType::FLock;

    fn encode(&self, buf: &mut BytesMut) {
        put_entry_info(buf, &self.entry);
        put_str(buf, &self.handle_id);
        put_node_id(buf, self.client);
        buf.put_u8(self.lock_type);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            entry: get_entry_info(buf)?,
            handle_id: get_str(buf)?,
            client: get_node_id(buf)?,
            lock_type: get_u8(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FLockResp {
    pub result: i32,
}

impl Payload for FLockResp {
    const MSG_TYPE: MsgType = MsgType::FLockResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            result: get_i32(buf)?,
        })
    }
}

/// Sent to the secondary instead of a forwarded operation when the
/// primary's execution did not change observable state; lets the
/// secondary retire the sequence slot anyway.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AckNotify;

impl Payload for AckNotify {
    const MSG_TYPE: MsgType = MsgType::AckNotify;

    fn encode(&self, _buf: &mut BytesMut) {}

    fn decode(_buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckNotifyResp {
    pub result: i32,
}

impl Payload for AckNotifyResp {
    const MSG_TYPE: MsgType = MsgType::AckNotifyResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            result: get_i32(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use pairfs_common::types::{
        BuddyGroupId, ENTRY_FLAG_BUDDYMIRRORED, EntryId, EntryOwner, EntryType,
    };

    fn mirrored_dir_info() -> EntryInfo {
        EntryInfo {
            owner: EntryOwner::Group(BuddyGroupId(1)),
            parent_id: EntryId::root(),
            entry_id: EntryId::generate(),
            name: "data".to_string(),
            entry_type: EntryType::Directory,
            feature_flags: ENTRY_FLAG_BUDDYMIRRORED,
        }
    }

    fn round_trip<P: Payload + PartialEq + std::fmt::Debug>(payload: &P) {
        let mut buf = BytesMut::new();
        payload.encode(&mut buf);
        let mut bytes = buf.freeze();
        assert_eq!(&P::decode(&mut bytes).unwrap(), payload);
    }

    #[test]
    fn test_mkdir_forwarded_copy_round_trip() {
        round_trip(&MkDir {
            parent: mirrored_dir_info(),
            name: "subdir".to_string(),
            attrs: EntryAttrs {
                mode: 0o755,
                uid: 1000,
                gid: 1000,
                size: 0,
            },
            new_entry_id: EntryId::generate().as_str().to_string(),
            timestamps: Some(Timestamps::all(1_700_000_000)),
        });
    }

    #[test]
    fn test_rename_round_trip() {
        round_trip(&Rename {
            from_parent: mirrored_dir_info(),
            old_name: "a".to_string(),
            to_parent: mirrored_dir_info(),
            new_name: "b".to_string(),
            timestamps: None,
        });
    }

    #[test]
    fn test_flock_round_trip() {
        round_trip(&FLock {
            entry: mirrored_dir_info(),
            handle_id: "fh-3".to_string(),
            client: NodeNumId(77),
            lock_type: FLOCK_EXCLUSIVE,
        });
    }
}
