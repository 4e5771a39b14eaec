//! Buddy resync messages
//!
//! These travel outside the normal client-triggered mirrored path: the
//! resync job on the primary sends them directly to the secondary.

use crate::error::WireError;
use crate::header::MsgType;
use crate::msgs::Payload;
use crate::serialize::{
    get_attrs, get_bool, get_bytes, get_entry_id, get_entry_type, get_i32, get_node_id, get_str,
    get_timestamps, put_attrs, put_bool, put_bytes, put_entry_id, put_entry_type, put_node_id,
    put_str, put_timestamps,
};
use bytes::{BufMut, Bytes, BytesMut};
use pairfs_common::types::{EntryAttrs, EntryId, EntryType, NodeNumId, Timestamps};

/// Repair message for one entry: recreate it if missing, overwrite its
/// attributes/timestamps if present, or delete it if tombstoned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResyncEntry {
    pub entry_id: EntryId,
    pub parent_id: EntryId,
    pub name: String,
    pub entry_type: EntryType,
    pub deleted: bool,
    pub attrs: EntryAttrs,
    pub timestamps: Timestamps,
}

impl Payload for ResyncEntry {
    const MSG_TYPE: MsgType = MsgType::ResyncEntry;

    fn encode(&self, buf: &mut BytesMut) {
        put_entry_id(buf, &self.entry_id);
        put_entry_id(buf, &self.parent_id);
        put_str(buf, &self.name);
        put_entry_type(buf, self.entry_type);
        put_bool(buf, self.deleted);
        put_attrs(buf, &self.attrs);
        put_timestamps(buf, &self.timestamps);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            entry_id: get_entry_id(buf)?,
            parent_id: get_entry_id(buf)?,
            name: get_str(buf)?,
            entry_type: get_entry_type(buf)?,
            deleted: get_bool(buf)?,
            attrs: get_attrs(buf)?,
            timestamps: get_timestamps(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResyncEntryResp {
    pub result: i32,
}

impl Payload for ResyncEntryResp {
    const MSG_TYPE: MsgType = MsgType::ResyncEntryResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            result: get_i32(buf)?,
        })
    }
}

/// Wholesale replacement of the secondary's session table. The sender
/// declares the body length up front and streams the already-serialized
/// table through the socket (see `write_stream_msg`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResyncSessionStore {
    pub session_data: Vec<u8>,
}

impl Payload for ResyncSessionStore {
    const MSG_TYPE: MsgType = MsgType::ResyncSessionStore;

    fn encode(&self, buf: &mut BytesMut) {
        put_bytes(buf, &self.session_data);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            session_data: get_bytes(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResyncSessionStoreResp {
    pub result: i32,
}

impl Payload for ResyncSessionStoreResp {
    const MSG_TYPE: MsgType = MsgType::ResyncSessionStoreResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            result: get_i32(buf)?,
        })
    }
}

/// Announces a resync run to the secondary before any repair traffic.
/// The secondary drops its mirrored sessions in response, which also
/// resets its sequence tracking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResyncStarted {
    pub primary_node: NodeNumId,
}

impl Payload for ResyncStarted {
    const MSG_TYPE: MsgType = MsgType::ResyncStarted;

    fn encode(&self, buf: &mut BytesMut) {
        put_node_id(buf, self.primary_node);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            primary_node: get_node_id(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResyncStartedResp {
    pub result: i32,
}

impl Payload for ResyncStartedResp {
    const MSG_TYPE: MsgType = MsgType::ResyncStartedResp;

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

    #[test]
    fn test_resync_entry_tombstone_round_trip() {
        let entry = ResyncEntry {
            entry_id: EntryId::generate(),
            parent_id: EntryId::root(),
            name: "gone.txt".to_string(),
            entry_type: EntryType::File,
            deleted: true,
            attrs: EntryAttrs::default(),
            timestamps: Timestamps::all(1_700_000_123),
        };
        let mut buf = BytesMut::new();
        entry.encode(&mut buf);
        let mut bytes = buf.freeze();
        assert_eq!(ResyncEntry::decode(&mut bytes).unwrap(), entry);
    }
}
