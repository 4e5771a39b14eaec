//! Primitive payload encoding helpers
//!
//! All payload fields are little-endian. Variable-length fields carry a
//! u32 length prefix. Every getter checks the remaining buffer length
//! before touching it, so a truncated or hostile frame surfaces as a
//! `WireError` instead of a panic.

use crate::error::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use pairfs_common::types::{
    BuddyGroupId, EntryAttrs, EntryId, EntryInfo, EntryOwner, EntryType, NicAddress, NodeNumId,
    PoolId, TargetId, Timestamps,
};
use std::net::IpAddr;

/// Strings and blobs longer than this are rejected on decode.
const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

pub fn get_u8(buf: &mut Bytes) -> Result<u8, WireError> {
    if buf.remaining() < 1 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u8())
}

pub fn get_u16(buf: &mut Bytes) -> Result<u16, WireError> {
    if buf.remaining() < 2 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u16_le())
}

pub fn get_u32(buf: &mut Bytes) -> Result<u32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u32_le())
}

pub fn get_u64(buf: &mut Bytes) -> Result<u64, WireError> {
    if buf.remaining() < 8 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u64_le())
}

pub fn get_i32(buf: &mut Bytes) -> Result<i32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_i32_le())
}

pub fn get_i64(buf: &mut Bytes) -> Result<i64, WireError> {
    if buf.remaining() < 8 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_i64_le())
}

pub fn get_bool(buf: &mut Bytes) -> Result<bool, WireError> {
    Ok(get_u8(buf)? != 0)
}

pub fn put_bool(buf: &mut BytesMut, v: bool) {
    buf.put_u8(u8::from(v));
}

pub fn put_bytes(buf: &mut BytesMut, v: &[u8]) {
    buf.put_u32_le(v.len() as u32);
    buf.put_slice(v);
}

pub fn get_bytes(buf: &mut Bytes) -> Result<Vec<u8>, WireError> {
    let len = get_u32(buf)? as usize;
    if len > MAX_FIELD_LEN {
        return Err(WireError::TooLarge(len));
    }
    if buf.remaining() < len {
        return Err(WireError::Truncated);
    }
    Ok(buf.copy_to_bytes(len).to_vec())
}

pub fn put_str(buf: &mut BytesMut, s: &str) {
    put_bytes(buf, s.as_bytes());
}

pub fn get_str(buf: &mut Bytes) -> Result<String, WireError> {
    let raw = get_bytes(buf)?;
    String::from_utf8(raw).map_err(|_| WireError::Malformed("invalid UTF-8 string".into()))
}

pub fn put_node_id(buf: &mut BytesMut, id: NodeNumId) {
    buf.put_u32_le(id.value());
}

pub fn get_node_id(buf: &mut Bytes) -> Result<NodeNumId, WireError> {
    Ok(NodeNumId(get_u32(buf)?))
}

pub fn put_target_id(buf: &mut BytesMut, id: TargetId) {
    buf.put_u16_le(id.value());
}

pub fn get_target_id(buf: &mut Bytes) -> Result<TargetId, WireError> {
    Ok(TargetId(get_u16(buf)?))
}

pub fn put_group_id(buf: &mut BytesMut, id: BuddyGroupId) {
    buf.put_u16_le(id.value());
}

pub fn get_group_id(buf: &mut Bytes) -> Result<BuddyGroupId, WireError> {
    Ok(BuddyGroupId(get_u16(buf)?))
}

pub fn put_pool_id(buf: &mut BytesMut, id: PoolId) {
    buf.put_u16_le(id.value());
}

pub fn get_pool_id(buf: &mut Bytes) -> Result<PoolId, WireError> {
    Ok(PoolId(get_u16(buf)?))
}

pub fn put_entry_id(buf: &mut BytesMut, id: &EntryId) {
    put_str(buf, id.as_str());
}

pub fn get_entry_id(buf: &mut Bytes) -> Result<EntryId, WireError> {
    let raw = get_str(buf)?;
    EntryId::parse(raw).map_err(|e| WireError::Malformed(e.to_string()))
}

pub fn put_nic(buf: &mut BytesMut, nic: &NicAddress) {
    match nic.addr {
        IpAddr::V4(v4) => {
            buf.put_u8(4);
            buf.put_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            buf.put_u8(6);
            buf.put_slice(&v6.octets());
        }
    }
    put_str(buf, &nic.name);
}

pub fn get_nic(buf: &mut Bytes) -> Result<NicAddress, WireError> {
    let family = get_u8(buf)?;
    let addr = match family {
        4 => {
            if buf.remaining() < 4 {
                return Err(WireError::Truncated);
            }
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            IpAddr::from(octets)
        }
        6 => {
            if buf.remaining() < 16 {
                return Err(WireError::Truncated);
            }
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            IpAddr::from(octets)
        }
        other => {
            return Err(WireError::Malformed(format!(
                "unknown address family: {other}"
            )));
        }
    };
    let name = get_str(buf)?;
    Ok(NicAddress { addr, name })
}

pub fn put_entry_owner(buf: &mut BytesMut, owner: EntryOwner) {
    match owner {
        EntryOwner::Node(id) => {
            buf.put_u8(1);
            put_node_id(buf, id);
        }
        EntryOwner::Group(id) => {
            buf.put_u8(2);
            put_group_id(buf, id);
            // keep the variant width fixed
            buf.put_u16_le(0);
        }
    }
}

pub fn get_entry_owner(buf: &mut Bytes) -> Result<EntryOwner, WireError> {
    match get_u8(buf)? {
        1 => Ok(EntryOwner::Node(get_node_id(buf)?)),
        2 => {
            let id = get_group_id(buf)?;
            let _pad = get_u16(buf)?;
            Ok(EntryOwner::Group(id))
        }
        other => Err(WireError::Malformed(format!(
            "unknown entry owner tag: {other}"
        ))),
    }
}

pub fn put_entry_type(buf: &mut BytesMut, t: EntryType) {
    buf.put_u8(t.code());
}

pub fn get_entry_type(buf: &mut Bytes) -> Result<EntryType, WireError> {
    let code = get_u8(buf)?;
    EntryType::from_code(code)
        .ok_or_else(|| WireError::Malformed(format!("unknown entry type: {code}")))
}

pub fn put_entry_info(buf: &mut BytesMut, info: &EntryInfo) {
    put_entry_owner(buf, info.owner);
    put_entry_id(buf, &info.parent_id);
    put_entry_id(buf, &info.entry_id);
    put_str(buf, &info.name);
    put_entry_type(buf, info.entry_type);
    buf.put_u16_le(info.feature_flags);
}

pub fn get_entry_info(buf: &mut Bytes) -> Result<EntryInfo, WireError> {
    Ok(EntryInfo {
        owner: get_entry_owner(buf)?,
        parent_id: get_entry_id(buf)?,
        entry_id: get_entry_id(buf)?,
        name: get_str(buf)?,
        entry_type: get_entry_type(buf)?,
        feature_flags: get_u16(buf)?,
    })
}

pub fn put_attrs(buf: &mut BytesMut, attrs: &EntryAttrs) {
    buf.put_u32_le(attrs.mode);
    buf.put_u32_le(attrs.uid);
    buf.put_u32_le(attrs.gid);
    buf.put_u64_le(attrs.size);
}

pub fn get_attrs(buf: &mut Bytes) -> Result<EntryAttrs, WireError> {
    Ok(EntryAttrs {
        mode: get_u32(buf)?,
        uid: get_u32(buf)?,
        gid: get_u32(buf)?,
        size: get_u64(buf)?,
    })
}

pub fn put_timestamps(buf: &mut BytesMut, ts: &Timestamps) {
    buf.put_i64_le(ts.access);
    buf.put_i64_le(ts.modify);
    buf.put_i64_le(ts.change);
}

pub fn get_timestamps(buf: &mut Bytes) -> Result<Timestamps, WireError> {
    Ok(Timestamps {
        access: get_i64(buf)?,
        modify: get_i64(buf)?,
        change: get_i64(buf)?,
    })
}

/// Timestamps are present only on the forwarded (secondary) copy of a
/// mirrored message.
pub fn put_opt_timestamps(buf: &mut BytesMut, ts: Option<&Timestamps>) {
    match ts {
        Some(ts) => {
            buf.put_u8(1);
            put_timestamps(buf, ts);
        }
        None => buf.put_u8(0),
    }
}

pub fn get_opt_timestamps(buf: &mut Bytes) -> Result<Option<Timestamps>, WireError> {
    if get_bool(buf)? {
        Ok(Some(get_timestamps(buf)?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairfs_common::types::ENTRY_FLAG_BUDDYMIRRORED;

    #[test]
    fn test_str_round_trip() {
        let mut buf = BytesMut::new();
        put_str(&mut buf, "hello wörld");
        let mut bytes = buf.freeze();
        assert_eq!(get_str(&mut bytes).unwrap(), "hello wörld");
        assert_eq!(bytes.remaining(), 0);
    }

    #[test]
    fn test_truncated_str() {
        let mut buf = BytesMut::new();
        put_str(&mut buf, "truncate me");
        let bytes = buf.freeze();
        let mut short = bytes.slice(..bytes.len() - 3);
        assert!(matches!(get_str(&mut short), Err(WireError::Truncated)));
    }

    #[test]
    fn test_entry_info_round_trip() {
        let info = EntryInfo {
            owner: EntryOwner::Group(BuddyGroupId(7)),
            parent_id: EntryId::root(),
            entry_id: EntryId::generate(),
            name: "projects".to_string(),
            entry_type: EntryType::Directory,
            feature_flags: ENTRY_FLAG_BUDDYMIRRORED,
        };

        let mut buf = BytesMut::new();
        put_entry_info(&mut buf, &info);
        let mut bytes = buf.freeze();
        let decoded = get_entry_info(&mut bytes).unwrap();
        assert_eq!(decoded, info);
        assert!(decoded.is_buddy_mirrored());
    }

    #[test]
    fn test_nic_round_trip() {
        for nic in [
            NicAddress::new("10.1.2.3".parse().unwrap(), "eth0"),
            NicAddress::new("fd00::1".parse().unwrap(), "ib0"),
        ] {
            let mut buf = BytesMut::new();
            put_nic(&mut buf, &nic);
            let mut bytes = buf.freeze();
            assert_eq!(get_nic(&mut bytes).unwrap(), nic);
        }
    }
}
