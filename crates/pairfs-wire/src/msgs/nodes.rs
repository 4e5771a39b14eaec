//! Node, target and buddy-group directory messages

use crate::error::WireError;
use crate::header::MsgType;
use crate::msgs::Payload;
use crate::serialize::{
    get_bool, get_group_id, get_node_id, get_nic, get_pool_id, get_str, get_target_id, get_u8,
    get_u16, get_u32, get_u64, get_i32, put_bool, put_group_id, put_node_id, put_nic, put_pool_id,
    put_str, put_target_id,
};
use bytes::{BufMut, Bytes, BytesMut};
use pairfs_common::types::{BuddyGroupId, NicAddress, NodeNumId, NodeType, PoolId, TargetId};

fn put_node_type(buf: &mut BytesMut, t: NodeType) {
    buf.put_u8(t.code());
}

fn get_node_type(buf: &mut Bytes) -> Result<NodeType, WireError> {
    let code = get_u8(buf)?;
    NodeType::from_code(code)
        .ok_or_else(|| WireError::Malformed(format!("unknown node type: {code}")))
}

/// Root-inode info piggybacked on metadata heartbeats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootInfo {
    pub owner: NodeNumId,
    pub is_buddy_mirrored: bool,
}

fn put_root_info(buf: &mut BytesMut, info: Option<&RootInfo>) {
    match info {
        Some(info) => {
            buf.put_u8(1);
            put_node_id(buf, info.owner);
            put_bool(buf, info.is_buddy_mirrored);
        }
        None => buf.put_u8(0),
    }
}

fn get_root_info(buf: &mut Bytes) -> Result<Option<RootInfo>, WireError> {
    if get_bool(buf)? {
        Ok(Some(RootInfo {
            owner: get_node_id(buf)?,
            is_buddy_mirrored: get_bool(buf)?,
        }))
    } else {
        Ok(None)
    }
}

/// Node capability bits carried in heartbeats and node lists.
pub const NODE_FEATURE_SEQ_NUMBERS: u16 = 1 << 0;
pub const NODE_FEATURE_SELECTIVE_ACK: u16 = 1 << 1;

/// Periodic node announcement. The first heartbeat from an unknown node
/// registers it with the receiving store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    pub node_id: String,
    pub num_id: NodeNumId,
    pub node_type: NodeType,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub nics: Vec<NicAddress>,
    /// Capability bits of the sender.
    pub feature_flags: u16,
    pub root_info: Option<RootInfo>,
    /// Non-empty if the sender wants an `Ack` back (UDP delivery).
    pub ack_id: String,
}

impl Payload for Heartbeat {
    const MSG_TYPE: MsgType = MsgType::Heartbeat;

    fn encode(&self, buf: &mut BytesMut) {
        put_str(buf, &self.node_id);
        put_node_id(buf, self.num_id);
        put_node_type(buf, self.node_type);
        buf.put_u16_le(self.tcp_port);
        buf.put_u16_le(self.udp_port);
        buf.put_u32_le(self.nics.len() as u32);
        for nic in &self.nics {
            put_nic(buf, nic);
        }
        buf.put_u16_le(self.feature_flags);
        put_root_info(buf, self.root_info.as_ref());
        put_str(buf, &self.ack_id);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let node_id = get_str(buf)?;
        let num_id = get_node_id(buf)?;
        let node_type = get_node_type(buf)?;
        let tcp_port = get_u16(buf)?;
        let udp_port = get_u16(buf)?;
        let nic_count = get_u32(buf)? as usize;
        if nic_count > 64 {
            return Err(WireError::Malformed("too many NICs".into()));
        }
        let mut nics = Vec::with_capacity(nic_count);
        for _ in 0..nic_count {
            nics.push(get_nic(buf)?);
        }
        let feature_flags = get_u16(buf)?;
        let root_info = get_root_info(buf)?;
        let ack_id = get_str(buf)?;
        Ok(Self {
            node_id,
            num_id,
            node_type,
            tcp_port,
            udp_port,
            nics,
            feature_flags,
            root_info,
            ack_id,
        })
    }
}

/// Acknowledgement of an acknowledgeable message (by ack ID).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ack {
    pub ack_id: String,
}

impl Payload for Ack {
    const MSG_TYPE: MsgType = MsgType::Ack;

    fn encode(&self, buf: &mut BytesMut) {
        put_str(buf, &self.ack_id);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            ack_id: get_str(buf)?,
        })
    }
}

/// Explicit removal of a node from the stores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoveNode {
    pub node_type: NodeType,
    pub num_id: NodeNumId,
    pub ack_id: String,
}

impl Payload for RemoveNode {
    const MSG_TYPE: MsgType = MsgType::RemoveNode;

    fn encode(&self, buf: &mut BytesMut) {
        put_node_type(buf, self.node_type);
        put_node_id(buf, self.num_id);
        put_str(buf, &self.ack_id);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            node_type: get_node_type(buf)?,
            num_id: get_node_id(buf)?,
            ack_id: get_str(buf)?,
        })
    }
}

/// Download the authoritative node list from the management daemon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetNodes {
    pub node_type: NodeType,
}

impl Payload for GetNodes {
    const MSG_TYPE: MsgType = MsgType::GetNodes;

    fn encode(&self, buf: &mut BytesMut) {
        put_node_type(buf, self.node_type);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            node_type: get_node_type(buf)?,
        })
    }
}

/// One node as carried in a node-list download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeDesc {
    pub node_id: String,
    pub num_id: NodeNumId,
    pub node_type: NodeType,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub nics: Vec<NicAddress>,
    pub feature_flags: u16,
}

fn put_node_desc(buf: &mut BytesMut, desc: &NodeDesc) {
    put_str(buf, &desc.node_id);
    put_node_id(buf, desc.num_id);
    put_node_type(buf, desc.node_type);
    buf.put_u16_le(desc.tcp_port);
    buf.put_u16_le(desc.udp_port);
    buf.put_u32_le(desc.nics.len() as u32);
    for nic in &desc.nics {
        put_nic(buf, nic);
    }
    buf.put_u16_le(desc.feature_flags);
}

fn get_node_desc(buf: &mut Bytes) -> Result<NodeDesc, WireError> {
    let node_id = get_str(buf)?;
    let num_id = get_node_id(buf)?;
    let node_type = get_node_type(buf)?;
    let tcp_port = get_u16(buf)?;
    let udp_port = get_u16(buf)?;
    let nic_count = get_u32(buf)? as usize;
    if nic_count > 64 {
        return Err(WireError::Malformed("too many NICs".into()));
    }
    let mut nics = Vec::with_capacity(nic_count);
    for _ in 0..nic_count {
        nics.push(get_nic(buf)?);
    }
    let feature_flags = get_u16(buf)?;
    Ok(NodeDesc {
        node_id,
        num_id,
        node_type,
        tcp_port,
        udp_port,
        nics,
        feature_flags,
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetNodesResp {
    pub nodes: Vec<NodeDesc>,
    pub root_info: Option<RootInfo>,
}

impl Payload for GetNodesResp {
    const MSG_TYPE: MsgType = MsgType::GetNodesResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.nodes.len() as u32);
        for node in &self.nodes {
            put_node_desc(buf, node);
        }
        put_root_info(buf, self.root_info.as_ref());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let count = get_u32(buf)? as usize;
        if count > 65536 {
            return Err(WireError::Malformed("node list too long".into()));
        }
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            nodes.push(get_node_desc(buf)?);
        }
        let root_info = get_root_info(buf)?;
        Ok(Self { nodes, root_info })
    }
}

/// One target-to-node mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetMapping {
    pub target: TargetId,
    pub node: NodeNumId,
    pub pool: PoolId,
}

fn put_mapping(buf: &mut BytesMut, m: &TargetMapping) {
    put_target_id(buf, m.target);
    put_node_id(buf, m.node);
    put_pool_id(buf, m.pool);
}

fn get_mapping(buf: &mut Bytes) -> Result<TargetMapping, WireError> {
    Ok(TargetMapping {
        target: get_target_id(buf)?,
        node: get_node_id(buf)?,
        pool: get_pool_id(buf)?,
    })
}

/// Map targets to their owning nodes (re-mapping is last-writer-wins).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapTargets {
    pub mappings: Vec<TargetMapping>,
    pub ack_id: String,
}

impl Payload for MapTargets {
    const MSG_TYPE: MsgType = MsgType::MapTargets;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.mappings.len() as u32);
        for m in &self.mappings {
            put_mapping(buf, m);
        }
        put_str(buf, &self.ack_id);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let count = get_u32(buf)? as usize;
        if count > 65536 {
            return Err(WireError::Malformed("mapping list too long".into()));
        }
        let mut mappings = Vec::with_capacity(count);
        for _ in 0..count {
            mappings.push(get_mapping(buf)?);
        }
        Ok(Self {
            mappings,
            ack_id: get_str(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapTargetsResp {
    /// Per-target result code.
    pub results: Vec<(TargetId, i32)>,
}

impl Payload for MapTargetsResp {
    const MSG_TYPE: MsgType = MsgType::MapTargetsResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.results.len() as u32);
        for (target, code) in &self.results {
            put_target_id(buf, *target);
            buf.put_i32_le(*code);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let count = get_u32(buf)? as usize;
        if count > 65536 {
            return Err(WireError::Malformed("result list too long".into()));
        }
        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            results.push((get_target_id(buf)?, get_i32(buf)?));
        }
        Ok(Self { results })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetTargetMappings;

impl Payload for GetTargetMappings {
    const MSG_TYPE: MsgType = MsgType::GetTargetMappings;

    fn encode(&self, _buf: &mut BytesMut) {}

    fn decode(_buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetTargetMappingsResp {
    pub mappings: Vec<TargetMapping>,
}

impl Payload for GetTargetMappingsResp {
    const MSG_TYPE: MsgType = MsgType::GetTargetMappingsResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.mappings.len() as u32);
        for m in &self.mappings {
            put_mapping(buf, m);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let count = get_u32(buf)? as usize;
        if count > 65536 {
            return Err(WireError::Malformed("mapping list too long".into()));
        }
        let mut mappings = Vec::with_capacity(count);
        for _ in 0..count {
            mappings.push(get_mapping(buf)?);
        }
        Ok(Self { mappings })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetTargetStates {
    pub node_type: NodeType,
}

impl Payload for GetTargetStates {
    const MSG_TYPE: MsgType = MsgType::GetTargetStates;

    fn encode(&self, buf: &mut BytesMut) {
        put_node_type(buf, self.node_type);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            node_type: get_node_type(buf)?,
        })
    }
}

/// One target's combined state as reported by the management daemon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetStateReport {
    pub target: TargetId,
    pub reachability: u8,
    pub consistency: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetTargetStatesResp {
    pub states: Vec<TargetStateReport>,
}

impl Payload for GetTargetStatesResp {
    const MSG_TYPE: MsgType = MsgType::GetTargetStatesResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.states.len() as u32);
        for s in &self.states {
            put_target_id(buf, s.target);
            buf.put_u8(s.reachability);
            buf.put_u8(s.consistency);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let count = get_u32(buf)? as usize;
        if count > 65536 {
            return Err(WireError::Malformed("state list too long".into()));
        }
        let mut states = Vec::with_capacity(count);
        for _ in 0..count {
            states.push(TargetStateReport {
                target: get_target_id(buf)?,
                reachability: get_u8(buf)?,
                consistency: get_u8(buf)?,
            });
        }
        Ok(Self { states })
    }
}

/// Change consistency states with optimistic old-state validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetTargetConsistencyStates {
    pub node_type: NodeType,
    pub targets: Vec<TargetId>,
    /// The consistency state the sender last observed, per target.
    pub old_states: Vec<u8>,
    pub new_states: Vec<u8>,
    /// Also force reachability to online (used by a node reporting
    /// about itself right after startup).
    pub set_online: bool,
    pub ack_id: String,
}

impl Payload for SetTargetConsistencyStates {
    const MSG_TYPE: MsgType = MsgType::SetTargetConsistencyStates;

    fn encode(&self, buf: &mut BytesMut) {
        put_node_type(buf, self.node_type);
        buf.put_u32_le(self.targets.len() as u32);
        for t in &self.targets {
            put_target_id(buf, *t);
        }
        buf.put_u32_le(self.old_states.len() as u32);
        buf.put_slice(&self.old_states);
        buf.put_u32_le(self.new_states.len() as u32);
        buf.put_slice(&self.new_states);
        put_bool(buf, self.set_online);
        put_str(buf, &self.ack_id);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let node_type = get_node_type(buf)?;
        let count = get_u32(buf)? as usize;
        if count > 65536 {
            return Err(WireError::Malformed("target list too long".into()));
        }
        let mut targets = Vec::with_capacity(count);
        for _ in 0..count {
            targets.push(get_target_id(buf)?);
        }
        let old_states = crate::serialize::get_bytes(buf)?;
        let new_states = crate::serialize::get_bytes(buf)?;
        let set_online = get_bool(buf)?;
        let ack_id = get_str(buf)?;
        Ok(Self {
            node_type,
            targets,
            old_states,
            new_states,
            set_online,
            ack_id,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetTargetConsistencyStatesResp {
    pub result: i32,
}

impl Payload for SetTargetConsistencyStatesResp {
    const MSG_TYPE: MsgType = MsgType::SetTargetConsistencyStatesResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            result: get_i32(buf)?,
        })
    }
}

/// Create or update a mirror buddy group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetMirrorBuddyGroup {
    pub node_type: NodeType,
    pub primary: TargetId,
    pub secondary: TargetId,
    /// 0 lets the receiver generate an unused ID.
    pub group_id: BuddyGroupId,
    pub allow_update: bool,
    pub ack_id: String,
}

impl Payload for SetMirrorBuddyGroup {
    const MSG_TYPE: MsgType = MsgType::SetMirrorBuddyGroup;

    fn encode(&self, buf: &mut BytesMut) {
        put_node_type(buf, self.node_type);
        put_target_id(buf, self.primary);
        put_target_id(buf, self.secondary);
        put_group_id(buf, self.group_id);
        put_bool(buf, self.allow_update);
        put_str(buf, &self.ack_id);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            node_type: get_node_type(buf)?,
            primary: get_target_id(buf)?,
            secondary: get_target_id(buf)?,
            group_id: get_group_id(buf)?,
            allow_update: get_bool(buf)?,
            ack_id: get_str(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetMirrorBuddyGroupResp {
    pub result: i32,
    pub group_id: BuddyGroupId,
}

impl Payload for SetMirrorBuddyGroupResp {
    const MSG_TYPE: MsgType = MsgType::SetMirrorBuddyGroupResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.result);
        put_group_id(buf, self.group_id);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            result: get_i32(buf)?,
            group_id: get_group_id(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetMirrorBuddyGroups {
    pub node_type: NodeType,
}

impl Payload for GetMirrorBuddyGroups {
    const MSG_TYPE: MsgType = MsgType::GetMirrorBuddyGroups;

    fn encode(&self, buf: &mut BytesMut) {
        put_node_type(buf, self.node_type);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            node_type: get_node_type(buf)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuddyGroupDesc {
    pub group_id: BuddyGroupId,
    pub primary: TargetId,
    pub secondary: TargetId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetMirrorBuddyGroupsResp {
    pub groups: Vec<BuddyGroupDesc>,
}

impl Payload for GetMirrorBuddyGroupsResp {
    const MSG_TYPE: MsgType = MsgType::GetMirrorBuddyGroupsResp;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.groups.len() as u32);
        for g in &self.groups {
            put_group_id(buf, g.group_id);
            put_target_id(buf, g.primary);
            put_target_id(buf, g.secondary);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let count = get_u32(buf)? as usize;
        if count > 65536 {
            return Err(WireError::Malformed("group list too long".into()));
        }
        let mut groups = Vec::with_capacity(count);
        for _ in 0..count {
            groups.push(BuddyGroupDesc {
                group_id: get_group_id(buf)?,
                primary: get_target_id(buf)?,
                secondary: get_target_id(buf)?,
            });
        }
        Ok(Self { groups })
    }
}

/// Control codes of `GenericResponse`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum GenericRespCode {
    /// Retry the request after a short delay.
    TryAgain = 0,
    /// An internal communication error occurred; the requestor may retry.
    IndirectCommErr = 1,
    /// An internal communication error occurred; retrying will not help.
    IndirectCommErrNotAgain = 2,
    /// Server-side sequence tracking was reset; restart the local
    /// counter from the supplied base.
    NewSeqNoBase = 3,
}

impl GenericRespCode {
    #[must_use]
    pub const fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::TryAgain),
            1 => Some(Self::IndirectCommErr),
            2 => Some(Self::IndirectCommErrNotAgain),
            3 => Some(Self::NewSeqNoBase),
            _ => None,
        }
    }
}

/// Generic control response usable by any requestor's retry logic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericResponse {
    pub code: GenericRespCode,
    /// Meaningful only for `NewSeqNoBase`.
    pub new_seq_base: u64,
    pub description: String,
}

impl GenericResponse {
    #[must_use]
    pub fn new(code: GenericRespCode, description: impl Into<String>) -> Self {
        Self {
            code,
            new_seq_base: 0,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn new_seq_base(base: u64) -> Self {
        Self {
            code: GenericRespCode::NewSeqNoBase,
            new_seq_base: base,
            description: "new seqNoBase".to_string(),
        }
    }
}

impl Payload for GenericResponse {
    const MSG_TYPE: MsgType = MsgType::GenericResponse;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.code as u32);
        buf.put_u64_le(self.new_seq_base);
        put_str(buf, &self.description);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let raw = get_u32(buf)?;
        let code = GenericRespCode::from_u32(raw)
            .ok_or_else(|| WireError::Malformed(format!("unknown generic response code: {raw}")))?;
        Ok(Self {
            code,
            new_seq_base: get_u64(buf)?,
            description: get_str(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn round_trip<P: Payload + PartialEq + std::fmt::Debug>(payload: &P) {
        let mut buf = BytesMut::new();
        payload.encode(&mut buf);
        let mut bytes = buf.freeze();
        let decoded = P::decode(&mut bytes).unwrap();
        assert_eq!(&decoded, payload);
    }

    #[test]
    fn test_heartbeat_round_trip() {
        round_trip(&Heartbeat {
            node_id: "meta01".to_string(),
            num_id: NodeNumId(12),
            node_type: NodeType::Meta,
            tcp_port: 8005,
            udp_port: 8006,
            nics: vec![NicAddress::new("192.168.1.5".parse().unwrap(), "eth0")],
            feature_flags: 0x0003,
            root_info: Some(RootInfo {
                owner: NodeNumId(12),
                is_buddy_mirrored: true,
            }),
            ack_id: "hb-17".to_string(),
        });
    }

    #[test]
    fn test_set_mirror_buddy_group_round_trip() {
        round_trip(&SetMirrorBuddyGroup {
            node_type: NodeType::Meta,
            primary: TargetId(10),
            secondary: TargetId(20),
            group_id: BuddyGroupId(0),
            allow_update: false,
            ack_id: String::new(),
        });
    }

    #[test]
    fn test_generic_response_round_trip() {
        round_trip(&GenericResponse::new_seq_base(0xdead_beef));
        round_trip(&GenericResponse::new(GenericRespCode::TryAgain, "busy"));
    }

    #[test]
    fn test_set_consistency_states_round_trip() {
        round_trip(&SetTargetConsistencyStates {
            node_type: NodeType::Meta,
            targets: vec![TargetId(20)],
            old_states: vec![0],
            new_states: vec![1],
            set_online: false,
            ack_id: "cs-1".to_string(),
        });
    }
}
