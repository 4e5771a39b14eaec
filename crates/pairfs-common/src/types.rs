//! Core type definitions for PairFS
//!
//! Identifiers, node roles, per-target state and the entry addressing
//! tuple used by the wire protocol.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use uuid::Uuid;

/// Numeric node ID. ID 0 is reserved and only valid inside the
/// management daemon's own bootstrap store.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    From, Into,
)]
#[display("{_0}")]
pub struct NodeNumId(pub u32);

impl NodeNumId {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NodeNumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeNumId({})", self.0)
    }
}

/// Numeric storage/metadata target ID.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    From, Into,
)]
#[display("{_0}")]
pub struct TargetId(pub u16);

impl TargetId {
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetId({})", self.0)
    }
}

/// Mirror buddy group ID. 0 means "generate one for me" in mapping
/// requests and is never a valid stored ID.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    From, Into,
)]
#[display("{_0}")]
pub struct BuddyGroupId(pub u16);

impl BuddyGroupId {
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn is_auto(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for BuddyGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuddyGroupId({})", self.0)
    }
}

/// Storage pool ID a target belongs to.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[display("{_0}")]
pub struct PoolId(pub u16);

impl PoolId {
    pub const DEFAULT: Self = Self(1);

    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl Default for PoolId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Debug for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolId({})", self.0)
    }
}

/// Role of a node in the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Meta,
    Storage,
    Mgmt,
    Client,
}

impl NodeType {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Meta => 1,
            Self::Storage => 2,
            Self::Mgmt => 3,
            Self::Client => 4,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Meta),
            2 => Some(Self::Storage),
            3 => Some(Self::Mgmt),
            4 => Some(Self::Client),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Meta => "meta",
            Self::Storage => "storage",
            Self::Mgmt => "mgmt",
            Self::Client => "client",
        };
        f.write_str(name)
    }
}

/// One network interface a node can be reached on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicAddress {
    pub addr: IpAddr,
    /// Interface name as reported by the node ("eth0", "ib0", ...)
    pub name: String,
}

impl NicAddress {
    #[must_use]
    pub fn new(addr: IpAddr, name: impl Into<String>) -> Self {
        Self {
            addr,
            name: name.into(),
        }
    }

    #[must_use]
    pub const fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.addr, port)
    }
}

/// Reachability of a target, derived from heartbeat presence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReachabilityState {
    Online,
    ProbablyOffline,
    Offline,
}

impl ReachabilityState {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Online => 0,
            Self::ProbablyOffline => 1,
            Self::Offline => 2,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Online),
            1 => Some(Self::ProbablyOffline),
            2 => Some(Self::Offline),
            _ => None,
        }
    }
}

impl fmt::Display for ReachabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Online => "online",
            Self::ProbablyOffline => "probably-offline",
            Self::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Consistency of a target's replica data, gating primary promotion and
/// trusted reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsistencyState {
    Good,
    NeedsResync,
    Bad,
}

impl ConsistencyState {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Good => 0,
            Self::NeedsResync => 1,
            Self::Bad => 2,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Good),
            1 => Some(Self::NeedsResync),
            2 => Some(Self::Bad),
            _ => None,
        }
    }
}

impl fmt::Display for ConsistencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Good => "good",
            Self::NeedsResync => "needs-resync",
            Self::Bad => "bad",
        };
        f.write_str(name)
    }
}

/// Reachability and consistency of a target, tracked together because
/// the forwarding path must check both in a single lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedTargetState {
    pub reachability: ReachabilityState,
    pub consistency: ConsistencyState,
}

impl CombinedTargetState {
    #[must_use]
    pub const fn new(reachability: ReachabilityState, consistency: ConsistencyState) -> Self {
        Self {
            reachability,
            consistency,
        }
    }

    /// The only state in which a secondary may receive forwarded
    /// mirrored operations.
    #[must_use]
    pub const fn is_online_and_good(self) -> bool {
        matches!(self.reachability, ReachabilityState::Online)
            && matches!(self.consistency, ConsistencyState::Good)
    }
}

impl Default for CombinedTargetState {
    fn default() -> Self {
        Self::new(ReachabilityState::Offline, ConsistencyState::Good)
    }
}

impl fmt::Display for CombinedTargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.reachability, self.consistency)
    }
}

/// Errors that can occur when decoding an entry ID from the wire.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EntryIdError {
    #[error("entry ID is empty")]
    Empty,
    #[error("entry ID exceeds {max} bytes", max = EntryId::MAX_LEN)]
    TooLong,
}

/// Identifier of a filesystem entry (directory or file), unique per
/// metadata namespace. Generated once at create time and identical on
/// both replicas of a buddy group.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct EntryId(String);

impl EntryId {
    pub const MAX_LEN: usize = 255;

    /// The fixed ID of a namespace root directory.
    #[must_use]
    pub fn root() -> Self {
        Self("root".to_string())
    }

    /// Generate a fresh unique entry ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().as_simple().to_string())
    }

    /// Decode an ID received from the wire.
    pub fn parse(raw: impl Into<String>) -> Result<Self, EntryIdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(EntryIdError::Empty);
        }
        if raw.len() > Self::MAX_LEN {
            return Err(EntryIdError::TooLong);
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "root"
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

/// Kind of a filesystem entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Directory,
    File,
}

impl EntryType {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Directory => 1,
            Self::File => 2,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Directory),
            2 => Some(Self::File),
            _ => None,
        }
    }
}

/// Owner of a filesystem entry: a single metadata node, or a buddy
/// group when the entry is mirrored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryOwner {
    Node(NodeNumId),
    Group(BuddyGroupId),
}

impl EntryOwner {
    #[must_use]
    pub const fn is_mirrored(self) -> bool {
        matches!(self, Self::Group(_))
    }
}

/// Feature flag: the entry is buddy mirrored.
pub const ENTRY_FLAG_BUDDYMIRRORED: u16 = 1 << 0;

/// The identifying tuple used to address a filesystem object across the
/// wire protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub owner: EntryOwner,
    pub parent_id: EntryId,
    pub entry_id: EntryId,
    pub name: String,
    pub entry_type: EntryType,
    pub feature_flags: u16,
}

impl EntryInfo {
    #[must_use]
    pub const fn is_buddy_mirrored(&self) -> bool {
        self.feature_flags & ENTRY_FLAG_BUDDYMIRRORED != 0
    }
}

/// POSIX-ish attributes carried by mirrored setattr/create operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAttrs {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

/// Entry timestamps in UNIX seconds. On mirrored operations the primary
/// resolves these once and forwards them, so both replicas store the
/// same values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub access: i64,
    pub modify: i64,
    pub change: i64,
}

impl Timestamps {
    #[must_use]
    pub const fn all(at: i64) -> Self {
        Self {
            access: at,
            modify: at,
            change: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_generate_unique() {
        let a = EntryId::generate();
        let b = EntryId::generate();
        assert_ne!(a, b);
        assert!(!a.is_root());
    }

    #[test]
    fn test_entry_id_parse() {
        assert!(EntryId::parse("").is_err());
        assert!(EntryId::parse("a".repeat(256)).is_err());
        let id = EntryId::parse("root").unwrap();
        assert!(id.is_root());
    }

    #[test]
    fn test_state_codes() {
        for state in [
            ReachabilityState::Online,
            ReachabilityState::ProbablyOffline,
            ReachabilityState::Offline,
        ] {
            assert_eq!(ReachabilityState::from_code(state.code()), Some(state));
        }
        for state in [
            ConsistencyState::Good,
            ConsistencyState::NeedsResync,
            ConsistencyState::Bad,
        ] {
            assert_eq!(ConsistencyState::from_code(state.code()), Some(state));
        }
        assert_eq!(ConsistencyState::from_code(99), None);
    }

    #[test]
    fn test_combined_state_gate() {
        let good = CombinedTargetState::new(ReachabilityState::Online, ConsistencyState::Good);
        assert!(good.is_online_and_good());

        let resync =
            CombinedTargetState::new(ReachabilityState::Online, ConsistencyState::NeedsResync);
        assert!(!resync.is_online_and_good());

        let offline = CombinedTargetState::new(ReachabilityState::Offline, ConsistencyState::Good);
        assert!(!offline.is_online_and_good());
    }
}
