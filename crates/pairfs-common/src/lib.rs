//! Common types for PairFS
//!
//! This crate contains the fundamental types shared by all PairFS
//! components: identifiers, target states, entry addressing, the
//! universal `OpsErr` result code, and daemon configuration.

pub mod config;
pub mod error;
pub mod types;

pub use error::OpsErr;
pub use types::{
    BuddyGroupId, CombinedTargetState, ConsistencyState, EntryAttrs, EntryId, EntryInfo,
    EntryOwner, EntryType, NicAddress, NodeNumId, NodeType, PoolId, ReachabilityState, TargetId,
    Timestamps,
};
