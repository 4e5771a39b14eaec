//! Node/target directory and mirror buddy group mapping
//!
//! The stores in this crate are the membership, mapping and state
//! source the mirrored-message protocol consults: which nodes exist and
//! how to reach them, which targets live on which node, what
//! reachability/consistency state each target is in, and which
//! primary/secondary pairs form buddy groups.

pub mod buddy_mapper;
pub mod node;
pub mod persist;
pub mod state_store;
pub mod store;
pub mod target_mapper;

pub use buddy_mapper::BuddyGroupMapper;
pub use node::Node;
pub use persist::{PersistedState, StatePersister};
pub use state_store::TargetStateStore;
pub use store::{NodeStore, NodeStoreResult};
pub use target_mapper::TargetMapper;
