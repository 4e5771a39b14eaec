//! PairFS metadata daemon core
//!
//! The pieces behind `bin/pairfs-meta`: the in-memory namespace, the
//! per-entry lock store, client sessions with sequence-number tracking,
//! the mirrored-operation engine that forwards writes to the buddy
//! secondary, the buddy resync job, and the internode sync loop.

pub mod app;
pub mod candidates;
pub mod handler;
pub mod locks;
pub mod mirror;
pub mod resync;
pub mod server;
pub mod session;
pub mod store;
pub mod syncer;

pub use app::App;
pub use candidates::{SyncCandidate, SyncCandidateStore};
pub use locks::{EntryLockState, EntryLockStore};
pub use resync::{BuddyResyncJob, BuddyResyncer, ResyncJobState};
pub use session::SessionStore;
pub use store::MetaStore;
pub use syncer::InternodeSyncer;
