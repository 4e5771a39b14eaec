//! Buddy resync
//!
//! `BuddyResyncer` holds at most one resync job at a time; a fresh job
//! object is created for every run so that start/finish transitions of
//! different runs can never race on shared state.

pub mod job;

pub use job::{BuddyResyncJob, ResyncJobState, ResyncStatsSnapshot};

use crate::app::App;
use pairfs_common::OpsErr;
use pairfs_common::types::NodeNumId;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
pub struct BuddyResyncer {
    current: Mutex<Option<Arc<BuddyResyncJob>>>,
}

impl BuddyResyncer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a resync of the local group's secondary. Returns `InUse`
    /// while a job is running, `InvalidArg` if the local node is not a
    /// group primary, `UnknownTarget` without group membership.
    pub fn start(&self, app: &Arc<App>) -> OpsErr {
        let mut current = self.current.lock();

        if current.as_ref().is_some_and(|job| job.is_running()) {
            return OpsErr::InUse;
        }

        let Some((group, is_primary)) = app.buddy_mapper.local_group() else {
            return OpsErr::UnknownTarget;
        };
        if !is_primary {
            return OpsErr::InvalidArg;
        }
        let Some(secondary) = app.buddy_mapper.secondary_of(group) else {
            return OpsErr::UnknownTarget;
        };

        let buddy_node = NodeNumId(u32::from(secondary.value()));
        let job = Arc::new(BuddyResyncJob::new(group, secondary, buddy_node));
        *current = Some(job.clone());

        let app = app.clone();
        tokio::spawn(async move {
            job::run(app, job).await;
        });

        OpsErr::Success
    }

    /// Abort the running job, if any.
    pub fn abort(&self) -> OpsErr {
        match &*self.current.lock() {
            Some(job) if job.is_running() => {
                job.abort();
                OpsErr::Success
            }
            _ => OpsErr::InvalidArg,
        }
    }

    #[must_use]
    pub fn current_job(&self) -> Option<Arc<BuddyResyncJob>> {
        self.current.lock().clone()
    }

    #[must_use]
    pub fn job_state(&self) -> Option<ResyncJobState> {
        self.current.lock().as_ref().map(|job| job.state())
    }
}
