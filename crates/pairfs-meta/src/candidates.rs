//! Sync candidate store
//!
//! Producer/consumer queue between the mirrored-op workers (producers,
//! while a resync is running) and the resync job (single consumer).
//! Unbounded on purpose: dropping a candidate would leave the
//! secondary silently out of sync after the job reports success.

use pairfs_common::types::{EntryId, EntryType};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;

/// A modified or deleted entry queued for replay to the secondary.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SyncCandidate {
    pub entry_id: EntryId,
    pub parent_id: EntryId,
    pub name: String,
    pub entry_type: EntryType,
    pub deleted: bool,
}

#[derive(Default)]
struct Queue {
    items: VecDeque<SyncCandidate>,
    /// Collapses duplicates that are still pending; once popped, the
    /// same entry may be queued again.
    pending: HashSet<(EntryId, bool)>,
}

#[derive(Default)]
pub struct SyncCandidateStore {
    queue: Mutex<Queue>,
    notify: Notify,
}

impl SyncCandidateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, candidate: SyncCandidate) {
        let key = (candidate.entry_id.clone(), candidate.deleted);
        let mut queue = self.queue.lock();
        if queue.pending.insert(key) {
            queue.items.push_back(candidate);
            drop(queue);
            self.notify.notify_one();
        }
    }

    pub fn push_all(&self, candidates: impl IntoIterator<Item = SyncCandidate>) {
        for candidate in candidates {
            self.push(candidate);
        }
    }

    #[must_use]
    pub fn try_pop(&self) -> Option<SyncCandidate> {
        let mut queue = self.queue.lock();
        let candidate = queue.items.pop_front()?;
        queue
            .pending
            .remove(&(candidate.entry_id.clone(), candidate.deleted));
        Some(candidate)
    }

    /// Pop the next candidate, waiting up to `idle` for one to arrive.
    /// `None` after an idle period means the producers were quiet.
    pub async fn pop_or_idle(&self, idle: Duration) -> Option<SyncCandidate> {
        if let Some(candidate) = self.try_pop() {
            return Some(candidate);
        }
        let _ = tokio::time::timeout(idle, self.notify.notified()).await;
        self.try_pop()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().items.is_empty()
    }

    pub fn clear(&self) {
        let mut queue = self.queue.lock();
        queue.items.clear();
        queue.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, deleted: bool) -> SyncCandidate {
        SyncCandidate {
            entry_id: EntryId::parse(format!("id-{name}")).unwrap(),
            parent_id: EntryId::root(),
            name: name.to_string(),
            entry_type: EntryType::File,
            deleted,
        }
    }

    #[test]
    fn test_fifo_order() {
        let store = SyncCandidateStore::new();
        store.push(candidate("a", false));
        store.push(candidate("b", false));

        assert_eq!(store.try_pop().unwrap().name, "a");
        assert_eq!(store.try_pop().unwrap().name, "b");
        assert!(store.try_pop().is_none());
    }

    #[test]
    fn test_pending_duplicates_collapse() {
        let store = SyncCandidateStore::new();
        store.push(candidate("a", false));
        store.push(candidate("a", false));
        assert_eq!(store.len(), 1);

        // a tombstone for the same entry is a distinct candidate
        store.push(candidate("a", true));
        assert_eq!(store.len(), 2);

        // once popped, the entry may be queued again
        store.try_pop().unwrap();
        store.push(candidate("a", false));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_pop_or_idle_times_out() {
        let store = SyncCandidateStore::new();
        let popped = store.pop_or_idle(Duration::from_millis(20)).await;
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_pop_or_idle_wakes_on_push() {
        let store = std::sync::Arc::new(SyncCandidateStore::new());

        let consumer = {
            let store = store.clone();
            tokio::spawn(async move { store.pop_or_idle(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        store.push(candidate("late", false));

        let popped = consumer.await.unwrap();
        assert_eq!(popped.unwrap().name, "late");
    }
}
