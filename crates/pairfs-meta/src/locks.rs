//! Per-entry lock store
//!
//! Serializes concurrent mirrored operations touching the same
//! filesystem entry. The same lock kinds are taken on the primary and,
//! for the forwarded copy, on the secondary, so effects apply in lock
//! acquisition order on both replicas.
//!
//! Lock acquisition order (deadlock avoidance):
//!   1. directory ID lock (write for structure changes, read otherwise)
//!   2. parent-ID + name lock
//!   3. file ID lock
//!
//! Acquisitions race a shutdown watch channel and fail fast with
//! `Interrupted` once shutdown begins.

use pairfs_common::OpsErr;
use pairfs_common::types::EntryId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard,
    RwLock as AsyncRwLock,
};

/// One held entry lock.
pub enum HeldLock {
    DirRead(OwnedRwLockReadGuard<()>),
    DirWrite(OwnedRwLockWriteGuard<()>),
    Name(OwnedMutexGuard<()>),
    File(OwnedMutexGuard<()>),
}

/// All locks one operation holds; released on drop, on every exit path.
#[derive(Default)]
pub struct EntryLockState {
    guards: Vec<HeldLock>,
}

impl EntryLockState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, guard: HeldLock) {
        self.guards.push(guard);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

pub struct EntryLockStore {
    dir_locks: Mutex<HashMap<EntryId, Arc<AsyncRwLock<()>>>>,
    file_locks: Mutex<HashMap<EntryId, Arc<AsyncMutex<()>>>>,
    name_locks: Mutex<HashMap<(EntryId, String), Arc<AsyncMutex<()>>>>,
    shutdown: watch::Receiver<bool>,
}

impl EntryLockStore {
    #[must_use]
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            dir_locks: Mutex::new(HashMap::new()),
            file_locks: Mutex::new(HashMap::new()),
            name_locks: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    async fn wait_interruptible<G>(
        &self,
        acquire: impl Future<Output = G>,
    ) -> Result<G, OpsErr> {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Err(OpsErr::Interrupted);
        }
        tokio::select! {
            guard = acquire => Ok(guard),
            _ = shutdown.wait_for(|stop| *stop) => Err(OpsErr::Interrupted),
        }
    }

    pub async fn lock_dir(&self, id: &EntryId, write: bool) -> Result<HeldLock, OpsErr> {
        let lock = self
            .dir_locks
            .lock()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(AsyncRwLock::new(())))
            .clone();

        if write {
            let guard = self.wait_interruptible(lock.write_owned()).await?;
            Ok(HeldLock::DirWrite(guard))
        } else {
            let guard = self.wait_interruptible(lock.read_owned()).await?;
            Ok(HeldLock::DirRead(guard))
        }
    }

    pub async fn lock_name(&self, parent: &EntryId, name: &str) -> Result<HeldLock, OpsErr> {
        let lock = self
            .name_locks
            .lock()
            .entry((parent.clone(), name.to_string()))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        let guard = self.wait_interruptible(lock.lock_owned()).await?;
        Ok(HeldLock::Name(guard))
    }

    pub async fn lock_file(&self, id: &EntryId) -> Result<HeldLock, OpsErr> {
        let lock = self
            .file_locks
            .lock()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        let guard = self.wait_interruptible(lock.lock_owned()).await?;
        Ok(HeldLock::File(guard))
    }

    /// Drop lock map entries nobody holds. Called periodically by the
    /// internode syncer to keep the maps bounded by the working set.
    pub fn shrink(&self) {
        self.dir_locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        self.file_locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        self.name_locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store() -> (watch::Sender<bool>, EntryLockStore) {
        let (tx, rx) = watch::channel(false);
        (tx, EntryLockStore::new(rx))
    }

    #[tokio::test]
    async fn test_same_entry_is_exclusive() {
        let (_tx, store) = store();
        let id = EntryId::generate();

        let first = store.lock_dir(&id, true).await.unwrap();

        let second = tokio::time::timeout(
            Duration::from_millis(50),
            store.lock_dir(&id, true),
        )
        .await;
        assert!(second.is_err(), "write lock must block a second writer");

        drop(first);
        let third = store.lock_dir(&id, true).await.unwrap();
        drop(third);
    }

    #[tokio::test]
    async fn test_read_locks_shared() {
        let (_tx, store) = store();
        let id = EntryId::generate();

        let a = store.lock_dir(&id, false).await.unwrap();
        let b = store.lock_dir(&id, false).await.unwrap();
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_waiters() {
        let (tx, store) = store();
        let store = Arc::new(store);
        let id = EntryId::generate();

        let held = store.lock_file(&id).await.unwrap();

        let waiter = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { store.lock_file(&id).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap_err(), OpsErr::Interrupted);
        drop(held);
    }

    #[tokio::test]
    async fn test_shrink_keeps_held_locks() {
        let (_tx, store) = store();
        let id = EntryId::generate();
        let other = EntryId::generate();

        let held = store.lock_file(&id).await.unwrap();
        let released = store.lock_file(&other).await.unwrap();
        drop(released);

        store.shrink();

        assert!(store.file_locks.lock().contains_key(&id));
        assert!(!store.file_locks.lock().contains_key(&other));
        drop(held);
    }

    #[tokio::test]
    async fn test_name_locks_are_per_name() {
        let (_tx, store) = store();
        let parent = EntryId::generate();

        let a = store.lock_name(&parent, "a").await.unwrap();
        // a different name under the same parent does not conflict
        let b = store.lock_name(&parent, "b").await.unwrap();
        drop(a);
        drop(b);
    }
}
