//! In-memory metadata namespace
//!
//! Directories and files keyed by entry ID, with parent/child links.
//! Mutating operations accept primary-resolved (entry ID, timestamps)
//! overrides so that a forwarded copy applied on the secondary stores
//! exactly what the primary stored. Multi-entry mutations run under one
//! store lock; cross-operation serialization per entry is the job of
//! the entry lock store, not this map.

use pairfs_common::OpsErr;
use pairfs_common::types::{EntryAttrs, EntryId, EntryType, NodeNumId, Timestamps};
use pairfs_wire::msgs::{
    FLOCK_EXCLUSIVE, FLOCK_SHARED, FLOCK_UNLOCK, OPEN_CREATE, ResyncEntry, SETATTR_GID,
    SETATTR_MODE, SETATTR_SIZE, SETATTR_UID,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// Entry-ID hash buckets the resync tree walk iterates over.
pub const SYNC_BUCKETS: u64 = 128;

/// One granted file lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLockEntry {
    pub handle_id: String,
    pub client: NodeNumId,
    pub exclusive: bool,
}

#[derive(Clone, Debug)]
struct Inode {
    entry_id: EntryId,
    parent_id: EntryId,
    name: String,
    entry_type: EntryType,
    attrs: EntryAttrs,
    timestamps: Timestamps,
    /// Name -> entry ID; unused for files.
    children: BTreeMap<String, EntryId>,
    locks: Vec<FileLockEntry>,
}

impl Inode {
    fn snapshot(&self) -> ResyncEntry {
        ResyncEntry {
            entry_id: self.entry_id.clone(),
            parent_id: self.parent_id.clone(),
            name: self.name.clone(),
            entry_type: self.entry_type,
            deleted: false,
            attrs: self.attrs,
            timestamps: self.timestamps,
        }
    }
}

/// The namespace store of one metadata daemon.
pub struct MetaStore {
    entries: RwLock<HashMap<EntryId, Inode>>,
}

impl Default for MetaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaStore {
    #[must_use]
    pub fn new() -> Self {
        let root = Inode {
            entry_id: EntryId::root(),
            parent_id: EntryId::root(),
            name: String::new(),
            entry_type: EntryType::Directory,
            attrs: EntryAttrs {
                mode: 0o755,
                uid: 0,
                gid: 0,
                size: 0,
            },
            timestamps: Timestamps::all(0),
            children: BTreeMap::new(),
            locks: Vec::new(),
        };

        let mut entries = HashMap::new();
        entries.insert(EntryId::root(), root);
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn now() -> Timestamps {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64);
        Timestamps::all(secs)
    }

    /// Create a directory under `parent_id`. The secondary applying a
    /// forwarded copy passes the primary's entry ID and timestamps so
    /// both replicas store identical values.
    pub fn mkdir(
        &self,
        parent_id: &EntryId,
        name: &str,
        attrs: EntryAttrs,
        forced_id: Option<EntryId>,
        forced_ts: Option<Timestamps>,
    ) -> Result<(EntryId, Timestamps), OpsErr> {
        if name.is_empty() {
            return Err(OpsErr::InvalidArg);
        }

        let mut entries = self.entries.write();

        let parent = entries.get(parent_id).ok_or(OpsErr::PathNotExists)?;
        if parent.entry_type != EntryType::Directory {
            return Err(OpsErr::PathNotExists);
        }
        if parent.children.contains_key(name) {
            return Err(OpsErr::Exists);
        }

        let entry_id = forced_id.unwrap_or_else(EntryId::generate);
        let ts = forced_ts.unwrap_or_else(Self::now);

        entries.insert(
            entry_id.clone(),
            Inode {
                entry_id: entry_id.clone(),
                parent_id: parent_id.clone(),
                name: name.to_string(),
                entry_type: EntryType::Directory,
                attrs,
                timestamps: ts,
                children: BTreeMap::new(),
                locks: Vec::new(),
            },
        );

        let parent = entries
            .get_mut(parent_id)
            .expect("parent checked above under the same lock");
        parent.children.insert(name.to_string(), entry_id.clone());
        parent.timestamps.modify = ts.modify;
        parent.timestamps.change = ts.change;

        Ok((entry_id, ts))
    }

    /// Remove an empty directory. Returns the removed entry's ID and
    /// the parent's updated timestamps.
    pub fn rmdir(
        &self,
        parent_id: &EntryId,
        name: &str,
        forced_ts: Option<Timestamps>,
    ) -> Result<(EntryId, Timestamps), OpsErr> {
        let mut entries = self.entries.write();

        let parent = entries.get(parent_id).ok_or(OpsErr::PathNotExists)?;
        let child_id = parent.children.get(name).ok_or(OpsErr::PathNotExists)?.clone();

        let child = entries.get(&child_id).ok_or(OpsErr::PathNotExists)?;
        if child.entry_type != EntryType::Directory {
            return Err(OpsErr::InvalidArg);
        }
        if !child.children.is_empty() {
            return Err(OpsErr::NotEmpty);
        }

        entries.remove(&child_id);

        let ts = forced_ts.unwrap_or_else(Self::now);
        let parent = entries
            .get_mut(parent_id)
            .expect("parent checked above under the same lock");
        parent.children.remove(name);
        parent.timestamps.modify = ts.modify;
        parent.timestamps.change = ts.change;

        Ok((child_id, ts))
    }

    /// Move an entry. Refuses to overwrite an existing destination.
    pub fn rename(
        &self,
        from_parent: &EntryId,
        old_name: &str,
        to_parent: &EntryId,
        new_name: &str,
        forced_ts: Option<Timestamps>,
    ) -> Result<(EntryId, Timestamps), OpsErr> {
        if new_name.is_empty() {
            return Err(OpsErr::InvalidArg);
        }

        let mut entries = self.entries.write();

        let source = entries.get(from_parent).ok_or(OpsErr::PathNotExists)?;
        let moved_id = source.children.get(old_name).ok_or(OpsErr::PathNotExists)?.clone();

        let dest = entries.get(to_parent).ok_or(OpsErr::PathNotExists)?;
        if dest.entry_type != EntryType::Directory {
            return Err(OpsErr::PathNotExists);
        }
        if dest.children.contains_key(new_name) {
            return Err(OpsErr::Exists);
        }

        let ts = forced_ts.unwrap_or_else(Self::now);

        let source = entries
            .get_mut(from_parent)
            .expect("checked above under the same lock");
        source.children.remove(old_name);
        source.timestamps.modify = ts.modify;
        source.timestamps.change = ts.change;

        let dest = entries
            .get_mut(to_parent)
            .expect("checked above under the same lock");
        dest.children.insert(new_name.to_string(), moved_id.clone());
        dest.timestamps.modify = ts.modify;
        dest.timestamps.change = ts.change;

        let moved = entries
            .get_mut(&moved_id)
            .expect("child links are kept consistent with entries");
        moved.parent_id = to_parent.clone();
        moved.name = new_name.to_string();
        moved.timestamps.change = ts.change;

        Ok((moved_id, ts))
    }

    /// Apply selected attributes to an entry.
    pub fn set_attr(
        &self,
        entry_id: &EntryId,
        attrs: &EntryAttrs,
        valid: u32,
        forced_ts: Option<Timestamps>,
    ) -> Result<Timestamps, OpsErr> {
        let mut entries = self.entries.write();
        let inode = entries.get_mut(entry_id).ok_or(OpsErr::PathNotExists)?;

        if valid & SETATTR_MODE != 0 {
            inode.attrs.mode = attrs.mode;
        }
        if valid & SETATTR_UID != 0 {
            inode.attrs.uid = attrs.uid;
        }
        if valid & SETATTR_GID != 0 {
            inode.attrs.gid = attrs.gid;
        }
        if valid & SETATTR_SIZE != 0 {
            inode.attrs.size = attrs.size;
        }

        let ts = forced_ts.unwrap_or_else(Self::now);
        inode.timestamps.change = ts.change;
        Ok(ts)
    }

    /// Truncate a file to `size`.
    pub fn truncate(
        &self,
        entry_id: &EntryId,
        size: u64,
        forced_ts: Option<Timestamps>,
    ) -> Result<Timestamps, OpsErr> {
        let mut entries = self.entries.write();
        let inode = entries.get_mut(entry_id).ok_or(OpsErr::PathNotExists)?;
        if inode.entry_type != EntryType::File {
            return Err(OpsErr::InvalidArg);
        }

        inode.attrs.size = size;
        let ts = forced_ts.unwrap_or_else(Self::now);
        inode.timestamps.modify = ts.modify;
        inode.timestamps.change = ts.change;
        Ok(ts)
    }

    /// Resolve (and with `OPEN_CREATE` possibly create) a file for
    /// opening. Returns the file's ID, its timestamps after the open
    /// and whether it was created.
    pub fn open_file(
        &self,
        parent_id: &EntryId,
        name: &str,
        access_flags: u32,
        forced_id: Option<EntryId>,
        forced_ts: Option<Timestamps>,
    ) -> Result<(EntryId, Timestamps, bool), OpsErr> {
        let mut entries = self.entries.write();

        let parent = entries.get(parent_id).ok_or(OpsErr::PathNotExists)?;
        if parent.entry_type != EntryType::Directory {
            return Err(OpsErr::PathNotExists);
        }

        if let Some(existing) = parent.children.get(name).cloned() {
            let ts = forced_ts.unwrap_or_else(Self::now);
            let inode = entries
                .get_mut(&existing)
                .ok_or(OpsErr::PathNotExists)?;
            if inode.entry_type != EntryType::File {
                return Err(OpsErr::InvalidArg);
            }
            inode.timestamps.access = ts.access;
            return Ok((existing, inode.timestamps, false));
        }

        if access_flags & OPEN_CREATE == 0 {
            return Err(OpsErr::PathNotExists);
        }

        let entry_id = forced_id.unwrap_or_else(EntryId::generate);
        let ts = forced_ts.unwrap_or_else(Self::now);
        entries.insert(
            entry_id.clone(),
            Inode {
                entry_id: entry_id.clone(),
                parent_id: parent_id.clone(),
                name: name.to_string(),
                entry_type: EntryType::File,
                attrs: EntryAttrs {
                    mode: 0o644,
                    uid: 0,
                    gid: 0,
                    size: 0,
                },
                timestamps: ts,
                children: BTreeMap::new(),
                locks: Vec::new(),
            },
        );

        let parent = entries
            .get_mut(parent_id)
            .expect("parent checked above under the same lock");
        parent.children.insert(name.to_string(), entry_id.clone());
        parent.timestamps.modify = ts.modify;
        parent.timestamps.change = ts.change;

        Ok((entry_id, ts, true))
    }

    /// Advisory file lock. Unlock always succeeds; a conflicting grant
    /// request fails with `InUse`.
    pub fn flock(
        &self,
        entry_id: &EntryId,
        handle_id: &str,
        client: NodeNumId,
        lock_type: u8,
    ) -> OpsErr {
        let mut entries = self.entries.write();
        let Some(inode) = entries.get_mut(entry_id) else {
            return OpsErr::PathNotExists;
        };
        if inode.entry_type != EntryType::File {
            return OpsErr::InvalidArg;
        }

        match lock_type {
            FLOCK_UNLOCK => {
                inode.locks.retain(|l| l.handle_id != handle_id);
                OpsErr::Success
            }
            FLOCK_SHARED => {
                let conflict = inode
                    .locks
                    .iter()
                    .any(|l| l.exclusive && l.handle_id != handle_id);
                if conflict {
                    return OpsErr::InUse;
                }
                inode.locks.retain(|l| l.handle_id != handle_id);
                inode.locks.push(FileLockEntry {
                    handle_id: handle_id.to_string(),
                    client,
                    exclusive: false,
                });
                OpsErr::Success
            }
            FLOCK_EXCLUSIVE => {
                let conflict = inode.locks.iter().any(|l| l.handle_id != handle_id);
                if conflict {
                    return OpsErr::InUse;
                }
                inode.locks.retain(|l| l.handle_id != handle_id);
                inode.locks.push(FileLockEntry {
                    handle_id: handle_id.to_string(),
                    client,
                    exclusive: true,
                });
                OpsErr::Success
            }
            _ => OpsErr::InvalidArg,
        }
    }

    /// Drop all locks a handle holds on an entry (close path).
    pub fn release_locks_for_handle(&self, entry_id: &EntryId, handle_id: &str) {
        let mut entries = self.entries.write();
        if let Some(inode) = entries.get_mut(entry_id) {
            inode.locks.retain(|l| l.handle_id != handle_id);
        }
    }

    #[must_use]
    pub fn locks_of(&self, entry_id: &EntryId) -> Vec<FileLockEntry> {
        self.entries
            .read()
            .get(entry_id)
            .map(|i| i.locks.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn lookup(&self, parent_id: &EntryId, name: &str) -> Option<(EntryId, EntryType)> {
        let entries = self.entries.read();
        let parent = entries.get(parent_id)?;
        let child_id = parent.children.get(name)?;
        let child = entries.get(child_id)?;
        Some((child_id.clone(), child.entry_type))
    }

    #[must_use]
    pub fn stat(&self, entry_id: &EntryId) -> Option<(EntryAttrs, Timestamps, EntryType)> {
        self.entries
            .read()
            .get(entry_id)
            .map(|i| (i.attrs, i.timestamps, i.entry_type))
    }

    pub fn list_dir(&self, parent_id: &EntryId) -> Result<Vec<(String, EntryId)>, OpsErr> {
        let entries = self.entries.read();
        let parent = entries.get(parent_id).ok_or(OpsErr::PathNotExists)?;
        if parent.entry_type != EntryType::Directory {
            return Err(OpsErr::InvalidArg);
        }
        Ok(parent
            .children
            .iter()
            .map(|(name, id)| (name.clone(), id.clone()))
            .collect())
    }

    #[must_use]
    pub fn exists(&self, entry_id: &EntryId) -> bool {
        self.entries.read().contains_key(entry_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[must_use]
    pub fn bucket_of(entry_id: &EntryId) -> u64 {
        let mut hasher = DefaultHasher::new();
        entry_id.as_str().hash(&mut hasher);
        hasher.finish() % SYNC_BUCKETS
    }

    /// Snapshots of all entries in one hash bucket, for the resync walk.
    #[must_use]
    pub fn bucket_snapshots(&self, bucket: u64) -> Vec<ResyncEntry> {
        self.entries
            .read()
            .values()
            .filter(|inode| Self::bucket_of(&inode.entry_id) == bucket)
            .map(Inode::snapshot)
            .collect()
    }

    /// Live snapshot of one entry, or a tombstone built from the
    /// candidate's identifying fields if it no longer exists.
    #[must_use]
    pub fn snapshot_or_tombstone(
        &self,
        entry_id: &EntryId,
        parent_id: &EntryId,
        name: &str,
        entry_type: EntryType,
    ) -> ResyncEntry {
        self.entries.read().get(entry_id).map_or_else(
            || ResyncEntry {
                entry_id: entry_id.clone(),
                parent_id: parent_id.clone(),
                name: name.to_string(),
                entry_type,
                deleted: true,
                attrs: EntryAttrs::default(),
                timestamps: Timestamps::default(),
            },
            Inode::snapshot,
        )
    }

    /// Apply a repair snapshot received from the buddy primary:
    /// recreate if missing, overwrite if present, delete if tombstoned.
    ///
    /// The walk is bucket-ordered, so a child can arrive before its
    /// parent; a placeholder directory is created in that case and
    /// overwritten when the parent's own snapshot arrives.
    pub fn apply_resync_entry(&self, repair: &ResyncEntry) -> OpsErr {
        let mut entries = self.entries.write();

        if repair.deleted {
            if let Some(removed) = entries.remove(&repair.entry_id) {
                if let Some(parent) = entries.get_mut(&removed.parent_id) {
                    parent.children.remove(&removed.name);
                }
            }
            return OpsErr::Success;
        }

        if repair.entry_id.is_root() {
            let root = entries
                .get_mut(&repair.entry_id)
                .expect("root always exists");
            root.attrs = repair.attrs;
            root.timestamps = repair.timestamps;
            return OpsErr::Success;
        }

        Self::ensure_parent(&mut entries, &repair.parent_id);

        if let Some(existing) = entries.get(&repair.entry_id) {
            let old_parent = existing.parent_id.clone();
            let old_name = existing.name.clone();

            if old_parent != repair.parent_id || old_name != repair.name {
                if let Some(parent) = entries.get_mut(&old_parent) {
                    parent.children.remove(&old_name);
                }
            }

            let inode = entries
                .get_mut(&repair.entry_id)
                .expect("presence checked above under the same lock");
            inode.parent_id = repair.parent_id.clone();
            inode.name = repair.name.clone();
            inode.entry_type = repair.entry_type;
            inode.attrs = repair.attrs;
            inode.timestamps = repair.timestamps;
        } else {
            entries.insert(
                repair.entry_id.clone(),
                Inode {
                    entry_id: repair.entry_id.clone(),
                    parent_id: repair.parent_id.clone(),
                    name: repair.name.clone(),
                    entry_type: repair.entry_type,
                    attrs: repair.attrs,
                    timestamps: repair.timestamps,
                    children: BTreeMap::new(),
                    locks: Vec::new(),
                },
            );
        }

        let parent = entries
            .get_mut(&repair.parent_id)
            .expect("ensured above under the same lock");
        parent
            .children
            .insert(repair.name.clone(), repair.entry_id.clone());

        OpsErr::Success
    }

    fn ensure_parent(entries: &mut HashMap<EntryId, Inode>, parent_id: &EntryId) {
        if entries.contains_key(parent_id) {
            return;
        }
        // temporary placeholder linked under root by its own ID; the
        // parent's real snapshot re-parents and renames it
        entries.insert(
            parent_id.clone(),
            Inode {
                entry_id: parent_id.clone(),
                parent_id: EntryId::root(),
                name: parent_id.as_str().to_string(),
                entry_type: EntryType::Directory,
                attrs: EntryAttrs {
                    mode: 0o755,
                    uid: 0,
                    gid: 0,
                    size: 0,
                },
                timestamps: Timestamps::default(),
                children: BTreeMap::new(),
                locks: Vec::new(),
            },
        );
        let root = entries
            .get_mut(&EntryId::root())
            .expect("root always exists");
        root.children
            .insert(parent_id.as_str().to_string(), parent_id.clone());
    }

    /// Full path -> (type, attrs, timestamps) map, mainly for equality
    /// checks between two replicas in tests.
    #[must_use]
    pub fn dump(&self) -> BTreeMap<String, (EntryType, EntryAttrs, Timestamps)> {
        let entries = self.entries.read();
        let mut out = BTreeMap::new();

        fn walk(
            entries: &HashMap<EntryId, Inode>,
            id: &EntryId,
            path: &str,
            out: &mut BTreeMap<String, (EntryType, EntryAttrs, Timestamps)>,
        ) {
            let Some(inode) = entries.get(id) else {
                return;
            };
            out.insert(
                path.to_string(),
                (inode.entry_type, inode.attrs, inode.timestamps),
            );
            for (name, child) in &inode.children {
                let child_path = if path == "/" {
                    format!("/{name}")
                } else {
                    format!("{path}/{name}")
                };
                walk(entries, child, &child_path, out);
            }
        }

        walk(&entries, &EntryId::root(), "/", &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> EntryAttrs {
        EntryAttrs {
            mode: 0o755,
            uid: 1000,
            gid: 1000,
            size: 0,
        }
    }

    #[test]
    fn test_mkdir_rmdir() {
        let store = MetaStore::new();
        let root = EntryId::root();

        let (dir, _) = store.mkdir(&root, "home", attrs(), None, None).unwrap();
        assert_eq!(store.lookup(&root, "home"), Some((dir.clone(), EntryType::Directory)));

        assert_eq!(
            store.mkdir(&root, "home", attrs(), None, None),
            Err(OpsErr::Exists)
        );

        store.mkdir(&dir, "user", attrs(), None, None).unwrap();
        assert_eq!(store.rmdir(&root, "home", None), Err(OpsErr::NotEmpty));

        store.rmdir(&dir, "user", None).unwrap();
        store.rmdir(&root, "home", None).unwrap();
        assert!(store.lookup(&root, "home").is_none());
        assert!(!store.exists(&dir));
    }

    #[test]
    fn test_mkdir_forced_id_and_timestamps() {
        let store = MetaStore::new();
        let root = EntryId::root();
        let forced_id = EntryId::generate();
        let forced_ts = Timestamps::all(42);

        let (id, ts) = store
            .mkdir(&root, "d", attrs(), Some(forced_id.clone()), Some(forced_ts))
            .unwrap();
        assert_eq!(id, forced_id);
        assert_eq!(ts, forced_ts);
        let (_, stored_ts, _) = store.stat(&id).unwrap();
        assert_eq!(stored_ts, forced_ts);
    }

    #[test]
    fn test_rename_moves_entry() {
        let store = MetaStore::new();
        let root = EntryId::root();
        let (a, _) = store.mkdir(&root, "a", attrs(), None, None).unwrap();
        let (b, _) = store.mkdir(&root, "b", attrs(), None, None).unwrap();
        let (f, _, _) = store.open_file(&a, "x.txt", OPEN_CREATE, None, None).unwrap();

        let (moved, _) = store.rename(&a, "x.txt", &b, "y.txt", None).unwrap();
        assert_eq!(moved, f);
        assert!(store.lookup(&a, "x.txt").is_none());
        assert_eq!(store.lookup(&b, "y.txt"), Some((f, EntryType::File)));
    }

    #[test]
    fn test_rename_no_overwrite() {
        let store = MetaStore::new();
        let root = EntryId::root();
        store.mkdir(&root, "a", attrs(), None, None).unwrap();
        store.mkdir(&root, "b", attrs(), None, None).unwrap();
        assert_eq!(
            store.rename(&root, "a", &root, "b", None),
            Err(OpsErr::Exists)
        );
    }

    #[test]
    fn test_open_create_and_truncate() {
        let store = MetaStore::new();
        let root = EntryId::root();

        assert_eq!(
            store.open_file(&root, "f", 0, None, None),
            Err(OpsErr::PathNotExists)
        );

        let (f, _, created) = store.open_file(&root, "f", OPEN_CREATE, None, None).unwrap();
        assert!(created);

        let (_, _, created_again) = store.open_file(&root, "f", OPEN_CREATE, None, None).unwrap();
        assert!(!created_again);

        store.truncate(&f, 4096, None).unwrap();
        let (a, _, _) = store.stat(&f).unwrap();
        assert_eq!(a.size, 4096);

        assert_eq!(store.truncate(&root, 0, None), Err(OpsErr::InvalidArg));
    }

    #[test]
    fn test_flock_conflicts() {
        let store = MetaStore::new();
        let root = EntryId::root();
        let (f, _, _) = store.open_file(&root, "f", OPEN_CREATE, None, None).unwrap();

        assert_eq!(
            store.flock(&f, "h1", NodeNumId(1), FLOCK_EXCLUSIVE),
            OpsErr::Success
        );
        assert_eq!(
            store.flock(&f, "h2", NodeNumId(2), FLOCK_EXCLUSIVE),
            OpsErr::InUse
        );
        assert_eq!(
            store.flock(&f, "h2", NodeNumId(2), FLOCK_SHARED),
            OpsErr::InUse
        );

        assert_eq!(
            store.flock(&f, "h1", NodeNumId(1), FLOCK_UNLOCK),
            OpsErr::Success
        );
        assert_eq!(
            store.flock(&f, "h2", NodeNumId(2), FLOCK_SHARED),
            OpsErr::Success
        );
        assert_eq!(
            store.flock(&f, "h3", NodeNumId(3), FLOCK_SHARED),
            OpsErr::Success
        );
    }

    #[test]
    fn test_set_attr_partial() {
        let store = MetaStore::new();
        let root = EntryId::root();
        let (d, _) = store.mkdir(&root, "d", attrs(), None, None).unwrap();

        let new_attrs = EntryAttrs {
            mode: 0o700,
            uid: 99,
            gid: 99,
            size: 123,
        };
        store
            .set_attr(&d, &new_attrs, SETATTR_MODE | SETATTR_UID, None)
            .unwrap();

        let (stored, _, _) = store.stat(&d).unwrap();
        assert_eq!(stored.mode, 0o700);
        assert_eq!(stored.uid, 99);
        assert_eq!(stored.gid, 1000);
        assert_eq!(stored.size, 0);
    }

    #[test]
    fn test_resync_entry_out_of_order_parent() {
        let primary = MetaStore::new();
        let root = EntryId::root();
        let (dir, _) = primary.mkdir(&root, "dir", attrs(), None, None).unwrap();
        let (file, _, _) = primary.open_file(&dir, "f", OPEN_CREATE, None, None).unwrap();

        // apply the child before its parent
        let secondary = MetaStore::new();
        let file_snap = primary.snapshot_or_tombstone(&file, &dir, "f", EntryType::File);
        let dir_snap = primary.snapshot_or_tombstone(&dir, &root, "dir", EntryType::Directory);

        assert_eq!(secondary.apply_resync_entry(&file_snap), OpsErr::Success);
        assert_eq!(secondary.apply_resync_entry(&dir_snap), OpsErr::Success);
        let root_snap = primary.snapshot_or_tombstone(&root, &root, "", EntryType::Directory);
        assert_eq!(secondary.apply_resync_entry(&root_snap), OpsErr::Success);

        assert_eq!(primary.dump(), secondary.dump());
    }

    #[test]
    fn test_resync_tombstone() {
        let store = MetaStore::new();
        let root = EntryId::root();
        let (dir, _) = store.mkdir(&root, "dir", attrs(), None, None).unwrap();

        let tombstone = ResyncEntry {
            entry_id: dir.clone(),
            parent_id: root.clone(),
            name: "dir".to_string(),
            entry_type: EntryType::Directory,
            deleted: true,
            attrs: EntryAttrs::default(),
            timestamps: Timestamps::default(),
        };
        assert_eq!(store.apply_resync_entry(&tombstone), OpsErr::Success);
        assert!(!store.exists(&dir));
        assert!(store.lookup(&root, "dir").is_none());

        // deleting again is a no-op
        assert_eq!(store.apply_resync_entry(&tombstone), OpsErr::Success);
    }

    #[test]
    fn test_bucket_walk_covers_every_entry() {
        let store = MetaStore::new();
        let root = EntryId::root();
        for i in 0..50 {
            store.mkdir(&root, &format!("d{i}"), attrs(), None, None).unwrap();
        }

        let mut seen = 0;
        for bucket in 0..SYNC_BUCKETS {
            seen += store.bucket_snapshots(bucket).len();
        }
        // 50 dirs + root
        assert_eq!(seen, 51);
    }
}
