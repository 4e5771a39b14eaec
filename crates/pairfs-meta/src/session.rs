//! Client sessions: sequence-number slots and open file handles
//!
//! Each originating client gets a session holding its sequence-number
//! base, the in-flight/completed slots used to make retried mirrored
//! requests idempotent, and its open file handles. The whole store can
//! be serialized and applied wholesale on the secondary during resync.

use bytes::{Bytes, BytesMut};
use pairfs_common::OpsErr;
use pairfs_common::types::{EntryId, NodeNumId};
use pairfs_wire::header::MsgType;
use pairfs_wire::msgs::AnyMsg;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A finished request's response, kept for replay on duplicate
/// sequence numbers.
#[derive(Clone, Debug)]
pub struct StoredResponse {
    pub result: OpsErr,
    pub response: AnyMsg,
}

#[derive(Clone, Debug)]
enum SlotState {
    InProgress,
    Done(StoredResponse),
}

/// One open file handle of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenFileHandle {
    pub entry_id: EntryId,
    pub access_flags: u32,
}

#[derive(Debug)]
pub struct Session {
    pub client: NodeNumId,
    /// Base the client must start its sequence numbers from; handed out
    /// via the NewSeqNoBase generic response.
    pub seq_base: u64,
    slots: HashMap<u64, SlotState>,
    pub open_files: HashMap<String, OpenFileHandle>,
}

impl Session {
    fn new(client: NodeNumId) -> Self {
        // nonzero: sequence number 0 is the "give me a base" probe
        let seq_base = rand::thread_rng().gen_range(1..u64::MAX / 2);
        Self {
            client,
            seq_base,
            slots: HashMap::new(),
            open_files: HashMap::new(),
        }
    }
}

/// Result of claiming a sequence-number slot.
pub enum SlotAcquire {
    /// First sight of this sequence number; caller must execute and
    /// complete (or abandon) the slot.
    New,
    /// Already executed; replay this response without re-executing.
    DuplicateDone(StoredResponse),
    /// Another worker is executing the same sequence number right now.
    DuplicateInProgress,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<NodeNumId, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up (or create) the session of a client.
    #[must_use]
    pub fn reference_session(&self, client: NodeNumId) -> Arc<Mutex<Session>> {
        if let Some(session) = self.sessions.read().get(&client) {
            return session.clone();
        }
        self.sessions
            .write()
            .entry(client)
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(client))))
            .clone()
    }

    /// Claim the slot for `seq`, retiring acknowledged slots first.
    /// With `selective`, `seq_done` retires exactly one slot; otherwise
    /// everything up to and including `seq_done` is retired.
    pub fn acquire_slot(
        session: &Mutex<Session>,
        seq: u64,
        seq_done: u64,
        selective: bool,
    ) -> SlotAcquire {
        let mut session = session.lock();

        if seq_done != 0 {
            if selective {
                session.slots.remove(&seq_done);
            } else {
                session.slots.retain(|slot_seq, _| *slot_seq > seq_done);
            }
        }

        match session.slots.get(&seq) {
            Some(SlotState::Done(stored)) => SlotAcquire::DuplicateDone(stored.clone()),
            Some(SlotState::InProgress) => SlotAcquire::DuplicateInProgress,
            None => {
                session.slots.insert(seq, SlotState::InProgress);
                SlotAcquire::New
            }
        }
    }

    /// Record the response for a slot claimed with `acquire_slot`.
    pub fn complete_slot(session: &Mutex<Session>, seq: u64, stored: StoredResponse) {
        session.lock().slots.insert(seq, SlotState::Done(stored));
    }

    /// Drop a claimed slot without a result (the request never
    /// executed, e.g. shutdown hit the lock acquisition), so a retry
    /// runs fresh.
    pub fn abandon_slot(session: &Mutex<Session>, seq: u64) {
        session.lock().slots.remove(&seq);
    }

    /// Forget every session (resync announcement on the secondary).
    /// Clients later learn their new bases via NewSeqNoBase.
    pub fn clear_all(&self) {
        self.sessions.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Serialize the whole table for the session-store resync stream.
    #[must_use]
    pub fn serialize_for_resync(&self) -> Vec<u8> {
        let sessions = self.sessions.read();
        let snapshots: Vec<SessionSnapshot> = sessions
            .values()
            .map(|s| SessionSnapshot::capture(&s.lock()))
            .collect();
        bincode::serialize(&snapshots).unwrap_or_else(|e| {
            warn!(error = %e, "failed to serialize session store");
            Vec::new()
        })
    }

    /// Atomically replace the table with a received serialized one.
    pub fn apply_resync(&self, data: &[u8]) -> OpsErr {
        let snapshots: Vec<SessionSnapshot> = match bincode::deserialize(data) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(error = %e, "received malformed session store data");
                return OpsErr::Internal;
            }
        };

        let mut fresh = HashMap::with_capacity(snapshots.len());
        for snapshot in snapshots {
            match snapshot.restore() {
                Ok(session) => {
                    fresh.insert(session.client, Arc::new(Mutex::new(session)));
                }
                Err(e) => {
                    warn!(error = %e, "skipping unrestorable session");
                    return OpsErr::Internal;
                }
            }
        }

        *self.sessions.write() = fresh;
        OpsErr::Success
    }
}

/// Serializable form of a session. Responses are stored as
/// (message type, wire payload) so they replay byte-identically.
#[derive(Serialize, Deserialize)]
struct SessionSnapshot {
    client: u32,
    seq_base: u64,
    open_files: Vec<(String, String, u32)>,
    done_slots: Vec<(u64, i32, u16, Vec<u8>)>,
}

impl SessionSnapshot {
    fn capture(session: &Session) -> Self {
        let open_files = session
            .open_files
            .iter()
            .map(|(handle, open)| {
                (
                    handle.clone(),
                    open.entry_id.as_str().to_string(),
                    open.access_flags,
                )
            })
            .collect();

        let done_slots = session
            .slots
            .iter()
            .filter_map(|(seq, state)| match state {
                // in-progress slots are transient; the retry re-executes
                SlotState::InProgress => None,
                SlotState::Done(stored) => {
                    let mut payload = BytesMut::new();
                    stored.response.encode_payload(&mut payload);
                    Some((
                        *seq,
                        stored.result.code(),
                        stored.response.msg_type() as u16,
                        payload.to_vec(),
                    ))
                }
            })
            .collect();

        Self {
            client: session.client.value(),
            seq_base: session.seq_base,
            open_files,
            done_slots,
        }
    }

    fn restore(self) -> Result<Session, String> {
        let mut open_files = HashMap::with_capacity(self.open_files.len());
        for (handle, entry_id, access_flags) in self.open_files {
            let entry_id = EntryId::parse(entry_id).map_err(|e| e.to_string())?;
            open_files.insert(
                handle,
                OpenFileHandle {
                    entry_id,
                    access_flags,
                },
            );
        }

        let mut slots = HashMap::with_capacity(self.done_slots.len());
        for (seq, result, msg_type_raw, payload) in self.done_slots {
            let msg_type = MsgType::from_u16(msg_type_raw)
                .ok_or_else(|| format!("unknown message type {msg_type_raw}"))?;
            let response = AnyMsg::decode(msg_type, Bytes::from(payload))
                .map_err(|e| e.to_string())?;
            slots.insert(
                seq,
                SlotState::Done(StoredResponse {
                    result: OpsErr::from_code(result),
                    response,
                }),
            );
        }

        Ok(Session {
            client: NodeNumId(self.client),
            seq_base: self.seq_base,
            slots,
            open_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairfs_wire::msgs::{MkDirResp, RmDirResp};

    fn stored(result: OpsErr) -> StoredResponse {
        StoredResponse {
            result,
            response: AnyMsg::MkDirResp(MkDirResp {
                result: result.code(),
                entry: None,
            }),
        }
    }

    #[test]
    fn test_duplicate_seq_replays_response() {
        let store = SessionStore::new();
        let session = store.reference_session(NodeNumId(7));

        assert!(matches!(
            SessionStore::acquire_slot(&session, 5, 0, false),
            SlotAcquire::New
        ));
        SessionStore::complete_slot(&session, 5, stored(OpsErr::Success));

        match SessionStore::acquire_slot(&session, 5, 0, false) {
            SlotAcquire::DuplicateDone(replayed) => {
                assert_eq!(replayed.result, OpsErr::Success);
            }
            _ => panic!("expected replay of the stored response"),
        }
    }

    #[test]
    fn test_in_progress_duplicate() {
        let store = SessionStore::new();
        let session = store.reference_session(NodeNumId(7));

        assert!(matches!(
            SessionStore::acquire_slot(&session, 9, 0, false),
            SlotAcquire::New
        ));
        assert!(matches!(
            SessionStore::acquire_slot(&session, 9, 0, false),
            SlotAcquire::DuplicateInProgress
        ));
    }

    #[test]
    fn test_seq_done_retires_prefix() {
        let store = SessionStore::new();
        let session = store.reference_session(NodeNumId(7));

        for seq in 1..=4 {
            SessionStore::acquire_slot(&session, seq, 0, false);
            SessionStore::complete_slot(&session, seq, stored(OpsErr::Success));
        }

        // seq 5 with seq_done 3 retires 1..=3
        SessionStore::acquire_slot(&session, 5, 3, false);
        let locked = session.lock();
        assert!(!locked.slots.contains_key(&1));
        assert!(!locked.slots.contains_key(&3));
        assert!(locked.slots.contains_key(&4));
        assert!(locked.slots.contains_key(&5));
    }

    #[test]
    fn test_selective_ack_retires_one_slot() {
        let store = SessionStore::new();
        let session = store.reference_session(NodeNumId(7));

        for seq in 1..=3 {
            SessionStore::acquire_slot(&session, seq, 0, false);
            SessionStore::complete_slot(&session, seq, stored(OpsErr::Success));
        }

        SessionStore::acquire_slot(&session, 4, 2, true);
        let locked = session.lock();
        assert!(locked.slots.contains_key(&1));
        assert!(!locked.slots.contains_key(&2));
        assert!(locked.slots.contains_key(&3));
    }

    #[test]
    fn test_resync_round_trip() {
        let store = SessionStore::new();
        let session = store.reference_session(NodeNumId(7));
        {
            let mut locked = session.lock();
            locked.open_files.insert(
                "fh-1".to_string(),
                OpenFileHandle {
                    entry_id: EntryId::generate(),
                    access_flags: 3,
                },
            );
        }
        SessionStore::acquire_slot(&session, 11, 0, false);
        SessionStore::complete_slot(
            &session,
            11,
            StoredResponse {
                result: OpsErr::Exists,
                response: AnyMsg::RmDirResp(RmDirResp {
                    result: OpsErr::Exists.code(),
                }),
            },
        );

        let data = store.serialize_for_resync();

        let replica = SessionStore::new();
        assert_eq!(replica.apply_resync(&data), OpsErr::Success);
        assert_eq!(replica.len(), 1);

        let restored = replica.reference_session(NodeNumId(7));
        {
            let locked = restored.lock();
            assert_eq!(locked.seq_base, session.lock().seq_base);
            assert_eq!(locked.open_files.len(), 1);
        }
        match SessionStore::acquire_slot(&restored, 11, 0, false) {
            SlotAcquire::DuplicateDone(replayed) => {
                assert_eq!(replayed.result, OpsErr::Exists);
            }
            _ => panic!("done slot must survive the resync"),
        }
    }

    #[test]
    fn test_clear_all_resets_bases() {
        let store = SessionStore::new();
        let before = store.reference_session(NodeNumId(7)).lock().seq_base;
        store.clear_all();
        let after = store.reference_session(NodeNumId(7)).lock().seq_base;
        // freshly generated base; equality would be a 1 in 2^63 fluke
        assert_ne!(before, after);
        assert_eq!(store.len(), 1);
    }
}
