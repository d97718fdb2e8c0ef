//! Durable offline mutation queue
//!
//! Holds the create/edit/delete intents that have not reached the remote
//! store yet. Every mutation is written through to a [`BlobStore`] so the
//! queue survives a restart.
//!
//! Merge rules:
//! - a second edit for the same remote id overlays the first
//! - a delete removes any pending edit for the same remote id
//! - mutations on a record that only exists as a pending create rewrite or
//!   drop that create instead of producing edits or deletes
//!
//! Callers normally go through [`MutationQueue::apply_mutation`], which picks
//! the right rule. Shared access is split into role handles in [`shared`].

mod intent;
mod shared;

pub use intent::{Mutation, MutationOutcome};
pub use shared::{QueueReader, QueueWriter, SharedQueue, SyncAccess};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::storage::{BlobStore, MemoryBlobStore};
use crate::types::{
    EntryKey, LocalId, PartialRecordPayload, PendingCreate, PendingDelete, PendingEdit,
    RecordPayload, RecordRef, RemoteId, Timestamp,
};

/// Persisted layout version
const QUEUE_FORMAT_VERSION: u32 = 1;

/// Id mappings older than this are forgotten
const ID_MAP_TTL_DAYS: i64 = 30;

/// Upper bound on remembered id mappings; the oldest are evicted first
const ID_MAP_CAPACITY: usize = 1024;

fn default_version() -> u32 {
    QUEUE_FORMAT_VERSION
}

/// Remote id a synced create was given, and when
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IdMapping {
    remote_id: RemoteId,
    mapped_at: Timestamp,
}

/// Everything that is written to durable storage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct QueueState {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    creates: Vec<PendingCreate>,
    #[serde(default)]
    edits: Vec<PendingEdit>,
    #[serde(default)]
    deletes: Vec<PendingDelete>,
    /// Local ids whose create reached the remote store
    #[serde(default)]
    id_map: BTreeMap<LocalId, IdMapping>,
    #[serde(default)]
    last_sync_at: Option<Timestamp>,
}

impl QueueState {
    fn empty() -> Self {
        Self {
            version: QUEUE_FORMAT_VERSION,
            ..Default::default()
        }
    }

    fn pending_count(&self) -> usize {
        self.creates.len() + self.edits.len() + self.deletes.len()
    }

    fn find_create(&self, local_id: &LocalId) -> Option<&PendingCreate> {
        self.creates.iter().find(|c| &c.local_id == local_id)
    }

    fn find_edit(&self, target_id: &RemoteId) -> Option<&PendingEdit> {
        self.edits.iter().find(|e| &e.target_id == target_id)
    }

    fn find_delete(&self, target_id: &RemoteId) -> Option<&PendingDelete> {
        self.deletes.iter().find(|d| &d.target_id == target_id)
    }

    fn create_mut(&mut self, local_id: &LocalId) -> Option<&mut PendingCreate> {
        self.creates.iter_mut().find(|c| &c.local_id == local_id)
    }

    fn edit_mut(&mut self, target_id: &RemoteId) -> Option<&mut PendingEdit> {
        self.edits.iter_mut().find(|e| &e.target_id == target_id)
    }

    fn retry_count_mut(&mut self, key: &EntryKey) -> Option<&mut u8> {
        match key {
            EntryKey::Create(id) => self.create_mut(id).map(|c| &mut c.retry_count),
            EntryKey::Edit(id) => self.edit_mut(id).map(|e| &mut e.retry_count),
            EntryKey::Delete(id) => self
                .deletes
                .iter_mut()
                .find(|d| &d.target_id == id)
                .map(|d| &mut d.retry_count),
        }
    }

    /// Drop mappings past their TTL, then the oldest beyond capacity
    fn prune_id_map(&mut self, now: Timestamp) {
        let cutoff = now - chrono::Duration::days(ID_MAP_TTL_DAYS);
        self.id_map.retain(|_, mapping| mapping.mapped_at > cutoff);

        let excess = self.id_map.len().saturating_sub(ID_MAP_CAPACITY);
        if excess > 0 {
            let mut by_age: Vec<(Timestamp, LocalId)> = self
                .id_map
                .iter()
                .map(|(local, mapping)| (mapping.mapped_at, local.clone()))
                .collect();
            by_age.sort();
            for (_, local) in by_age.into_iter().take(excess) {
                self.id_map.remove(&local);
            }
        }
    }

    fn forget_remote(&mut self, remote_id: &RemoteId) -> usize {
        let before = self.id_map.len();
        self.id_map.retain(|_, mapping| &mapping.remote_id != remote_id);
        before - self.id_map.len()
    }
}

/// Ordered, durable collections of not-yet-synced intents
pub struct MutationQueue {
    state: QueueState,
    store: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueue")
            .field("creates", &self.state.creates.len())
            .field("edits", &self.state.edits.len())
            .field("deletes", &self.state.deletes.len())
            .field("store", &self.store.name())
            .finish()
    }
}

impl MutationQueue {
    /// Load the queue from durable storage, starting empty if nothing was saved
    pub fn load(store: Arc<dyn BlobStore>) -> Result<Self> {
        let state = match store.load()? {
            Some(bytes) if !bytes.is_empty() => {
                let state: QueueState = serde_json::from_slice(&bytes)?;
                if state.version > QUEUE_FORMAT_VERSION {
                    return Err(SyncError::Storage(format!(
                        "queue format version {} is newer than supported {}",
                        state.version, QUEUE_FORMAT_VERSION
                    )));
                }
                state
            }
            _ => QueueState::empty(),
        };

        tracing::info!(
            store = store.name(),
            creates = state.creates.len(),
            edits = state.edits.len(),
            deletes = state.deletes.len(),
            "Loaded mutation queue"
        );

        Ok(Self { state, store })
    }

    /// Empty queue backed by memory (for testing)
    pub fn in_memory() -> Self {
        Self {
            state: QueueState::empty(),
            store: Arc::new(MemoryBlobStore::new()),
        }
    }

    fn save(&self, state: &QueueState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        self.store.save(&bytes)
    }

    /// Apply `change` to a copy of the state and adopt it only once the copy
    /// is durable. On error the queue is left exactly as it was.
    fn commit<T>(&mut self, change: impl FnOnce(&mut QueueState) -> T) -> Result<T> {
        let mut next = self.state.clone();
        let out = change(&mut next);
        self.save(&next)?;
        self.state = next;
        Ok(out)
    }

    /// Persist from the sync path, where failures must not abort the pass.
    /// The in-memory state stays authoritative and goes out with the next save.
    fn persist_logged(&self) {
        if let Err(e) = self.save(&self.state) {
            tracing::error!(store = self.store.name(), "Failed to persist queue: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Enqueue (UI-level writers)
    // ------------------------------------------------------------------

    /// Queue a new record. Always appends; each create is a distinct record.
    pub fn enqueue_create(&mut self, payload: RecordPayload) -> Result<LocalId> {
        let local_id = LocalId::generate();
        self.commit(|state| {
            state.creates.push(PendingCreate {
                local_id: local_id.clone(),
                payload,
                created_at: Utc::now(),
                retry_count: 0,
            })
        })?;
        tracing::debug!(local_id = %local_id, "Queued create");
        Ok(local_id)
    }

    /// Queue a partial update for a remote record, merging into an existing
    /// pending edit for the same target.
    ///
    /// Returns `true` if the patch was merged into an existing edit.
    pub fn enqueue_edit(&mut self, target_id: RemoteId, patch: PartialRecordPayload) -> Result<bool> {
        self.reject_local_target(&target_id)?;

        let merged = self.commit(|state| match state.edit_mut(&target_id) {
            Some(existing) => {
                existing.patch.merge(&patch);
                true
            }
            None => {
                state.edits.push(PendingEdit {
                    target_id: target_id.clone(),
                    patch,
                    created_at: Utc::now(),
                    retry_count: 0,
                });
                false
            }
        })?;
        tracing::debug!(target_id = %target_id, merged, "Queued edit");
        Ok(merged)
    }

    /// Queue a delete for a remote record. Any pending edit for the same
    /// target is dropped. A second delete for the same target is a no-op.
    pub fn enqueue_delete(&mut self, target_id: RemoteId) -> Result<()> {
        self.reject_local_target(&target_id)?;

        let cancelled_edits = self.commit(|state| {
            let before = state.edits.len();
            state.edits.retain(|e| e.target_id != target_id);

            if state.find_delete(&target_id).is_none() {
                state.deletes.push(PendingDelete {
                    target_id: target_id.clone(),
                    created_at: Utc::now(),
                    retry_count: 0,
                });
            }
            state.forget_remote(&target_id);
            before - state.edits.len()
        })?;
        tracing::debug!(target_id = %target_id, cancelled_edits, "Queued delete");
        Ok(())
    }

    /// Overlay a patch onto a still-local create. Returns `false` if no such create.
    pub fn amend_create(&mut self, local_id: &LocalId, patch: &PartialRecordPayload) -> Result<bool> {
        if self.state.find_create(local_id).is_none() {
            return Ok(false);
        }
        self.commit(|state| {
            if let Some(create) = state.create_mut(local_id) {
                create.payload.apply(patch);
            }
        })?;
        tracing::debug!(local_id = %local_id, "Amended pending create");
        Ok(true)
    }

    /// Drop a create that never reached the remote store. Returns `false` if no such create.
    pub fn cancel_create(&mut self, local_id: &LocalId) -> Result<bool> {
        if self.state.find_create(local_id).is_none() {
            return Ok(false);
        }
        self.commit(|state| state.creates.retain(|c| &c.local_id != local_id))?;
        tracing::debug!(local_id = %local_id, "Cancelled pending create");
        Ok(true)
    }

    /// Edits and deletes are only valid against ids the remote store issued
    fn reject_local_target(&self, target_id: &RemoteId) -> Result<()> {
        if self
            .state
            .creates
            .iter()
            .any(|c| c.local_id.as_str() == target_id.as_str())
        {
            return Err(SyncError::InvalidInput(format!(
                "{} is a pending create, not a remote record",
                target_id
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sync path
    // ------------------------------------------------------------------

    /// Remove an entry. Returns `false` if it was already gone.
    pub fn remove(&mut self, key: &EntryKey) -> bool {
        let before = self.state.pending_count();
        match key {
            EntryKey::Create(id) => self.state.creates.retain(|c| &c.local_id != id),
            EntryKey::Edit(id) => self.state.edits.retain(|e| &e.target_id != id),
            EntryKey::Delete(id) => self.state.deletes.retain(|d| &d.target_id != id),
        }
        let removed = self.state.pending_count() < before;
        if removed {
            self.persist_logged();
        }
        removed
    }

    /// Record one failed attempt. No-op if the entry is already gone.
    pub fn increment_retry(&mut self, key: &EntryKey) -> bool {
        let Some(count) = self.state.retry_count_mut(key) else {
            return false;
        };
        *count = count.saturating_add(1);
        self.persist_logged();
        true
    }

    /// Remember the remote id a synced create was given
    pub fn record_remote_id(&mut self, local_id: LocalId, remote_id: RemoteId) {
        self.insert_mapping(local_id, remote_id, Utc::now());
        self.persist_logged();
    }

    fn insert_mapping(&mut self, local_id: LocalId, remote_id: RemoteId, at: Timestamp) {
        self.state.id_map.insert(
            local_id,
            IdMapping {
                remote_id,
                mapped_at: at,
            },
        );
        self.state.prune_id_map(at);
    }

    /// Forget every local id mapped to a remote record that no longer exists.
    /// Returns the number of mappings dropped.
    pub fn forget_remote(&mut self, remote_id: &RemoteId) -> usize {
        let forgotten = self.state.forget_remote(remote_id);
        if forgotten > 0 {
            self.persist_logged();
        }
        forgotten
    }

    pub fn set_last_sync_at(&mut self, at: Timestamp) {
        self.state.last_sync_at = Some(at);
        self.persist_logged();
    }

    // ------------------------------------------------------------------
    // Operator actions
    // ------------------------------------------------------------------

    /// Entries whose retries are exhausted
    pub fn failed_entries(&self, max_retries: u8) -> Vec<EntryKey> {
        let creates = self
            .state
            .creates
            .iter()
            .filter(|c| c.retry_count >= max_retries)
            .map(|c| EntryKey::Create(c.local_id.clone()));
        let edits = self
            .state
            .edits
            .iter()
            .filter(|e| e.retry_count >= max_retries)
            .map(|e| EntryKey::Edit(e.target_id.clone()));
        let deletes = self
            .state
            .deletes
            .iter()
            .filter(|d| d.retry_count >= max_retries)
            .map(|d| EntryKey::Delete(d.target_id.clone()));
        creates.chain(edits).chain(deletes).collect()
    }

    /// Permanently drop every exhausted entry. This discards user data.
    pub fn clear_failed(&mut self, max_retries: u8) -> Result<usize> {
        if self.failed_entries(max_retries).is_empty() {
            return Ok(0);
        }
        let cleared = self.commit(|state| {
            let before = state.pending_count();
            state.creates.retain(|c| c.retry_count < max_retries);
            state.edits.retain(|e| e.retry_count < max_retries);
            state.deletes.retain(|d| d.retry_count < max_retries);
            before - state.pending_count()
        })?;
        tracing::warn!(cleared, max_retries, "Cleared exhausted queue entries");
        Ok(cleared)
    }

    /// Re-arm exhausted entries so the next pass attempts them again
    pub fn reset_retries(&mut self, max_retries: u8) -> Result<usize> {
        if self.failed_entries(max_retries).is_empty() {
            return Ok(0);
        }
        let reset = self.commit(|state| {
            let counts = state
                .creates
                .iter_mut()
                .map(|c| &mut c.retry_count)
                .chain(state.edits.iter_mut().map(|e| &mut e.retry_count))
                .chain(state.deletes.iter_mut().map(|d| &mut d.retry_count));
            let mut reset = 0;
            for count in counts {
                if *count >= max_retries {
                    *count = 0;
                    reset += 1;
                }
            }
            reset
        })?;
        tracing::info!(reset, "Reset retry counters");
        Ok(reset)
    }

    // ------------------------------------------------------------------
    // Read view
    // ------------------------------------------------------------------

    pub fn pending_count(&self) -> usize {
        self.state.pending_count()
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    pub fn creates(&self) -> &[PendingCreate] {
        &self.state.creates
    }

    pub fn edits(&self) -> &[PendingEdit] {
        &self.state.edits
    }

    pub fn deletes(&self) -> &[PendingDelete] {
        &self.state.deletes
    }

    pub fn last_sync_at(&self) -> Option<Timestamp> {
        self.state.last_sync_at
    }

    pub fn find_create(&self, local_id: &LocalId) -> Option<&PendingCreate> {
        self.state.find_create(local_id)
    }

    pub fn find_edit(&self, target_id: &RemoteId) -> Option<&PendingEdit> {
        self.state.find_edit(target_id)
    }

    pub fn find_delete(&self, target_id: &RemoteId) -> Option<&PendingDelete> {
        self.state.find_delete(target_id)
    }

    /// Whether any edit or delete is queued for this remote record
    pub fn has_entries_for(&self, target_id: &RemoteId) -> bool {
        self.find_edit(target_id).is_some() || self.find_delete(target_id).is_some()
    }

    /// Remote id assigned to a local id by an earlier sync, if any
    pub fn remote_id_for(&self, local_id: &LocalId) -> Option<&RemoteId> {
        self.state.id_map.get(local_id).map(|mapping| &mapping.remote_id)
    }

    /// Number of remembered local-to-remote id mappings
    pub fn id_map_len(&self) -> usize {
        self.state.id_map.len()
    }

    /// Translate a reference through the id map. Local ids whose create has
    /// already synced resolve to their remote id; anything else is unchanged.
    pub fn resolve(&self, record: &RecordRef) -> RecordRef {
        match record {
            RecordRef::Local(local) if self.find_create(local).is_none() => {
                match self.remote_id_for(local) {
                    Some(remote) => RecordRef::Remote(remote.clone()),
                    None => record.clone(),
                }
            }
            _ => record.clone(),
        }
    }

    /// Retry count of a given entry, `None` if it is not queued
    pub fn retry_count(&self, key: &EntryKey) -> Option<u8> {
        match key {
            EntryKey::Create(id) => self.find_create(id).map(|c| c.retry_count),
            EntryKey::Edit(id) => self.find_edit(id).map(|e| e.retry_count),
            EntryKey::Delete(id) => self.find_delete(id).map(|d| d.retry_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose saves can be made to fail
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryBlobStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl BlobStore for FlakyStore {
        fn load(&self) -> Result<Option<Vec<u8>>> {
            self.inner.load()
        }

        fn save(&self, bytes: &[u8]) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SyncError::Storage("disk full".to_string()));
            }
            self.inner.save(bytes)
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn payload(amount: i64) -> RecordPayload {
        RecordPayload::new().with("amount", amount)
    }

    fn patch(amount: i64) -> PartialRecordPayload {
        PartialRecordPayload::new().with("amount", amount)
    }

    #[test]
    fn test_creates_never_merge() {
        let mut queue = MutationQueue::in_memory();
        let a = queue.enqueue_create(payload(10)).unwrap();
        let b = queue.enqueue_create(payload(10)).unwrap();

        assert_ne!(a, b);
        assert_eq!(queue.creates().len(), 2);
        assert_eq!(queue.creates()[0].local_id, a);
    }

    #[test]
    fn test_second_edit_merges_and_keeps_created_at() {
        let mut queue = MutationQueue::in_memory();
        let target = RemoteId::from("R1");

        assert!(!queue.enqueue_edit(target.clone(), patch(5)).unwrap());
        let first_created = queue.edits()[0].created_at;
        queue.increment_retry(&EntryKey::Edit(target.clone()));

        let second = PartialRecordPayload::new().with("amount", 6).with("note", "cash");
        assert!(queue.enqueue_edit(target.clone(), second).unwrap());

        assert_eq!(queue.edits().len(), 1);
        let edit = &queue.edits()[0];
        assert_eq!(edit.created_at, first_created);
        assert_eq!(edit.retry_count, 1);
        assert_eq!(edit.patch.get("amount"), Some(&json!(6)));
        assert_eq!(edit.patch.get("note"), Some(&json!("cash")));
    }

    #[test]
    fn test_delete_cancels_edit() {
        let mut queue = MutationQueue::in_memory();
        let target = RemoteId::from("R1");
        queue.enqueue_edit(target.clone(), patch(5)).unwrap();
        queue.enqueue_delete(target.clone()).unwrap();

        assert!(queue.find_edit(&target).is_none());
        assert_eq!(queue.deletes().len(), 1);

        queue.enqueue_delete(target.clone()).unwrap();
        assert_eq!(queue.deletes().len(), 1);
    }

    #[test]
    fn test_edit_against_pending_create_is_rejected() {
        let mut queue = MutationQueue::in_memory();
        let local = queue.enqueue_create(payload(1)).unwrap();
        let as_remote = RemoteId::new(local.as_str());

        assert!(matches!(
            queue.enqueue_edit(as_remote.clone(), patch(2)),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            queue.enqueue_delete(as_remote),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(queue.edits().is_empty());
        assert!(queue.deletes().is_empty());
    }

    #[test]
    fn test_increment_retry_missing_is_noop() {
        let mut queue = MutationQueue::in_memory();
        assert!(!queue.increment_retry(&EntryKey::Delete(RemoteId::from("gone"))));
        assert!(!queue.remove(&EntryKey::Create(LocalId::from("gone"))));
    }

    #[test]
    fn test_retry_count_saturates() {
        let mut queue = MutationQueue::in_memory();
        let id = queue.enqueue_create(payload(1)).unwrap();
        let key = EntryKey::Create(id);
        for _ in 0..300 {
            queue.increment_retry(&key);
        }
        assert_eq!(queue.retry_count(&key), Some(u8::MAX));
    }

    #[test]
    fn test_survives_reload() {
        let store = Arc::new(MemoryBlobStore::new());
        let local = {
            let mut queue = MutationQueue::load(store.clone()).unwrap();
            let local = queue.enqueue_create(payload(10)).unwrap();
            queue.enqueue_edit(RemoteId::from("R2"), patch(3)).unwrap();
            queue.enqueue_delete(RemoteId::from("R3")).unwrap();
            queue.increment_retry(&EntryKey::Create(local.clone()));
            queue.set_last_sync_at(Utc::now());
            local
        };

        let reloaded = MutationQueue::load(store).unwrap();
        assert_eq!(reloaded.pending_count(), 3);
        assert_eq!(reloaded.creates()[0].local_id, local);
        assert_eq!(reloaded.creates()[0].retry_count, 1);
        assert!(reloaded.last_sync_at().is_some());
    }

    #[test]
    fn test_corrupt_blob_fails_load() {
        let store = Arc::new(MemoryBlobStore::new());
        store.save(b"{not json").unwrap();
        assert!(matches!(
            MutationQueue::load(store),
            Err(SyncError::Serialization(_))
        ));
    }

    #[test]
    fn test_newer_format_rejected() {
        let store = Arc::new(MemoryBlobStore::new());
        store.save(br#"{"version": 99}"#).unwrap();
        assert!(matches!(MutationQueue::load(store), Err(SyncError::Storage(_))));
    }

    #[test]
    fn test_clear_failed_only_drops_exhausted() {
        let mut queue = MutationQueue::in_memory();
        let keep = queue.enqueue_create(payload(1)).unwrap();
        let drop = queue.enqueue_create(payload(2)).unwrap();
        for _ in 0..3 {
            queue.increment_retry(&EntryKey::Create(drop.clone()));
        }

        assert_eq!(queue.failed_entries(3), vec![EntryKey::Create(drop.clone())]);
        assert_eq!(queue.clear_failed(3).unwrap(), 1);
        assert!(queue.find_create(&keep).is_some());
        assert!(queue.find_create(&drop).is_none());
    }

    #[test]
    fn test_reset_retries() {
        let mut queue = MutationQueue::in_memory();
        queue.enqueue_delete(RemoteId::from("R9")).unwrap();
        let key = EntryKey::Delete(RemoteId::from("R9"));
        queue.increment_retry(&key);
        queue.increment_retry(&key);

        assert_eq!(queue.reset_retries(5).unwrap(), 0);
        assert_eq!(queue.reset_retries(2).unwrap(), 1);
        assert_eq!(queue.retry_count(&key), Some(0));
    }

    #[test]
    fn test_resolve_through_id_map() {
        let mut queue = MutationQueue::in_memory();
        let local = LocalId::from("local-1");
        let remote = RemoteId::from("R1");

        assert_eq!(queue.resolve(&RecordRef::Local(local.clone())), RecordRef::Local(local.clone()));

        queue.record_remote_id(local.clone(), remote.clone());
        assert_eq!(queue.resolve(&RecordRef::Local(local.clone())), RecordRef::Remote(remote.clone()));

        queue.enqueue_delete(remote).unwrap();
        assert!(queue.remote_id_for(&local).is_none());
    }

    #[test]
    fn test_failed_save_leaves_queue_untouched() {
        let store = Arc::new(FlakyStore::default());
        let mut queue = MutationQueue::load(store.clone()).unwrap();
        let local = queue.enqueue_create(payload(1)).unwrap();
        queue.enqueue_edit(RemoteId::from("R1"), patch(5)).unwrap();
        let exhausted = EntryKey::Create(local.clone());
        for _ in 0..3 {
            queue.increment_retry(&exhausted);
        }

        store.fail(true);
        assert!(queue.enqueue_create(payload(2)).is_err());
        assert!(queue.enqueue_edit(RemoteId::from("R2"), patch(6)).is_err());
        assert!(queue.enqueue_edit(RemoteId::from("R1"), patch(7)).is_err());
        assert!(queue.enqueue_delete(RemoteId::from("R1")).is_err());
        assert!(queue.amend_create(&local, &patch(8)).is_err());
        assert!(queue.cancel_create(&local).is_err());
        assert!(queue.reset_retries(3).is_err());
        assert!(queue.clear_failed(3).is_err());

        assert_eq!(queue.pending_count(), 2);
        assert_eq!(queue.creates()[0].payload.get("amount"), Some(&json!(1)));
        assert_eq!(queue.retry_count(&exhausted), Some(3));
        let edit = queue.find_edit(&RemoteId::from("R1")).unwrap();
        assert_eq!(edit.patch.get("amount"), Some(&json!(5)));
        assert!(queue.deletes().is_empty());

        // Rejected intents must not ride along with the next good save
        store.fail(false);
        queue.enqueue_create(payload(3)).unwrap();
        let reloaded = MutationQueue::load(store).unwrap();
        assert_eq!(reloaded.creates().len(), 2);
        assert_eq!(reloaded.edits().len(), 1);
        assert!(reloaded.deletes().is_empty());
    }

    #[test]
    fn test_forget_remote_drops_mapping() {
        let mut queue = MutationQueue::in_memory();
        let local = LocalId::from("local-1");
        queue.record_remote_id(local.clone(), RemoteId::from("R1"));
        queue.record_remote_id(LocalId::from("local-2"), RemoteId::from("R2"));

        assert_eq!(queue.forget_remote(&RemoteId::from("R1")), 1);
        assert_eq!(queue.forget_remote(&RemoteId::from("R1")), 0);
        assert!(queue.remote_id_for(&local).is_none());
        assert_eq!(queue.id_map_len(), 1);
    }

    #[test]
    fn test_id_map_expires_old_mappings() {
        let mut queue = MutationQueue::in_memory();
        let now = Utc::now();
        let stale = LocalId::from("local-old");
        queue.insert_mapping(
            stale.clone(),
            RemoteId::from("R1"),
            now - chrono::Duration::days(ID_MAP_TTL_DAYS + 1),
        );
        queue.insert_mapping(LocalId::from("local-new"), RemoteId::from("R2"), now);

        assert!(queue.remote_id_for(&stale).is_none());
        assert_eq!(queue.id_map_len(), 1);
    }

    #[test]
    fn test_id_map_capacity_evicts_oldest() {
        let mut queue = MutationQueue::in_memory();
        let start = Utc::now();
        for i in 0..ID_MAP_CAPACITY + 10 {
            queue.insert_mapping(
                LocalId::from(format!("local-{}", i).as_str()),
                RemoteId::new(format!("R{}", i)),
                start + chrono::Duration::seconds(i as i64),
            );
        }

        assert_eq!(queue.id_map_len(), ID_MAP_CAPACITY);
        assert!(queue.remote_id_for(&LocalId::from("local-0")).is_none());
        let newest = format!("local-{}", ID_MAP_CAPACITY + 9);
        assert!(queue.remote_id_for(&LocalId::from(newest.as_str())).is_some());
    }
}
