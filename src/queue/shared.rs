//! Process-wide queue handle split by role
//!
//! - [`QueueReader`]: read-only view for anything that only observes
//! - [`QueueWriter`]: UI-level writers; may enqueue and merge
//! - [`SyncAccess`]: the sync coordinator; may remove entries and count retries
//!
//! Every method takes the lock, does synchronous work and releases it, so a
//! handle can never hold the queue across an `.await`.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Mutation, MutationOutcome, MutationQueue};
use crate::error::Result;
use crate::types::{
    EntryKey, LocalId, PartialRecordPayload, PendingCreate, PendingDelete, PendingEdit,
    RecordPayload, RecordRef, RemoteId, Timestamp,
};

/// Owner of the process-wide queue
#[derive(Clone)]
pub struct SharedQueue {
    inner: Arc<Mutex<MutationQueue>>,
}

impl SharedQueue {
    pub fn new(queue: MutationQueue) -> Self {
        Self {
            inner: Arc::new(Mutex::new(queue)),
        }
    }

    pub fn reader(&self) -> QueueReader {
        QueueReader {
            inner: self.inner.clone(),
        }
    }

    pub fn writer(&self) -> QueueWriter {
        QueueWriter {
            reader: self.reader(),
        }
    }

    /// Handle for the sync coordinator
    pub fn sync_access(&self) -> SyncAccess {
        SyncAccess {
            reader: self.reader(),
        }
    }

    /// Operator action: permanently drop exhausted entries
    pub fn clear_failed(&self, max_retries: u8) -> Result<usize> {
        self.inner.lock().clear_failed(max_retries)
    }

    /// Operator action: re-arm exhausted entries
    pub fn reset_retries(&self, max_retries: u8) -> Result<usize> {
        self.inner.lock().reset_retries(max_retries)
    }
}

/// Read-only view of the shared queue
#[derive(Clone)]
pub struct QueueReader {
    inner: Arc<Mutex<MutationQueue>>,
}

impl QueueReader {
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending_count()
    }

    pub fn has_pending(&self) -> bool {
        self.inner.lock().has_pending()
    }

    pub fn creates(&self) -> Vec<PendingCreate> {
        self.inner.lock().creates().to_vec()
    }

    pub fn edits(&self) -> Vec<PendingEdit> {
        self.inner.lock().edits().to_vec()
    }

    pub fn deletes(&self) -> Vec<PendingDelete> {
        self.inner.lock().deletes().to_vec()
    }

    pub fn last_sync_at(&self) -> Option<Timestamp> {
        self.inner.lock().last_sync_at()
    }

    pub fn resolve(&self, record: &RecordRef) -> RecordRef {
        self.inner.lock().resolve(record)
    }

    pub fn has_entries_for(&self, target_id: &RemoteId) -> bool {
        self.inner.lock().has_entries_for(target_id)
    }

    pub fn retry_count(&self, key: &EntryKey) -> Option<u8> {
        self.inner.lock().retry_count(key)
    }

    pub fn failed_entries(&self, max_retries: u8) -> Vec<EntryKey> {
        self.inner.lock().failed_entries(max_retries)
    }
}

/// Write handle for UI-level operations
#[derive(Clone)]
pub struct QueueWriter {
    reader: QueueReader,
}

impl QueueWriter {
    pub fn apply_mutation(&self, mutation: Mutation) -> Result<MutationOutcome> {
        self.reader.inner.lock().apply_mutation(mutation)
    }

    /// A record was deleted remotely without going through the queue
    pub fn forget_remote(&self, remote_id: &RemoteId) -> usize {
        self.reader.inner.lock().forget_remote(remote_id)
    }

    pub fn reader(&self) -> &QueueReader {
        &self.reader
    }
}

/// Handle for the sync coordinator.
///
/// Entries may change while a remote call is in flight (a UI edit merged
/// into the entry being sent, or a create cancelled). The `complete_*`
/// methods reconcile that so the newest local intent still goes out.
#[derive(Clone)]
pub struct SyncAccess {
    reader: QueueReader,
}

impl SyncAccess {
    pub fn reader(&self) -> &QueueReader {
        &self.reader
    }

    /// Ids of the creates to attempt this phase, in queue order
    pub fn create_ids(&self) -> Vec<LocalId> {
        let queue = self.reader.inner.lock();
        queue.creates().iter().map(|c| c.local_id.clone()).collect()
    }

    pub fn edit_ids(&self) -> Vec<RemoteId> {
        let queue = self.reader.inner.lock();
        queue.edits().iter().map(|e| e.target_id.clone()).collect()
    }

    pub fn delete_ids(&self) -> Vec<RemoteId> {
        let queue = self.reader.inner.lock();
        queue.deletes().iter().map(|d| d.target_id.clone()).collect()
    }

    /// Current state of a create, `None` if it was removed since the snapshot
    pub fn create(&self, local_id: &LocalId) -> Option<PendingCreate> {
        self.reader.inner.lock().find_create(local_id).cloned()
    }

    pub fn edit(&self, target_id: &RemoteId) -> Option<PendingEdit> {
        self.reader.inner.lock().find_edit(target_id).cloned()
    }

    pub fn delete(&self, target_id: &RemoteId) -> Option<PendingDelete> {
        self.reader.inner.lock().find_delete(target_id).cloned()
    }

    pub fn increment_retry(&self, key: &EntryKey) -> bool {
        self.reader.inner.lock().increment_retry(key)
    }

    pub fn remove(&self, key: &EntryKey) -> bool {
        self.reader.inner.lock().remove(key)
    }

    /// Settle a create the remote store accepted.
    ///
    /// The local id is mapped to the new remote id. If the create was amended
    /// while in flight, the amended payload is re-queued as an edit; if it was
    /// cancelled while in flight, a delete is queued for the new record.
    pub fn complete_create(&self, local_id: &LocalId, sent: &RecordPayload, remote_id: RemoteId) {
        let mut queue = self.reader.inner.lock();
        let current = queue.find_create(local_id).map(|c| c.payload.clone());
        queue.remove(&EntryKey::Create(local_id.clone()));
        queue.record_remote_id(local_id.clone(), remote_id.clone());

        match current {
            Some(payload) if &payload == sent => {}
            Some(payload) => {
                tracing::debug!(local_id = %local_id, remote_id = %remote_id, "Create amended in flight, queueing follow-up edit");
                let patch = PartialRecordPayload::from(payload);
                if let Err(e) = queue.enqueue_edit(remote_id, patch) {
                    tracing::error!(local_id = %local_id, "Failed to queue follow-up edit: {}", e);
                }
            }
            None => {
                tracing::debug!(local_id = %local_id, remote_id = %remote_id, "Create cancelled in flight, queueing delete");
                if let Err(e) = queue.enqueue_delete(remote_id) {
                    tracing::error!(local_id = %local_id, "Failed to queue follow-up delete: {}", e);
                }
            }
        }
    }

    /// Settle an edit the remote store accepted. If more fields were merged
    /// into it while in flight, the entry stays queued for the next pass.
    pub fn complete_edit(&self, target_id: &RemoteId, sent: &PartialRecordPayload) -> bool {
        let mut queue = self.reader.inner.lock();
        match queue.find_edit(target_id) {
            Some(edit) if &edit.patch == sent => queue.remove(&EntryKey::Edit(target_id.clone())),
            Some(_) => {
                tracing::debug!(target_id = %target_id, "Edit grew in flight, keeping it queued");
                false
            }
            None => false,
        }
    }

    pub fn complete_delete(&self, target_id: &RemoteId) -> bool {
        self.remove(&EntryKey::Delete(target_id.clone()))
    }

    pub fn set_last_sync_at(&self, at: Timestamp) {
        self.reader.inner.lock().set_last_sync_at(at);
    }
}
