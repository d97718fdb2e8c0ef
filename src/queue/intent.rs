//! Single entry point for UI-level mutations

use serde::{Deserialize, Serialize};

use super::MutationQueue;
use crate::error::{Result, SyncError};
use crate::types::{LocalId, PartialRecordPayload, RecordPayload, RecordRef, RemoteId};

/// A write intent issued by the UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Create {
        payload: RecordPayload,
    },
    Edit {
        target: RecordRef,
        patch: PartialRecordPayload,
    },
    Delete {
        target: RecordRef,
    },
}

/// Which merge rule a mutation ended up in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "id", rename_all = "snake_case")]
pub enum MutationOutcome {
    /// New create queued under this local id
    Queued(LocalId),
    /// Patch folded into a still-local create
    CreateAmended(LocalId),
    /// Still-local create dropped; nothing will reach the remote store
    CreateCancelled(LocalId),
    /// New edit queued for a remote record
    EditQueued(RemoteId),
    /// Patch merged into an existing pending edit
    EditMerged(RemoteId),
    /// Edit dropped because the record already has a pending delete
    DeleteSuperseded(RemoteId),
    /// Delete queued (pending edits for the record removed)
    DeleteQueued(RemoteId),
}

impl MutationQueue {
    /// Apply a mutation, dispatching to the right merge rule.
    ///
    /// A local reference whose create has already synced is redirected to
    /// the remote id recorded for it. A local reference that is neither
    /// pending nor mapped is an error.
    pub fn apply_mutation(&mut self, mutation: Mutation) -> Result<MutationOutcome> {
        match mutation {
            Mutation::Create { payload } => {
                let local_id = self.enqueue_create(payload)?;
                Ok(MutationOutcome::Queued(local_id))
            }
            Mutation::Edit { target, patch } => match self.resolve(&target) {
                RecordRef::Local(local_id) => {
                    if self.amend_create(&local_id, &patch)? {
                        Ok(MutationOutcome::CreateAmended(local_id))
                    } else {
                        Err(SyncError::NotFound(local_id.to_string()))
                    }
                }
                RecordRef::Remote(remote_id) => {
                    if self.find_delete(&remote_id).is_some() {
                        tracing::debug!(target_id = %remote_id, "Dropping edit for record pending delete");
                        return Ok(MutationOutcome::DeleteSuperseded(remote_id));
                    }
                    if self.enqueue_edit(remote_id.clone(), patch)? {
                        Ok(MutationOutcome::EditMerged(remote_id))
                    } else {
                        Ok(MutationOutcome::EditQueued(remote_id))
                    }
                }
            },
            Mutation::Delete { target } => match self.resolve(&target) {
                RecordRef::Local(local_id) => {
                    if self.cancel_create(&local_id)? {
                        Ok(MutationOutcome::CreateCancelled(local_id))
                    } else {
                        Err(SyncError::NotFound(local_id.to_string()))
                    }
                }
                RecordRef::Remote(remote_id) => {
                    self.enqueue_delete(remote_id.clone())?;
                    Ok(MutationOutcome::DeleteQueued(remote_id))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn create(queue: &mut MutationQueue, amount: i64) -> LocalId {
        match queue
            .apply_mutation(Mutation::Create {
                payload: RecordPayload::new().with("amount", amount),
            })
            .unwrap()
        {
            MutationOutcome::Queued(id) => id,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_edit_absorbed_into_pending_create() {
        let mut queue = MutationQueue::in_memory();
        let local = create(&mut queue, 10);

        let outcome = queue
            .apply_mutation(Mutation::Edit {
                target: RecordRef::Local(local.clone()),
                patch: PartialRecordPayload::new().with("amount", 20),
            })
            .unwrap();

        assert_eq!(outcome, MutationOutcome::CreateAmended(local));
        assert_eq!(queue.creates().len(), 1);
        assert_eq!(queue.creates()[0].payload.get("amount"), Some(&json!(20)));
        assert!(queue.edits().is_empty());
    }

    #[test]
    fn test_delete_of_pending_create_leaves_nothing() {
        let mut queue = MutationQueue::in_memory();
        let local = create(&mut queue, 10);

        let outcome = queue
            .apply_mutation(Mutation::Delete {
                target: RecordRef::Local(local.clone()),
            })
            .unwrap();

        assert_eq!(outcome, MutationOutcome::CreateCancelled(local));
        assert!(!queue.has_pending());
    }

    #[test]
    fn test_edit_then_delete_remote() {
        let mut queue = MutationQueue::in_memory();
        let r1 = RemoteId::from("R1");

        let first = queue
            .apply_mutation(Mutation::Edit {
                target: RecordRef::Remote(r1.clone()),
                patch: PartialRecordPayload::new().with("amount", 5),
            })
            .unwrap();
        assert_eq!(first, MutationOutcome::EditQueued(r1.clone()));

        let second = queue
            .apply_mutation(Mutation::Edit {
                target: RecordRef::Remote(r1.clone()),
                patch: PartialRecordPayload::new().with("amount", 6),
            })
            .unwrap();
        assert_eq!(second, MutationOutcome::EditMerged(r1.clone()));

        let deleted = queue
            .apply_mutation(Mutation::Delete {
                target: RecordRef::Remote(r1.clone()),
            })
            .unwrap();
        assert_eq!(deleted, MutationOutcome::DeleteQueued(r1.clone()));
        assert!(queue.edits().is_empty());
        assert_eq!(queue.deletes().len(), 1);

        let late_edit = queue
            .apply_mutation(Mutation::Edit {
                target: RecordRef::Remote(r1.clone()),
                patch: PartialRecordPayload::new().with("amount", 7),
            })
            .unwrap();
        assert_eq!(late_edit, MutationOutcome::DeleteSuperseded(r1));
        assert!(queue.edits().is_empty());
    }

    #[test]
    fn test_synced_local_id_redirects_to_remote() {
        let mut queue = MutationQueue::in_memory();
        let local = LocalId::from("local-abc");
        queue.record_remote_id(local.clone(), RemoteId::from("R7"));

        let outcome = queue
            .apply_mutation(Mutation::Edit {
                target: RecordRef::Local(local),
                patch: PartialRecordPayload::new().with("amount", 1),
            })
            .unwrap();

        assert_eq!(outcome, MutationOutcome::EditQueued(RemoteId::from("R7")));
    }

    #[test]
    fn test_unknown_local_id_is_not_found() {
        let mut queue = MutationQueue::in_memory();
        let result = queue.apply_mutation(Mutation::Delete {
            target: RecordRef::Local(LocalId::from("local-missing")),
        });
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }
}
