//! Offline-first record writes for the UI layer
//!
//! Every write consults the queue first. A record that only exists as a
//! pending create is rewritten or dropped locally. Otherwise, when online and
//! nothing is already queued for the record, the remote store is tried
//! directly; on failure or when offline the intent is queued.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::connectivity::ConnectivityMonitor;
use crate::error::{Result, SyncError};
use crate::queue::{Mutation, MutationOutcome, QueueWriter};
use crate::sync::{PrincipalResolver, RemoteStore};
use crate::types::{PartialRecordPayload, RecordPayload, RecordRef, RemoteId, SyncConfig};

/// Where a write ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Created remotely right away
    Created { remote_id: RemoteId },
    /// Updated or deleted remotely right away
    Applied { remote_id: RemoteId },
    /// Handled by the queue
    Queued { outcome: MutationOutcome },
}

/// UI-facing write path
pub struct OfflineWriter {
    queue: QueueWriter,
    remote: Arc<dyn RemoteStore>,
    principal: Arc<dyn PrincipalResolver>,
    monitor: Arc<ConnectivityMonitor>,
    direct_write: bool,
}

impl OfflineWriter {
    pub fn new(
        queue: QueueWriter,
        remote: Arc<dyn RemoteStore>,
        principal: Arc<dyn PrincipalResolver>,
        monitor: Arc<ConnectivityMonitor>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            queue,
            remote,
            principal,
            monitor,
            direct_write: config.direct_write,
        }
    }

    fn can_write_direct(&self) -> bool {
        self.direct_write && self.monitor.is_online()
    }

    fn queue(&self, mutation: Mutation) -> Result<WriteOutcome> {
        let outcome = self.queue.apply_mutation(mutation)?;
        Ok(WriteOutcome::Queued { outcome })
    }

    pub async fn create(&self, payload: RecordPayload) -> Result<WriteOutcome> {
        if self.can_write_direct() {
            let attempt = async {
                let principal = self.principal.current_principal().await?;
                self.remote.remote_create(&principal, &payload).await
            };
            match attempt.await {
                Ok(remote_id) => return Ok(WriteOutcome::Created { remote_id }),
                Err(e) => log_direct_failure("create", &e),
            }
        }
        self.queue(Mutation::Create { payload })
    }

    pub async fn edit(&self, target: RecordRef, patch: PartialRecordPayload) -> Result<WriteOutcome> {
        if patch.is_empty() {
            return Err(SyncError::InvalidInput("empty patch".to_string()));
        }
        if let Some(remote_id) = self.direct_target(&target) {
            let attempt = async {
                let principal = self.principal.current_principal().await?;
                self.remote
                    .remote_update(&principal, &remote_id, &patch)
                    .await
            };
            match attempt.await {
                Ok(()) => return Ok(WriteOutcome::Applied { remote_id }),
                Err(e) => log_direct_failure("edit", &e),
            }
        }
        self.queue(Mutation::Edit { target, patch })
    }

    pub async fn delete(&self, target: RecordRef) -> Result<WriteOutcome> {
        if let Some(remote_id) = self.direct_target(&target) {
            let attempt = async {
                let principal = self.principal.current_principal().await?;
                self.remote.remote_delete(&principal, &remote_id).await
            };
            match attempt.await {
                Ok(()) => {
                    self.queue.forget_remote(&remote_id);
                    return Ok(WriteOutcome::Applied { remote_id });
                }
                Err(e) => log_direct_failure("delete", &e),
            }
        }
        self.queue(Mutation::Delete { target })
    }

    /// Remote id to write to directly, if a direct write is allowed.
    ///
    /// Records still local-only, or with queued edits/deletes, go through the
    /// queue so later intents never overtake earlier ones.
    fn direct_target(&self, target: &RecordRef) -> Option<RemoteId> {
        if !self.can_write_direct() {
            return None;
        }
        match self.queue.reader().resolve(target) {
            RecordRef::Remote(remote_id) if !self.queue.reader().has_entries_for(&remote_id) => {
                Some(remote_id)
            }
            _ => None,
        }
    }
}

fn log_direct_failure(op: &str, error: &SyncError) {
    tracing::warn!(op, "Direct remote write failed, queueing: {}", error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::StaticProbe;
    use crate::queue::{MutationQueue, SharedQueue};
    use crate::sync::{Principal, StaticPrincipal};
    use crate::types::LocalId;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FlakyRemote {
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteStore for FlakyRemote {
        async fn remote_create(&self, _: &Principal, _: &RecordPayload) -> Result<RemoteId> {
            self.calls.lock().push("create".into());
            if self.fail {
                return Err(SyncError::Unreachable);
            }
            Ok(RemoteId::from("R100"))
        }

        async fn remote_update(&self, _: &Principal, id: &RemoteId, _: &PartialRecordPayload) -> Result<()> {
            self.calls.lock().push(format!("update:{}", id));
            if self.fail {
                return Err(SyncError::Unreachable);
            }
            Ok(())
        }

        async fn remote_delete(&self, _: &Principal, id: &RemoteId) -> Result<()> {
            self.calls.lock().push(format!("delete:{}", id));
            if self.fail {
                return Err(SyncError::Unreachable);
            }
            Ok(())
        }
    }

    fn writer(remote: Arc<FlakyRemote>, online: bool) -> (SharedQueue, OfflineWriter) {
        let shared = SharedQueue::new(MutationQueue::in_memory());
        let monitor = Arc::new(ConnectivityMonitor::new(Arc::new(StaticProbe::new(online)), 8));
        monitor.report(online);
        let writer = OfflineWriter::new(
            shared.writer(),
            remote,
            Arc::new(StaticPrincipal::signed_in(Principal::new("u"))),
            monitor,
            &SyncConfig::default(),
        );
        (shared, writer)
    }

    #[tokio::test]
    async fn test_online_create_goes_direct() {
        let remote = Arc::new(FlakyRemote::default());
        let (shared, writer) = writer(remote, true);

        let outcome = writer.create(RecordPayload::new().with("amount", 12)).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Created { remote_id: RemoteId::from("R100") });
        assert!(!shared.reader().has_pending());
    }

    #[tokio::test]
    async fn test_offline_create_is_queued() {
        let remote = Arc::new(FlakyRemote::default());
        let (shared, writer) = writer(remote.clone(), false);

        let outcome = writer.create(RecordPayload::new()).await.unwrap();

        assert!(matches!(
            outcome,
            WriteOutcome::Queued { outcome: MutationOutcome::Queued(_) }
        ));
        assert_eq!(shared.reader().creates().len(), 1);
        assert!(remote.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_direct_write_falls_back_to_queue() {
        let remote = Arc::new(FlakyRemote {
            fail: true,
            ..Default::default()
        });
        let (shared, writer) = writer(remote.clone(), true);

        let outcome = writer.delete(RecordRef::Remote(RemoteId::from("R5"))).await.unwrap();

        assert_eq!(
            outcome,
            WriteOutcome::Queued { outcome: MutationOutcome::DeleteQueued(RemoteId::from("R5")) }
        );
        assert_eq!(*remote.calls.lock(), vec!["delete:R5".to_string()]);
        assert_eq!(shared.reader().deletes().len(), 1);
    }

    #[tokio::test]
    async fn test_queued_record_is_not_overtaken() {
        let remote = Arc::new(FlakyRemote::default());
        let (shared, writer) = writer(remote.clone(), true);
        shared
            .writer()
            .apply_mutation(Mutation::Edit {
                target: RecordRef::Remote(RemoteId::from("R1")),
                patch: PartialRecordPayload::new().with("amount", 1),
            })
            .unwrap();

        let outcome = writer
            .edit(
                RecordRef::Remote(RemoteId::from("R1")),
                PartialRecordPayload::new().with("amount", 2),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WriteOutcome::Queued { outcome: MutationOutcome::EditMerged(RemoteId::from("R1")) }
        );
        assert!(remote.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_edit_of_local_record_stays_local() {
        let remote = Arc::new(FlakyRemote::default());
        let (shared, writer) = writer(remote.clone(), true);
        let outcome = shared
            .writer()
            .apply_mutation(Mutation::Create { payload: RecordPayload::new().with("amount", 1) })
            .unwrap();
        let MutationOutcome::Queued(local) = outcome else {
            panic!("expected queued create");
        };

        let result = writer
            .edit(RecordRef::Local(local.clone()), PartialRecordPayload::new().with("amount", 4))
            .await
            .unwrap();

        assert_eq!(
            result,
            WriteOutcome::Queued { outcome: MutationOutcome::CreateAmended(local) }
        );
        assert!(remote.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_patch_rejected() {
        let (_, writer) = writer(Arc::new(FlakyRemote::default()), false);
        let result = writer
            .edit(RecordRef::Local(LocalId::from("local-x")), PartialRecordPayload::new())
            .await;
        assert!(matches!(result, Err(SyncError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_direct_delete_forgets_id_mapping() {
        let remote = Arc::new(FlakyRemote::default());
        let (shared, writer) = writer(remote.clone(), true);
        let payload = RecordPayload::new().with("amount", 9);
        let MutationOutcome::Queued(local) = shared
            .writer()
            .apply_mutation(Mutation::Create { payload: payload.clone() })
            .unwrap()
        else {
            panic!("expected queued create");
        };
        shared
            .sync_access()
            .complete_create(&local, &payload, RemoteId::from("R7"));
        let record = RecordRef::Local(local);
        assert_eq!(shared.reader().resolve(&record), RecordRef::Remote(RemoteId::from("R7")));

        let outcome = writer.delete(record.clone()).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Applied { remote_id: RemoteId::from("R7") });
        assert_eq!(*remote.calls.lock(), vec!["delete:R7".to_string()]);
        assert_eq!(shared.reader().resolve(&record), record);
        assert!(!shared.reader().has_pending());
    }
}
