//! Sync pass execution: drains the queue against the remote store
//!
//! One pass at a time. Entries are attempted strictly one after another,
//! creates first, then edits, then deletes. A failed entry has its retry
//! counter bumped and the pass moves on. Entries at the retry ceiling are
//! left alone until an operator clears or re-arms them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::events::{SkipReason, SyncEvent};
use super::remote::{Principal, PrincipalResolver, RemoteStore};
use crate::error::SyncError;
use crate::queue::SyncAccess;
use crate::types::{EntryKey, SyncConfig, SyncResult, SyncStatus};

/// Running totals for one pass
#[derive(Debug, Default)]
struct PassTally {
    synced: u32,
    failed: u32,
    skipped: u32,
    last_error: Option<String>,
}

impl PassTally {
    fn result(&self) -> SyncResult {
        SyncResult {
            synced: self.synced,
            failed: self.failed,
            skipped: self.skipped,
            aborted: false,
        }
    }

    /// Human-readable summary, only when something failed
    fn summary(&self) -> Option<String> {
        if self.failed == 0 {
            return None;
        }
        Some(format!(
            "{} of {} entries failed to sync; last error: {}",
            self.failed,
            self.synced + self.failed,
            self.last_error.as_deref().unwrap_or("unknown")
        ))
    }
}

/// Clears the in-flight flag on every exit path
struct InFlightGuard<'a> {
    coordinator: &'a SyncCoordinator,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.status.write().is_syncing = false;
        self.coordinator.in_flight.store(false, Ordering::Release);
    }
}

/// Drains the mutation queue against the remote store
pub struct SyncCoordinator {
    queue: SyncAccess,
    remote: Arc<dyn RemoteStore>,
    principal: Arc<dyn PrincipalResolver>,
    max_retries: u8,
    in_flight: AtomicBool,
    status: RwLock<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
    pub fn new(
        queue: SyncAccess,
        remote: Arc<dyn RemoteStore>,
        principal: Arc<dyn PrincipalResolver>,
        config: &SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let status = SyncStatus {
            last_sync_at: queue.reader().last_sync_at(),
            ..Default::default()
        };
        Self {
            queue,
            remote,
            principal,
            max_retries: config.max_retries,
            in_flight: AtomicBool::new(false),
            status: RwLock::new(status),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    /// Record the latest reachability for status observers
    pub fn set_online(&self, online: bool) {
        self.status.write().is_online = Some(online);
    }

    /// Snapshot of the current sync status
    pub fn status(&self) -> SyncStatus {
        let mut status = self.status.read().clone();
        status.pending = self.queue.reader().pending_count();
        status
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { coordinator: self })
    }

    /// Run one sync pass.
    ///
    /// Returns `aborted` without touching the queue if another pass is in
    /// flight or the principal cannot be resolved.
    pub async fn run_sync(&self) -> SyncResult {
        self.try_run_sync().await.unwrap_or_else(SyncResult::aborted)
    }

    /// Run one sync pass unless another is in flight, in which case `None`.
    ///
    /// The in-flight check and the start of the pass are one atomic step.
    pub async fn try_run_sync(&self) -> Option<SyncResult> {
        let Some(_guard) = self.try_begin() else {
            tracing::debug!("Sync already in flight, rejecting redundant trigger");
            self.emit(SyncEvent::sync_skipped(SkipReason::AlreadySyncing));
            return None;
        };
        Some(self.run_pass().await)
    }

    /// Body of a pass; the caller holds the in-flight guard
    async fn run_pass(&self) -> SyncResult {
        if !self.queue.reader().has_pending() {
            self.emit(SyncEvent::sync_skipped(SkipReason::NothingPending));
            return SyncResult::default();
        }

        {
            let mut status = self.status.write();
            status.is_syncing = true;
            status.last_error = None;
        }
        self.emit(SyncEvent::sync_started());
        let started = std::time::Instant::now();

        let principal = match self.principal.current_principal().await {
            Ok(principal) => principal,
            Err(e) => {
                let message = format!("Sync aborted: {}", e);
                tracing::warn!("{}", message);
                self.status.write().last_error = Some(message.clone());
                self.emit(SyncEvent::sync_failed(&message));
                return SyncResult::aborted();
            }
        };

        let mut tally = PassTally::default();
        self.sync_creates(&principal, &mut tally).await;
        self.sync_edits(&principal, &mut tally).await;
        self.sync_deletes(&principal, &mut tally).await;

        let completed_at = Utc::now();
        self.queue.set_last_sync_at(completed_at);
        {
            let mut status = self.status.write();
            status.last_sync_at = Some(completed_at);
            status.last_error = tally.summary();
        }

        let result = tally.result();
        if result.is_success() {
            tracing::info!(
                synced = result.synced,
                skipped = result.skipped,
                "Sync completed in {:?}",
                started.elapsed()
            );
        } else {
            tracing::warn!(
                synced = result.synced,
                failed = result.failed,
                skipped = result.skipped,
                "Sync completed with failures in {:?}",
                started.elapsed()
            );
        }
        self.emit(SyncEvent::sync_completed(result));
        result
    }

    async fn sync_creates(&self, principal: &Principal, tally: &mut PassTally) {
        for local_id in self.queue.create_ids() {
            let Some(entry) = self.queue.create(&local_id) else {
                continue;
            };
            let key = EntryKey::Create(local_id.clone());
            if self.skip_exhausted(&key, entry.retry_count, tally) {
                continue;
            }

            match self.remote.remote_create(principal, &entry.payload).await {
                Ok(remote_id) => {
                    tracing::debug!(local_id = %local_id, remote_id = %remote_id, "Create synced");
                    self.queue.complete_create(&local_id, &entry.payload, remote_id);
                    self.record_success(key, tally);
                }
                Err(e) => self.record_failure(key, e, tally),
            }
        }
    }

    async fn sync_edits(&self, principal: &Principal, tally: &mut PassTally) {
        for target_id in self.queue.edit_ids() {
            let Some(entry) = self.queue.edit(&target_id) else {
                continue;
            };
            let key = EntryKey::Edit(target_id.clone());
            if self.skip_exhausted(&key, entry.retry_count, tally) {
                continue;
            }

            match self
                .remote
                .remote_update(principal, &target_id, &entry.patch)
                .await
            {
                Ok(()) => {
                    self.queue.complete_edit(&target_id, &entry.patch);
                    self.record_success(key, tally);
                }
                Err(e) => self.record_failure(key, e, tally),
            }
        }
    }

    async fn sync_deletes(&self, principal: &Principal, tally: &mut PassTally) {
        for target_id in self.queue.delete_ids() {
            let Some(entry) = self.queue.delete(&target_id) else {
                continue;
            };
            let key = EntryKey::Delete(target_id.clone());
            if self.skip_exhausted(&key, entry.retry_count, tally) {
                continue;
            }

            match self.remote.remote_delete(principal, &target_id).await {
                Ok(()) => {
                    self.queue.complete_delete(&target_id);
                    self.record_success(key, tally);
                }
                Err(e) => self.record_failure(key, e, tally),
            }
        }
    }

    fn skip_exhausted(&self, key: &EntryKey, retry_count: u8, tally: &mut PassTally) -> bool {
        if retry_count < self.max_retries {
            return false;
        }
        tracing::debug!(entry = %key, retry_count, "Skipping entry with exhausted retries");
        tally.skipped += 1;
        true
    }

    fn record_success(&self, key: EntryKey, tally: &mut PassTally) {
        tally.synced += 1;
        self.emit(SyncEvent::entry_synced(key));
    }

    fn record_failure(&self, key: EntryKey, error: SyncError, tally: &mut PassTally) {
        self.queue.increment_retry(&key);
        tally.failed += 1;
        let message = error.to_string();
        tracing::warn!(
            entry = %key,
            retryable = error.is_retryable(),
            "Sync attempt failed: {}",
            message
        );
        self.emit(SyncEvent::entry_failed(key, &message));
        tally.last_error = Some(message);
    }
}
