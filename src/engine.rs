//! Process-wide wiring of queue, monitor, coordinator, trigger and writer

use std::sync::Arc;

use crate::connectivity::{ConnectivityMonitor, ReachabilityProbe};
use crate::error::Result;
use crate::queue::{MutationQueue, QueueReader, SharedQueue};
use crate::storage::BlobStore;
use crate::sync::{PrincipalResolver, RemoteStore, SyncCoordinator, SyncTrigger, SyncWorker};
use crate::types::{SyncConfig, SyncStatus};
use crate::writer::OfflineWriter;

/// Everything the app needs, constructed once at startup
pub struct SyncEngine {
    queue: SharedQueue,
    monitor: Arc<ConnectivityMonitor>,
    coordinator: Arc<SyncCoordinator>,
    trigger: Arc<SyncTrigger>,
    writer: OfflineWriter,
    config: SyncConfig,
}

impl SyncEngine {
    /// Load the queue from `store` and wire up the components
    pub fn open(
        config: SyncConfig,
        store: Arc<dyn BlobStore>,
        remote: Arc<dyn RemoteStore>,
        principal: Arc<dyn PrincipalResolver>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Result<Self> {
        let queue = SharedQueue::new(MutationQueue::load(store)?);
        let monitor = Arc::new(ConnectivityMonitor::new(probe, config.event_buffer));
        let coordinator = Arc::new(SyncCoordinator::new(
            queue.sync_access(),
            remote.clone(),
            principal.clone(),
            &config,
        ));
        let trigger = Arc::new(SyncTrigger::new(
            coordinator.clone(),
            monitor.clone(),
            queue.reader(),
            config.clone(),
        ));
        let writer = OfflineWriter::new(queue.writer(), remote, principal, monitor.clone(), &config);

        Ok(Self {
            queue,
            monitor,
            coordinator,
            trigger,
            writer,
            config,
        })
    }

    /// Spawn the background worker on the current runtime
    pub fn start_worker(&self) -> SyncWorker {
        SyncWorker::start(self.trigger.clone())
    }

    pub fn writer(&self) -> &OfflineWriter {
        &self.writer
    }

    pub fn reader(&self) -> QueueReader {
        self.queue.reader()
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn trigger(&self) -> &Arc<SyncTrigger> {
        &self.trigger
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Status for the UI, with reachability taken from the monitor
    pub fn status(&self) -> SyncStatus {
        let mut status = self.coordinator.status();
        status.is_online = self.monitor.known_online();
        status
    }

    /// Operator action: drop entries whose retries are exhausted
    pub fn clear_failed(&self) -> Result<usize> {
        self.queue.clear_failed(self.config.max_retries)
    }

    /// Operator action: give exhausted entries another round of retries
    pub fn reset_retries(&self) -> Result<usize> {
        self.queue.reset_retries(self.config.max_retries)
    }
}
