//! When to sync: reconnects, foreground transitions and manual requests

use std::sync::Arc;

use super::coordinator::SyncCoordinator;
use crate::connectivity::{ConnectivityEdge, ConnectivityMonitor};
use crate::queue::QueueReader;
use crate::types::{SyncConfig, SyncResult};

/// Decides when to invoke the coordinator.
///
/// Redundant triggers are collapsed by the coordinator's in-flight flag,
/// not by debouncing edges here.
pub struct SyncTrigger {
    coordinator: Arc<SyncCoordinator>,
    monitor: Arc<ConnectivityMonitor>,
    queue: QueueReader,
    config: SyncConfig,
}

impl SyncTrigger {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        monitor: Arc<ConnectivityMonitor>,
        queue: QueueReader,
        config: SyncConfig,
    ) -> Self {
        Self {
            coordinator,
            monitor,
            queue,
            config,
        }
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// Handle a connectivity edge. A reachable edge starts one pass when
    /// entries are pending and nothing is in flight.
    pub async fn on_connectivity_change(&self, edge: ConnectivityEdge) -> Option<SyncResult> {
        self.coordinator.set_online(edge == ConnectivityEdge::Reachable);

        if edge != ConnectivityEdge::Reachable || !self.config.sync_on_reconnect {
            return None;
        }
        if !self.queue.has_pending() {
            tracing::debug!("Reconnected with empty queue, nothing to sync");
            return None;
        }
        if self.coordinator.is_syncing() {
            tracing::debug!("Reconnected while a sync is in flight");
            return None;
        }

        tracing::info!(
            pending = self.queue.pending_count(),
            "Reconnected, starting sync"
        );
        Some(self.coordinator.run_sync().await)
    }

    /// Re-probe reachability after a foreground transition, if enabled.
    /// Returns the edge the probe produced.
    pub async fn probe_foreground(&self) -> Option<ConnectivityEdge> {
        if !self.config.probe_on_foreground {
            tracing::debug!("Foreground probe disabled");
            return None;
        }
        self.monitor.on_foreground().await
    }

    /// App entered the foreground: re-probe and treat a reachable edge like a reconnect
    pub async fn on_foreground(&self) -> Option<SyncResult> {
        let edge = self.probe_foreground().await?;
        self.on_connectivity_change(edge).await
    }

    /// User asked for a sync. Returns `false` without syncing when offline,
    /// already syncing, or nothing is pending.
    pub async fn trigger_manual(&self) -> bool {
        if !self.monitor.is_online() {
            tracing::debug!("Manual sync ignored: offline");
            return false;
        }
        if self.coordinator.is_syncing() {
            tracing::debug!("Manual sync ignored: already syncing");
            return false;
        }
        if !self.queue.has_pending() {
            tracing::debug!("Manual sync ignored: nothing pending");
            return false;
        }

        // Another trigger may have started a pass since the check above
        self.coordinator.try_run_sync().await.is_some()
    }
}
