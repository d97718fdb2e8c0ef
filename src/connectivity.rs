//! Reachability tracking with edge-triggered events
//!
//! The platform reports reachability as plain booleans, either pushed via
//! [`ConnectivityMonitor::report`] or polled through a [`ReachabilityProbe`].
//! The monitor turns those into [`ConnectivityEdge`] events that fire only
//! when the state actually changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Poll-style reachability source
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probe backed by a flag, for platforms that push state and for tests
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    reachable: Arc<AtomicBool>,
}

impl StaticProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: Arc::new(AtomicBool::new(reachable)),
        }
    }

    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Last known reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Unknown,
    Online,
    Offline,
}

/// A confirmed change of reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEdge {
    Reachable,
    Unreachable,
}

/// Tracks reachability and broadcasts edges
pub struct ConnectivityMonitor {
    state: Mutex<Reachability>,
    probe: Arc<dyn ReachabilityProbe>,
    tx: broadcast::Sender<ConnectivityEdge>,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            state: Mutex::new(Reachability::Unknown),
            probe,
            tx,
        }
    }

    pub fn state(&self) -> Reachability {
        *self.state.lock()
    }

    pub fn is_online(&self) -> bool {
        self.state() == Reachability::Online
    }

    /// `None` until the first report
    pub fn known_online(&self) -> Option<bool> {
        match self.state() {
            Reachability::Unknown => None,
            Reachability::Online => Some(true),
            Reachability::Offline => Some(false),
        }
    }

    /// Subscribe to edge events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEdge> {
        self.tx.subscribe()
    }

    /// Feed a reachability observation. Returns the edge if the state flipped.
    /// The first report after startup always counts as an edge.
    ///
    /// The edge is broadcast under the state lock, so subscribers see edges
    /// in the same order the state changed.
    pub fn report(&self, reachable: bool) -> Option<ConnectivityEdge> {
        let next = if reachable {
            Reachability::Online
        } else {
            Reachability::Offline
        };

        let mut state = self.state.lock();
        if *state == next {
            return None;
        }
        *state = next;

        let edge = if reachable {
            tracing::info!("Network reachable");
            ConnectivityEdge::Reachable
        } else {
            tracing::warn!("Network unreachable");
            ConnectivityEdge::Unreachable
        };
        // No subscribers is fine
        let _ = self.tx.send(edge);
        Some(edge)
    }

    /// Check reachability now and report the edge if the state flipped
    pub async fn probe(&self) -> Option<ConnectivityEdge> {
        let reachable = self.probe.is_reachable().await;
        self.report(reachable)
    }

    /// App returned to the foreground; catch reconnections missed while backgrounded
    pub async fn on_foreground(&self) -> Option<ConnectivityEdge> {
        tracing::debug!("App entered foreground, probing reachability");
        self.probe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(reachable: bool) -> (ConnectivityMonitor, StaticProbe) {
        let probe = StaticProbe::new(reachable);
        (ConnectivityMonitor::new(Arc::new(probe.clone()), 16), probe)
    }

    #[test]
    fn test_first_report_is_an_edge() {
        let (monitor, _) = monitor(false);
        assert_eq!(monitor.state(), Reachability::Unknown);
        assert_eq!(monitor.known_online(), None);

        assert_eq!(monitor.report(true), Some(ConnectivityEdge::Reachable));
        assert_eq!(monitor.state(), Reachability::Online);
    }

    #[test]
    fn test_repeated_state_is_not_an_edge() {
        let (monitor, _) = monitor(false);
        assert_eq!(monitor.report(false), Some(ConnectivityEdge::Unreachable));
        assert_eq!(monitor.report(false), None);
        assert_eq!(monitor.report(true), Some(ConnectivityEdge::Reachable));
        assert_eq!(monitor.report(true), None);
        assert_eq!(monitor.report(false), Some(ConnectivityEdge::Unreachable));
    }

    #[tokio::test]
    async fn test_subscribers_see_edges_only() {
        let (monitor, _) = monitor(false);
        let mut rx = monitor.subscribe();

        monitor.report(true);
        monitor.report(true);
        monitor.report(false);

        assert_eq!(rx.recv().await.unwrap(), ConnectivityEdge::Reachable);
        assert_eq!(rx.recv().await.unwrap(), ConnectivityEdge::Unreachable);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_foreground_probe_detects_missed_reconnect() {
        let (monitor, probe) = monitor(false);
        monitor.report(false);

        // Network came back while backgrounded; no push event was delivered
        probe.set(true);
        assert_eq!(monitor.on_foreground().await, Some(ConnectivityEdge::Reachable));
        assert_eq!(monitor.on_foreground().await, None);
    }

    #[test]
    fn test_concurrent_reports_keep_edges_ordered() {
        for _ in 0..50 {
            // Large enough that the subscriber never lags
            let monitor = Arc::new(ConnectivityMonitor::new(
                Arc::new(StaticProbe::new(false)),
                1024,
            ));
            let mut rx = monitor.subscribe();

            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let monitor = monitor.clone();
                    std::thread::spawn(move || {
                        for i in 0..200 {
                            monitor.report((i + t) % 2 == 0);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let mut last = None;
            while let Ok(edge) = rx.try_recv() {
                assert_ne!(Some(edge), last, "edge repeated without a flip in between");
                last = Some(edge);
            }
            let expected = match monitor.state() {
                Reachability::Online => ConnectivityEdge::Reachable,
                _ => ConnectivityEdge::Unreachable,
            };
            assert_eq!(last, Some(expected));
        }
    }
}
