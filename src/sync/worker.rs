//! Background sync worker
//!
//! Owns the event loop that wires connectivity edges, foreground
//! notifications and manual requests to the [`SyncTrigger`].

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::trigger::SyncTrigger;
use crate::error::{Result, SyncError};

/// Commands for the sync worker
#[derive(Debug)]
pub enum SyncCommand {
    /// App entered the foreground
    Foreground,
    /// User requested a sync; replies whether a pass ran
    Manual(oneshot::Sender<bool>),
    /// Stop the worker
    Stop,
}

/// Background sync worker
pub struct SyncWorker {
    sender: mpsc::Sender<SyncCommand>,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Start the worker on the current tokio runtime
    pub fn start(trigger: Arc<SyncTrigger>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<SyncCommand>(100);
        let mut edges = trigger.monitor().subscribe();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = receiver.recv() => {
                        match cmd {
                            // The probe's edge, if any, arrives through `edges`
                            Some(SyncCommand::Foreground) => {
                                trigger.probe_foreground().await;
                            }
                            Some(SyncCommand::Manual(reply)) => {
                                let ran = trigger.trigger_manual().await;
                                let _ = reply.send(ran);
                            }
                            Some(SyncCommand::Stop) | None => break,
                        }
                    }
                    edge = edges.recv() => {
                        match edge {
                            Ok(edge) => {
                                trigger.on_connectivity_change(edge).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                tracing::warn!(missed, "Sync worker lagged behind connectivity events");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }

            tracing::info!("Sync worker stopped");
        });

        Self { sender, handle }
    }

    /// Notify the worker that the app entered the foreground
    pub async fn foreground(&self) -> Result<()> {
        self.sender
            .send(SyncCommand::Foreground)
            .await
            .map_err(|_| SyncError::Internal("Worker channel closed".to_string()))?;
        Ok(())
    }

    /// Request a manual sync and wait for the decision
    pub async fn sync_now(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(SyncCommand::Manual(reply))
            .await
            .map_err(|_| SyncError::Internal("Worker channel closed".to_string()))?;
        rx.await
            .map_err(|_| SyncError::Internal("Worker dropped manual sync reply".to_string()))
    }

    /// Stop the worker and wait for the loop to exit
    pub async fn stop(self) -> Result<()> {
        self.sender
            .send(SyncCommand::Stop)
            .await
            .map_err(|_| SyncError::Internal("Worker channel closed".to_string()))?;
        self.handle
            .await
            .map_err(|e| SyncError::Internal(format!("Worker task failed: {}", e)))
    }
}
