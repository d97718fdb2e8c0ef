//! tipsync - offline-first mutation queue and sync engine
//!
//! Lets the tip tracker create, edit and delete records while offline,
//! persists those intents, and reconciles them with the remote store once
//! connectivity returns.

pub mod connectivity;
pub mod engine;
pub mod error;
pub mod queue;
pub mod storage;
pub mod sync;
pub mod types;
pub mod writer;

pub use connectivity::{ConnectivityEdge, ConnectivityMonitor, ReachabilityProbe};
pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use queue::{Mutation, MutationOutcome, MutationQueue, SharedQueue};
pub use sync::{SyncCoordinator, SyncTrigger, SyncWorker};
pub use types::*;
pub use writer::{OfflineWriter, WriteOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
