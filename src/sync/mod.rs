//! Sync reconciliation engine
//!
//! - [`SyncCoordinator`] runs single-flight passes over the queue
//! - [`SyncTrigger`] decides when a pass should start
//! - [`SyncWorker`] drives the trigger from connectivity and lifecycle events

mod coordinator;
mod events;
mod remote;
mod trigger;
mod worker;

pub use coordinator::SyncCoordinator;
pub use events::{SkipReason, SyncEvent, SyncEventType};
pub use remote::{Principal, PrincipalResolver, RemoteStore, StaticPrincipal};
pub use trigger::SyncTrigger;
pub use worker::{SyncCommand, SyncWorker};
