//! Sync lifecycle events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EntryKey, SyncResult};

/// Types of sync events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventType {
    SyncStarted,
    SyncCompleted,
    SyncFailed,
    SyncSkipped,
    EntrySynced,
    EntryFailed,
}

/// Why a requested pass did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadySyncing,
    NothingPending,
}

/// A sync event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub event_type: SyncEventType,
    pub timestamp: DateTime<Utc>,
    /// Entry concerned (per-entry events)
    pub entry: Option<EntryKey>,
    /// Pass totals (completed events)
    pub result: Option<SyncResult>,
    pub skip_reason: Option<SkipReason>,
    pub error: Option<String>,
}

impl SyncEvent {
    fn new(event_type: SyncEventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            entry: None,
            result: None,
            skip_reason: None,
            error: None,
        }
    }

    pub fn sync_started() -> Self {
        Self::new(SyncEventType::SyncStarted)
    }

    pub fn sync_completed(result: SyncResult) -> Self {
        Self {
            result: Some(result),
            ..Self::new(SyncEventType::SyncCompleted)
        }
    }

    /// Pass aborted before any entry was attempted
    pub fn sync_failed(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            result: Some(SyncResult::aborted()),
            ..Self::new(SyncEventType::SyncFailed)
        }
    }

    pub fn sync_skipped(reason: SkipReason) -> Self {
        Self {
            skip_reason: Some(reason),
            ..Self::new(SyncEventType::SyncSkipped)
        }
    }

    pub fn entry_synced(entry: EntryKey) -> Self {
        Self {
            entry: Some(entry),
            ..Self::new(SyncEventType::EntrySynced)
        }
    }

    pub fn entry_failed(entry: EntryKey, error: &str) -> Self {
        Self {
            entry: Some(entry),
            error: Some(truncate(error, 200)),
            ..Self::new(SyncEventType::EntryFailed)
        }
    }
}

/// Truncate string for event payloads (UTF-8 safe)
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
