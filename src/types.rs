//! Core types for the offline mutation queue

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Wall-clock timestamp used throughout the queue
pub type Timestamp = DateTime<Utc>;

/// Client-generated identifier for a record not yet known to the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    /// Generate a fresh local id
    pub fn generate() -> Self {
        Self(format!("local-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LocalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-issued identifier for a record that exists remotely
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RemoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RemoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a record as seen by a caller: either still local-only or remote
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RecordRef {
    Local(LocalId),
    Remote(RemoteId),
}

impl RecordRef {
    /// Parse a textual id: `local-` prefixed ids are local, anything else remote
    pub fn parse(s: &str) -> Self {
        if s.starts_with("local-") {
            RecordRef::Local(LocalId::from(s))
        } else {
            RecordRef::Remote(RemoteId::from(s))
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordRef::Local(id) => write!(f, "{}", id),
            RecordRef::Remote(id) => write!(f, "{}", id),
        }
    }
}

/// Full field set of a record, as sent to `remote_create`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordPayload(Map<String, Value>);

impl RecordPayload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a payload from a JSON object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(SyncError::InvalidInput(format!(
                "record payload must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Builder-style field insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Overlay a patch: fields present in the patch overwrite existing ones
    pub fn apply(&mut self, patch: &PartialRecordPayload) {
        for (key, value) in patch.fields() {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

/// Subset of record fields, as sent to `remote_update`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialRecordPayload(Map<String, Value>);

impl PartialRecordPayload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(SyncError::InvalidInput(format!(
                "patch must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge a newer patch into this one; newer fields win
    pub fn merge(&mut self, newer: &PartialRecordPayload) {
        for (key, value) in newer.fields() {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

impl From<RecordPayload> for PartialRecordPayload {
    fn from(payload: RecordPayload) -> Self {
        Self(payload.0)
    }
}

/// Intent to create a record that does not yet exist remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCreate {
    pub local_id: LocalId,
    pub payload: RecordPayload,
    pub created_at: Timestamp,
    #[serde(default)]
    pub retry_count: u8,
}

/// Partial update to a record that already exists remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEdit {
    pub target_id: RemoteId,
    pub patch: PartialRecordPayload,
    pub created_at: Timestamp,
    #[serde(default)]
    pub retry_count: u8,
}

/// Intent to delete a remote record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelete {
    pub target_id: RemoteId,
    pub created_at: Timestamp,
    #[serde(default)]
    pub retry_count: u8,
}

/// Kind of queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Edit,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Edit => "edit",
            MutationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a single queue entry: its kind plus the id it is keyed by
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntryKey {
    Create(LocalId),
    Edit(RemoteId),
    Delete(RemoteId),
}

impl EntryKey {
    pub fn kind(&self) -> MutationKind {
        match self {
            EntryKey::Create(_) => MutationKind::Create,
            EntryKey::Edit(_) => MutationKind::Edit,
            EntryKey::Delete(_) => MutationKind::Delete,
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = match self {
            EntryKey::Create(id) => id.as_str(),
            EntryKey::Edit(id) | EntryKey::Delete(id) => id.as_str(),
        };
        write!(f, "{}:{}", self.kind(), id)
    }
}

/// Ephemeral sync status observed by the UI layer. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// `None` until the first reachability report after a cold start
    pub is_online: Option<bool>,
    pub is_syncing: bool,
    pub last_sync_at: Option<Timestamp>,
    pub last_error: Option<String>,
    /// Entries still waiting in the queue
    pub pending: usize,
}

/// Outcome of a single `run_sync` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub synced: u32,
    pub failed: u32,
    /// Entries left untouched because their retries are exhausted
    #[serde(default)]
    pub skipped: u32,
    pub aborted: bool,
}

impl SyncResult {
    /// Result of a pass rejected or abandoned before any entry was attempted
    pub fn aborted() -> Self {
        Self {
            aborted: true,
            ..Default::default()
        }
    }

    /// Overall success: ran to completion with no failed entries
    pub fn is_success(&self) -> bool {
        !self.aborted && self.failed == 0
    }
}

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Retry ceiling; entries at or above it are skipped by sync passes
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// Re-probe reachability when the app returns to the foreground
    #[serde(default = "default_true")]
    pub probe_on_foreground: bool,
    /// Start a pass automatically on a reachable edge
    #[serde(default = "default_true")]
    pub sync_on_reconnect: bool,
    /// Capacity of the broadcast channels for sync and connectivity events
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Let the offline writer try the remote store before queueing
    #[serde(default = "default_true")]
    pub direct_write: bool,
}

fn default_max_retries() -> u8 {
    5
}

fn default_true() -> bool {
    true
}

fn default_event_buffer() -> usize {
    256
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            probe_on_foreground: true,
            sync_on_reconnect: true,
            event_buffer: default_event_buffer(),
            direct_write: true,
        }
    }
}

/// Configuration for durable queue storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database (`:memory:` for tests)
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Key under which the queue blob is stored
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

fn default_db_path() -> String {
    "~/.local/share/tipsync/queue.db".to_string()
}

fn default_storage_key() -> String {
    "mutation_queue".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            storage_key: default_storage_key(),
        }
    }
}
