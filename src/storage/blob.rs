//! Blob store trait and the non-SQLite backends

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Key-value blob storage with load/save semantics
pub trait BlobStore: Send + Sync {
    /// Load the stored blob, `None` if nothing was ever saved
    fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored blob
    fn save(&self, bytes: &[u8]) -> Result<()>;

    /// Short backend name for logs
    fn name(&self) -> &str;
}

/// In-memory store. Clones share the same slot, so a test can drop a queue
/// and reload a new one from the same store to simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, bytes: &[u8]) -> Result<()> {
        *self.slot.lock() = Some(bytes.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Whole-file store; writes go to a sibling temp file and are renamed into place
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    path: PathBuf,
}

impl FileBlobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl BlobStore for FileBlobStore {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.temp_path();
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}
