//! SQLite-backed blob store with WAL mode
//!
//! The queue blob lives in a single row of a key-value table, so other
//! application state can share the same database file.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use super::blob::BlobStore;
use super::migrations::run_migrations;
use crate::error::Result;
use crate::types::StorageConfig;

/// Blob store wrapping a SQLite connection
pub struct SqliteBlobStore {
    config: StorageConfig,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBlobStore {
    /// Open or create a database with the given configuration
    pub fn open(config: StorageConfig) -> Result<Self> {
        let conn = Self::create_connection(&config)?;

        run_migrations(&conn)?;

        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open(StorageConfig {
            db_path: ":memory:".to_string(),
            ..Default::default()
        })
    }

    fn create_connection(config: &StorageConfig) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if config.db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = Path::new(&config.db_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open_with_flags(&config.db_path, flags)?
        };

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA temp_store=MEMORY;
            "#,
        )?;

        Ok(conn)
    }

    pub fn db_path(&self) -> &str {
        &self.config.db_path
    }

    pub fn storage_key(&self) -> &str {
        &self.config.storage_key
    }

    /// When the blob was last written, as stored by SQLite
    pub fn updated_at(&self) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let updated = conn
            .query_row(
                "SELECT updated_at FROM kv_blobs WHERE key = ?",
                params![self.config.storage_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(updated)
    }
}

impl BlobStore for SqliteBlobStore {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM kv_blobs WHERE key = ?",
                params![self.config.storage_key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn save(&self, bytes: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv_blobs (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![
                self.config.storage_key,
                bytes,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

impl Clone for SqliteBlobStore {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            conn: self.conn.clone(),
        }
    }
}
