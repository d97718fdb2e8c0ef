//! Durable blob storage for the mutation queue
//!
//! The queue only needs load/save of one opaque blob. Backends:
//! - SQLite key-value table (default, WAL mode)
//! - Single file with atomic replace
//! - In-memory (tests, simulations)

mod blob;
mod connection;
mod migrations;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use connection::SqliteBlobStore;
