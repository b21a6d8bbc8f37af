//! Storage Layer
//!
//! Durable keyed caches persisted as whole JSON snapshots. Every write goes
//! through [`JsonStore::mutate`] (or [`StoreGuard::mutate`] under a held
//! lock), which serializes read-modify-write cycles per store.

mod store;

pub use store::{JsonStore, Migration, Snapshot, StoreGuard};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
