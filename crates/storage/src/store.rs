//! JSON Snapshot Store

use crate::StorageError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// A document persisted as a whole by a [`JsonStore`]
pub trait Snapshot: Serialize + DeserializeOwned + Default + Send {
    /// Stamp the snapshot's `lastUpdated` field
    fn touch(&mut self, now: DateTime<Utc>);
}

/// Converts a document written with an older schema into the current one.
/// Returns `None` when the content is not in the legacy format either.
pub type Migration<S> = Box<dyn Fn(&str) -> Option<S> + Send + Sync>;

/// Outcome of reading the backing file
enum Loaded<S> {
    /// Parsed with the current schema
    Current(S),
    /// Converted from a legacy schema, not yet written back
    Migrated(S),
    /// Missing or unrecoverable file
    Empty(S),
}

/// Durable snapshot store backed by a single JSON file.
///
/// The file is the source of truth: every access rehydrates it, nothing is
/// held resident between calls.
pub struct JsonStore<S> {
    /// Location of the JSON document
    path: PathBuf,
    /// Serializes every read-modify-write cycle
    lock: Mutex<()>,
    /// Optional conversion from an older document schema
    migration: Option<Migration<S>>,
    _snapshot: PhantomData<fn() -> S>,
}

impl<S: Snapshot> JsonStore<S> {
    /// Create a store for the document at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!("Opening JSON store at {}", path.display());
        Self {
            path,
            lock: Mutex::new(()),
            migration: None,
            _snapshot: PhantomData,
        }
    }

    /// Create a store that converts documents in a legacy schema on load
    pub fn with_migration(path: impl Into<PathBuf>, migration: Migration<S>) -> Self {
        Self {
            migration: Some(migration),
            ..Self::new(path)
        }
    }

    /// Location of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current snapshot without taking the lock.
    ///
    /// The result may be stale by the time it is used; any decision that
    /// leads to a write has to be made under [`JsonStore::lock`].
    pub async fn load(&self) -> S {
        match self.read().await {
            Loaded::Current(snapshot) | Loaded::Migrated(snapshot) | Loaded::Empty(snapshot) => {
                snapshot
            }
        }
    }

    /// Acquire exclusive access to the store
    pub async fn lock(&self) -> StoreGuard<'_, S> {
        let guard = self.lock.lock().await;
        StoreGuard {
            store: self,
            _guard: guard,
        }
    }

    /// Load, apply `f`, and persist under exclusive access
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R, StorageError> {
        let mut guard = self.lock().await;
        guard.mutate(f).await
    }

    fn empty() -> S {
        let mut snapshot = S::default();
        snapshot.touch(Utc::now());
        snapshot
    }

    async fn read(&self) -> Loaded<S> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No document at {}, starting empty", self.path.display());
                return Loaded::Empty(Self::empty());
            }
            Err(e) => {
                warn!("Could not open {}, starting empty: {}", self.path.display(), e);
                return Loaded::Empty(Self::empty());
            }
        };

        let parse_error = match serde_json::from_str::<S>(&content) {
            Ok(snapshot) => return Loaded::Current(snapshot),
            Err(e) => e,
        };

        if let Some(migrate) = &self.migration {
            if let Some(snapshot) = migrate(&content) {
                info!("Converted legacy document at {}", self.path.display());
                return Loaded::Migrated(snapshot);
            }
        }

        warn!(
            "Could not parse {}, resetting it: {}",
            self.path.display(),
            parse_error
        );
        Loaded::Empty(Self::empty())
    }

    async fn persist(&self, snapshot: &S) -> Result<(), StorageError> {
        let body = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        let written = body.len();

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &body))
            .await
            .map_err(|e| StorageError::Io {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })??;

        debug!("Persisted {} bytes to {}", written, self.path.display());
        Ok(())
    }
}

/// Write `body` next to `path` and rename it over the target, so readers
/// only ever see a complete document. Runs on the blocking pool.
fn write_atomically(path: &Path, body: &[u8]) -> Result<(), StorageError> {
    let io_error = |e: std::io::Error| StorageError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(io_error)?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(io_error)?;
    tmp.write_all(body).map_err(io_error)?;
    tmp.as_file().sync_all().map_err(io_error)?;
    tmp.persist(path).map_err(|e| io_error(e.error))?;
    Ok(())
}

/// Exclusive access to a [`JsonStore`], released on drop
pub struct StoreGuard<'a, S> {
    store: &'a JsonStore<S>,
    _guard: MutexGuard<'a, ()>,
}

impl<S: Snapshot> StoreGuard<'_, S> {
    /// Read the current snapshot. A legacy document is written back in the
    /// current schema the first time it is seen under the lock.
    pub async fn load(&self) -> S {
        match self.store.read().await {
            Loaded::Migrated(snapshot) => {
                if let Err(e) = self.store.persist(&snapshot).await {
                    error!("Could not write back converted document: {}", e);
                }
                snapshot
            }
            Loaded::Current(snapshot) | Loaded::Empty(snapshot) => snapshot,
        }
    }

    /// Load, apply `f`, stamp and persist the snapshot
    pub async fn mutate<R>(&mut self, f: impl FnOnce(&mut S) -> R) -> Result<R, StorageError> {
        let mut snapshot = self.store.load().await;
        let result = f(&mut snapshot);
        snapshot.touch(Utc::now());
        self.store.persist(&snapshot).await?;
        Ok(result)
    }
}
