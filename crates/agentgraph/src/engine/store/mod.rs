//! Snapshot persistence
//!
//! The scheduler saves the session snapshot after every tick through an
//! injected [`SnapshotStore`]. Durable stores let a debug session resume
//! across client calls and across processes.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                SnapshotStore                │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐   │
//! │  │  Memory  │  │   File   │  │  SQLite  │   │
//! │  └──────────┘  └──────────┘  └──────────┘   │
//! │                      │                      │
//! │                      ▼                      │
//! │           Snapshot (by SessionKey)          │
//! └─────────────────────────────────────────────┘
//! ```

mod file;
#[cfg(feature = "store-sqlite")]
mod sqlite;

pub use file::FileSnapshotStore;
#[cfg(feature = "store-sqlite")]
pub use sqlite::SqliteSnapshotStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use super::error::EngineError;
use super::snapshot::{SessionKey, Snapshot};

/// Durable storage for session snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the snapshot of a session, `None` if it does not exist
    async fn load(&self, key: &SessionKey) -> Result<Option<Snapshot>, EngineError>;

    /// Save (replace) the snapshot of a session.
    ///
    /// Implementations should ensure atomic writes to prevent corruption.
    async fn save(&self, key: &SessionKey, snapshot: &Snapshot) -> Result<(), EngineError>;

    /// Delete a session snapshot; deleting a missing session is not an error
    async fn delete(&self, key: &SessionKey) -> Result<(), EngineError>;

    /// Session ids stored for an agent, sorted ascending
    async fn list(&self, agent_id: &str) -> Result<Vec<String>, EngineError>;
}

/// Configuration for creating snapshot stores.
#[derive(Debug, Clone, Default)]
pub enum StoreConfig {
    /// In-memory store (not durable)
    #[default]
    Memory,

    /// File-based store
    File {
        /// Directory to store snapshot files
        path: PathBuf,
        /// Whether to compress snapshot data (uses zstd)
        compression: bool,
    },

    /// SQLite-based store (requires `store-sqlite` feature)
    #[cfg(feature = "store-sqlite")]
    Sqlite {
        /// Path to the SQLite database file, or `:memory:` for in-memory
        path: String,
    },
}

/// In-memory snapshot store.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: tokio::sync::RwLock<HashMap<SessionKey, Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<Snapshot>, EngineError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(key).cloned())
    }

    async fn save(&self, key: &SessionKey, snapshot: &Snapshot) -> Result<(), EngineError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(key.clone(), snapshot.clone());
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), EngineError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.remove(key);
        Ok(())
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<String>, EngineError> {
        let snapshots = self.snapshots.read().await;
        let mut sessions: Vec<String> = snapshots
            .keys()
            .filter(|k| k.agent_id == agent_id)
            .map(|k| k.session_id.clone())
            .collect();
        sessions.sort();
        Ok(sessions)
    }
}

/// Create a snapshot store from configuration.
pub async fn create_store(config: StoreConfig) -> Result<Arc<dyn SnapshotStore>, EngineError> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemorySnapshotStore::new())),

        StoreConfig::File { path, compression } => {
            Ok(Arc::new(FileSnapshotStore::new(path, compression)))
        }

        #[cfg(feature = "store-sqlite")]
        StoreConfig::Sqlite { path } => Ok(Arc::new(SqliteSnapshotStore::new(path).await?)),
    }
}

pub(crate) fn encode(snapshot: &Snapshot, compression: bool) -> Result<Vec<u8>, EngineError> {
    let json = serde_json::to_vec(snapshot)
        .map_err(|e| EngineError::store_error(format!("Serialization failed: {}", e)))?;
    if compression {
        compress(&json)
    } else {
        Ok(json)
    }
}

pub(crate) fn decode(data: &[u8], compression: bool) -> Result<Snapshot, EngineError> {
    let json = if compression {
        decompress(data)?
    } else {
        data.to_vec()
    };
    serde_json::from_slice(&json)
        .map_err(|e| EngineError::store_error(format!("Deserialization failed: {}", e)))
}

/// Compress data using zstd
fn compress(data: &[u8]) -> Result<Vec<u8>, EngineError> {
    let mut encoder = zstd::stream::Encoder::new(Vec::new(), 3)
        .map_err(|e| EngineError::store_error(format!("Compression init failed: {}", e)))?;
    encoder
        .write_all(data)
        .map_err(|e| EngineError::store_error(format!("Compression write failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| EngineError::store_error(format!("Compression finish failed: {}", e)))
}

/// Decompress data using zstd
fn decompress(data: &[u8]) -> Result<Vec<u8>, EngineError> {
    zstd::stream::decode_all(data)
        .map_err(|e| EngineError::store_error(format!("Decompression failed: {}", e)))
}
