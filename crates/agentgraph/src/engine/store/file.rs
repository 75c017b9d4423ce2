//! File-based snapshot store
//!
//! One JSON file per session, optionally zstd-compressed.
//!
//! ```text
//! sessions/
//! └── {agent_id}/
//!     ├── {session_id}.json[.zst]
//!     └── {session_id}.json[.zst]
//! ```

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{decode, encode, SnapshotStore};
use crate::engine::error::EngineError;
use crate::engine::snapshot::{SessionKey, Snapshot};

/// File-based snapshot store.
///
/// Atomic writes are ensured via temporary file + rename.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    base_path: PathBuf,
    compression: bool,
}

impl FileSnapshotStore {
    pub fn new(base_path: impl Into<PathBuf>, compression: bool) -> Self {
        Self {
            base_path: base_path.into(),
            compression,
        }
    }

    fn extension(&self) -> &'static str {
        if self.compression {
            ".json.zst"
        } else {
            ".json"
        }
    }

    fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.base_path.join(sanitize(agent_id))
    }

    fn snapshot_path(&self, key: &SessionKey) -> PathBuf {
        self.agent_dir(&key.agent_id)
            .join(format!("{}{}", sanitize(&key.session_id), self.extension()))
    }

    fn temp_path(&self, key: &SessionKey) -> PathBuf {
        self.agent_dir(&key.agent_id)
            .join(format!("{}.tmp", sanitize(&key.session_id)))
    }
}

/// Keep path components inside the store directory
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<Snapshot>, EngineError> {
        let path = self.snapshot_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to read file: {}", e)))?;
        decode(&data, self.compression).map(Some)
    }

    async fn save(&self, key: &SessionKey, snapshot: &Snapshot) -> Result<(), EngineError> {
        fs::create_dir_all(self.agent_dir(&key.agent_id))
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to create directory: {}", e)))?;

        let data = encode(snapshot, self.compression)?;
        let temp_path = self.temp_path(key);
        let final_path = self.snapshot_path(key);

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to create temp file: {}", e)))?;
        file.write_all(&data)
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to write data: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to sync file: {}", e)))?;

        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to rename file: {}", e)))?;

        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), EngineError> {
        let path = self.snapshot_path(key);
        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| EngineError::store_error(format!("Failed to delete file: {}", e)))?;
        }
        Ok(())
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<String>, EngineError> {
        let dir = self.agent_dir(agent_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to read directory: {}", e)))?;

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to read entry: {}", e)))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(session) = name.strip_suffix(self.extension()) {
                sessions.push(session.to_string());
            }
        }

        sessions.sort();
        Ok(sessions)
    }
}
