//! SQLite-based snapshot store
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS snapshots (
//!     agent_id TEXT NOT NULL,
//!     session_id TEXT NOT NULL,
//!     data BLOB NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     PRIMARY KEY (agent_id, session_id)
//! );
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use tokio_rusqlite::Connection;

use super::{decode, encode, SnapshotStore};
use crate::engine::error::EngineError;
use crate::engine::snapshot::{SessionKey, Snapshot};

/// SQLite-based snapshot store, file-backed or `:memory:`.
#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    conn: Arc<Connection>,
    compression: bool,
}

impl SqliteSnapshotStore {
    pub async fn new(path: impl AsRef<str>) -> Result<Self, EngineError> {
        Self::with_compression(path, false).await
    }

    pub async fn with_compression(
        path: impl AsRef<str>,
        compression: bool,
    ) -> Result<Self, EngineError> {
        let conn = Connection::open(path.as_ref())
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to open SQLite: {}", e)))?;

        conn.call(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS snapshots (
                    agent_id TEXT NOT NULL,
                    session_id TEXT NOT NULL,
                    data BLOB NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (agent_id, session_id)
                );
                "#,
            )?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::store_error(format!("Failed to create schema: {}", e)))?;

        Ok(Self {
            conn: Arc::new(conn),
            compression,
        })
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<Snapshot>, EngineError> {
        let agent_id = key.agent_id.clone();
        let session_id = key.session_id.clone();

        let data = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT data FROM snapshots WHERE agent_id = ?1 AND session_id = ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![agent_id, session_id])?;
                if let Some(row) = rows.next()? {
                    let data: Vec<u8> = row.get(0)?;
                    Ok(Some(data))
                } else {
                    Ok(None)
                }
            })
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to load snapshot: {}", e)))?;

        data.map(|bytes| decode(&bytes, self.compression)).transpose()
    }

    async fn save(&self, key: &SessionKey, snapshot: &Snapshot) -> Result<(), EngineError> {
        let data = encode(snapshot, self.compression)?;
        let agent_id = key.agent_id.clone();
        let session_id = key.session_id.clone();
        let updated_at = snapshot.updated_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO snapshots (agent_id, session_id, data, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    rusqlite::params![agent_id, session_id, data, updated_at],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to save snapshot: {}", e)))
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), EngineError> {
        let agent_id = key.agent_id.clone();
        let session_id = key.session_id.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM snapshots WHERE agent_id = ?1 AND session_id = ?2",
                    rusqlite::params![agent_id, session_id],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to delete snapshot: {}", e)))
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<String>, EngineError> {
        let agent_id = agent_id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT session_id FROM snapshots WHERE agent_id = ?1 ORDER BY session_id ASC",
                )?;
                let rows = stmt.query_map(rusqlite::params![agent_id], |row| row.get::<_, String>(0))?;
                let mut sessions: Vec<String> = Vec::new();
                for row in rows {
                    sessions.push(row?);
                }
                Ok(sessions)
            })
            .await
            .map_err(|e| EngineError::store_error(format!("Failed to list snapshots: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ComponentId;

    fn snapshot(session: &str) -> Snapshot {
        let ids = [ComponentId::from("a")];
        Snapshot::new("agent", session, "wf", ids.iter())
    }

    #[tokio::test]
    async fn test_sqlite_store_roundtrip() {
        let store = SqliteSnapshotStore::new(":memory:").await.unwrap();
        let mut snap = snapshot("s1");
        snap.step = 2;

        store.save(&snap.key(), &snap).await.unwrap();
        snap.step = 3;
        store.save(&snap.key(), &snap).await.unwrap();

        let loaded = store.load(&snap.key()).await.unwrap().unwrap();
        assert_eq!(loaded.step, 3);
        assert_eq!(store.list("agent").await.unwrap(), vec!["s1"]);

        store.delete(&snap.key()).await.unwrap();
        assert!(store.load(&snap.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_compressed() {
        let store = SqliteSnapshotStore::with_compression(":memory:", true)
            .await
            .unwrap();
        let snap = snapshot("s1");
        store.save(&snap.key(), &snap).await.unwrap();
        assert!(store.load(&snap.key()).await.unwrap().is_some());
    }
}
