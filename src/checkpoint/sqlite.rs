//! SQLite 检查点（rusqlite）
//!
//! 单表 `checkpoints(session_id PRIMARY KEY, state, updated_at)`，每个会话只保留最新状态。
//! rusqlite 是同步 API，所有语句放到 spawn_blocking 中执行。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::OwnedMutexGuard;

use crate::checkpoint::{CheckpointError, Checkpointer, SessionLocks};
use crate::core::SessionState;

pub struct SqliteCheckpointer {
    conn: Arc<Mutex<Connection>>,
    locks: SessionLocks,
}

impl SqliteCheckpointer {
    /// 打开（或创建）数据库；传 ":memory:" 得到内存库
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS checkpoints (
                 session_id TEXT PRIMARY KEY,
                 state TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            locks: SessionLocks::new(),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, CheckpointError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CheckpointError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| CheckpointError::Backend("sqlite connection lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| CheckpointError::Backend(e.to_string()))?
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn save(&self, state: &SessionState) -> Result<(), CheckpointError> {
        let raw = serde_json::to_string(state)?;
        let session_id = state.session_id.clone();
        let updated_at = state.updated_at;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO checkpoints (session_id, state, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
                params![session_id, raw, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, CheckpointError> {
        let session_id = session_id.to_string();
        let raw: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT state FROM checkpoints WHERE session_id = ?1",
                        params![session_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<bool, CheckpointError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM checkpoints WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<String>, CheckpointError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT session_id FROM checkpoints ORDER BY session_id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
        .await
    }

    async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_keeps_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");
        let store = SqliteCheckpointer::open(&path).unwrap();

        let mut state = SessionState::new("s1", "hello", 4);
        store.save(&state).await.unwrap();
        state.iteration_count = 3;
        store.save(&state).await.unwrap();

        // 重新打开同一文件
        let reopened = SqliteCheckpointer::open(&path).unwrap();
        let loaded = reopened.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.iteration_count, 3);
        assert_eq!(reopened.list().await.unwrap(), vec!["s1".to_string()]);
        assert!(reopened.delete("s1").await.unwrap());
        assert!(reopened.load("s1").await.unwrap().is_none());
    }
}
