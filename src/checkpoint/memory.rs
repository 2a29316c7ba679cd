//! 内存检查点：进程内 HashMap，保存的是 JSON 文本
//!
//! 存 JSON 而不是 SessionState 本身，保证 load 得到的一定是一次完整序列化往返后的状态，
//! 与文件 / SQLite 后端行为一致。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{OwnedMutexGuard, RwLock};

use crate::checkpoint::{CheckpointError, Checkpointer, SessionLocks};
use crate::core::SessionState;

#[derive(Debug, Default)]
pub struct MemoryCheckpointer {
    states: RwLock<HashMap<String, String>>,
    locks: SessionLocks,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn save(&self, state: &SessionState) -> Result<(), CheckpointError> {
        let raw = serde_json::to_string(state)?;
        self.states
            .write()
            .await
            .insert(state.session_id.clone(), raw);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, CheckpointError> {
        let states = self.states.read().await;
        match states.get(session_id) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<bool, CheckpointError> {
        Ok(self.states.write().await.remove(session_id).is_some())
    }

    async fn list(&self) -> Result<Vec<String>, CheckpointError> {
        let mut ids: Vec<String> = self.states.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(session_id).await
    }
}
