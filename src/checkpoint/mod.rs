//! 检查点：以 session_id 为键持久化 SessionState
//!
//! 每次状态转移之后保存；挂起（AwaitingApproval）时的最后一次保存必须已经落盘，
//! 之后任意进程都能 load 出同一个 pending_action 继续执行。
//! lock 提供进程内的单会话互斥：同一 session 的 start / resume 串行。

pub mod file;
pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use crate::core::SessionState;

pub use file::FileCheckpointer;
pub use memory::MemoryCheckpointer;
pub use sqlite::SqliteCheckpointer;

/// 检查点存储错误
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// 检查点存储接口
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// 覆盖保存会话的最新状态
    async fn save(&self, state: &SessionState) -> Result<(), CheckpointError>;

    /// 读取会话；不存在时返回 None
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, CheckpointError>;

    /// 删除会话，返回是否存在过
    async fn delete(&self, session_id: &str) -> Result<bool, CheckpointError>;

    /// 已保存的全部 session_id（排序）
    async fn list(&self) -> Result<Vec<String>, CheckpointError>;

    /// 获取单会话互斥锁，持有期间同一 session 的其他 start / resume 等待
    async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()>;
}

/// 按 session_id 分配的异步互斥锁表
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 顺带清理没有持有者也没有等待者的条目（表里那一份是唯一引用）
    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// session_id 会出现在文件名里：只允许字母数字与 - _ .，且不能以 . 开头
pub fn validate_session_id(session_id: &str) -> Result<(), CheckpointError> {
    let ok = !session_id.is_empty()
        && session_id.len() <= 128
        && !session_id.starts_with('.')
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CheckpointError::InvalidSessionId(session_id.to_string()))
    }
}
