//! 文件检查点：每个会话一个 JSON 文件 `<dir>/<session_id>.json`
//!
//! 先写临时文件再 rename，进程在写入中途退出也不会留下半个 JSON。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::checkpoint::{validate_session_id, CheckpointError, Checkpointer, SessionLocks};
use crate::core::SessionState;

#[derive(Debug)]
pub struct FileCheckpointer {
    dir: PathBuf,
    locks: SessionLocks,
}

impl FileCheckpointer {
    /// 目录不存在时在首次 save 时创建
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            locks: SessionLocks::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.json")))
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn save(&self, state: &SessionState) -> Result<(), CheckpointError> {
        let path = self.path_for(&state.session_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let raw = serde_json::to_string_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(session = %state.session_id, path = %path.display(), "checkpoint saved");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, CheckpointError> {
        let path = self.path_for(session_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<bool, CheckpointError> {
        let path = self.path_for(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(session_id).await
    }
}
