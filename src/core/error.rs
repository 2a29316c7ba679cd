//! 引擎错误类型
//!
//! 只有推理失败、存储失败与调用方误用会以 `Err` 返回给 start / resume 的调用方；
//! 工具执行失败与未知工具在引擎内部被消化（转成 ToolResult 或走审批闸门）。

use thiserror::Error;

use crate::checkpoint::CheckpointError;

/// 引擎对外暴露的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// Reasoner 调用本身失败（如上游不可用）：本轮作废，不递增 iteration、不追加消息
    #[error("Reasoner failed: {0}")]
    Reasoner(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("Invalid transition: {event} in phase {from}")]
    InvalidTransition { from: String, event: String },

    #[error("Config error: {0}")]
    Config(String),
}

/// 工具层错误：handler 失败、参数校验失败、超时、未注册
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArgs { tool: String, reason: String },

    #[error("Tool execution failed: {0}")]
    Failed(String),

    #[error("Tool timeout: {0}")]
    Timeout(String),
}
