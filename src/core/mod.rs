//! 核心层：错误类型、会话状态、审计日志

pub mod audit;
pub mod error;
pub mod state;

pub use audit::{verify_audit, AuditEntry, AuditEventKind, AuditLog};
pub use error::{AgentError, ToolError};
pub use state::{Decision, Message, PendingAction, SessionState, ToolCall};
