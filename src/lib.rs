//! Guarded Agent - 带人工审批闸门的 Agent 执行引擎
//!
//! 模块划分：
//! - **checkpoint**: 会话状态持久化（内存 / 文件 / SQLite）与单会话锁
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、会话状态、审计日志
//! - **engine**: 状态机、路由、审批闸门、Reasoner、执行器、会话 API
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **observability**: tracing 初始化
//! - **tools**: 工具注册表、风险策略、带超时的执行器、内置工具

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod engine;
pub mod llm;
pub mod observability;
pub mod tools;

pub use crate::core::{verify_audit, AgentError, AuditEventKind, SessionState};
pub use engine::{ApprovalDecision, SessionEngine, SessionOutcome};
