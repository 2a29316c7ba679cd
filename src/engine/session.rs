//! 会话 API：start / resume / resolve_approval
//!
//! 每个入口先取 Checkpointer 的单会话锁，再 load → drive → save。
//! resume 作用于当前 pending_action；resolve_approval 额外校验 call_id，过期或重复的决定不产生任何改动。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::checkpoint::Checkpointer;
use crate::core::{AgentError, AuditLog, Decision, Message, PendingAction, SessionState};
use crate::engine::approval::ApprovalDecision;
use crate::engine::executor::Executor;
use crate::engine::machine::{Phase, TerminationReason};

/// 会话结束时交给调用方的结果
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub session_id: String,
    /// Final 的回答；到达迭代上限时为已有的部分答案
    pub answer: Option<String>,
    pub reason: TerminationReason,
    pub iterations: u32,
    pub messages: Vec<Message>,
    pub audit: AuditLog,
}

impl FinalReport {
    pub fn from_state(state: &SessionState, reason: TerminationReason) -> Self {
        let answer = match reason {
            TerminationReason::FinalAnswer => match state.latest_decision() {
                Some(Decision::Final(text)) => Some(text),
                _ => None,
            },
            TerminationReason::IterationLimit => partial_answer(state),
        };
        Self {
            session_id: state.session_id.clone(),
            answer,
            reason,
            iterations: state.iteration_count,
            messages: state.messages.clone(),
            audit: state.audit.clone(),
        }
    }

    pub fn hit_iteration_limit(&self) -> bool {
        self.reason == TerminationReason::IterationLimit
    }
}

/// 最近一条非空的 Agent 文本，否则最近一次成功的工具结果
fn partial_answer(state: &SessionState) -> Option<String> {
    state.messages.iter().rev().find_map(|m| match m {
        Message::AgentFinal { content } | Message::AgentToolCalls { content, .. }
            if !content.trim().is_empty() =>
        {
            Some(content.clone())
        }
        Message::ToolResult {
            content,
            is_error: false,
            ..
        } => Some(content.clone()),
        _ => None,
    })
}

/// start / resume 的返回
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Finished(FinalReport),
    /// 已挂起：状态已落盘，等待 resume
    AwaitingApproval {
        session_id: String,
        pending: PendingAction,
    },
}

impl SessionOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    pub fn report(&self) -> Option<&FinalReport> {
        match self {
            Self::Finished(report) => Some(report),
            Self::AwaitingApproval { .. } => None,
        }
    }

    pub fn pending(&self) -> Option<&PendingAction> {
        match self {
            Self::Finished(_) => None,
            Self::AwaitingApproval { pending, .. } => Some(pending),
        }
    }
}

/// 会话概要（CLI status 输出）
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub phase: Phase,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub pending_action: Option<PendingAction>,
    pub messages: usize,
    pub audit_entries: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&SessionState> for SessionStatus {
    fn from(state: &SessionState) -> Self {
        Self {
            session_id: state.session_id.clone(),
            phase: state.phase,
            iteration_count: state.iteration_count,
            max_iterations: state.max_iterations,
            pending_action: state.pending_action.clone(),
            messages: state.messages.len(),
            audit_entries: state.audit.len(),
            updated_at: state.updated_at,
        }
    }
}

/// 会话引擎：对外的 Session API
pub struct SessionEngine {
    executor: Executor,
}

impl SessionEngine {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    fn checkpoints(&self) -> &Arc<dyn Checkpointer> {
        self.executor.checkpoints()
    }

    async fn load_existing(&self, session_id: &str) -> Result<SessionState, AgentError> {
        self.checkpoints()
            .load(session_id)
            .await?
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }

    /// 新建会话并运行到终止或挂起；session_id 已存在时返回 SessionExists
    pub async fn start(
        &self,
        session_id: &str,
        initial_message: &str,
        max_iterations: u32,
    ) -> Result<SessionOutcome, AgentError> {
        let _guard = self.checkpoints().lock(session_id).await;
        if self.checkpoints().load(session_id).await?.is_some() {
            return Err(AgentError::SessionExists(session_id.to_string()));
        }
        let mut state = SessionState::new(session_id, initial_message, max_iterations);
        self.checkpoints().save(&state).await?;
        tracing::info!(session = %session_id, max_iterations, "session started");
        self.executor.drive(&mut state).await
    }

    /// 把外部决定应用到当前 pending_action，然后继续运行
    ///
    /// 没有 pending_action（已处理过或会话已结束）时决定被忽略：
    /// 已终止的会话直接返回结果，中途中断（如 Reasoner 失败）的会话从断点继续。
    pub async fn resume(
        &self,
        session_id: &str,
        decision: ApprovalDecision,
    ) -> Result<SessionOutcome, AgentError> {
        let _guard = self.checkpoints().lock(session_id).await;
        let mut state = self.load_existing(session_id).await?;
        if !self.executor.apply_decision(&mut state, decision).await? {
            tracing::info!(
                session = %session_id,
                decision = %decision,
                "no pending action, approval decision ignored"
            );
        }
        self.executor.drive(&mut state).await
    }

    /// 与 resume 相同，但只接受针对当前 pending_action 的决定
    ///
    /// call_id 不匹配（过期或重复投递）时不做任何改动，返回会话当前的结果。
    pub async fn resolve_approval(
        &self,
        session_id: &str,
        call_id: &str,
        decision: ApprovalDecision,
    ) -> Result<SessionOutcome, AgentError> {
        let _guard = self.checkpoints().lock(session_id).await;
        let mut state = self.load_existing(session_id).await?;
        let matches = state
            .pending_action
            .as_ref()
            .is_some_and(|p| p.call_id == call_id);
        if !matches {
            tracing::info!(session = %session_id, call_id = %call_id, "stale approval ignored");
            if let Phase::Terminated(reason) = state.phase {
                return Ok(SessionOutcome::Finished(FinalReport::from_state(
                    &state, reason,
                )));
            }
            if let Some(pending) = state.pending_action.clone() {
                return Ok(SessionOutcome::AwaitingApproval {
                    session_id: state.session_id.clone(),
                    pending,
                });
            }
            return self.executor.drive(&mut state).await;
        }
        self.executor.apply_decision(&mut state, decision).await?;
        self.executor.drive(&mut state).await
    }

    /// 不带审批决定地继续运行（例如 Reasoner 失败后重试，或用进程内审批通道重新请求审批）
    pub async fn continue_session(&self, session_id: &str) -> Result<SessionOutcome, AgentError> {
        let _guard = self.checkpoints().lock(session_id).await;
        let mut state = self.load_existing(session_id).await?;
        self.executor.drive(&mut state).await
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionStatus, AgentError> {
        let state = self.load_existing(session_id).await?;
        Ok(SessionStatus::from(&state))
    }

    /// 完整状态快照（含消息与审计日志）
    pub async fn snapshot(&self, session_id: &str) -> Result<SessionState, AgentError> {
        self.load_existing(session_id).await
    }

    pub async fn list(&self) -> Result<Vec<String>, AgentError> {
        Ok(self.checkpoints().list().await?)
    }

    /// 删除已保存的会话，返回是否存在过
    pub async fn archive(&self, session_id: &str) -> Result<bool, AgentError> {
        let _guard = self.checkpoints().lock(session_id).await;
        let removed = self.checkpoints().delete(session_id).await?;
        if removed {
            tracing::info!(session = %session_id, "session archived");
        }
        Ok(removed)
    }
}
