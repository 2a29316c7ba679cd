//! 审批闸门：执行器唯一的挂起点
//!
//! ApprovalGate::open 在挂起前同步写入 approval_requested（同一 call_id 未决时不重复写）；
//! ApprovalChannel 负责把待审批动作送到外部并等待结果，也可以直接返回 Deferred，
//! 让会话带着 pending_action 落盘、进程退出，之后由 resume 走 ApprovalGate::resolve。
//! resolve 恰好写一条 approval_granted / approval_denied。

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::core::{AuditEntry, AuditEventKind, PendingAction, SessionState};

/// 外部给出的审批决定
///
/// Modify 目前不支持改参数重提，按拒绝处理但审计原因不同；TimedOut 只由调用方的超时包装产生。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Reject,
    Modify,
    TimedOut,
}

impl ApprovalDecision {
    /// 拒绝时写入审计与合成消息的原因
    pub fn outcome_message(&self) -> &'static str {
        match self {
            Self::Approve => "Approved by human operator",
            Self::Reject => "Action rejected by human operator",
            Self::Modify => "Action rejected - modification requested",
            Self::TimedOut => "Action rejected - approval timed out",
        }
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Modify => "modify",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

impl FromStr for ApprovalDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" | "yes" | "y" => Ok(Self::Approve),
            "reject" | "rejected" | "no" | "n" => Ok(Self::Reject),
            "modify" => Ok(Self::Modify),
            other => Err(format!("unknown approval decision: {other}")),
        }
    }
}

/// 闸门的瞬时结果，只在消费它的那一步存在
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub granted: bool,
    pub message: String,
}

/// 审批通道的回应
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalSignal {
    Decided(ApprovalDecision),
    /// 暂不决定：会话挂起，稍后 resume
    Deferred,
}

/// 审批通道：把待审批动作通知外部并（可选地）等待决定
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn request(&self, pending: &PendingAction) -> ApprovalSignal;
}

/// 总是挂起：适合跨进程、审批可能几天后才到的场景
#[derive(Debug, Default)]
pub struct DeferredApproval;

#[async_trait]
impl ApprovalChannel for DeferredApproval {
    async fn request(&self, pending: &PendingAction) -> ApprovalSignal {
        tracing::info!(
            tool = %pending.tool_name,
            call_id = %pending.call_id,
            risk = %pending.risk_level,
            "approval deferred, session will suspend"
        );
        ApprovalSignal::Deferred
    }
}

/// 进程内审批请求：外部拿到后调用 respond
#[derive(Debug)]
pub struct ApprovalRequest {
    pub pending: PendingAction,
    responder: oneshot::Sender<ApprovalDecision>,
}

impl ApprovalRequest {
    /// 回复决定；执行器已不在等待（被取消或超时）时返回 false
    pub fn respond(self, decision: ApprovalDecision) -> bool {
        self.responder.send(decision).is_ok()
    }
}

/// 进程内通道：mpsc 送出请求，oneshot 等回复；取消令牌触发时转为 Deferred
pub struct ChannelApproval {
    tx: mpsc::UnboundedSender<ApprovalRequest>,
    cancel: CancellationToken,
}

impl ChannelApproval {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[async_trait]
impl ApprovalChannel for ChannelApproval {
    async fn request(&self, pending: &PendingAction) -> ApprovalSignal {
        let (responder, reply) = oneshot::channel();
        let request = ApprovalRequest {
            pending: pending.clone(),
            responder,
        };
        if self.tx.send(request).is_err() {
            tracing::warn!(call_id = %pending.call_id, "approval receiver dropped, deferring");
            return ApprovalSignal::Deferred;
        }
        tokio::select! {
            decision = reply => match decision {
                Ok(d) => ApprovalSignal::Decided(d),
                Err(_) => ApprovalSignal::Deferred,
            },
            _ = self.cancel.cancelled() => {
                tracing::info!(call_id = %pending.call_id, "approval wait cancelled, deferring");
                ApprovalSignal::Deferred
            }
        }
    }
}

/// 调用方施加的审批超时：超时即拒绝（TimedOut），绝不自动批准
pub struct TimeoutApproval<C> {
    inner: C,
    timeout: Duration,
}

impl<C: ApprovalChannel> TimeoutApproval<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<C: ApprovalChannel> ApprovalChannel for TimeoutApproval<C> {
    async fn request(&self, pending: &PendingAction) -> ApprovalSignal {
        match tokio::time::timeout(self.timeout, self.inner.request(pending)).await {
            Ok(signal) => signal,
            Err(_) => {
                tracing::warn!(call_id = %pending.call_id, "approval timed out, rejecting");
                ApprovalSignal::Decided(ApprovalDecision::TimedOut)
            }
        }
    }
}

/// 闸门协议：open（请求）与 resolve（决议），都直接作用在会话状态上
pub struct ApprovalGate;

impl ApprovalGate {
    /// 设置 pending_action 并写 approval_requested；同一 call_id 已有未决请求时不重复写
    pub fn open(state: &mut SessionState, pending: PendingAction) {
        if !state.audit.has_open_request(&pending.call_id) {
            let call = pending.to_call();
            let detail = format!("awaiting approval, args: {}", pending.args);
            state.audit.record(
                AuditEntry::new(AuditEventKind::ApprovalRequested, detail)
                    .for_call(&call)
                    .with_risk(pending.risk_level),
            );
        }
        state.pending_action = Some(pending);
        state.touch();
    }

    /// 对当前 pending_action 做出决议；没有 pending 时返回 None（重复投递即无操作）
    pub fn resolve(state: &mut SessionState, decision: ApprovalDecision) -> Option<ApprovalOutcome> {
        let pending = state.pending_action.as_ref()?;
        let call = pending.to_call();
        let granted = decision == ApprovalDecision::Approve;
        let message = decision.outcome_message().to_string();
        let kind = if granted {
            AuditEventKind::ApprovalGranted
        } else {
            AuditEventKind::ApprovalDenied
        };
        let entry = AuditEntry::new(kind, format!("{message} ({decision})"))
            .for_call(&call)
            .with_risk(pending.risk_level);
        state.audit.record(entry);
        state.touch();
        Some(ApprovalOutcome { granted, message })
    }
}
