//! 会话状态：消息历史、迭代计数、待审批动作、审计日志
//!
//! SessionState 是 Checkpointer 以 session_id 为键持久化的唯一对象；
//! 挂起 = 序列化后的 state 带有非空 pending_action，换一个进程加载后即可继续。

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::audit::AuditLog;
use crate::engine::machine::Phase;
use crate::tools::RiskLevel;

/// Reasoner 请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// 参数对象（JSON object）
    pub args: Value,
    pub call_id: String,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value, call_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args,
            call_id: call_id.into(),
        }
    }
}

/// 对话中的一条消息；顺序有意义，不去重
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Human {
        content: String,
    },
    AgentFinal {
        content: String,
    },
    /// Agent 请求工具的那一轮（Reasoner 需要看到自己发出的调用）
    AgentToolCalls {
        content: String,
        calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Self::Human {
            content: content.into(),
        }
    }

    pub fn agent_final(content: impl Into<String>) -> Self {
        Self::AgentFinal {
            content: content.into(),
        }
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            call_id: call.call_id.clone(),
            tool_name: call.name.clone(),
            content: content.into(),
            is_error,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Human { content }
            | Self::AgentFinal { content }
            | Self::AgentToolCalls { content, .. }
            | Self::ToolResult { content, .. } => content,
        }
    }

    /// 是否为 Agent 产出的消息（即一次 Decision 的落地）
    pub fn is_agent(&self) -> bool {
        matches!(self, Self::AgentFinal { .. } | Self::AgentToolCalls { .. })
    }
}

/// Reasoner 单轮输出：最终回答，或一组工具调用
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Final(String),
    ToolCalls { text: String, calls: Vec<ToolCall> },
}

impl Decision {
    /// 零个调用且非 Final 的畸形输出按 Final 处理（原文作为回答），保证循环能前进
    pub fn normalize(self) -> Self {
        match self {
            Self::ToolCalls { text, calls } if calls.is_empty() => Self::Final(text),
            other => other,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }

    pub fn calls(&self) -> &[ToolCall] {
        match self {
            Self::Final(_) => &[],
            Self::ToolCalls { calls, .. } => calls,
        }
    }

    pub fn to_message(&self) -> Message {
        match self {
            Self::Final(text) => Message::agent_final(text.clone()),
            Self::ToolCalls { text, calls } => Message::AgentToolCalls {
                content: text.clone(),
                calls: calls.clone(),
            },
        }
    }

    /// 从一条 Agent 消息还原 Decision（非 Agent 消息返回 None）
    pub fn from_message(message: &Message) -> Option<Self> {
        match message {
            Message::AgentFinal { content } => Some(Self::Final(content.clone())),
            Message::AgentToolCalls { content, calls } => Some(Self::ToolCalls {
                text: content.clone(),
                calls: calls.clone(),
            }),
            _ => None,
        }
    }
}

/// 等待人工审批的工具调用；每个会话同一时刻至多一个
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub tool_name: String,
    pub args: Value,
    pub call_id: String,
    pub risk_level: RiskLevel,
    pub requested_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(call: &ToolCall, risk_level: RiskLevel) -> Self {
        Self {
            tool_name: call.name.clone(),
            args: call.args.clone(),
            call_id: call.call_id.clone(),
            risk_level,
            requested_at: Utc::now(),
        }
    }

    pub fn to_call(&self) -> ToolCall {
        ToolCall::new(self.tool_name.clone(), self.args.clone(), self.call_id.clone())
    }
}

/// 单个会话的完整状态
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub phase: Phase,
    /// 当前 Decision 中尚未处理的工具调用（按 Reasoner 给出的顺序）
    #[serde(default)]
    pub queued_calls: VecDeque<ToolCall>,
    pub pending_action: Option<PendingAction>,
    pub audit: AuditLog,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(
        session_id: impl Into<String>,
        initial_message: impl Into<String>,
        max_iterations: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: vec![Message::human(initial_message)],
            iteration_count: 0,
            max_iterations,
            phase: Phase::Reasoning,
            queued_calls: VecDeque::new(),
            pending_action: None,
            audit: AuditLog::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// 最近一次 Decision（由最后一条 Agent 消息还原）
    pub fn latest_decision(&self) -> Option<Decision> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_agent())
            .and_then(Decision::from_message)
    }

    pub fn iteration_bound_reached(&self) -> bool {
        self.iteration_count >= self.max_iterations
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_empty_tool_calls_becomes_final() {
        let d = Decision::ToolCalls {
            text: "raw output".to_string(),
            calls: vec![],
        };
        assert_eq!(d.normalize(), Decision::Final("raw output".to_string()));
    }

    #[test]
    fn test_normalize_keeps_non_empty_calls() {
        let call = ToolCall::new("search_database", json!({"query": "x"}), "c1");
        let d = Decision::ToolCalls {
            text: String::new(),
            calls: vec![call.clone()],
        };
        assert_eq!(d.clone().normalize(), d);
    }

    #[test]
    fn test_latest_decision_skips_tool_results() {
        let mut state = SessionState::new("s1", "hi", 5);
        let call = ToolCall::new("search_database", json!({}), "c1");
        let decision = Decision::ToolCalls {
            text: String::new(),
            calls: vec![call.clone()],
        };
        state.push_message(decision.to_message());
        state.push_message(Message::tool_result(&call, "ok", false));
        assert_eq!(state.latest_decision(), Some(decision));
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = SessionState::new("s1", "hi", 3);
        let call = ToolCall::new("delete_records", json!({"record_ids": ["R1"]}), "c9");
        state.pending_action = Some(PendingAction::new(&call, RiskLevel::High));
        state.phase = Phase::AwaitingApproval;

        let raw = serde_json::to_string(&state).unwrap();
        let back: SessionState = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.pending_action, state.pending_action);
        assert_eq!(back.phase, Phase::AwaitingApproval);
        assert_eq!(back.messages, state.messages);
    }
}
