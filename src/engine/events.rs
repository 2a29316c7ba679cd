//! 引擎过程事件：供 CLI / 前端实时展示推理、工具调用、审批与结束

use serde::Serialize;

use crate::engine::machine::TerminationReason;
use crate::tools::RiskLevel;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// 迭代计数更新
    StepUpdate { iteration: u32, max_iterations: u32 },
    /// 正在调用 Reasoner
    Thinking,
    /// Reasoner 给出了 Decision
    Decision { is_final: bool, text: String, calls: usize },
    /// 调用工具
    ToolCall {
        tool: String,
        call_id: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览）
    Observation {
        tool: String,
        call_id: String,
        preview: String,
    },
    /// 工具执行失败
    ToolFailure {
        tool: String,
        call_id: String,
        reason: String,
    },
    /// 需要人工审批
    ApprovalRequested {
        tool: String,
        call_id: String,
        risk: RiskLevel,
        args: serde_json::Value,
    },
    /// 审批结果
    ApprovalResolved {
        call_id: String,
        granted: bool,
        message: String,
    },
    /// 会话挂起等待审批
    Suspended { call_id: String },
    /// 会话结束
    Finished {
        reason: TerminationReason,
        answer: Option<String>,
    },
}

/// Observation 预览最大字符数
pub(crate) const OBSERVATION_PREVIEW_CHARS: usize = 200;

pub(crate) fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!(
            "{}...",
            text.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>()
        )
    } else {
        text.to_string()
    }
}
