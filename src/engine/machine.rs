//! 执行器状态机：封闭的 Phase 枚举 + 显式转移表
//!
//! Reasoning → Routing → {AutoExecuting | AwaitingApproval} → Routing → … → Reasoning（循环）→ Terminated。
//! 表外的 (phase, event) 组合一律 InvalidTransition；Terminated 不接受任何事件。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 终止原因：显式 Final，或到达迭代上限（正常终止，不是错误）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    FinalAnswer,
    IterationLimit,
}

/// 执行器所处阶段（随 SessionState 持久化）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Reasoning,
    Routing,
    AutoExecuting,
    AwaitingApproval,
    Terminated(TerminationReason),
}

impl Phase {
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reasoning => f.write_str("reasoning"),
            Self::Routing => f.write_str("routing"),
            Self::AutoExecuting => f.write_str("auto_executing"),
            Self::AwaitingApproval => f.write_str("awaiting_approval"),
            Self::Terminated(reason) => write!(f, "terminated({reason:?})"),
        }
    }
}

/// 驱动转移的事件
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Reasoner 给出了一个 Decision
    Decided,
    /// 路由判定结束
    End(TerminationReason),
    /// 队首调用为低风险
    AutoExecute,
    /// 队首调用需要审批
    NeedsApproval,
    /// 本轮调用已全部处理，回到推理
    CallsExhausted,
    /// 工具已执行（成功或失败都算）
    ToolFinished,
    /// 审批被拒（reject / modify / 超时）
    Rejected,
}

/// 状态转移函数
pub fn transition(from: Phase, event: Event) -> Result<Phase, AgentError> {
    use Event as E;
    use Phase as P;

    let next = match (from, event) {
        (P::Reasoning, E::Decided) => P::Routing,
        (P::Reasoning, E::End(TerminationReason::IterationLimit)) => {
            P::Terminated(TerminationReason::IterationLimit)
        }
        (P::Routing, E::End(reason)) => P::Terminated(reason),
        (P::Routing, E::AutoExecute) => P::AutoExecuting,
        (P::Routing, E::NeedsApproval) => P::AwaitingApproval,
        (P::Routing, E::CallsExhausted) => P::Reasoning,
        (P::AutoExecuting, E::ToolFinished) => P::Routing,
        (P::AwaitingApproval, E::ToolFinished | E::Rejected) => P::Routing,
        (from, event) => {
            return Err(AgentError::InvalidTransition {
                from: from.to_string(),
                event: format!("{event:?}"),
            })
        }
    };
    tracing::debug!(from = %from, event = ?event, to = %next, "transition");
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_loop() {
        let p = transition(Phase::Reasoning, Event::Decided).unwrap();
        assert_eq!(p, Phase::Routing);
        let p = transition(p, Event::NeedsApproval).unwrap();
        assert_eq!(p, Phase::AwaitingApproval);
        let p = transition(p, Event::Rejected).unwrap();
        assert_eq!(p, Phase::Routing);
        let p = transition(p, Event::CallsExhausted).unwrap();
        assert_eq!(p, Phase::Reasoning);
    }

    #[test]
    fn test_terminated_accepts_nothing() {
        let done = Phase::Terminated(TerminationReason::FinalAnswer);
        for event in [
            Event::Decided,
            Event::End(TerminationReason::FinalAnswer),
            Event::AutoExecute,
            Event::NeedsApproval,
            Event::CallsExhausted,
            Event::ToolFinished,
            Event::Rejected,
        ] {
            assert!(transition(done, event).is_err(), "{event:?} should be rejected");
        }
    }

    #[test]
    fn test_auto_executing_cannot_be_rejected() {
        assert!(matches!(
            transition(Phase::AutoExecuting, Event::Rejected),
            Err(AgentError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let v = serde_json::to_value(Phase::AwaitingApproval).unwrap();
        assert_eq!(v, "awaiting_approval");
        let v = serde_json::to_value(Phase::Terminated(TerminationReason::IterationLimit)).unwrap();
        assert_eq!(v["terminated"], "iteration_limit");
    }
}
