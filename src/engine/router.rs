//! 路由：纯函数，无副作用，可单独测试
//!
//! - should_continue：到达迭代上限或最近 Decision 为 Final 时结束
//! - classify_call / classify_decision：low 自动执行，medium / high / 未知工具需审批
//! - route_after_approval：审批结果 -> 执行 / 拒绝

use crate::core::{Decision, SessionState, ToolCall};
use crate::engine::approval::ApprovalOutcome;
use crate::engine::machine::TerminationReason;
use crate::tools::{RiskLevel, ToolRegistry};

/// should_continue 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    End(TerminationReason),
}

/// 单个调用的路由
#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    AutoExecute(ToolCall),
    NeedsApproval(ToolCall, RiskLevel),
}

/// 对整个 Decision 的分类（只看第一个调用，其余排队）
#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
    NoAction,
    AutoExecute(ToolCall),
    NeedsApproval(ToolCall, RiskLevel),
}

/// 审批之后的去向
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfterApproval {
    Execute,
    Reject,
}

/// 最近 Decision 为 Final 时以 FinalAnswer 结束（即使恰好用满上限）；
/// 否则到达上限即结束，本轮尚未处理的调用不再执行
pub fn should_continue(state: &SessionState) -> Continuation {
    if let Some(Decision::Final(_)) = state.latest_decision() {
        return Continuation::End(TerminationReason::FinalAnswer);
    }
    if state.iteration_bound_reached() {
        return Continuation::End(TerminationReason::IterationLimit);
    }
    Continuation::Continue
}

pub fn classify_call(call: &ToolCall, registry: &ToolRegistry) -> Route {
    let risk = registry.risk_of(&call.name);
    if risk.requires_approval() {
        Route::NeedsApproval(call.clone(), risk)
    } else {
        Route::AutoExecute(call.clone())
    }
}

pub fn classify_decision(decision: &Decision, registry: &ToolRegistry) -> Classification {
    match decision.calls().first() {
        None => Classification::NoAction,
        Some(call) => match classify_call(call, registry) {
            Route::AutoExecute(call) => Classification::AutoExecute(call),
            Route::NeedsApproval(call, risk) => Classification::NeedsApproval(call, risk),
        },
    }
}

pub fn route_after_approval(outcome: &ApprovalOutcome) -> AfterApproval {
    if outcome.granted {
        AfterApproval::Execute
    } else {
        AfterApproval::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::register_builtin;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        register_builtin(&mut r);
        r
    }

    #[test]
    fn test_should_continue_ends_at_bound() {
        let mut state = SessionState::new("s", "hi", 2);
        state.iteration_count = 2;
        assert_eq!(
            should_continue(&state),
            Continuation::End(TerminationReason::IterationLimit)
        );
    }

    #[test]
    fn test_should_continue_ends_on_final() {
        let mut state = SessionState::new("s", "hi", 5);
        state.push_message(Decision::Final("done".into()).to_message());
        state.iteration_count = 1;
        assert_eq!(
            should_continue(&state),
            Continuation::End(TerminationReason::FinalAnswer)
        );
    }

    #[test]
    fn test_final_on_last_allowed_turn_is_final_answer() {
        let mut state = SessionState::new("s", "hi", 2);
        state.push_message(Decision::Final("done".into()).to_message());
        state.iteration_count = 2;
        assert_eq!(
            should_continue(&state),
            Continuation::End(TerminationReason::FinalAnswer)
        );
    }

    #[test]
    fn test_should_continue_with_tool_calls() {
        let mut state = SessionState::new("s", "hi", 5);
        let call = ToolCall::new("search_database", json!({"query": "q"}), "c1");
        state.push_message(
            Decision::ToolCalls {
                text: String::new(),
                calls: vec![call],
            }
            .to_message(),
        );
        state.iteration_count = 1;
        assert_eq!(should_continue(&state), Continuation::Continue);
    }

    #[test]
    fn test_classify_by_risk() {
        let r = registry();
        let low = ToolCall::new("search_database", json!({"query": "q"}), "c1");
        let high = ToolCall::new("delete_records", json!({"record_ids": []}), "c2");
        let unknown = ToolCall::new("format_disk", json!({}), "c3");
        assert_eq!(classify_call(&low, &r), Route::AutoExecute(low.clone()));
        assert_eq!(
            classify_call(&high, &r),
            Route::NeedsApproval(high.clone(), RiskLevel::High)
        );
        assert_eq!(
            classify_call(&unknown, &r),
            Route::NeedsApproval(unknown.clone(), RiskLevel::High)
        );
    }

    #[test]
    fn test_classify_decision_uses_first_call() {
        let r = registry();
        let first = ToolCall::new("send_email", json!({}), "c1");
        let second = ToolCall::new("search_database", json!({}), "c2");
        let d = Decision::ToolCalls {
            text: String::new(),
            calls: vec![first.clone(), second],
        };
        assert_eq!(
            classify_decision(&d, &r),
            Classification::NeedsApproval(first, RiskLevel::Medium)
        );
        assert_eq!(
            classify_decision(&Decision::Final("x".into()), &r),
            Classification::NoAction
        );
    }

    #[test]
    fn test_route_after_approval() {
        let granted = ApprovalOutcome {
            granted: true,
            message: String::new(),
        };
        let denied = ApprovalOutcome {
            granted: false,
            message: String::new(),
        };
        assert_eq!(route_after_approval(&granted), AfterApproval::Execute);
        assert_eq!(route_after_approval(&denied), AfterApproval::Reject);
    }
}
