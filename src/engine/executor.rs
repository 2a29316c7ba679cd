//! 执行器：驱动 Phase 状态机直到终止或挂起
//!
//! Reasoning：到达上限则终止，否则调用 Reasoner、追加消息、iteration + 1、记 decision_made，
//! 把调用排队；Routing：should_continue 优先，再按队首调用的风险分流；
//! AutoExecuting / AwaitingApproval：执行或拒绝后回到 Routing，队列空了回到 Reasoning。
//! 每次转移后保存检查点；审批通道返回 Deferred 时带着 pending_action 返回调用方。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::checkpoint::Checkpointer;
use crate::core::{
    AgentError, AuditEntry, AuditEventKind, Decision, Message, PendingAction, SessionState,
    ToolCall,
};
use crate::engine::approval::{
    ApprovalChannel, ApprovalDecision, ApprovalGate, ApprovalSignal, DeferredApproval,
};
use crate::engine::events::{preview, EngineEvent};
use crate::engine::machine::{transition, Event, Phase, TerminationReason};
use crate::engine::reasoner::Reasoner;
use crate::engine::router::{
    classify_call, route_after_approval, should_continue, AfterApproval, Continuation, Route,
};
use crate::engine::session::{FinalReport, SessionOutcome};
use crate::tools::{RiskLevel, ToolExecutor};

/// 拒绝后写回给 Reasoner 的提示
fn rejection_prompt(reason: &str) -> String {
    format!(
        "The requested action was not approved. {reason}. Please suggest an alternative approach."
    )
}

fn describe_decision(decision: &Decision) -> String {
    match decision {
        Decision::Final(text) => format!("final answer: {}", preview(text)),
        Decision::ToolCalls { calls, .. } => {
            let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
            format!("requested {} tool call(s): {}", calls.len(), names.join(", "))
        }
    }
}

/// 执行器：持有 Reasoner、工具执行器、审批通道与检查点存储
pub struct Executor {
    reasoner: Arc<dyn Reasoner>,
    tools: ToolExecutor,
    approvals: Arc<dyn ApprovalChannel>,
    checkpoints: Arc<dyn Checkpointer>,
    event_tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl Executor {
    /// 默认审批通道为 DeferredApproval（遇到需审批的调用即挂起）
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        tools: ToolExecutor,
        checkpoints: Arc<dyn Checkpointer>,
    ) -> Self {
        Self {
            reasoner,
            tools,
            approvals: Arc::new(DeferredApproval),
            checkpoints,
            event_tx: None,
        }
    }

    pub fn with_approvals(mut self, approvals: Arc<dyn ApprovalChannel>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn with_event_tx(mut self, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn checkpoints(&self) -> &Arc<dyn Checkpointer> {
        &self.checkpoints
    }

    pub fn tools(&self) -> &ToolExecutor {
        &self.tools
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// 转移 + 保存
    async fn advance(&self, state: &mut SessionState, event: Event) -> Result<(), AgentError> {
        state.phase = transition(state.phase, event)?;
        state.touch();
        self.checkpoints.save(state).await?;
        Ok(())
    }

    /// 驱动会话直到终止（Finished）或等待外部审批（AwaitingApproval）
    pub async fn drive(&self, state: &mut SessionState) -> Result<SessionOutcome, AgentError> {
        loop {
            let phase = state.phase;
            match phase {
                Phase::Terminated(reason) => {
                    return Ok(SessionOutcome::Finished(self.finish(state, reason)));
                }
                Phase::Reasoning => self.reason_step(state).await?,
                Phase::Routing => self.route_step(state).await?,
                Phase::AutoExecuting => self.auto_execute_step(state).await?,
                Phase::AwaitingApproval => {
                    let Some(pending) = state.pending_action.clone() else {
                        return Err(AgentError::InvalidTransition {
                            from: phase.to_string(),
                            event: "no pending action".to_string(),
                        });
                    };
                    match self.approvals.request(&pending).await {
                        ApprovalSignal::Deferred => {
                            self.checkpoints.save(state).await?;
                            self.emit(EngineEvent::Suspended {
                                call_id: pending.call_id.clone(),
                            });
                            tracing::info!(
                                session = %state.session_id,
                                call_id = %pending.call_id,
                                "session suspended awaiting approval"
                            );
                            return Ok(SessionOutcome::AwaitingApproval {
                                session_id: state.session_id.clone(),
                                pending,
                            });
                        }
                        ApprovalSignal::Decided(decision) => {
                            self.apply_decision(state, decision).await?;
                        }
                    }
                }
            }
        }
    }

    async fn reason_step(&self, state: &mut SessionState) -> Result<(), AgentError> {
        if state.iteration_bound_reached() {
            return self
                .advance(state, Event::End(TerminationReason::IterationLimit))
                .await;
        }

        self.emit(EngineEvent::Thinking);
        // 失败时直接返回：此时尚未改动 state
        let decision = self.reasoner.reason(&state.messages).await?.normalize();

        state.push_message(decision.to_message());
        state.iteration_count += 1;
        state.audit.record(
            AuditEntry::new(AuditEventKind::DecisionMade, describe_decision(&decision))
                .with_related_calls(decision.calls()),
        );
        state.queued_calls = decision.calls().iter().cloned().collect();

        self.emit(EngineEvent::StepUpdate {
            iteration: state.iteration_count,
            max_iterations: state.max_iterations,
        });
        let text = match &decision {
            Decision::Final(text) => text.clone(),
            Decision::ToolCalls { text, .. } => text.clone(),
        };
        self.emit(EngineEvent::Decision {
            is_final: decision.is_final(),
            text,
            calls: decision.calls().len(),
        });
        tracing::info!(
            session = %state.session_id,
            iteration = state.iteration_count,
            max_iterations = state.max_iterations,
            calls = decision.calls().len(),
            "decision made"
        );

        self.advance(state, Event::Decided).await
    }

    async fn route_step(&self, state: &mut SessionState) -> Result<(), AgentError> {
        if let Continuation::End(reason) = should_continue(state) {
            if !state.queued_calls.is_empty() {
                tracing::info!(
                    session = %state.session_id,
                    dropped = state.queued_calls.len(),
                    "iteration bound reached, queued calls dropped"
                );
            }
            state.queued_calls.clear();
            return self.advance(state, Event::End(reason)).await;
        }

        let Some(front) = state.queued_calls.front() else {
            return self.advance(state, Event::CallsExhausted).await;
        };

        match classify_call(front, self.tools.registry()) {
            Route::AutoExecute(_) => self.advance(state, Event::AutoExecute).await,
            Route::NeedsApproval(call, risk) => {
                state.queued_calls.pop_front();
                let pending = PendingAction::new(&call, risk);
                ApprovalGate::open(state, pending.clone());
                self.emit(EngineEvent::ApprovalRequested {
                    tool: pending.tool_name,
                    call_id: pending.call_id,
                    risk,
                    args: pending.args,
                });
                self.advance(state, Event::NeedsApproval).await
            }
        }
    }

    async fn auto_execute_step(&self, state: &mut SessionState) -> Result<(), AgentError> {
        if let Some(call) = state.queued_calls.pop_front() {
            self.dispatch(state, &call, RiskLevel::Low, AuditEventKind::AutoExecuted)
                .await;
        }
        self.advance(state, Event::ToolFinished).await
    }

    /// 执行一次调用并把结果写回消息历史
    ///
    /// 每次派发恰好一条执行条目（success 指定 auto_executed / action_executed），
    /// 失败时其后再跟一条 error，并写回 is_error 的 ToolResult。
    async fn dispatch(
        &self,
        state: &mut SessionState,
        call: &ToolCall,
        risk: RiskLevel,
        success: AuditEventKind,
    ) {
        self.emit(EngineEvent::ToolCall {
            tool: call.name.clone(),
            call_id: call.call_id.clone(),
            args: call.args.clone(),
        });
        match self.tools.execute(call).await {
            Ok(output) => {
                let detail = preview(&output);
                state.push_message(Message::tool_result(call, output, false));
                state
                    .audit
                    .record(AuditEntry::new(success, detail.clone()).for_call(call).with_risk(risk));
                self.emit(EngineEvent::Observation {
                    tool: call.name.clone(),
                    call_id: call.call_id.clone(),
                    preview: detail,
                });
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(tool = %call.name, call_id = %call.call_id, error = %reason, "tool failed");
                state.push_message(Message::tool_result(call, format!("Error: {reason}"), true));
                state.audit.record(
                    AuditEntry::new(success, format!("failed: {reason}"))
                        .for_call(call)
                        .with_risk(risk),
                );
                state.audit.record(
                    AuditEntry::new(AuditEventKind::Error, reason.clone())
                        .for_call(call)
                        .with_risk(risk),
                );
                self.emit(EngineEvent::ToolFailure {
                    tool: call.name.clone(),
                    call_id: call.call_id.clone(),
                    reason,
                });
            }
        }
    }

    /// 对当前 pending_action 应用外部决定
    ///
    /// 不在 AwaitingApproval 或没有 pending 时返回 Ok(false)，不做任何改动（重复投递即无操作）。
    pub async fn apply_decision(
        &self,
        state: &mut SessionState,
        decision: ApprovalDecision,
    ) -> Result<bool, AgentError> {
        if state.phase != Phase::AwaitingApproval {
            return Ok(false);
        }
        let Some(pending) = state.pending_action.clone() else {
            return Ok(false);
        };
        let Some(outcome) = ApprovalGate::resolve(state, decision) else {
            return Ok(false);
        };
        self.emit(EngineEvent::ApprovalResolved {
            call_id: pending.call_id.clone(),
            granted: outcome.granted,
            message: outcome.message.clone(),
        });
        tracing::info!(
            session = %state.session_id,
            call_id = %pending.call_id,
            decision = %decision,
            "approval resolved"
        );

        let call = pending.to_call();
        match route_after_approval(&outcome) {
            AfterApproval::Execute => {
                self.dispatch(state, &call, pending.risk_level, AuditEventKind::ActionExecuted)
                    .await;
                state.pending_action = None;
                self.advance(state, Event::ToolFinished).await?;
            }
            AfterApproval::Reject => {
                state.push_message(Message::human(rejection_prompt(&outcome.message)));
                state.audit.record(
                    AuditEntry::new(AuditEventKind::ActionRejected, outcome.message.clone())
                        .for_call(&call)
                        .with_risk(pending.risk_level),
                );
                state.pending_action = None;
                // 同一轮剩余的调用不再执行，交回 Reasoner 重新决策
                state.queued_calls.clear();
                self.advance(state, Event::Rejected).await?;
            }
        }
        Ok(true)
    }

    fn finish(&self, state: &SessionState, reason: TerminationReason) -> FinalReport {
        let report = FinalReport::from_state(state, reason);
        self.emit(EngineEvent::Finished {
            reason,
            answer: report.answer.clone(),
        });
        report
    }
}
