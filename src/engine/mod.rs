//! 执行引擎：状态机、路由、审批闸门、Reasoner、执行器与会话 API

pub mod approval;
pub mod events;
pub mod executor;
pub mod machine;
pub mod reasoner;
pub mod router;
pub mod session;

pub use approval::{
    ApprovalChannel, ApprovalDecision, ApprovalGate, ApprovalOutcome, ApprovalRequest,
    ApprovalSignal, ChannelApproval, DeferredApproval, TimeoutApproval,
};
pub use events::EngineEvent;
pub use executor::Executor;
pub use machine::{transition, Event, Phase, TerminationReason};
pub use reasoner::{
    parse_llm_output, LlmReasoner, Reasoner, Scripted, ScriptedReasoner, MALFORMED_TOOL_NAME,
};
pub use router::{
    classify_call, classify_decision, route_after_approval, should_continue, AfterApproval,
    Classification, Continuation, Route,
};
pub use session::{FinalReport, SessionEngine, SessionOutcome, SessionStatus};
