//! 挂起 / 恢复集成测试：跨进程（新引擎 + 同一存储）恢复、重复投递、过期 call_id、并发 resume

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use guarded_agent::checkpoint::{
        Checkpointer, FileCheckpointer, MemoryCheckpointer, SqliteCheckpointer,
    };
    use guarded_agent::core::{verify_audit, AuditEventKind as K, Decision, ToolCall};
    use guarded_agent::engine::{
        ApprovalDecision, ApprovalGate, Executor, Phase, ScriptedReasoner, SessionEngine,
        SessionOutcome,
    };
    use guarded_agent::tools::{register_builtin, ToolExecutor, ToolRegistry};

    fn engine(decisions: Vec<Decision>, store: Arc<dyn Checkpointer>) -> SessionEngine {
        let mut registry = ToolRegistry::new();
        register_builtin(&mut registry);
        let tools = ToolExecutor::new(Arc::new(registry), 5);
        let reasoner = Arc::new(ScriptedReasoner::new(decisions));
        SessionEngine::new(Executor::new(reasoner, tools, store))
    }

    fn delete_then_final() -> Vec<Decision> {
        vec![
            Decision::ToolCalls {
                text: String::new(),
                calls: vec![ToolCall::new(
                    "delete_records",
                    json!({"record_ids": ["R1", "R2"]}),
                    "c1",
                )],
            },
            Decision::Final("Deleted.".into()),
        ]
    }

    #[tokio::test]
    async fn test_resume_in_fresh_engine_from_files() {
        let dir = tempfile::tempdir().unwrap();

        {
            let first = engine(
                delete_then_final(),
                Arc::new(FileCheckpointer::new(dir.path())),
            );
            let outcome = first.start("s1", "delete R1 and R2", 10).await.unwrap();
            assert!(matches!(outcome, SessionOutcome::AwaitingApproval { .. }));
        }

        // 另一个“进程”：新的存储实例、新的 Reasoner（脚本从第二步开始）
        let store = Arc::new(FileCheckpointer::new(dir.path()));
        let mut state = store.load("s1").await.unwrap().unwrap();
        assert_eq!(state.phase, Phase::AwaitingApproval);
        let pending = state.pending_action.clone().unwrap();
        assert_eq!(pending.call_id, "c1");

        // 重新进入闸门不会重复写 approval_requested
        ApprovalGate::open(&mut state, pending);
        assert_eq!(state.audit.count(K::ApprovalRequested), 1);

        let second = engine(vec![Decision::Final("Deleted.".into())], store);
        let outcome = second.resume("s1", ApprovalDecision::Approve).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.answer.as_deref(), Some("Deleted."));
        assert_eq!(report.audit.count(K::ApprovalRequested), 1);
        assert_eq!(report.audit.count(K::ActionExecuted), 1);
        assert!(verify_audit(&report.audit).is_empty());
    }

    #[tokio::test]
    async fn test_resume_from_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("checkpoints.db");

        let first = engine(
            delete_then_final(),
            Arc::new(SqliteCheckpointer::open(&db).unwrap()),
        );
        first.start("s1", "delete R1 and R2", 10).await.unwrap();
        drop(first);

        let second = engine(
            vec![Decision::Final("Deleted.".into())],
            Arc::new(SqliteCheckpointer::open(&db).unwrap()),
        );
        let outcome = second.resume("s1", ApprovalDecision::Reject).await.unwrap();
        let audit = &outcome.report().unwrap().audit;
        assert_eq!(audit.count(K::ActionRejected), 1);
        assert!(verify_audit(audit).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_approval_executes_once() {
        let engine = engine(delete_then_final(), Arc::new(MemoryCheckpointer::new()));
        engine.start("s1", "delete", 10).await.unwrap();

        let first = engine.resume("s1", ApprovalDecision::Approve).await.unwrap();
        let second = engine.resume("s1", ApprovalDecision::Approve).await.unwrap();

        let audit = &second.report().unwrap().audit;
        assert_eq!(audit.count(K::ActionExecuted), 1);
        assert_eq!(audit.count(K::ApprovalGranted), 1);
        assert_eq!(first.report().unwrap().audit.len(), audit.len());
        assert!(verify_audit(audit).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_approvals_execute_once() {
        let engine = Arc::new(engine(
            delete_then_final(),
            Arc::new(MemoryCheckpointer::new()),
        ));
        engine.start("s1", "delete", 10).await.unwrap();

        let (a, b) = tokio::join!(
            engine.resume("s1", ApprovalDecision::Approve),
            engine.resume("s1", ApprovalDecision::Approve)
        );
        a.unwrap();
        b.unwrap();

        let state = engine.snapshot("s1").await.unwrap();
        assert_eq!(state.audit.count(K::ActionExecuted), 1);
        assert!(verify_audit(&state.audit).is_empty());
    }

    #[tokio::test]
    async fn test_stale_call_id_is_ignored() {
        let engine = engine(delete_then_final(), Arc::new(MemoryCheckpointer::new()));
        engine.start("s1", "delete", 10).await.unwrap();
        let before = engine.snapshot("s1").await.unwrap();

        let outcome = engine
            .resolve_approval("s1", "not-the-call", ApprovalDecision::Approve)
            .await
            .unwrap();
        assert_eq!(outcome.pending().unwrap().call_id, "c1");
        let after = engine.snapshot("s1").await.unwrap();
        assert_eq!(after.audit.len(), before.audit.len());

        let outcome = engine
            .resolve_approval("s1", "c1", ApprovalDecision::Approve)
            .await
            .unwrap();
        assert!(outcome.is_finished());

        // 已处理过的 call_id 再次投递：无操作
        let again = engine
            .resolve_approval("s1", "c1", ApprovalDecision::Approve)
            .await
            .unwrap();
        assert_eq!(again.report().unwrap().audit.count(K::ActionExecuted), 1);
    }

    #[tokio::test]
    async fn test_status_and_archive() {
        let engine = engine(delete_then_final(), Arc::new(MemoryCheckpointer::new()));
        engine.start("s1", "delete", 10).await.unwrap();

        let status = engine.status("s1").await.unwrap();
        assert_eq!(status.phase, Phase::AwaitingApproval);
        assert_eq!(status.iteration_count, 1);
        assert_eq!(status.pending_action.unwrap().tool_name, "delete_records");
        assert_eq!(engine.list().await.unwrap(), vec!["s1".to_string()]);

        assert!(engine.archive("s1").await.unwrap());
        assert!(engine.status("s1").await.is_err());
    }
}
