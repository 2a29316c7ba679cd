//! 工具执行器
//!
//! 持有只读的 ToolRegistry 与全局超时：execute(call) 先解析工具、按 schema 校验参数，
//! 再在超时内调用 handler；每次调用输出结构化审计日志（JSON）。
//! 返回 ToolError 由引擎转成 ToolResult 消息，不会中止循环。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::{ToolCall, ToolError};
use crate::tools::{RiskLevel, ToolRegistry};

/// 工具执行器：对每次调用施加超时，并将结果映射为 ToolError
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn risk_of(&self, name: &str) -> RiskLevel {
        self.registry.risk_of(name)
    }

    /// 执行一次调用；未知工具 NotFound，参数不合法 InvalidArgs，超时 Timeout，handler 失败 Failed
    pub async fn execute(&self, call: &ToolCall) -> Result<String, ToolError> {
        let start = Instant::now();
        let result = self.run(call).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Timeout(_)) => "timeout",
            Err(ToolError::InvalidArgs { .. }) => "invalid_args",
            Err(ToolError::NotFound(_)) => "not_found",
            Err(ToolError::Failed(_)) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.call_id,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    async fn run(&self, call: &ToolCall) -> Result<String, ToolError> {
        let tool = self.registry.resolve(&call.name)?;
        self.registry.validate_args(&call.name, &call.args)?;
        match timeout(self.timeout, tool.execute(call.args.clone())).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(call.name.clone())),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
