//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / risk_level / parameters_schema / execute），
//! 由 ToolRegistry 按名注册与查找；风险等级可被注入的 RiskPolicy 覆盖。
//! 引擎启动后注册表放进 Arc，只读共享给所有会话。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::Draft;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::{RiskLevel, RiskPolicy};

/// 工具 trait：名称、描述（供 LLM 理解）、风险、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（对应 tool call 中的 name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 工具自报的风险等级；未覆盖时按 High 处理
    fn risk_level(&self) -> RiskLevel {
        RiskLevel::High
    }

    /// 参数 JSON Schema；默认不限参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, ToolError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，附带风险策略
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    policy: RiskPolicy,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RiskPolicy) -> Self {
        Self {
            tools: HashMap::new(),
            policy,
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous handler replaced");
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 风险查找：策略覆盖 > 工具自报 > High
    pub fn risk_of(&self, name: &str) -> RiskLevel {
        if let Some(level) = self.policy.get(name) {
            return level;
        }
        self.tools
            .get(name)
            .map(|t| t.risk_level())
            .unwrap_or(RiskLevel::High)
    }

    /// 按工具的参数 schema 校验 args；args 必须是 JSON object
    pub fn validate_args(&self, name: &str, args: &Value) -> Result<(), ToolError> {
        let tool = self.resolve(name)?;
        if !args.is_object() {
            return Err(ToolError::InvalidArgs {
                tool: name.to_string(),
                reason: "arguments must be a JSON object".to_string(),
            });
        }
        let schema = tool.parameters_schema();
        let validator = jsonschema::options()
            .with_draft(Draft::Draft7)
            .build(&schema)
            .map_err(|e| ToolError::InvalidArgs {
                tool: name.to_string(),
                reason: format!("bad schema: {e}"),
            })?;
        let messages: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
        if !messages.is_empty() {
            return Err(ToolError::InvalidArgs {
                tool: name.to_string(),
                reason: messages.join("; "),
            });
        }
        Ok(())
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 工具目录 JSON（name / description / risk / parameters），拼入 system prompt
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name).map(|tool| (name, tool)))
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "risk_level": self.risk_of(name),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
