//! Reasoner：把消息历史变成一个 Decision
//!
//! LlmReasoner 调用 LLM 并用 parse_llm_output 从文本中提取 JSON Tool Call；
//! ScriptedReasoner 按预设序列回放 Decision，用于测试与演示。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::core::{AgentError, Decision, Message, ToolCall};
use crate::llm::mock::OBSERVATION_PREFIX;
use crate::llm::{ChatMessage, LlmClient};
use crate::tools::{tool_call_schema_json, ToolRegistry};

/// 推理能力：失败（如上游不可用）以 AgentError::Reasoner 返回，引擎不做任何状态变更
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, messages: &[Message]) -> Result<Decision, AgentError>;
}

/// 无法识别的调用所用的工具名；注册表中不存在，因而按未知工具（high）送审批
pub const MALFORMED_TOOL_NAME: &str = "<malformed>";

/// LLM 输出中的单个调用：`{"tool": "...", "args": {...}, "id": "..."}`，也接受 `name` / `arguments`
#[derive(Debug, Deserialize)]
struct RawToolCall {
    #[serde(default, alias = "name")]
    tool: String,
    #[serde(default, alias = "arguments")]
    args: Value,
}

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn call_id_of(raw: &Value) -> String {
    match raw.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => new_call_id(),
    }
}

/// args 只接受对象；`arguments` 为 JSON 字符串时先解析
fn object_args(args: Value) -> Option<Value> {
    match args {
        Value::Null => Some(Value::Object(Default::default())),
        obj @ Value::Object(_) => Some(obj),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(v @ Value::Object(_)) => Some(v),
            _ => None,
        },
        _ => None,
    }
}

/// 结构不合法的调用不丢弃：保留为 MALFORMED_TOOL_NAME，原始对象作为 args
fn into_call(raw: Value) -> ToolCall {
    let id = call_id_of(&raw);
    let parsed = serde_json::from_value::<RawToolCall>(raw.clone())
        .ok()
        .filter(|c| !c.tool.trim().is_empty())
        .and_then(|c| object_args(c.args).map(|args| (c.tool.trim().to_string(), args)));
    match parsed {
        Some((name, args)) => ToolCall::new(name, args, id),
        None => {
            tracing::warn!(raw = %raw, "malformed tool call in llm output");
            let args = if raw.is_object() {
                raw
            } else {
                serde_json::json!({ "raw": raw })
            };
            ToolCall::new(MALFORMED_TOOL_NAME, args, id)
        }
    }
}

/// 单个对象是否意在调用工具：有 `tool` 键，或同时有 `name` 与参数键
fn looks_like_call(value: &Value) -> bool {
    value.get("tool").is_some()
        || (value.get("name").is_some()
            && (value.get("args").is_some() || value.get("arguments").is_some()))
}

/// 从文本中截出 JSON 片段：```json 代码块优先，否则取第一个 '{' 到最后一个 '}'
fn extract_json(text: &str) -> Option<(&str, &str)> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        let body = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest);
        return Some((&text[..start], body.trim()));
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some((&text[..start], &text[start..=end]))
}

/// 解析 LLM 输出
///
/// 支持 `{"tool", "args"}` 与 `{"tool_calls": [...]}` 两种形态；缺少 id 时生成 UUID。
/// 无 JSON、JSON 不合法或不含调用时整段原文作为 Final；
/// 批次中结构不合法的条目以 MALFORMED_TOOL_NAME 保留，不会被静默丢弃。
pub fn parse_llm_output(output: &str) -> Decision {
    let trimmed = output.trim();
    let Some((prefix, json_str)) = extract_json(trimmed) else {
        return Decision::Final(trimmed.to_string());
    };
    let Ok(value) = serde_json::from_str::<Value>(json_str) else {
        tracing::debug!(output = %trimmed, "llm output is not valid json, treating as final");
        return Decision::Final(trimmed.to_string());
    };

    let raw_calls: Vec<Value> = match value.get("tool_calls") {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
        None if looks_like_call(&value) => vec![value.clone()],
        None => Vec::new(),
    };
    let calls: Vec<ToolCall> = raw_calls.into_iter().map(into_call).collect();
    if calls.is_empty() {
        return Decision::Final(trimmed.to_string());
    }
    Decision::ToolCalls {
        text: prefix.trim().to_string(),
        calls,
    }
}

/// 把会话消息渲染成 LLM 对话
pub fn render_messages(system: &str, messages: &[Message]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(ChatMessage::system(system));
    for message in messages {
        let chat = match message {
            Message::Human { content } => ChatMessage::user(content.clone()),
            Message::AgentFinal { content } => ChatMessage::assistant(content.clone()),
            Message::AgentToolCalls { content, calls } => {
                let batch: Vec<Value> = calls
                    .iter()
                    .map(|c| serde_json::json!({"tool": c.name, "args": c.args, "id": c.call_id}))
                    .collect();
                let body = serde_json::json!({ "tool_calls": batch }).to_string();
                if content.is_empty() {
                    ChatMessage::assistant(body)
                } else {
                    ChatMessage::assistant(format!("{content}\n{body}"))
                }
            }
            Message::ToolResult {
                call_id,
                tool_name,
                content,
                is_error,
            } => {
                let status = if *is_error { " [error]" } else { "" };
                ChatMessage::user(format!(
                    "{OBSERVATION_PREFIX} {tool_name} (call {call_id}){status}: {content}"
                ))
            }
        };
        out.push(chat);
    }
    out
}

fn build_system_prompt(registry: &ToolRegistry) -> String {
    format!(
        "You are a careful operations assistant. You may call tools to act on the user's behalf.\n\
         Some tools are high risk and a human operator must approve them; if an action is not \
         approved, suggest an alternative instead of retrying it.\n\n\
         Available tools:\n{}\n\n\
         To call tools, reply with JSON only, matching this schema:\n{}\n\
         A single call may also be written as {{\"tool\": \"name\", \"args\": {{...}}}}.\n\
         When you have the answer, reply in plain text without JSON.",
        registry.to_schema_json(),
        tool_call_schema_json()
    )
}

/// 基于 LLM 的 Reasoner
pub struct LlmReasoner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmReasoner {
    /// system prompt 中包含工具目录（名称、描述、参数 Schema、风险等级）与输出格式 Schema
    pub fn new(llm: Arc<dyn LlmClient>, registry: &ToolRegistry) -> Self {
        Self {
            llm,
            system_prompt: build_system_prompt(registry),
        }
    }

    pub fn with_system_prompt(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn reason(&self, messages: &[Message]) -> Result<Decision, AgentError> {
        let chat = render_messages(&self.system_prompt, messages);
        let output = self
            .llm
            .complete(&chat)
            .await
            .map_err(|e| AgentError::Reasoner(e.to_string()))?;
        Ok(parse_llm_output(&output))
    }
}

/// 预设脚本中的一步
#[derive(Clone, Debug)]
pub enum Scripted {
    Decide(Decision),
    Fail(String),
}

/// 按顺序回放 Decision；脚本用完后重复最后一步
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self::from_steps(decisions.into_iter().map(Scripted::Decide))
    }

    pub fn from_steps(steps: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// 被调用的次数（包括失败的调用）
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn reason(&self, _messages: &[Message]) -> Result<Decision, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut script = self
                .script
                .lock()
                .map_err(|_| AgentError::Reasoner("script lock poisoned".to_string()))?;
            script.pop_front()
        };
        let step = {
            let mut last = self
                .last
                .lock()
                .map_err(|_| AgentError::Reasoner("script lock poisoned".to_string()))?;
            match next {
                Some(step) => {
                    *last = Some(step.clone());
                    step
                }
                None => last
                    .clone()
                    .unwrap_or_else(|| Scripted::Fail("script is empty".to_string())),
            }
        };
        match step {
            Scripted::Decide(decision) => Ok(decision),
            Scripted::Fail(reason) => Err(AgentError::Reasoner(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::register_builtin;
    use serde_json::json;

    #[test]
    fn test_parse_single_call_fills_id() {
        let d = parse_llm_output(r#"{"tool": "search_database", "args": {"query": "x"}}"#);
        let calls = d.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search_database");
        assert!(calls[0].call_id.starts_with("call_"));
    }

    #[test]
    fn test_parse_batch_keeps_order_and_ids() {
        let out = r#"Let me do both.
```json
{"tool_calls": [
  {"tool": "search_database", "args": {"query": "q"}, "id": "a"},
  {"tool": "send_email", "args": {"recipient": "x@y.z", "subject": "s", "body": "b"}, "id": "b"}
]}
```"#;
        let d = parse_llm_output(out);
        let ids: Vec<&str> = d.calls().iter().map(|c| c.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        match d {
            Decision::ToolCalls { text, .. } => assert_eq!(text, "Let me do both."),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_plain_or_malformed_is_final() {
        assert_eq!(parse_llm_output("All done."), Decision::Final("All done.".into()));
        assert_eq!(
            parse_llm_output("{not json}"),
            Decision::Final("{not json}".into())
        );
        assert!(parse_llm_output(r#"{"status": "ok"}"#).is_final());
    }

    #[test]
    fn test_parse_keeps_malformed_entries_in_batch() {
        let d = parse_llm_output(
            r#"{"tool_calls": [
                {"args": {"record_ids": ["R1"]}, "id": "m1"},
                {"tool": "search_database", "args": {"query": "q"}, "id": "s1"}
            ]}"#,
        );
        let calls = d.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, MALFORMED_TOOL_NAME);
        assert_eq!(calls[0].call_id, "m1");
        assert_eq!(calls[0].args["args"]["record_ids"][0], "R1");
        assert_eq!(calls[1].name, "search_database");

        let registry = {
            let mut r = ToolRegistry::new();
            register_builtin(&mut r);
            r
        };
        assert_eq!(registry.risk_of(&calls[0].name), crate::tools::RiskLevel::High);

        // 空工具名同样保留
        let d = parse_llm_output(r#"{"tool": "", "args": {}}"#);
        assert_eq!(d.calls()[0].name, MALFORMED_TOOL_NAME);
    }

    #[test]
    fn test_parse_accepts_name_and_string_arguments() {
        let d = parse_llm_output(
            r#"{"tool_calls": [{"name": "delete_records", "arguments": "{\"record_ids\": [\"R1\"]}"}]}"#,
        );
        let calls = d.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "delete_records");
        assert_eq!(calls[0].args, json!({"record_ids": ["R1"]}));
    }

    #[test]
    fn test_render_tool_result_as_observation() {
        let call = ToolCall::new("search_database", json!({}), "c1");
        let chat = render_messages("sys", &[Message::tool_result(&call, "3 rows", false)]);
        assert_eq!(chat.len(), 2);
        assert!(chat[1].content.starts_with(OBSERVATION_PREFIX));
        assert!(chat[1].content.contains("(call c1)"));
    }

    #[tokio::test]
    async fn test_llm_reasoner_with_mock() {
        let mut registry = ToolRegistry::new();
        register_builtin(&mut registry);
        let reasoner = LlmReasoner::new(Arc::new(MockLlmClient), &registry);
        assert!(reasoner.system_prompt().contains("delete_records"));

        let d = reasoner
            .reason(&[Message::human("Search for customer John")])
            .await
            .unwrap();
        assert_eq!(d.calls()[0].name, "search_database");
    }

    #[tokio::test]
    async fn test_scripted_repeats_last_step() {
        let r = ScriptedReasoner::new([Decision::Final("a".into())]);
        assert_eq!(r.reason(&[]).await.unwrap(), Decision::Final("a".into()));
        assert_eq!(r.reason(&[]).await.unwrap(), Decision::Final("a".into()));
        assert_eq!(r.call_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let r = ScriptedReasoner::from_steps([Scripted::Fail("upstream down".into())]);
        assert!(matches!(r.reason(&[]).await, Err(AgentError::Reasoner(_))));
    }
}
