//! Mock LLM 客户端（用于演示与测试，无需 API）
//!
//! 按最后一条用户消息的关键词产出 JSON Tool Call；看到工具观察结果或拒绝提示后给出最终回复，
//! 便于本地跑通「低风险自动执行 / 高风险等待审批」两条路径。

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{ChatMessage, ChatRole, LlmClient, LlmError};

/// 工具观察结果消息的前缀（LlmReasoner 渲染 ToolResult 时使用）
pub const OBSERVATION_PREFIX: &str = "Observation from";

/// Mock 客户端：关键词 -> 工具调用
#[derive(Debug, Default)]
pub struct MockLlmClient;

fn record_ids(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| {
            w.len() >= 2
                && w.chars().next().is_some_and(|c| c.is_ascii_uppercase())
                && w.chars().any(|c| c.is_ascii_digit())
        })
        .map(String::from)
        .collect()
}

fn plan_for(request: &str) -> String {
    let lower = request.to_lowercase();
    let call = if lower.contains("delete") {
        json!({"tool": "delete_records", "args": {"record_ids": record_ids(request)}})
    } else if lower.contains("email") {
        let recipient = request
            .split_whitespace()
            .find(|w| w.contains('@'))
            .unwrap_or("someone@example.com")
            .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '@' && c != '.');
        json!({"tool": "send_email", "args": {
            "recipient": recipient,
            "subject": "Follow-up",
            "body": request,
        }})
    } else if lower.contains("time") || lower.contains("date") {
        json!({"tool": "get_current_time", "args": {}})
    } else if lower.contains("search") || lower.contains("find") {
        json!({"tool": "search_database", "args": {"query": request}})
    } else {
        return format!("Echo from Mock: {request}");
    };
    call.to_string()
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if let Some(observation) = last_user.strip_prefix(OBSERVATION_PREFIX) {
            return Ok(format!("Here is what I found{observation}"));
        }
        if last_user.contains("was not approved") {
            return Ok("Understood. The action was not approved, so nothing was changed.".to_string());
        }
        Ok(plan_for(last_user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_plans_delete_with_ids() {
        let out = MockLlmClient
            .complete(&[ChatMessage::user("Delete records with IDs: REC001, REC002")])
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["tool"], "delete_records");
        assert_eq!(v["args"]["record_ids"], json!(["REC001", "REC002"]));
    }

    #[tokio::test]
    async fn test_mock_finishes_after_observation() {
        let out = MockLlmClient
            .complete(&[
                ChatMessage::user("search customers"),
                ChatMessage::user(format!("{OBSERVATION_PREFIX} search_database: 3 rows")),
            ])
            .await
            .unwrap();
        assert!(out.starts_with("Here is what I found"));
    }

    #[tokio::test]
    async fn test_mock_plain_text_is_echo() {
        let out = MockLlmClient
            .complete(&[ChatMessage::user("hello there")])
            .await
            .unwrap();
        assert_eq!(out, "Echo from Mock: hello there");
    }
}
