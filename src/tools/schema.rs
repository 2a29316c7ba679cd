//! 工具相关 JSON Schema 生成（schemars）
//!
//! - schema_of::<T>()：由参数结构体派生工具的 parameters_schema
//! - tool_call_schema_json()：合法 tool call 输出格式，拼入 system prompt 减少 LLM 格式错误

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 单个工具调用的输出格式：`{"tool": "...", "args": {...}, "id": "..."}`（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 search_database、delete_records
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: HashMap<String, Value>,
    /// 可选的调用 id；缺省时由引擎生成
    pub id: Option<String>,
}

/// 一轮多个调用：`{"tool_calls": [...]}`，按顺序逐个处理
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallBatchFormat {
    pub tool_calls: Vec<ToolCallFormat>,
}

/// 由参数类型生成 JSON Schema（Draft 7）
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 返回 tool call 输出格式的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallBatchFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
