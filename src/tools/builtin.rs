//! 演示工具：数据库检索、发邮件、删记录、改价格、当前时间
//!
//! 工具体本身是占位实现（不真正发信或删库），用于演示风险路由与审批闸门：
//! search_database / get_current_time 为 low，send_email 为 medium，delete_records / modify_pricing 为 high。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::schema::schema_of;
use crate::tools::{RiskLevel, Tool, ToolRegistry};

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArgs {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Deserialize, JsonSchema)]
struct SearchArgs {
    /// 检索关键词
    query: String,
}

/// 内部数据库检索（只读）
pub struct SearchDatabaseTool;

#[async_trait]
impl Tool for SearchDatabaseTool {
    fn name(&self) -> &str {
        "search_database"
    }

    fn description(&self) -> &str {
        "Search internal database for information. Args: {\"query\": \"text\"}"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Low
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<SearchArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: SearchArgs = parse_args(self.name(), args)?;
        Ok(format!(
            "Database search results for '{}': Found 3 relevant entries.",
            args.query
        ))
    }
}

#[derive(Deserialize, JsonSchema)]
struct EmailArgs {
    /// 收件人地址
    recipient: String,
    subject: String,
    body: String,
}

/// 发送邮件（对外可见，需审批）
pub struct SendEmailTool;

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send an email to a recipient. Args: {\"recipient\", \"subject\", \"body\"}"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<EmailArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: EmailArgs = parse_args(self.name(), args)?;
        if !args.recipient.contains('@') {
            return Err(ToolError::Failed(format!(
                "invalid recipient address: {}",
                args.recipient
            )));
        }
        Ok(format!(
            "Email prepared for {} with subject '{}' ({} chars)",
            args.recipient,
            args.subject,
            args.body.chars().count()
        ))
    }
}

#[derive(Deserialize, JsonSchema)]
struct DeleteArgs {
    /// 待删除记录 id 列表
    record_ids: Vec<String>,
}

/// 删除记录（不可逆，需审批）
pub struct DeleteRecordsTool;

#[async_trait]
impl Tool for DeleteRecordsTool {
    fn name(&self) -> &str {
        "delete_records"
    }

    fn description(&self) -> &str {
        "Delete records from the database. Args: {\"record_ids\": [\"R1\", ...]}"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<DeleteArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: DeleteArgs = parse_args(self.name(), args)?;
        Ok(format!(
            "Deleted {} records: {}",
            args.record_ids.len(),
            args.record_ids.join(", ")
        ))
    }
}

#[derive(Deserialize, JsonSchema)]
struct PricingArgs {
    product_id: String,
    /// 新价格（美元）
    new_price: f64,
}

/// 修改商品价格（需审批）
pub struct ModifyPricingTool;

#[async_trait]
impl Tool for ModifyPricingTool {
    fn name(&self) -> &str {
        "modify_pricing"
    }

    fn description(&self) -> &str {
        "Modify product pricing. Args: {\"product_id\": \"P1\", \"new_price\": 9.99}"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<PricingArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: PricingArgs = parse_args(self.name(), args)?;
        if !args.new_price.is_finite() || args.new_price < 0.0 {
            return Err(ToolError::Failed(format!(
                "price must be a non-negative number, got {}",
                args.new_price
            )));
        }
        Ok(format!(
            "Changed price for {} to ${:.2}",
            args.product_id, args.new_price
        ))
    }
}

/// 当前日期与时间
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. No args."
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Low
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        Ok(chrono::Local::now()
            .format("%A, %B %d, %Y at %I:%M %p")
            .to_string())
    }
}

/// 注册全部演示工具
pub fn register_builtin(registry: &mut ToolRegistry) {
    registry.register(SearchDatabaseTool);
    registry.register(SendEmailTool);
    registry.register(DeleteRecordsTool);
    registry.register(ModifyPricingTool);
    registry.register(CurrentTimeTool);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_delete_records_confirms_ids() {
        let out = DeleteRecordsTool
            .execute(json!({"record_ids": ["R1", "R2"]}))
            .await
            .unwrap();
        assert!(out.contains("R1") && out.contains("R2"));
        assert!(out.contains("Deleted 2 records"));
    }

    #[tokio::test]
    async fn test_send_email_rejects_bad_recipient() {
        let err = SendEmailTool
            .execute(json!({"recipient": "nobody", "subject": "s", "body": "b"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
    }

    #[test]
    fn test_builtin_risk_levels() {
        let mut registry = ToolRegistry::new();
        register_builtin(&mut registry);
        assert_eq!(registry.risk_of("search_database"), RiskLevel::Low);
        assert_eq!(registry.risk_of("send_email"), RiskLevel::Medium);
        assert_eq!(registry.risk_of("delete_records"), RiskLevel::High);
        assert_eq!(registry.risk_of("modify_pricing"), RiskLevel::High);
        assert_eq!(registry.risk_of("get_current_time"), RiskLevel::Low);
    }

    #[test]
    fn test_search_schema_validates() {
        let mut registry = ToolRegistry::new();
        register_builtin(&mut registry);
        assert!(registry
            .validate_args("search_database", &json!({"query": "customers"}))
            .is_ok());
        assert!(registry.validate_args("search_database", &json!({})).is_err());
    }
}
