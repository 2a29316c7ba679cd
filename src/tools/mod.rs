//! 工具层：Tool trait 与注册表、风险策略、参数 Schema、带超时的执行器、演示工具

pub mod builtin;
pub mod executor;
pub mod registry;
pub mod risk;
pub mod schema;

pub use builtin::register_builtin;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use risk::{RiskLevel, RiskPolicy};
pub use schema::{schema_of, tool_call_schema_json};
