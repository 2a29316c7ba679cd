//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `GUARD__*` 覆盖（双下划线表示嵌套，如 `GUARD__LLM__PROVIDER=openai`）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::checkpoint::{Checkpointer, FileCheckpointer, MemoryCheckpointer, SqliteCheckpointer};
use crate::core::AgentError;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::tools::{register_builtin, RiskPolicy, ToolRegistry};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    /// 工具名 -> low / medium / high，覆盖工具自报的风险等级
    pub risk: HashMap<String, String>,
    pub approval: ApprovalSection,
    pub checkpoint: CheckpointSection,
    pub llm: LlmSection,
}

/// [engine] 段：迭代上限与工具超时
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_max_iterations() -> u32 {
    10
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [approval] 段：交互审批的等待上限；不设置则一直等
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApprovalSection {
    pub timeout_secs: Option<u64>,
}

/// [checkpoint] 段：存储后端
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointSection {
    /// memory / file / sqlite
    #[serde(default = "default_backend")]
    pub backend: String,
    /// file 后端为目录，sqlite 后端为数据库文件
    pub path: Option<PathBuf>,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

fn default_backend() -> String {
    "file".to_string()
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// mock / openai
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl AppConfig {
    pub fn risk_policy(&self) -> Result<RiskPolicy, AgentError> {
        RiskPolicy::from_map(&self.risk).map_err(AgentError::Config)
    }

    /// 注册内置工具并套上 [risk] 策略
    pub fn build_registry(&self) -> Result<ToolRegistry, AgentError> {
        let mut registry = ToolRegistry::with_policy(self.risk_policy()?);
        register_builtin(&mut registry);
        Ok(registry)
    }

    /// provider = openai 时使用 OpenAI 兼容端点（OPENAI_API_KEY），否则 Mock
    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        match self.llm.provider.to_ascii_lowercase().as_str() {
            "openai" => {
                tracing::info!(model = %self.llm.model, "using OpenAI-compatible backend");
                Arc::new(OpenAiClient::new(
                    self.llm.base_url.as_deref(),
                    &self.llm.model,
                    None,
                ))
            }
            other => {
                if other != "mock" {
                    tracing::warn!(provider = %other, "unknown llm provider, falling back to mock");
                }
                Arc::new(MockLlmClient)
            }
        }
    }

    pub fn build_checkpointer(&self) -> Result<Arc<dyn Checkpointer>, AgentError> {
        let backend = self.checkpoint.backend.to_ascii_lowercase();
        let store: Arc<dyn Checkpointer> = match backend.as_str() {
            "memory" => Arc::new(MemoryCheckpointer::new()),
            "file" => {
                let dir = self
                    .checkpoint
                    .path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(".guarded-agent/sessions"));
                Arc::new(FileCheckpointer::new(dir))
            }
            "sqlite" => {
                let path = self
                    .checkpoint
                    .path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(".guarded-agent/checkpoints.db"));
                Arc::new(SqliteCheckpointer::open(path).map_err(AgentError::from)?)
            }
            other => {
                return Err(AgentError::Config(format!(
                    "unknown checkpoint backend: {other}"
                )))
            }
        };
        Ok(store)
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::Config(e.to_string())
    }
}

/// 从 config 目录加载配置，环境变量 GUARD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 GUARD__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("GUARD")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::RiskLevel;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.max_iterations, 10);
        assert_eq!(cfg.engine.tool_timeout_secs, 30);
        assert_eq!(cfg.checkpoint.backend, "file");
        assert_eq!(cfg.llm.provider, "mock");
        assert!(cfg.approval.timeout_secs.is_none());
    }

    #[test]
    fn test_load_from_file_with_risk_table() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[engine]
max_iterations = 4

[risk]
send_email = "high"

[checkpoint]
backend = "memory"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.engine.max_iterations, 4);
        assert_eq!(cfg.engine.tool_timeout_secs, 30);
        let registry = cfg.build_registry().unwrap();
        assert_eq!(registry.risk_of("send_email"), RiskLevel::High);
        assert_eq!(registry.risk_of("search_database"), RiskLevel::Low);
        assert!(cfg.build_checkpointer().is_ok());
    }

    #[test]
    fn test_bad_risk_level_is_config_error() {
        let mut cfg = AppConfig::default();
        cfg.risk.insert("send_email".into(), "extreme".into());
        assert!(matches!(cfg.build_registry(), Err(AgentError::Config(_))));
        cfg.risk.clear();
        cfg.checkpoint.backend = "redis".into();
        assert!(matches!(cfg.build_checkpointer(), Err(AgentError::Config(_))));
    }
}
