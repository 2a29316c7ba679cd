//! 风险等级与风险策略
//!
//! 策略由部署方注入（配置文件 [risk] 段或独立 TOML），不写死在引擎里。
//! 查找顺序：策略覆盖 > 工具自报 > High（未知工具一律按最高风险，强制审批）。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 工具的静态风险分级
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// medium / high 需要人工审批
    pub fn requires_approval(&self) -> bool {
        !matches!(self, Self::Low)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

/// 工具名 -> 风险等级的覆盖表
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskPolicy {
    levels: HashMap<String, RiskLevel>,
}

impl RiskPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: impl Into<String>, level: RiskLevel) -> Self {
        self.levels.insert(tool.into(), level);
        self
    }

    pub fn get(&self, tool: &str) -> Option<RiskLevel> {
        self.levels.get(tool).copied()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// 解析独立的策略文件，例如：
    ///
    /// ```toml
    /// search_database = "low"
    /// delete_records = "high"
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// 从字符串表构建（配置层用），非法等级报错
    pub fn from_map(raw: &HashMap<String, String>) -> Result<Self, String> {
        let mut levels = HashMap::with_capacity(raw.len());
        for (tool, level) in raw {
            levels.insert(tool.clone(), level.parse::<RiskLevel>()?);
        }
        Ok(Self { levels })
    }
}
