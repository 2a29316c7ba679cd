//! 审计日志：只追加、按时间有序
//!
//! 每次追加同时输出一条结构化 tracing 日志（JSON）。verify_audit 检查调用级不变量：
//! 执行条目唯一、审批请求先于授权先于执行、低风险不进审批、中/高风险不自动执行。

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::state::ToolCall;
use crate::tools::RiskLevel;

/// 审计事件类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    DecisionMade,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalDenied,
    ActionExecuted,
    ActionRejected,
    AutoExecuted,
    Error,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecisionMade => "decision_made",
            Self::ApprovalRequested => "approval_requested",
            Self::ApprovalGranted => "approval_granted",
            Self::ApprovalDenied => "approval_denied",
            Self::ActionExecuted => "action_executed",
            Self::ActionRejected => "action_rejected",
            Self::AutoExecuted => "auto_executed",
            Self::Error => "error",
        }
    }

    fn is_resolution(&self) -> bool {
        matches!(self, Self::ApprovalGranted | Self::ApprovalDenied)
    }

    fn is_execution(&self) -> bool {
        matches!(self, Self::ActionExecuted | Self::AutoExecuted)
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 不可变审计条目
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event_kind: AuditEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    /// decision_made 引用的全部 call_id
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_calls: Vec<String>,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(event_kind: AuditEventKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_kind,
            call_id: None,
            tool_name: None,
            risk_level: None,
            related_calls: Vec::new(),
            detail: detail.into(),
        }
    }

    pub fn for_call(mut self, call: &ToolCall) -> Self {
        self.call_id = Some(call.call_id.clone());
        self.tool_name = Some(call.name.clone());
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = Some(risk);
        self
    }

    pub fn with_related_calls(mut self, calls: &[ToolCall]) -> Self {
        self.related_calls = calls.iter().map(|c| c.call_id.clone()).collect();
        self
    }

    /// 是否与某个 call_id 相关（自身或 decision_made 的引用列表）
    pub fn references(&self, call_id: &str) -> bool {
        self.call_id.as_deref() == Some(call_id) || self.related_calls.iter().any(|c| c == call_id)
    }
}

/// 只追加的审计日志
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条；时间戳不早于上一条，保证顺序与时间一致
    pub fn record(&mut self, mut entry: AuditEntry) {
        if let Some(last) = self.entries.last() {
            if entry.timestamp < last.timestamp {
                entry.timestamp = last.timestamp;
            }
        }
        let line = serde_json::to_string(&entry).unwrap_or_default();
        tracing::info!(event = "audit", kind = %entry.event_kind, audit = %line, "audit");
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kinds(&self) -> Vec<AuditEventKind> {
        self.entries.iter().map(|e| e.event_kind).collect()
    }

    pub fn count(&self, kind: AuditEventKind) -> usize {
        self.entries.iter().filter(|e| e.event_kind == kind).count()
    }

    /// 与某个 call_id 相关的全部条目（保持原顺序）
    pub fn for_call<'a>(&'a self, call_id: &'a str) -> impl Iterator<Item = &'a AuditEntry> + 'a {
        self.entries.iter().filter(move |e| e.references(call_id))
    }

    /// 该 call_id 已有 approval_requested 且尚无 granted / denied
    pub fn has_open_request(&self, call_id: &str) -> bool {
        let mut open = false;
        for entry in self.entries.iter().filter(|e| e.call_id.as_deref() == Some(call_id)) {
            match entry.event_kind {
                AuditEventKind::ApprovalRequested => open = true,
                kind if kind.is_resolution() => open = false,
                _ => {}
            }
        }
        open
    }
}

/// 检查审计不变量，返回违例描述（空表示通过）
pub fn verify_audit(log: &AuditLog) -> Vec<String> {
    let mut errors = Vec::new();
    let entries = log.entries();

    if entries.windows(2).any(|w| w[1].timestamp < w[0].timestamp) {
        errors.push("audit entries are not ordered by time".to_string());
    }

    // call_id -> 条目下标序列
    let mut by_call: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, entry) in entries.iter().enumerate() {
        if let Some(id) = entry.call_id.as_deref() {
            by_call.entry(id).or_default().push(idx);
        }
    }
    let call_ids: BTreeSet<&str> = by_call.keys().copied().collect();

    for call_id in call_ids {
        let idxs = &by_call[call_id];
        let of_kind = |kind: AuditEventKind| -> Vec<usize> {
            idxs.iter().copied().filter(|&i| entries[i].event_kind == kind).collect()
        };
        let requested = of_kind(AuditEventKind::ApprovalRequested);
        let granted = of_kind(AuditEventKind::ApprovalGranted);
        let executed: Vec<usize> = idxs
            .iter()
            .copied()
            .filter(|&i| entries[i].event_kind.is_execution())
            .collect();

        for &i in &requested {
            if entries[i].risk_level == Some(RiskLevel::Low) {
                errors.push(format!("{call_id}: low-risk call produced approval_requested"));
            }
        }
        for &i in &of_kind(AuditEventKind::AutoExecuted) {
            if entries[i].risk_level != Some(RiskLevel::Low) {
                errors.push(format!("{call_id}: non-low-risk call was auto_executed"));
            }
        }

        let failed = of_kind(AuditEventKind::Error);
        if executed.is_empty() {
            if !granted.is_empty() {
                errors.push(format!("{call_id}: approval_granted without an execution entry"));
            }
            if !failed.is_empty() {
                errors.push(format!("{call_id}: error without an execution entry"));
            }
            continue;
        }
        if executed.len() > 1 {
            errors.push(format!("{call_id}: executed {} times", executed.len()));
        }
        let first_exec = executed[0];
        if failed.iter().any(|&i| i < first_exec) {
            errors.push(format!("{call_id}: error recorded before the execution entry"));
        }

        let decisions = entries[..first_exec]
            .iter()
            .filter(|e| e.event_kind == AuditEventKind::DecisionMade && e.references(call_id))
            .count();
        if decisions != 1 {
            errors.push(format!(
                "{call_id}: expected exactly one prior decision_made, found {decisions}"
            ));
        }

        match entries[first_exec].event_kind {
            AuditEventKind::AutoExecuted => {
                if !requested.is_empty() {
                    errors.push(format!("{call_id}: auto_executed call has approval entries"));
                }
            }
            _ => {
                if requested.len() != 1 || granted.len() != 1 {
                    errors.push(format!(
                        "{call_id}: expected one approval_requested and one approval_granted, found {} and {}",
                        requested.len(),
                        granted.len()
                    ));
                } else if !(requested[0] < granted[0] && granted[0] < first_exec) {
                    errors.push(format!(
                        "{call_id}: approval_requested / approval_granted / action_executed out of order"
                    ));
                }
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(name, json!({}), id)
    }

    #[test]
    fn test_open_request_closes_on_resolution() {
        let c = call("c1", "delete_records");
        let mut log = AuditLog::new();
        assert!(!log.has_open_request("c1"));
        log.record(AuditEntry::new(AuditEventKind::ApprovalRequested, "").for_call(&c));
        assert!(log.has_open_request("c1"));
        log.record(AuditEntry::new(AuditEventKind::ApprovalDenied, "").for_call(&c));
        assert!(!log.has_open_request("c1"));
    }

    #[test]
    fn test_verify_accepts_approved_sequence() {
        let c = call("c1", "delete_records");
        let mut log = AuditLog::new();
        log.record(AuditEntry::new(AuditEventKind::DecisionMade, "").with_related_calls(&[c.clone()]));
        log.record(
            AuditEntry::new(AuditEventKind::ApprovalRequested, "")
                .for_call(&c)
                .with_risk(RiskLevel::High),
        );
        log.record(AuditEntry::new(AuditEventKind::ApprovalGranted, "").for_call(&c));
        log.record(AuditEntry::new(AuditEventKind::ActionExecuted, "").for_call(&c));
        assert!(verify_audit(&log).is_empty());
    }

    #[test]
    fn test_verify_flags_execution_without_grant() {
        let c = call("c1", "delete_records");
        let mut log = AuditLog::new();
        log.record(AuditEntry::new(AuditEventKind::DecisionMade, "").with_related_calls(&[c.clone()]));
        log.record(
            AuditEntry::new(AuditEventKind::ApprovalRequested, "")
                .for_call(&c)
                .with_risk(RiskLevel::High),
        );
        log.record(AuditEntry::new(AuditEventKind::ActionExecuted, "").for_call(&c));
        let errors = verify_audit(&log);
        assert!(errors.iter().any(|e| e.contains("approval_granted")));
    }

    #[test]
    fn test_verify_flags_failed_call_without_execution_entry() {
        let c = call("c1", "send_email");
        let mut log = AuditLog::new();
        log.record(AuditEntry::new(AuditEventKind::DecisionMade, "").with_related_calls(&[c.clone()]));
        log.record(
            AuditEntry::new(AuditEventKind::ApprovalRequested, "")
                .for_call(&c)
                .with_risk(RiskLevel::Medium),
        );
        log.record(AuditEntry::new(AuditEventKind::ApprovalGranted, "").for_call(&c));
        log.record(AuditEntry::new(AuditEventKind::Error, "recipient rejected").for_call(&c));
        let errors = verify_audit(&log);
        assert!(errors.iter().any(|e| e.contains("approval_granted without")));
        assert!(errors.iter().any(|e| e.contains("error without")));

        // 补上执行条目（失败也算一次执行）后通过
        let mut log = AuditLog::new();
        log.record(AuditEntry::new(AuditEventKind::DecisionMade, "").with_related_calls(&[c.clone()]));
        log.record(
            AuditEntry::new(AuditEventKind::ApprovalRequested, "")
                .for_call(&c)
                .with_risk(RiskLevel::Medium),
        );
        log.record(AuditEntry::new(AuditEventKind::ApprovalGranted, "").for_call(&c));
        log.record(AuditEntry::new(AuditEventKind::ActionExecuted, "failed: x").for_call(&c));
        log.record(AuditEntry::new(AuditEventKind::Error, "x").for_call(&c));
        assert!(verify_audit(&log).is_empty());
    }

    #[test]
    fn test_verify_flags_silent_escalation() {
        let c = call("c2", "send_email");
        let mut log = AuditLog::new();
        log.record(AuditEntry::new(AuditEventKind::DecisionMade, "").with_related_calls(&[c.clone()]));
        log.record(
            AuditEntry::new(AuditEventKind::AutoExecuted, "")
                .for_call(&c)
                .with_risk(RiskLevel::Medium),
        );
        let errors = verify_audit(&log);
        assert!(errors.iter().any(|e| e.contains("auto_executed")));
    }

    #[test]
    fn test_entry_serializes_snake_case_kind() {
        let entry = AuditEntry::new(AuditEventKind::AutoExecuted, "ok");
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["event_kind"], "auto_executed");
        assert!(v.get("call_id").is_none());
    }
}
