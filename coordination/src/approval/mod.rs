//! Approval Scope (C10, §4.9).
//!
//! Resolves whether a tool call needs human approval, in a fixed
//! priority order: explicit require/auto lists, then scoped path-based
//! approval, then a risk-level default.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DangerLevel {
    Safe,
    Moderate,
    Dangerous,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskThreshold {
    /// `moderate` and above require approval.
    Moderate,
    /// only `dangerous`/`critical` require approval.
    High,
}

#[derive(Debug, Clone, Default)]
pub struct ScopedApproval {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ApprovalConfig {
    pub require_approval: HashSet<String>,
    pub auto_approve: HashSet<String>,
    pub scoped_approve: HashMap<String, ScopedApproval>,
    pub risk_levels: HashMap<String, DangerLevel>,
    pub risk_threshold: RiskThreshold,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            require_approval: HashSet::new(),
            auto_approve: HashSet::new(),
            scoped_approve: HashMap::new(),
            risk_levels: HashMap::new(),
            risk_threshold: if std::env::var("SWARM_APPROVAL_RISK_THRESHOLD").as_deref() == Ok("high") {
                RiskThreshold::High
            } else {
                RiskThreshold::Moderate
            },
        }
    }
}

fn lower(s: &str) -> String {
    s.to_lowercase()
}

/// `true` iff `path` is inside `prefix`, using path-boundary semantics:
/// `src` matches `src` and `src/...` but not `src-backup`. A prefix
/// ending in `/**` is treated as explicitly recursive (equivalent to the
/// prefix without the suffix).
fn path_in_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.strip_suffix("/**").unwrap_or(prefix);
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix || path.starts_with(&format!("{prefix}/"))
}

pub struct ApprovalScope {
    config: ApprovalConfig,
}

impl ApprovalScope {
    pub fn new(config: ApprovalConfig) -> Self {
        Self { config }
    }

    fn path_arg<'a>(&self, args: &'a serde_json::Value) -> Option<&'a str> {
        args.get("path").or_else(|| args.get("file_path")).and_then(|v| v.as_str())
    }

    /// `true` iff the call requires human approval.
    pub fn requires_approval(&self, tool: &str, args: &serde_json::Value) -> bool {
        let tool_key = lower(tool);

        if self.config.require_approval.contains(&tool_key) {
            return true;
        }
        if self.config.auto_approve.contains(&tool_key) {
            return false;
        }
        if let Some(scope) = self.config.scoped_approve.get(&tool_key) {
            return match self.path_arg(args) {
                Some(path) => !scope.paths.iter().any(|prefix| path_in_prefix(path, prefix)),
                None => true,
            };
        }

        let level = self.config.risk_levels.get(&tool_key).copied().unwrap_or(DangerLevel::Moderate);
        match self.config.risk_threshold {
            RiskThreshold::Moderate => level >= DangerLevel::Moderate,
            RiskThreshold::High => level >= DangerLevel::Dangerous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_approval_wins_over_auto_approve() {
        let mut config = ApprovalConfig::default();
        config.require_approval.insert("bash".to_string());
        config.auto_approve.insert("bash".to_string());
        let scope = ApprovalScope::new(config);
        assert!(scope.requires_approval("bash", &json!({})));
    }

    #[test]
    fn auto_approve_skips_prompting() {
        let mut config = ApprovalConfig::default();
        config.auto_approve.insert("read_file".to_string());
        let scope = ApprovalScope::new(config);
        assert!(!scope.requires_approval("read_file", &json!({"path": "/etc/passwd"})));
    }

    #[test]
    fn scoped_approve_allows_paths_under_prefix() {
        let mut config = ApprovalConfig::default();
        config.scoped_approve.insert(
            "write_file".to_string(),
            ScopedApproval { paths: vec!["src/**".to_string()] },
        );
        let scope = ApprovalScope::new(config);
        assert!(!scope.requires_approval("write_file", &json!({"path": "src/main.rs"})));
        assert!(scope.requires_approval("write_file", &json!({"path": "src-backup/main.rs"})));
    }

    #[test]
    fn scoped_approve_requires_approval_when_no_path_arg() {
        let mut config = ApprovalConfig::default();
        config.scoped_approve.insert(
            "write_file".to_string(),
            ScopedApproval { paths: vec!["src/**".to_string()] },
        );
        let scope = ApprovalScope::new(config);
        assert!(scope.requires_approval("write_file", &json!({})));
    }

    #[test]
    fn risk_default_at_moderate_threshold_requires_approval_for_moderate_and_above() {
        let mut config = ApprovalConfig::default();
        config.risk_levels.insert("bash".to_string(), DangerLevel::Moderate);
        config.risk_threshold = RiskThreshold::Moderate;
        let scope = ApprovalScope::new(config);
        assert!(scope.requires_approval("bash", &json!({})));
    }

    #[test]
    fn risk_default_at_high_threshold_allows_moderate() {
        let mut config = ApprovalConfig::default();
        config.risk_levels.insert("bash".to_string(), DangerLevel::Moderate);
        config.risk_threshold = RiskThreshold::High;
        let scope = ApprovalScope::new(config);
        assert!(!scope.requires_approval("bash", &json!({})));
    }

    #[test]
    fn risk_default_at_high_threshold_still_requires_dangerous() {
        let mut config = ApprovalConfig::default();
        config.risk_levels.insert("rm".to_string(), DangerLevel::Dangerous);
        config.risk_threshold = RiskThreshold::High;
        let scope = ApprovalScope::new(config);
        assert!(scope.requires_approval("rm", &json!({})));
    }
}
