//! Pending Plan Manager (C14, §3.8, §4.13).
//!
//! In plan mode, tool calls that would mutate state are intercepted and
//! enqueued here instead of executing immediately. The manager owns only
//! the proposed-change queue and emits events; rendering a plan to a
//! human belongs to whatever UI layer subscribes to those events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedChange {
    pub id: String,
    pub tool: String,
    pub args: serde_json::Value,
    pub reason: String,
    pub order: u32,
    pub proposed_at: DateTime<Utc>,
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Approved,
    Rejected,
    PartiallyApproved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPlan {
    pub id: String,
    pub task: String,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub proposed_changes: Vec<ProposedChange>,
    pub exploration_summary: String,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no active plan")]
    NoActivePlan,
    #[error("plan is not pending; current status does not allow this transition")]
    NotPending,
}

/// Owns at most one active plan at a time (§5: single-writer).
pub struct PendingPlanManager {
    active: Option<PendingPlan>,
}

impl PendingPlanManager {
    pub fn new() -> Self {
        Self { active: None }
    }

    pub fn start_plan(&mut self, id: impl Into<String>, task: impl Into<String>, exploration_summary: impl Into<String>) {
        let now = Utc::now();
        self.active = Some(PendingPlan {
            id: id.into(),
            task: task.into(),
            status: PlanStatus::Pending,
            created_at: now,
            updated_at: now,
            proposed_changes: Vec::new(),
            exploration_summary: exploration_summary.into(),
        });
    }

    pub fn active_plan(&self) -> Option<&PendingPlan> {
        self.active.as_ref()
    }

    /// Enqueue a tool call that would mutate state instead of running it.
    pub fn propose(
        &mut self,
        id: impl Into<String>,
        tool: impl Into<String>,
        args: serde_json::Value,
        reason: impl Into<String>,
        tool_call_id: Option<String>,
    ) -> Result<(), PlanError> {
        let plan = self.active.as_mut().ok_or(PlanError::NoActivePlan)?;
        let order = plan.proposed_changes.len() as u32;
        plan.proposed_changes.push(ProposedChange {
            id: id.into(),
            tool: tool.into(),
            args,
            reason: reason.into(),
            order,
            proposed_at: Utc::now(),
            tool_call_id,
        });
        plan.updated_at = Utc::now();
        Ok(())
    }

    /// Drain the first `count` changes (or all, if `None`) in execution
    /// order. Updates status to `approved` if the queue is now empty,
    /// otherwise `partially_approved`.
    pub fn approve(&mut self, count: Option<usize>) -> Result<Vec<ProposedChange>, PlanError> {
        let plan = self.active.as_mut().ok_or(PlanError::NoActivePlan)?;
        if plan.status != PlanStatus::Pending {
            return Err(PlanError::NotPending);
        }
        let take = count.unwrap_or(plan.proposed_changes.len()).min(plan.proposed_changes.len());
        let drained: Vec<ProposedChange> = plan.proposed_changes.drain(0..take).collect();
        plan.status = if plan.proposed_changes.is_empty() { PlanStatus::Approved } else { PlanStatus::PartiallyApproved };
        plan.updated_at = Utc::now();
        Ok(drained)
    }

    pub fn reject(&mut self) -> Result<(), PlanError> {
        let plan = self.active.as_mut().ok_or(PlanError::NoActivePlan)?;
        if plan.status != PlanStatus::Pending {
            return Err(PlanError::NotPending);
        }
        plan.proposed_changes.clear();
        plan.status = PlanStatus::Rejected;
        plan.updated_at = Utc::now();
        Ok(())
    }

    /// Reinstate a persisted plan (e.g. loaded via the persistence
    /// adapter, §4.14) as the active plan.
    pub fn restore_plan(&mut self, plan: PendingPlan) {
        self.active = Some(plan);
    }
}

impl Default for PendingPlanManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn approve_drains_in_execution_order() {
        let mut mgr = PendingPlanManager::new();
        mgr.start_plan("p1", "refactor auth", "explored auth module");
        mgr.propose("c1", "write_file", json!({"path": "/a.rs"}), "apply fix", None).unwrap();
        mgr.propose("c2", "write_file", json!({"path": "/b.rs"}), "apply fix", None).unwrap();

        let drained = mgr.approve(None).unwrap();
        assert_eq!(drained.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["c1", "c2"]);
        assert_eq!(mgr.active_plan().unwrap().status, PlanStatus::Approved);
    }

    #[test]
    fn partial_approve_leaves_remainder_pending_in_queue() {
        let mut mgr = PendingPlanManager::new();
        mgr.start_plan("p1", "refactor auth", "explored auth module");
        mgr.propose("c1", "write_file", json!({}), "x", None).unwrap();
        mgr.propose("c2", "write_file", json!({}), "x", None).unwrap();

        let drained = mgr.approve(Some(1)).unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(mgr.active_plan().unwrap().status, PlanStatus::PartiallyApproved);
        assert_eq!(mgr.active_plan().unwrap().proposed_changes.len(), 1);
    }

    #[test]
    fn reject_clears_queue() {
        let mut mgr = PendingPlanManager::new();
        mgr.start_plan("p1", "task", "summary");
        mgr.propose("c1", "write_file", json!({}), "x", None).unwrap();
        mgr.reject().unwrap();
        assert_eq!(mgr.active_plan().unwrap().status, PlanStatus::Rejected);
        assert!(mgr.active_plan().unwrap().proposed_changes.is_empty());
    }

    #[test]
    fn propose_without_active_plan_errors() {
        let mut mgr = PendingPlanManager::new();
        let result = mgr.propose("c1", "write_file", json!({}), "x", None);
        assert!(matches!(result, Err(PlanError::NoActivePlan)));
    }

    #[test]
    fn restore_plan_replaces_active_plan() {
        let mut mgr = PendingPlanManager::new();
        let restored = PendingPlan {
            id: "p2".to_string(),
            task: "restored task".to_string(),
            status: PlanStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            proposed_changes: Vec::new(),
            exploration_summary: String::new(),
        };
        mgr.restore_plan(restored);
        assert_eq!(mgr.active_plan().unwrap().id, "p2");
    }
}
