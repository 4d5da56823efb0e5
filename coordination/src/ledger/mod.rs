//! Audit & Rollback Ledger (C11, §3.7, §4.10).
//!
//! The ledger is an append-only store with a single-writer discipline
//! (§5): all mutation goes through `&self` methods backed by a mutex,
//! readers query a point-in-time snapshot. Every append is also
//! published on [`AuditEventBus`] so subscribers observe the stream
//! without re-querying storage.

pub mod handlers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::events::{EventBus, SharedEventBus};

pub use handlers::{FileRestoreHandler, RollbackHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ActionRequested,
    ActionApproved,
    ActionRejected,
    ActionExecuted,
    ActionFailed,
    ActionRolledBack,
    EscalationTriggered,
    PolicyApplied,
    SessionStarted,
    SessionEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Human,
    Agent,
    System,
    Policy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub actor_type: ActorType,
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_type: String,
    pub description: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub message: Option<String>,
}

/// Typed rollback payloads (§4.10 table). The `type` discriminant is
/// also the key the ledger uses to look up a registered
/// [`RollbackHandler`], except `custom`, which is keyed by `handler`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollbackData {
    FileRestore { path: String, original_content: Option<String> },
    CommandUndo { undo_command: String },
    DatabaseRestore { query: String, params: serde_json::Value },
    ConfigRestore { key: String, previous_value: serde_json::Value },
    Custom { handler: String, description: String },
}

impl RollbackData {
    fn handler_key(&self) -> &str {
        match self {
            RollbackData::FileRestore { .. } => "file_restore",
            RollbackData::CommandUndo { .. } => "command_undo",
            RollbackData::DatabaseRestore { .. } => "database_restore",
            RollbackData::ConfigRestore { .. } => "config_restore",
            RollbackData::Custom { handler, .. } => handler.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub actor: Actor,
    pub action: Action,
    pub outcome: Outcome,
    pub reversible: bool,
    pub rollback_data: Option<RollbackData>,
    pub related_entries: Vec<String>,
    pub session_id: Option<String>,
}

pub type AuditEventBus = EventBus<AuditEntry>;
pub type SharedAuditEventBus = SharedEventBus<AuditEntry>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("audit entry not found: {0}")]
    NotFound(String),
    #[error("audit entry {0} is not marked reversible")]
    NotReversible(String),
    #[error("audit entry {0} has no rollback data")]
    NoRollbackData(String),
    #[error("no rollback handler registered for {0}")]
    NoHandler(String),
    #[error("rollback handler failed: {0}")]
    HandlerFailed(String),
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub event_types: Option<Vec<AuditEventType>>,
    pub actor_id: Option<String>,
    pub action_type: Option<String>,
    pub session_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub reversible: Option<bool>,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub entries: Vec<AuditEntry>,
    pub total: usize,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub struct Ledger {
    entries: Mutex<Vec<AuditEntry>>,
    bus: SharedAuditEventBus,
    handlers: Mutex<HashMap<String, Arc<dyn RollbackHandler>>>,
}

impl Ledger {
    pub fn new() -> Self {
        let mut handlers: HashMap<String, Arc<dyn RollbackHandler>> = HashMap::new();
        handlers.insert("file_restore".to_string(), Arc::new(FileRestoreHandler));
        Self {
            entries: Mutex::new(Vec::new()),
            bus: EventBus::new().shared(),
            handlers: Mutex::new(handlers),
        }
    }

    pub fn event_bus(&self) -> SharedAuditEventBus {
        self.bus.clone()
    }

    pub fn register_handler(&self, key: impl Into<String>, handler: Arc<dyn RollbackHandler>) {
        self.handlers.lock().unwrap().insert(key.into(), handler);
    }

    fn append(&self, entry: AuditEntry) -> AuditEntry {
        self.entries.lock().unwrap().push(entry.clone());
        self.bus.publish(entry.clone());
        entry
    }

    fn record(
        &self,
        event_type: AuditEventType,
        actor: Actor,
        action: Action,
        outcome: Outcome,
        reversible: bool,
        rollback_data: Option<RollbackData>,
        related_entries: Vec<String>,
        session_id: Option<String>,
    ) -> AuditEntry {
        self.append(AuditEntry {
            id: new_id(),
            timestamp: Utc::now(),
            event_type,
            actor,
            action,
            outcome,
            reversible,
            rollback_data,
            related_entries,
            session_id,
        })
    }

    pub fn log_action_requested(&self, actor: Actor, action: Action, session_id: Option<String>) -> AuditEntry {
        self.record(
            AuditEventType::ActionRequested,
            actor,
            action,
            Outcome { success: true, message: None },
            false,
            None,
            Vec::new(),
            session_id,
        )
    }

    pub fn log_approval_decision(
        &self,
        actor: Actor,
        action: Action,
        approved: bool,
        related_entry: Option<String>,
        session_id: Option<String>,
    ) -> AuditEntry {
        let event_type = if approved { AuditEventType::ActionApproved } else { AuditEventType::ActionRejected };
        self.record(
            event_type,
            actor,
            action,
            Outcome { success: approved, message: None },
            false,
            None,
            related_entry.into_iter().collect(),
            session_id,
        )
    }

    pub fn log_action_executed(
        &self,
        actor: Actor,
        action: Action,
        outcome: Outcome,
        reversible: bool,
        rollback_data: Option<RollbackData>,
        session_id: Option<String>,
    ) -> AuditEntry {
        let event_type = if outcome.success { AuditEventType::ActionExecuted } else { AuditEventType::ActionFailed };
        self.record(event_type, actor, action, outcome, reversible, rollback_data, Vec::new(), session_id)
    }

    pub fn log_escalation(&self, actor: Actor, action: Action, message: String, session_id: Option<String>) -> AuditEntry {
        self.record(
            AuditEventType::EscalationTriggered,
            actor,
            action,
            Outcome { success: true, message: Some(message) },
            false,
            None,
            Vec::new(),
            session_id,
        )
    }

    pub fn log_policy_applied(&self, actor: Actor, action: Action, session_id: Option<String>) -> AuditEntry {
        self.record(
            AuditEventType::PolicyApplied,
            actor,
            action,
            Outcome { success: true, message: None },
            false,
            None,
            Vec::new(),
            session_id,
        )
    }

    pub fn log_session_start(&self, actor: Actor, session_id: String) -> AuditEntry {
        self.record(
            AuditEventType::SessionStarted,
            actor,
            Action { action_type: "session_start".to_string(), description: "session started".to_string(), data: serde_json::Value::Null },
            Outcome { success: true, message: None },
            false,
            None,
            Vec::new(),
            Some(session_id),
        )
    }

    pub fn log_session_end(&self, actor: Actor, session_id: String) -> AuditEntry {
        self.record(
            AuditEventType::SessionEnded,
            actor,
            Action { action_type: "session_end".to_string(), description: "session ended".to_string(), data: serde_json::Value::Null },
            Outcome { success: true, message: None },
            false,
            None,
            Vec::new(),
            Some(session_id),
        )
    }

    pub fn query(&self, filter: &AuditQuery) -> Page {
        let entries = self.entries.lock().unwrap();
        let matched: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| filter.event_types.as_ref().map_or(true, |types| types.contains(&e.event_type)))
            .filter(|e| filter.actor_id.as_ref().map_or(true, |id| &e.actor.id == id))
            .filter(|e| filter.action_type.as_ref().map_or(true, |t| &e.action.action_type == t))
            .filter(|e| filter.session_id.as_ref().map_or(true, |s| e.session_id.as_ref() == Some(s)))
            .filter(|e| filter.since.map_or(true, |since| e.timestamp >= since))
            .filter(|e| filter.until.map_or(true, |until| e.timestamp <= until))
            .filter(|e| filter.reversible.map_or(true, |r| e.reversible == r))
            .cloned()
            .collect();
        let total = matched.len();
        let limit = if filter.limit == 0 { total } else { filter.limit };
        let entries = matched.into_iter().skip(filter.offset).take(limit).collect();
        Page { entries, total }
    }

    fn find(&self, entry_id: &str) -> Option<AuditEntry> {
        self.entries.lock().unwrap().iter().find(|e| e.id == entry_id).cloned()
    }

    /// Roll back a single entry: verifies reversibility, dispatches to
    /// the registered handler for its rollback type, and logs a new
    /// `action_rolled_back` entry linked to the original.
    pub async fn rollback(&self, entry_id: &str, actor: Actor) -> Result<AuditEntry, LedgerError> {
        let entry = self.find(entry_id).ok_or_else(|| LedgerError::NotFound(entry_id.to_string()))?;
        if !entry.reversible {
            return Err(LedgerError::NotReversible(entry_id.to_string()));
        }
        let rollback_data = entry.rollback_data.clone().ok_or_else(|| LedgerError::NoRollbackData(entry_id.to_string()))?;

        let handler = {
            let handlers = self.handlers.lock().unwrap();
            handlers.get(rollback_data.handler_key()).cloned()
        }
        .ok_or_else(|| LedgerError::NoHandler(rollback_data.handler_key().to_string()))?;

        handler.rollback(&rollback_data).await.map_err(LedgerError::HandlerFailed)?;
        let verified = handler.verify(&rollback_data).await;

        Ok(self.record(
            AuditEventType::ActionRolledBack,
            actor,
            Action {
                action_type: "rollback".to_string(),
                description: format!("rolled back entry {entry_id}"),
                data: serde_json::json!({ "verified": verified }),
            },
            Outcome { success: true, message: None },
            false,
            None,
            vec![entry_id.to_string()],
            entry.session_id,
        ))
    }

    /// Roll back `ids` in reverse chronological order, stopping at the
    /// first failure. Returns one result per attempted entry (entries
    /// after the first failure are not attempted).
    pub async fn rollback_chain(&self, ids: &[String], actor: Actor, _reason: &str) -> Vec<Result<AuditEntry, LedgerError>> {
        let mut ordered: Vec<&String> = ids.iter().collect();
        let timestamps: HashMap<&String, DateTime<Utc>> = ordered
            .iter()
            .filter_map(|id| self.find(id).map(|e| (*id, e.timestamp)))
            .collect();
        ordered.sort_by(|a, b| timestamps.get(*b).cmp(&timestamps.get(*a)));

        let mut results = Vec::new();
        for id in ordered {
            let result = self.rollback(id, Actor { actor_type: actor.actor_type, id: actor.id.clone(), name: actor.name.clone() }).await;
            let failed = result.is_err();
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
