//! Swarm event stream (§6 "Swarm event stream (produced)").
//!
//! Every event carries enough context to reconstruct the state change
//! it represents without consulting the emitter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Discriminated swarm-level event, published on the swarm event bus.
///
/// The `type` discriminant matches the dotted event names from §4.12
/// (`swarm.start`, `swarm.wave.start`, ...) verbatim via `event_type()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwarmEvent {
    #[serde(rename = "swarm.start")]
    Start {
        session_id: String,
        goal: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.wave.start")]
    WaveStart {
        session_id: String,
        wave_index: usize,
        subtask_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.wave.complete")]
    WaveComplete {
        session_id: String,
        wave_index: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.task.dispatched")]
    TaskDispatched {
        session_id: String,
        subtask_id: String,
        worker_id: String,
        model_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.task.completed")]
    TaskCompleted {
        session_id: String,
        subtask_id: String,
        worker_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.task.failed")]
    TaskFailed {
        session_id: String,
        subtask_id: String,
        worker_id: String,
        attempt: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.task.skipped")]
    TaskSkipped {
        session_id: String,
        subtask_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.quality.rejected")]
    QualityRejected {
        session_id: String,
        subtask_id: String,
        attempt: u32,
        score: u8,
        feedback: String,
        artifact_auto_fail: bool,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.budget.update")]
    BudgetUpdate {
        session_id: String,
        worker_id: String,
        tokens_used: u64,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.model.failover")]
    ModelFailover {
        session_id: String,
        subtask_id: String,
        from_model: String,
        to_model: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.model.health")]
    ModelHealth {
        session_id: String,
        model_id: String,
        healthy: bool,
        consecutive_failures: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.circuit.open")]
    CircuitOpen {
        session_id: String,
        fingerprint: String,
        pause_ms: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.circuit.closed")]
    CircuitClosed {
        session_id: String,
        fingerprint: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.orchestrator.decision")]
    OrchestratorDecision {
        session_id: String,
        phase: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.complete")]
    Complete {
        session_id: String,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "swarm.error")]
    Error {
        session_id: String,
        reason: String,
        subtask_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl SwarmEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SwarmEvent::Start { .. } => "swarm.start",
            SwarmEvent::WaveStart { .. } => "swarm.wave.start",
            SwarmEvent::WaveComplete { .. } => "swarm.wave.complete",
            SwarmEvent::TaskDispatched { .. } => "swarm.task.dispatched",
            SwarmEvent::TaskCompleted { .. } => "swarm.task.completed",
            SwarmEvent::TaskFailed { .. } => "swarm.task.failed",
            SwarmEvent::TaskSkipped { .. } => "swarm.task.skipped",
            SwarmEvent::QualityRejected { .. } => "swarm.quality.rejected",
            SwarmEvent::BudgetUpdate { .. } => "swarm.budget.update",
            SwarmEvent::ModelFailover { .. } => "swarm.model.failover",
            SwarmEvent::ModelHealth { .. } => "swarm.model.health",
            SwarmEvent::CircuitOpen { .. } => "swarm.circuit.open",
            SwarmEvent::CircuitClosed { .. } => "swarm.circuit.closed",
            SwarmEvent::OrchestratorDecision { .. } => "swarm.orchestrator.decision",
            SwarmEvent::Complete { .. } => "swarm.complete",
            SwarmEvent::Error { .. } => "swarm.error",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            SwarmEvent::Start { session_id, .. }
            | SwarmEvent::WaveStart { session_id, .. }
            | SwarmEvent::WaveComplete { session_id, .. }
            | SwarmEvent::TaskDispatched { session_id, .. }
            | SwarmEvent::TaskCompleted { session_id, .. }
            | SwarmEvent::TaskFailed { session_id, .. }
            | SwarmEvent::TaskSkipped { session_id, .. }
            | SwarmEvent::QualityRejected { session_id, .. }
            | SwarmEvent::BudgetUpdate { session_id, .. }
            | SwarmEvent::ModelFailover { session_id, .. }
            | SwarmEvent::ModelHealth { session_id, .. }
            | SwarmEvent::CircuitOpen { session_id, .. }
            | SwarmEvent::CircuitClosed { session_id, .. }
            | SwarmEvent::OrchestratorDecision { session_id, .. }
            | SwarmEvent::Complete { session_id, .. }
            | SwarmEvent::Error { session_id, .. } => session_id,
        }
    }

    pub fn error(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        SwarmEvent::Error {
            session_id: session_id.into(),
            reason: reason.into(),
            subtask_id: None,
            timestamp: now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_dotted_name() {
        let e = SwarmEvent::error("s1", "cycle detected in dependency graph");
        assert_eq!(e.event_type(), "swarm.error");
        assert_eq!(e.session_id(), "s1");
    }

    #[test]
    fn serde_roundtrip_uses_tagged_type_field() {
        let e = SwarmEvent::CircuitOpen {
            session_id: "s1".into(),
            fingerprint: "read_file:/x.ts".into(),
            pause_ms: 30_000,
            timestamp: now(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "swarm.circuit.open");
        let back: SwarmEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type(), "swarm.circuit.open");
    }
}
