//! Swarm Orchestrator (C13, §4.12).
//!
//! Turns a goal into a dependency-ordered set of waves, dispatches each
//! wave through the [`crate::pool::WorkerPool`], and watches the shared
//! economics map for a cross-worker doom loop between waves. Emits every
//! `swarm.*` event named in §6 so a caller can render progress without
//! polling.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use coordination::budget::{BudgetConfig, SharedEconomics, SharedEconomicsConfig};
use coordination::cancellation::CancellationToken;
use coordination::events::{SwarmEvent, SwarmEventBus};
use coordination::ledger::{Action, Actor, ActorType, Ledger};
use coordination::model::{plan_waves, AttemptOutcome, DecompositionError, Subtask};
use coordination::quality_gate::{QualityGate, QualityGateConfig};
use thiserror::Error;
use tracing::{info, warn};

use crate::pool::{Assignment, SubtaskOutcome, WorkerExecutor, WorkerPool, WorkerPoolConfig};

/// Turns a goal into a candidate subtask graph. Decomposition is itself
/// an LM call in a real deployment; the orchestrator only needs its
/// result.
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, goal: &str) -> Result<Vec<Subtask>, DecomposeError>;
}

#[derive(Debug, Error)]
pub enum DecomposeError {
    #[error("decomposition failed: {0}")]
    Failed(String),
}

/// Picks a worker and model for each subtask in a wave.
pub trait WorkerAssigner: Send + Sync {
    fn assign(&self, subtask: &Subtask) -> Option<Assignment>;
}

#[derive(Clone)]
pub struct OrchestratorRunConfig {
    pub max_decomposition_retries: u32,
    pub global_loop_pause_ms: u64,
}

pub struct SwarmResult {
    pub session_id: String,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<SubtaskOutcome>,
}

pub struct SwarmOrchestrator {
    run_config: OrchestratorRunConfig,
    pool: WorkerPool,
    decomposer: Arc<dyn Decomposer>,
    assigner: Arc<dyn WorkerAssigner>,
    executor: Arc<dyn WorkerExecutor>,
    events: Arc<SwarmEventBus>,
    ledger: Arc<Ledger>,
    shared_economics: Arc<SharedEconomics>,
}

impl SwarmOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_config: OrchestratorRunConfig,
        pool_config: WorkerPoolConfig,
        budget_config: BudgetConfig,
        shared_economics_config: SharedEconomicsConfig,
        decomposer: Arc<dyn Decomposer>,
        assigner: Arc<dyn WorkerAssigner>,
        executor: Arc<dyn WorkerExecutor>,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            run_config,
            pool: WorkerPool::new(pool_config, budget_config),
            decomposer,
            assigner,
            executor,
            events: Arc::new(SwarmEventBus::new()),
            ledger,
            shared_economics: Arc::new(SharedEconomics::new(shared_economics_config)),
        }
    }

    pub fn events(&self) -> Arc<SwarmEventBus> {
        self.events.clone()
    }

    pub async fn run(
        &self,
        session_id: &str,
        goal: &str,
        quality_gate_config: QualityGateConfig,
    ) -> SwarmResult {
        self.events.publish(SwarmEvent::Start {
            session_id: session_id.to_string(),
            goal: goal.to_string(),
            timestamp: chrono::Utc::now(),
        });
        self.ledger.log_session_start(
            Actor { actor_type: ActorType::System, id: "orchestrator".to_string(), name: None },
            session_id.to_string(),
        );

        let subtasks = match self.decompose_with_retries(goal).await {
            Ok(s) => s,
            Err(reason) => {
                self.events.publish(SwarmEvent::error(session_id, reason));
                return self.finish(session_id, Vec::new()).await;
            }
        };

        let waves = match plan_waves(&subtasks) {
            Ok(w) => w,
            Err(DecompositionError::Cycle(stuck)) => {
                let reason = format!("dependency cycle detected among subtasks: {stuck:?}");
                self.events.publish(SwarmEvent::error(session_id, reason));
                return self.finish(session_id, Vec::new()).await;
            }
            Err(other) => {
                self.events.publish(SwarmEvent::error(session_id, other.to_string()));
                return self.finish(session_id, Vec::new()).await;
            }
        };

        let by_id: HashMap<String, Subtask> = subtasks.into_iter().map(|s| (s.id.clone(), s)).collect();
        let quality_gate = Arc::new(tokio::sync::Mutex::new(QualityGate::new(quality_gate_config)));
        let parent_token = CancellationToken::new();
        let mut failed_ids: HashSet<String> = HashSet::new();
        let mut all_outcomes = Vec::new();

        for wave in &waves {
            {
                let mut gate = quality_gate.lock().await;
                gate.begin_wave();
            }

            let wave_subtasks: Vec<Subtask> = wave
                .subtask_ids
                .iter()
                .filter_map(|id| by_id.get(id).cloned())
                .collect();

            self.events.publish(SwarmEvent::WaveStart {
                session_id: session_id.to_string(),
                wave_index: wave.index,
                subtask_ids: wave.subtask_ids.clone(),
                timestamp: chrono::Utc::now(),
            });

            let assignments: HashMap<String, Assignment> = wave_subtasks
                .iter()
                .filter_map(|s| self.assigner.assign(s).map(|a| (s.id.clone(), a)))
                .collect();

            let outcomes = self
                .pool
                .dispatch_wave(
                    session_id,
                    wave.index,
                    &wave_subtasks,
                    &assignments,
                    &failed_ids,
                    self.executor.clone(),
                    self.shared_economics.clone(),
                    quality_gate.clone(),
                    &parent_token,
                    &self.events,
                    &self.ledger,
                )
                .await;

            let (mut succeeded, mut failed, mut skipped) = (0usize, 0usize, 0usize);
            for outcome in &outcomes {
                match &outcome.outcome {
                    AttemptOutcome::Success => succeeded += 1,
                    AttemptOutcome::Failure { .. } => {
                        failed += 1;
                        failed_ids.insert(outcome.subtask_id.clone());
                    }
                    AttemptOutcome::Skipped { .. } => skipped += 1,
                }
            }

            self.events.publish(SwarmEvent::WaveComplete {
                session_id: session_id.to_string(),
                wave_index: wave.index,
                succeeded,
                failed,
                skipped,
                timestamp: chrono::Utc::now(),
            });

            all_outcomes.extend(outcomes);

            if self.wave_triggered_global_doom_loop(&all_outcomes) {
                self.events.publish(SwarmEvent::CircuitOpen {
                    session_id: session_id.to_string(),
                    fingerprint: "global".to_string(),
                    pause_ms: self.run_config.global_loop_pause_ms,
                    timestamp: chrono::Utc::now(),
                });
                tokio::time::sleep(std::time::Duration::from_millis(self.run_config.global_loop_pause_ms)).await;
                self.events.publish(SwarmEvent::CircuitClosed {
                    session_id: session_id.to_string(),
                    fingerprint: "global".to_string(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        self.finish(session_id, all_outcomes).await
    }

    fn wave_triggered_global_doom_loop(&self, _outcomes: &[SubtaskOutcome]) -> bool {
        // The pool's per-attempt budget checks already consult
        // `shared_economics`; a wave-level pause additionally fires when
        // a subtask failed specifically because of a global doom loop,
        // which the pool reports as a `Failure` whose reason mentions it.
        _outcomes.iter().any(|o| matches!(&o.outcome, AttemptOutcome::Failure { reason } if reason.contains("global doom loop")))
    }

    async fn decompose_with_retries(&self, goal: &str) -> Result<Vec<Subtask>, String> {
        let mut last_error = String::new();
        for _ in 0..=self.run_config.max_decomposition_retries {
            match self.decomposer.decompose(goal).await {
                Ok(subtasks) => return Ok(subtasks),
                Err(e) => {
                    warn!(error = %e, "decomposition attempt failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(last_error)
    }

    async fn finish(&self, session_id: &str, outcomes: Vec<SubtaskOutcome>) -> SwarmResult {
        let succeeded = outcomes.iter().filter(|o| matches!(o.outcome, AttemptOutcome::Success)).count();
        let failed = outcomes.iter().filter(|o| matches!(o.outcome, AttemptOutcome::Failure { .. })).count();
        let skipped = outcomes.iter().filter(|o| matches!(o.outcome, AttemptOutcome::Skipped { .. })).count();

        self.events.publish(SwarmEvent::Complete {
            session_id: session_id.to_string(),
            succeeded,
            failed,
            skipped,
            timestamp: chrono::Utc::now(),
        });
        self.ledger.log_session_end(
            Actor { actor_type: ActorType::System, id: "orchestrator".to_string(), name: None },
            session_id.to_string(),
        );
        self.ledger.log_policy_applied(
            Actor { actor_type: ActorType::System, id: "orchestrator".to_string(), name: None },
            Action {
                action_type: "swarm_summary".to_string(),
                description: format!("{succeeded} succeeded, {failed} failed, {skipped} skipped"),
                data: serde_json::json!({"succeeded": succeeded, "failed": failed, "skipped": skipped}),
            },
            Some(session_id.to_string()),
        );

        info!(session_id, succeeded, failed, skipped, "swarm run complete");
        SwarmResult { session_id: session_id.to_string(), succeeded, failed, skipped, outcomes }
    }
}
