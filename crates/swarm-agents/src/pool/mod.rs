//! Worker Pool (C12, §4.11).
//!
//! Dispatches one wave's subtasks at a time. Concurrency is capped by a
//! semaphore; dispatch is staggered so a burst of workers does not hit
//! every provider's rate limiter in the same instant. Each subtask's
//! attempt loop composes the budget tracker, quality gate, and
//! cancellation/timeout machinery from `coordination`; the actual tool
//! loop is delegated to a [`WorkerExecutor`] supplied by the caller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordination::budget::{BudgetConfig, BudgetTracker, SharedEconomics};
use coordination::cancellation::{self, CancellationToken};
use coordination::events::{SharedEventBus, SwarmEvent, SwarmEventBus};
use coordination::ledger::{Action, Actor, ActorType, Ledger, Outcome};
use coordination::model::{Attempt, AttemptOutcome, Subtask, Worker};
use coordination::quality_gate::{GateOutcome, JudgeScore, QualityGate};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Everything a [`WorkerExecutor`] needs to run one attempt.
pub struct WorkerContext {
    pub subtask: Subtask,
    pub worker: Worker,
    pub model_id: String,
    pub attempt: u32,
    pub cancellation: CancellationToken,
}

/// What a single attempt produced, ready for the quality gate.
pub struct WorkerRunResult {
    pub output: String,
    pub files_touched: HashSet<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub judge_score: JudgeScore,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerRunError {
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("executor error: {0}")]
    Executor(String),
}

/// The pluggable tool-calling loop. The pool never inspects what happens
/// inside `run`; it only observes the declared result.
#[async_trait]
pub trait WorkerExecutor: Send + Sync {
    async fn run(&self, ctx: WorkerContext) -> Result<WorkerRunResult, WorkerRunError>;
}

#[derive(Clone)]
pub struct WorkerPoolConfig {
    pub max_concurrency: usize,
    pub dispatch_stagger_ms: u64,
    pub hard_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub timeout_tick_ms: u64,
}

/// A dispatch assignment: which worker and which model runs a subtask.
#[derive(Clone)]
pub struct Assignment {
    pub worker: Worker,
    pub model_id: String,
    pub fallback_models: Vec<String>,
}

pub struct SubtaskOutcome {
    pub subtask_id: String,
    pub attempts: Vec<Attempt>,
    pub outcome: AttemptOutcome,
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    budget_config: BudgetConfig,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, budget_config: BudgetConfig) -> Self {
        Self { config, budget_config }
    }

    /// Run every subtask in a wave to completion, honouring the shared
    /// quality gate's rejection circuit breaker across the whole wave
    /// (§4.8) and skipping subtasks whose dependencies failed earlier in
    /// the wave plan (§4.11 step 5).
    #[allow(clippy::too_many_arguments)]
    pub async fn dispatch_wave(
        &self,
        session_id: &str,
        wave_index: usize,
        subtasks: &[Subtask],
        assignments: &HashMap<String, Assignment>,
        failed_dependencies: &HashSet<String>,
        executor: Arc<dyn WorkerExecutor>,
        shared_economics: Arc<SharedEconomics>,
        quality_gate: Arc<tokio::sync::Mutex<QualityGate>>,
        parent_token: &CancellationToken,
        events: &Arc<SwarmEventBus>,
        ledger: &Arc<Ledger>,
    ) -> Vec<SubtaskOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut joins = JoinSet::new();

        for (position, subtask) in subtasks.iter().enumerate() {
            let skip_reason = subtask
                .dependencies
                .iter()
                .find(|dep| failed_dependencies.contains(*dep))
                .map(|dep| format!("dependency {dep} did not complete successfully"));

            if let Some(reason) = skip_reason {
                events.publish(SwarmEvent::TaskSkipped {
                    session_id: session_id.to_string(),
                    subtask_id: subtask.id.clone(),
                    reason: reason.clone(),
                    timestamp: chrono::Utc::now(),
                });
                let subtask_id = subtask.id.clone();
                joins.spawn(async move {
                    SubtaskOutcome {
                        subtask_id,
                        attempts: vec![],
                        outcome: AttemptOutcome::Skipped { reason },
                    }
                });
                continue;
            }

            let Some(assignment) = assignments.get(&subtask.id).cloned() else {
                let subtask_id = subtask.id.clone();
                joins.spawn(async move {
                    SubtaskOutcome {
                        subtask_id,
                        attempts: vec![],
                        outcome: AttemptOutcome::Failure { reason: "no worker assignment".to_string() },
                    }
                });
                continue;
            };

            if position > 0 && self.config.dispatch_stagger_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.dispatch_stagger_ms)).await;
            }

            let permit = semaphore.clone();
            let subtask = subtask.clone();
            let executor = executor.clone();
            let shared_economics = shared_economics.clone();
            let quality_gate = quality_gate.clone();
            let parent_token = parent_token.clone();
            let events = events.clone();
            let session_id = session_id.to_string();
            let budget_config = self.budget_config.clone();
            let pool_config = self.config.clone();
            let ledger = ledger.clone();

            joins.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                run_subtask(
                    &session_id,
                    wave_index,
                    subtask,
                    assignment,
                    executor,
                    &shared_economics,
                    &quality_gate,
                    &parent_token,
                    &events,
                    &ledger,
                    &budget_config,
                    &pool_config,
                )
                .await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(result) = joins.join_next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "subtask task panicked"),
            }
        }
        outcomes
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_subtask(
    session_id: &str,
    wave_index: usize,
    subtask: Subtask,
    mut assignment: Assignment,
    executor: Arc<dyn WorkerExecutor>,
    shared_economics: &SharedEconomics,
    quality_gate: &tokio::sync::Mutex<QualityGate>,
    parent_token: &CancellationToken,
    events: &SharedEventBus<SwarmEvent>,
    ledger: &Ledger,
    budget_config: &BudgetConfig,
    pool_config: &WorkerPoolConfig,
) -> SubtaskOutcome {
    let mut budget = BudgetTracker::new(budget_config.clone());
    let mut attempts = Vec::new();
    let mut attempt_number: u32 = 1;

    let worker_id = assignment.worker.name.clone();

    loop {
        let timeout = cancellation::create_timeout(
            pool_config.hard_timeout_ms,
            pool_config.idle_timeout_ms,
            pool_config.timeout_tick_ms,
        );
        let token = cancellation::create_linked_token(parent_token, &timeout.token);

        events.publish(SwarmEvent::TaskDispatched {
            session_id: session_id.to_string(),
            subtask_id: subtask.id.clone(),
            worker_id: worker_id.clone(),
            model_id: assignment.model_id.clone(),
            attempt: attempt_number,
            timestamp: chrono::Utc::now(),
        });

        let mut attempt = Attempt::start(subtask.id.clone(), worker_id.clone(), assignment.model_id.clone());

        let budget_decision = budget.check_budget(shared_economics);
        if !budget_decision.can_continue {
            let reason = budget_decision.reason.unwrap_or_else(|| "budget exceeded".to_string());
            attempt.finish(AttemptOutcome::Failure { reason: reason.clone() });
            attempts.push(attempt);
            timeout.dispose();
            events.publish(SwarmEvent::TaskFailed {
                session_id: session_id.to_string(),
                subtask_id: subtask.id.clone(),
                worker_id: worker_id.clone(),
                attempt: attempt_number,
                reason: reason.clone(),
                timestamp: chrono::Utc::now(),
            });
            return SubtaskOutcome { subtask_id: subtask.id, attempts, outcome: AttemptOutcome::Failure { reason } };
        }

        let run_result = cancellation::race(
            executor.run(WorkerContext {
                subtask: subtask.clone(),
                worker: assignment.worker.clone(),
                model_id: assignment.model_id.clone(),
                attempt: attempt_number,
                cancellation: token.clone(),
            }),
            &token,
        )
        .await;
        timeout.dispose();

        budget.record_iteration();

        let run_result = match run_result {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                let reason = e.to_string();
                attempt.finish(AttemptOutcome::Failure { reason: reason.clone() });
                attempts.push(attempt);
                events.publish(SwarmEvent::TaskFailed {
                    session_id: session_id.to_string(),
                    subtask_id: subtask.id.clone(),
                    worker_id: worker_id.clone(),
                    attempt: attempt_number,
                    reason: reason.clone(),
                    timestamp: chrono::Utc::now(),
                });
                if let Some((next_model, rest)) = assignment.fallback_models.split_first() {
                    events.publish(SwarmEvent::ModelFailover {
                        session_id: session_id.to_string(),
                        subtask_id: subtask.id.clone(),
                        from_model: assignment.model_id.clone(),
                        to_model: next_model.clone(),
                        reason: reason.clone(),
                        timestamp: chrono::Utc::now(),
                    });
                    assignment.model_id = next_model.clone();
                    assignment.fallback_models = rest.to_vec();
                    attempt_number += 1;
                    continue;
                }
                return SubtaskOutcome { subtask_id: subtask.id, attempts, outcome: AttemptOutcome::Failure { reason } };
            }
            Err(cancellation_err) => {
                let reason = cancellation_err.0;
                attempt.finish(AttemptOutcome::Failure { reason: reason.clone() });
                attempts.push(attempt);
                events.publish(SwarmEvent::TaskFailed {
                    session_id: session_id.to_string(),
                    subtask_id: subtask.id.clone(),
                    worker_id: worker_id.clone(),
                    attempt: attempt_number,
                    reason: reason.clone(),
                    timestamp: chrono::Utc::now(),
                });
                return SubtaskOutcome { subtask_id: subtask.id, attempts, outcome: AttemptOutcome::Failure { reason } };
            }
        };

        budget.record_llm_usage(run_result.tokens_in, run_result.tokens_out);
        attempt.tokens_in = run_result.tokens_in;
        attempt.tokens_out = run_result.tokens_out;

        events.publish(SwarmEvent::BudgetUpdate {
            session_id: session_id.to_string(),
            worker_id: worker_id.clone(),
            tokens_used: budget.tokens_used(),
            iterations: attempt_number,
            timestamp: chrono::Utc::now(),
        });

        let artifacts_produced = subtask
            .relevant_files
            .iter()
            .any(|f| run_result.files_touched.contains(f))
            || (subtask.relevant_files.is_empty() && !run_result.files_touched.is_empty());

        let decision = {
            let mut gate = quality_gate.lock().await;
            gate.evaluate(&run_result.judge_score, attempt_number, artifacts_produced)
        };

        if decision.outcome == GateOutcome::RejectRetry {
            events.publish(SwarmEvent::QualityRejected {
                session_id: session_id.to_string(),
                subtask_id: subtask.id.clone(),
                attempt: attempt_number,
                score: run_result.judge_score.score,
                feedback: run_result.judge_score.feedback.clone(),
                artifact_auto_fail: decision.artifact_auto_fail,
                timestamp: chrono::Utc::now(),
            });

            if decision.disabled_this_call {
                events.publish(SwarmEvent::OrchestratorDecision {
                    session_id: session_id.to_string(),
                    phase: "quality-circuit-breaker".to_string(),
                    detail: format!("rejection circuit breaker tripped on subtask {}; gate disabled for the rest of the wave", subtask.id),
                    timestamp: chrono::Utc::now(),
                });
            }

            // An artifact auto-fail means the worker never touched the
            // files it claimed to; retrying with the same model rarely
            // helps, so this path does not fail over to another model.
            if decision.artifact_auto_fail {
                attempt.finish(AttemptOutcome::Failure { reason: "artifact auto-fail: no declared files were modified".to_string() });
                attempts.push(attempt);
                return SubtaskOutcome {
                    subtask_id: subtask.id,
                    attempts,
                    outcome: AttemptOutcome::Failure { reason: "artifact auto-fail".to_string() },
                };
            }

            attempt.finish(AttemptOutcome::Failure { reason: run_result.judge_score.feedback.clone() });
            attempts.push(attempt);
            attempt_number += 1;
            continue;
        }

        attempt.finish(AttemptOutcome::Success);
        attempts.push(attempt);

        ledger.log_action_executed(
            Actor { actor_type: ActorType::Agent, id: worker_id.clone(), name: None },
            Action {
                action_type: "subtask".to_string(),
                description: subtask.description.clone(),
                data: serde_json::json!({"subtask_id": subtask.id}),
            },
            Outcome { success: true, message: Some(format!("{:?}", decision.outcome)) },
            false,
            None,
            Some(session_id.to_string()),
        );

        events.publish(SwarmEvent::TaskCompleted {
            session_id: session_id.to_string(),
            subtask_id: subtask.id.clone(),
            worker_id: worker_id.clone(),
            attempt: attempt_number,
            timestamp: chrono::Utc::now(),
        });

        info!(subtask_id = %subtask.id, wave = wave_index, "subtask completed");
        return SubtaskOutcome { subtask_id: subtask.id, attempts, outcome: AttemptOutcome::Success };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::budget::SharedEconomicsConfig;
    use coordination::model::SubtaskType;
    use coordination::quality_gate::QualityGateConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn subtask(id: &str, deps: &[&str]) -> Subtask {
        Subtask {
            id: id.to_string(),
            description: "do the thing".to_string(),
            kind: SubtaskType::Implement,
            complexity: 2,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            parallelizable: true,
            relevant_files: vec!["src/lib.rs".to_string()],
        }
    }

    fn worker() -> Worker {
        Worker {
            name: "coder".to_string(),
            default_model: "model-a".to_string(),
            capabilities: Default::default(),
            policy_profile: None,
            allowed_tools: None,
            denied_tools: None,
        }
    }

    struct AlwaysPasses;

    #[async_trait]
    impl WorkerExecutor for AlwaysPasses {
        async fn run(&self, ctx: WorkerContext) -> Result<WorkerRunResult, WorkerRunError> {
            Ok(WorkerRunResult {
                output: "done".to_string(),
                files_touched: ["src/lib.rs".to_string()].into_iter().collect(),
                tokens_in: 100,
                tokens_out: 50,
                judge_score: JudgeScore {
                    score: 5,
                    feedback: "looks good".to_string(),
                    passed: true,
                    artifact_auto_fail: None,
                },
            })
        }
    }

    struct FailsThenPasses {
        calls: AtomicU32,
    }

    #[async_trait]
    impl WorkerExecutor for FailsThenPasses {
        async fn run(&self, _ctx: WorkerContext) -> Result<WorkerRunResult, WorkerRunError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let score = if call == 0 { 1 } else { 5 };
            Ok(WorkerRunResult {
                output: "partial".to_string(),
                files_touched: ["src/lib.rs".to_string()].into_iter().collect(),
                tokens_in: 10,
                tokens_out: 10,
                judge_score: JudgeScore { score, feedback: "retry".to_string(), passed: score >= 3, artifact_auto_fail: None },
            })
        }
    }

    fn test_pool_config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            max_concurrency: 4,
            dispatch_stagger_ms: 0,
            hard_timeout_ms: 60_000,
            idle_timeout_ms: 60_000,
            timeout_tick_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn dispatches_and_completes_a_single_subtask() {
        let pool = WorkerPool::new(test_pool_config(), BudgetConfig { max_tokens: 100_000, max_iterations: 10, doom_loop_threshold: 5 });
        let subtasks = vec![subtask("a", &[])];
        let assignments: HashMap<String, Assignment> = [(
            "a".to_string(),
            Assignment { worker: worker(), model_id: "model-a".to_string(), fallback_models: vec![] },
        )]
        .into_iter()
        .collect();

        let events: Arc<SwarmEventBus> = Arc::new(coordination::events::EventBus::new());
        let ledger = Arc::new(Ledger::new());
        let shared_economics = Arc::new(SharedEconomics::new(SharedEconomicsConfig::default()));
        let quality_gate = Arc::new(tokio::sync::Mutex::new(QualityGate::new(QualityGateConfig::default())));

        let outcomes = pool
            .dispatch_wave(
                "s1",
                0,
                &subtasks,
                &assignments,
                &HashSet::new(),
                Arc::new(AlwaysPasses),
                shared_economics,
                quality_gate,
                &CancellationToken::new(),
                &events,
                &ledger,
            )
            .await;

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].outcome, AttemptOutcome::Success));
    }

    #[tokio::test]
    async fn skips_subtasks_whose_dependency_failed() {
        let pool = WorkerPool::new(test_pool_config(), BudgetConfig { max_tokens: 100_000, max_iterations: 10, doom_loop_threshold: 5 });
        let subtasks = vec![subtask("b", &["a"])];
        let assignments: HashMap<String, Assignment> = [(
            "b".to_string(),
            Assignment { worker: worker(), model_id: "model-a".to_string(), fallback_models: vec![] },
        )]
        .into_iter()
        .collect();
        let mut failed = HashSet::new();
        failed.insert("a".to_string());

        let events: Arc<SwarmEventBus> = Arc::new(coordination::events::EventBus::new());
        let ledger = Arc::new(Ledger::new());
        let shared_economics = Arc::new(SharedEconomics::new(SharedEconomicsConfig::default()));
        let quality_gate = Arc::new(tokio::sync::Mutex::new(QualityGate::new(QualityGateConfig::default())));

        let outcomes = pool
            .dispatch_wave(
                "s1",
                0,
                &subtasks,
                &assignments,
                &failed,
                Arc::new(AlwaysPasses),
                shared_economics,
                quality_gate,
                &CancellationToken::new(),
                &events,
                &ledger,
            )
            .await;

        assert!(matches!(outcomes[0].outcome, AttemptOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn retries_on_quality_rejection_then_passes() {
        let pool = WorkerPool::new(test_pool_config(), BudgetConfig { max_tokens: 100_000, max_iterations: 10, doom_loop_threshold: 5 });
        let subtasks = vec![subtask("a", &[])];
        let assignments: HashMap<String, Assignment> = [(
            "a".to_string(),
            Assignment { worker: worker(), model_id: "model-a".to_string(), fallback_models: vec![] },
        )]
        .into_iter()
        .collect();

        let events: Arc<SwarmEventBus> = Arc::new(coordination::events::EventBus::new());
        let ledger = Arc::new(Ledger::new());
        let shared_economics = Arc::new(SharedEconomics::new(SharedEconomicsConfig::default()));
        let quality_gate = Arc::new(tokio::sync::Mutex::new(QualityGate::new(QualityGateConfig::default())));

        let outcomes = pool
            .dispatch_wave(
                "s1",
                0,
                &subtasks,
                &assignments,
                &HashSet::new(),
                Arc::new(FailsThenPasses { calls: AtomicU32::new(0) }),
                shared_economics,
                quality_gate,
                &CancellationToken::new(),
                &events,
                &ledger,
            )
            .await;

        assert!(matches!(outcomes[0].outcome, AttemptOutcome::Success));
        assert_eq!(outcomes[0].attempts.len(), 2);
    }
}
