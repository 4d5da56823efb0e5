//! Aggregated control-plane configuration (§1.1, §3.9 expansion).
//!
//! Every component config struct implements `Default` with values
//! sourced from environment variables following the `SWARM_<COMPONENT>_
//! <FIELD>` convention; `SwarmConfig::from_env()` is a thin composition
//! of those defaults so the binary surface has one knob to construct.

use crate::approval::ApprovalConfig;
use crate::budget::{BudgetConfig, SharedEconomicsConfig};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::loop_detector::LoopDetectorConfig;
use crate::quality_gate::QualityGateConfig;
use crate::resource_monitor::ResourceMonitorConfig;
use crate::state_machine::StateMachineConfig;
use crate::verification_gate::VerificationGateConfig;

#[derive(Clone)]
pub struct OrchestratorConfig {
    pub max_concurrency: usize,
    pub dispatch_stagger_ms: u64,
    pub global_loop_pause_ms: u64,
    pub max_decomposition_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: env_or("SWARM_ORCHESTRATOR_MAX_CONCURRENCY", 4),
            dispatch_stagger_ms: env_or("SWARM_ORCHESTRATOR_DISPATCH_STAGGER_MS", 250),
            global_loop_pause_ms: env_or("SWARM_ORCHESTRATOR_GLOBAL_LOOP_PAUSE_MS", 30_000),
            max_decomposition_retries: env_or("SWARM_ORCHESTRATOR_MAX_DECOMPOSITION_RETRIES", 1),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Composition of every component's `Default` config (§3.9). Components
/// with no free-standing knobs (the ledger, the plan manager, the
/// persistence adapters) are omitted; they take no configuration beyond
/// what the caller passes at construction.
#[derive(Clone)]
pub struct SwarmConfig {
    pub orchestrator: OrchestratorConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub resource_monitor: ResourceMonitorConfig,
    pub loop_detector: LoopDetectorConfig,
    pub state_machine: StateMachineConfig,
    pub budget: BudgetConfig,
    pub shared_economics: SharedEconomicsConfig,
    pub verification_gate: VerificationGateConfig,
    pub quality_gate: QualityGateConfig,
    pub approval: ApprovalConfig,
}

impl SwarmConfig {
    pub fn from_env() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            resource_monitor: ResourceMonitorConfig::default(),
            loop_detector: LoopDetectorConfig::default(),
            state_machine: StateMachineConfig::default(),
            budget: BudgetConfig::default(),
            shared_economics: SharedEconomicsConfig::default(),
            verification_gate: VerificationGateConfig::default(),
            quality_gate: QualityGateConfig::default(),
            approval: ApprovalConfig::default(),
        }
    }
}
