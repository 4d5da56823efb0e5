//! Binary-surface configuration: the orchestrator/pool knobs that sit on
//! top of `coordination::SwarmConfig`, plus the model roster.
//!
//! This is deliberately a thin wrapper. Every threshold that the control
//! plane itself owns (budgets, gates, approval scope, ...) stays in
//! `coordination::config::SwarmConfig`; this struct only adds the knobs
//! specific to running the pool and orchestrator as a binary.

use coordination::config::SwarmConfig;

use crate::orchestrator::OrchestratorRunConfig;
use crate::pool::WorkerPoolConfig;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// One entry in the model roster: a model id plus the ordered fallback
/// chain the pool fails over to on a provider error (§4.11).
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub model_id: String,
    pub fallback_models: Vec<String>,
}

impl Default for ModelEntry {
    fn default() -> Self {
        Self {
            model_id: std::env::var("SWARM_AGENTS_DEFAULT_MODEL").unwrap_or_else(|_| "default".to_string()),
            fallback_models: std::env::var("SWARM_AGENTS_FALLBACK_MODELS")
                .map(|s| s.split(',').filter(|m| !m.is_empty()).map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Clone)]
pub struct SwarmAgentsConfig {
    pub coordination: SwarmConfig,
    pub pool: WorkerPoolConfig,
    pub orchestrator_run: OrchestratorRunConfig,
    pub default_model: ModelEntry,
}

impl SwarmAgentsConfig {
    pub fn from_env() -> Self {
        let coordination = SwarmConfig::from_env();
        let pool = WorkerPoolConfig {
            max_concurrency: coordination.orchestrator.max_concurrency,
            dispatch_stagger_ms: coordination.orchestrator.dispatch_stagger_ms,
            hard_timeout_ms: env_or("SWARM_AGENTS_HARD_TIMEOUT_MS", 600_000),
            idle_timeout_ms: env_or("SWARM_AGENTS_IDLE_TIMEOUT_MS", 120_000),
            timeout_tick_ms: env_or("SWARM_AGENTS_TIMEOUT_TICK_MS", 1_000),
        };
        let orchestrator_run = OrchestratorRunConfig {
            max_decomposition_retries: coordination.orchestrator.max_decomposition_retries,
            global_loop_pause_ms: coordination.orchestrator.global_loop_pause_ms,
        };
        Self { coordination, pool, orchestrator_run, default_model: ModelEntry::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_derives_pool_concurrency_from_orchestrator_config() {
        let config = SwarmAgentsConfig::from_env();
        assert_eq!(config.pool.max_concurrency, config.coordination.orchestrator.max_concurrency);
    }
}
