//! Budget Tracker (C6) and Shared Economics (C7), §3.3, §4.6.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetType {
    Tokens,
    Iterations,
    DoomLoop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetDecision {
    pub can_continue: bool,
    pub reason: Option<String>,
    pub budget_type: Option<BudgetType>,
}

impl BudgetDecision {
    fn ok() -> Self {
        Self { can_continue: true, reason: None, budget_type: None }
    }

    fn blocked(budget_type: BudgetType, reason: impl Into<String>) -> Self {
        Self { can_continue: false, reason: Some(reason.into()), budget_type: Some(budget_type) }
    }
}

#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub max_tokens: u64,
    pub max_iterations: u32,
    pub doom_loop_threshold: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: env_or("SWARM_BUDGET_MAX_TOKENS", 200_000),
            max_iterations: env_or("SWARM_BUDGET_MAX_ITERATIONS", 60),
            doom_loop_threshold: env_or("SWARM_BUDGET_DOOM_LOOP_THRESHOLD", 5),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

struct RingEntry {
    fingerprint: String,
}

/// Per-worker token/iteration/doom-loop accounting.
pub struct BudgetTracker {
    config: BudgetConfig,
    input_tokens: u64,
    output_tokens: u64,
    iterations: u32,
    ring: Vec<RingEntry>,
}

impl BudgetTracker {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            input_tokens: 0,
            output_tokens: 0,
            iterations: 0,
            ring: Vec::new(),
        }
    }

    pub fn record_llm_usage(&mut self, input: u64, output: u64) {
        self.input_tokens += input;
        self.output_tokens += output;
    }

    pub fn record_iteration(&mut self) {
        self.iterations += 1;
    }

    pub fn record_tool_call(&mut self, fingerprint: impl Into<String>) {
        self.ring.push(RingEntry { fingerprint: fingerprint.into() });
    }

    pub fn tokens_used(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    fn trailing_ring_is_uniform(&self) -> bool {
        let threshold = self.config.doom_loop_threshold as usize;
        if self.ring.len() < threshold {
            return false;
        }
        let tail = &self.ring[self.ring.len() - threshold..];
        let first = &tail[0].fingerprint;
        tail.iter().all(|e| &e.fingerprint == first)
    }

    /// §4.6 decision order: tokens, iterations, per-worker doom loop,
    /// then the global doom loop reported by `shared`.
    pub fn check_budget(&self, shared: &SharedEconomics) -> BudgetDecision {
        if self.tokens_used() >= self.config.max_tokens {
            return BudgetDecision::blocked(
                BudgetType::Tokens,
                format!("token budget exceeded: {} >= {}", self.tokens_used(), self.config.max_tokens),
            );
        }
        if self.iterations >= self.config.max_iterations {
            return BudgetDecision::blocked(
                BudgetType::Iterations,
                format!("iteration budget exceeded: {} >= {}", self.iterations, self.config.max_iterations),
            );
        }
        if self.trailing_ring_is_uniform() {
            return BudgetDecision::blocked(BudgetType::DoomLoop, "identical tool call repeated past per-worker threshold");
        }
        if let Some(last) = self.ring.last() {
            if shared.is_global_doom_loop(&last.fingerprint) {
                return BudgetDecision::blocked(BudgetType::DoomLoop, "global doom loop across workers");
            }
        }
        BudgetDecision::ok()
    }
}

#[derive(Debug, Clone)]
struct FingerprintStats {
    count: u64,
    worker_ids: HashSet<String>,
    first_seen: Instant,
    last_seen: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalLoopInfo {
    pub count: u64,
    pub worker_count: usize,
}

#[derive(Debug, Clone)]
pub struct SharedEconomicsConfig {
    pub global_count_threshold: u64,
    pub global_worker_threshold: usize,
}

impl Default for SharedEconomicsConfig {
    fn default() -> Self {
        Self {
            global_count_threshold: env_or("SWARM_ECONOMICS_GLOBAL_COUNT_THRESHOLD", 10),
            global_worker_threshold: env_or("SWARM_ECONOMICS_GLOBAL_WORKER_THRESHOLD", 2),
        }
    }
}

/// Thread-safe fingerprint → stats map shared by every worker in a swarm.
/// Per-key updates are atomic under a single mutex (§5).
pub struct SharedEconomics {
    config: SharedEconomicsConfig,
    stats: Mutex<HashMap<String, FingerprintStats>>,
}

impl SharedEconomics {
    pub fn new(config: SharedEconomicsConfig) -> Self {
        Self { config, stats: Mutex::new(HashMap::new()) }
    }

    pub fn record_tool_call(&self, worker_id: &str, fingerprint: &str) {
        let mut stats = self.stats.lock().unwrap();
        let now = Instant::now();
        let entry = stats.entry(fingerprint.to_string()).or_insert_with(|| FingerprintStats {
            count: 0,
            worker_ids: HashSet::new(),
            first_seen: now,
            last_seen: now,
        });
        entry.count += 1;
        entry.worker_ids.insert(worker_id.to_string());
        entry.last_seen = now;
    }

    pub fn get_global_loop_info(&self, fingerprint: &str) -> Option<GlobalLoopInfo> {
        let stats = self.stats.lock().unwrap();
        stats.get(fingerprint).map(|s| GlobalLoopInfo {
            count: s.count,
            worker_count: s.worker_ids.len(),
        })
    }

    pub fn is_global_doom_loop(&self, fingerprint: &str) -> bool {
        match self.get_global_loop_info(fingerprint) {
            Some(info) => {
                info.count >= self.config.global_count_threshold
                    && info.worker_count >= self.config.global_worker_threshold
            }
            None => false,
        }
    }
}
