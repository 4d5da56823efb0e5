//! Core data model shared across the control plane (§3.1, §3.2).
//!
//! `Subtask`, `Wave`, `Attempt`, and `Worker` are the nouns the rest of
//! the crate operates on: the orchestrator decomposes a goal into
//! subtasks, groups them into waves, and the pool runs one attempt per
//! worker per subtask.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of work a subtask represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskType {
    Implement,
    Test,
    Research,
    Review,
    Refactor,
    Document,
    Design,
    Merge,
    Integrate,
    Deploy,
}

/// A single decomposed unit of work (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: SubtaskType,
    pub complexity: u8,
    #[serde(default)]
    pub dependencies: HashSet<String>,
    #[serde(default)]
    pub parallelizable: bool,
    #[serde(default)]
    pub relevant_files: Vec<String>,
}

impl Subtask {
    /// `true` iff `complexity` is in the legal `1..=5` range.
    pub fn has_valid_complexity(&self) -> bool {
        (1..=5).contains(&self.complexity)
    }
}

/// A maximal set of subtasks whose dependencies have all completed in
/// earlier waves. Waves run sequentially; subtasks within a wave may
/// run concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wave {
    pub index: usize,
    pub subtask_ids: Vec<String>,
}

/// Errors raised validating or planning a subtask graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecompositionError {
    #[error("duplicate subtask id: {0}")]
    DuplicateId(String),
    #[error("subtask {0} has complexity outside 1..=5")]
    InvalidComplexity(String),
    #[error("subtask {0} depends on unknown subtask {1}")]
    UnknownDependency(String, String),
    #[error("dependency cycle detected among subtasks: {0:?}")]
    Cycle(Vec<String>),
}

/// Validate subtask ids are unique, complexities are in range, and every
/// dependency resolves to a subtask that exists in the same set.
pub fn validate_subtasks(subtasks: &[Subtask]) -> Result<(), DecompositionError> {
    let mut seen = HashSet::new();
    for s in subtasks {
        if !seen.insert(s.id.clone()) {
            return Err(DecompositionError::DuplicateId(s.id.clone()));
        }
        if !s.has_valid_complexity() {
            return Err(DecompositionError::InvalidComplexity(s.id.clone()));
        }
    }
    for s in subtasks {
        for dep in &s.dependencies {
            if !seen.contains(dep) {
                return Err(DecompositionError::UnknownDependency(
                    s.id.clone(),
                    dep.clone(),
                ));
            }
        }
    }
    Ok(())
}

/// Partition subtasks into waves by Kahn's algorithm (§3.1, §4.12 step 2).
/// Rejects the whole graph with [`DecompositionError::Cycle`] if any
/// subtask cannot be placed in a wave, which is the DAG invariant
/// the orchestrator must enforce before dispatch.
pub fn plan_waves(subtasks: &[Subtask]) -> Result<Vec<Wave>, DecompositionError> {
    validate_subtasks(subtasks)?;

    let mut remaining_deps: HashMap<String, HashSet<String>> = subtasks
        .iter()
        .map(|s| (s.id.clone(), s.dependencies.clone()))
        .collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut waves = Vec::new();

    while placed.len() < subtasks.len() {
        let ready: Vec<String> = remaining_deps
            .iter()
            .filter(|(id, deps)| !placed.contains(*id) && deps.is_subset(&placed))
            .map(|(id, _)| id.clone())
            .collect();

        if ready.is_empty() {
            let stuck: Vec<String> = remaining_deps
                .keys()
                .filter(|id| !placed.contains(*id))
                .cloned()
                .collect();
            return Err(DecompositionError::Cycle(stuck));
        }

        let mut wave_ids = ready;
        wave_ids.sort();
        for id in &wave_ids {
            placed.insert(id.clone());
            remaining_deps.remove(id);
        }
        waves.push(Wave {
            index: waves.len(),
            subtask_ids: wave_ids,
        });
    }

    Ok(waves)
}

/// Outcome of a single attempt at a subtask (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure { reason: String },
    Skipped { reason: String },
}

/// A single worker's run at a subtask (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub subtask_id: String,
    pub worker_id: String,
    pub model_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub outcome: Option<AttemptOutcome>,
}

impl Attempt {
    pub fn start(subtask_id: impl Into<String>, worker_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            subtask_id: subtask_id.into(),
            worker_id: worker_id.into(),
            model_id: model_id.into(),
            start_time: Utc::now(),
            end_time: None,
            tokens_in: 0,
            tokens_out: 0,
            cost: 0.0,
            outcome: None,
        }
    }

    pub fn finish(&mut self, outcome: AttemptOutcome) {
        self.end_time = Some(Utc::now());
        self.outcome = Some(outcome);
    }
}

/// A worker definition bound to a default model and a set of
/// capabilities and policy knobs (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    pub default_model: String,
    #[serde(default)]
    pub capabilities: HashSet<String>,
    #[serde(default)]
    pub policy_profile: Option<String>,
    #[serde(default)]
    pub allowed_tools: Option<HashSet<String>>,
    #[serde(default)]
    pub denied_tools: Option<HashSet<String>>,
}

impl Worker {
    pub fn can_use_tool(&self, tool: &str) -> bool {
        if let Some(denied) = &self.denied_tools {
            if denied.contains(tool) {
                return false;
            }
        }
        match &self.allowed_tools {
            Some(allowed) => allowed.contains(tool),
            None => true,
        }
    }
}

/// Breadth-first ordering used by tests and diagnostics to flatten
/// waves back into a single execution-order list.
pub fn flatten_waves(waves: &[Wave]) -> VecDeque<String> {
    waves
        .iter()
        .flat_map(|w| w.subtask_ids.iter().cloned())
        .collect()
}
