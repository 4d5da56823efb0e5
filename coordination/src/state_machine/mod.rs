//! Agent Phase State Machine (C5, §3.2, §4.5).
//!
//! `record_tool_call` is the single input: every observation about a
//! worker's progress (files read, searches issued, files written, tests
//! run) flows through it, and phase transitions are a side effect of
//! that one call rather than a separate API.

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Exploring,
    Planning,
    Acting,
    Verifying,
}

impl Phase {
    /// `true` iff `self -> to` is in the legal transition set (§3.2).
    pub fn is_legal_transition(self, to: Phase) -> bool {
        matches!(
            (self, to),
            (Phase::Exploring, Phase::Planning)
                | (Phase::Exploring, Phase::Acting)
                | (Phase::Planning, Phase::Acting)
                | (Phase::Planning, Phase::Exploring)
                | (Phase::Acting, Phase::Verifying)
                | (Phase::Acting, Phase::Exploring)
                | (Phase::Verifying, Phase::Acting)
                | (Phase::Verifying, Phase::Exploring)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriState {
    Unknown,
    Passed,
    Failed,
}

/// Metrics accumulated for the lifetime of one phase.
#[derive(Debug, Clone)]
pub struct PhaseSnapshot {
    pub iterations: u32,
    pub files_read: HashSet<String>,
    pub searches: HashSet<String>,
    pub files_modified: HashSet<String>,
    pub tests_run: u32,
    pub last_test_passed: TriState,
    pub consecutive_test_failures: u32,
    pub in_test_fix_cycle: bool,
    pub consecutive_bash_failures: u32,
    pub recent_new_files: u32,
    pub should_transition: bool,
    started_at: Instant,
}

impl PhaseSnapshot {
    fn new() -> Self {
        Self {
            iterations: 0,
            files_read: HashSet::new(),
            searches: HashSet::new(),
            files_modified: HashSet::new(),
            tests_run: 0,
            last_test_passed: TriState::Unknown,
            consecutive_test_failures: 0,
            in_test_fix_cycle: false,
            consecutive_bash_failures: 0,
            recent_new_files: 0,
            should_transition: false,
            started_at: Instant::now(),
        }
    }
}

/// Summary of a completed phase's metrics, carried on a [`TransitionRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub duration_ms: u64,
    pub tool_call_count: u32,
    pub files_read: usize,
    pub files_modified: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub reason: String,
    pub from_metrics: PhaseMetrics,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StateMachineConfig {
    pub exploration_file_threshold: u32,
    pub exploration_iter_threshold: u32,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            exploration_file_threshold: env_or("SWARM_STATE_EXPLORATION_FILE_THRESHOLD", 8),
            exploration_iter_threshold: env_or("SWARM_STATE_EXPLORATION_ITER_THRESHOLD", 12),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn is_search_tool(tool: &str) -> bool {
    matches!(tool, "grep" | "search" | "glob" | "find_files" | "search_files")
}

fn is_test_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    lower.contains("test") || lower.contains("pytest") || lower.contains("npm test") || lower.contains("jest")
}

/// Observation fed into `record_tool_call` for a `bash` invocation.
pub struct BashResult {
    pub exit_code: i32,
    pub output: String,
}

pub struct AgentStateMachine {
    config: StateMachineConfig,
    phase: Phase,
    snapshot: PhaseSnapshot,
    history: Vec<TransitionRecord>,
}

impl AgentStateMachine {
    pub fn new(config: StateMachineConfig) -> Self {
        Self {
            config,
            phase: Phase::Exploring,
            snapshot: PhaseSnapshot::new(),
            history: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn snapshot(&self) -> &PhaseSnapshot {
        &self.snapshot
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    fn metrics(&self) -> PhaseMetrics {
        PhaseMetrics {
            duration_ms: self.snapshot.started_at.elapsed().as_millis() as u64,
            tool_call_count: self.snapshot.iterations,
            files_read: self.snapshot.files_read.len(),
            files_modified: self.snapshot.files_modified.len(),
        }
    }

    /// Attempt a transition. No-op (and `false`) if illegal.
    fn transition(&mut self, to: Phase, reason: &str) -> bool {
        if !self.phase.is_legal_transition(to) {
            return false;
        }
        self.history.push(TransitionRecord {
            from: self.phase,
            to,
            reason: reason.to_string(),
            from_metrics: self.metrics(),
            at: Utc::now(),
        });
        self.phase = to;
        self.snapshot = PhaseSnapshot::new();
        true
    }

    /// The single input (§4.5). `bash_result` is present only for `bash`
    /// calls.
    pub fn record_tool_call(&mut self, tool: &str, args: &serde_json::Value, bash_result: Option<&BashResult>) {
        self.snapshot.iterations += 1;
        if self.snapshot.iterations % 3 == 0 {
            self.snapshot.recent_new_files = 0;
        }

        match tool {
            "read_file" => {
                if let Some(path) = args.get("path").or_else(|| args.get("file_path")).and_then(|v| v.as_str()) {
                    if self.snapshot.files_read.insert(path.to_string()) {
                        self.snapshot.recent_new_files += 1;
                    }
                }
            }
            t if is_search_tool(t) => {
                let query = args
                    .get("pattern")
                    .or_else(|| args.get("query"))
                    .or_else(|| args.get("path"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                self.snapshot.searches.insert(query.to_string());
            }
            "write_file" | "edit_file" => {
                if let Some(path) = args.get("path").or_else(|| args.get("file_path")).and_then(|v| v.as_str()) {
                    self.snapshot.files_modified.insert(path.to_string());
                }
                if matches!(self.phase, Phase::Exploring | Phase::Planning) {
                    self.transition(Phase::Acting, "First file edit made");
                }
            }
            "bash" => {
                let command = args.get("command").and_then(|v| v.as_str()).unwrap_or_default();
                let is_test = is_test_command(command);

                if is_test {
                    self.snapshot.tests_run += 1;
                }
                if self.phase == Phase::Acting && !self.snapshot.files_modified.is_empty() {
                    self.transition(Phase::Verifying, "Files modified, ready to verify");
                }

                if let Some(result) = bash_result {
                    if result.exit_code != 0 {
                        self.snapshot.consecutive_bash_failures += 1;
                    } else {
                        self.snapshot.consecutive_bash_failures = 0;
                    }

                    if is_test {
                        let passed = result.exit_code == 0;
                        self.snapshot.last_test_passed = if passed { TriState::Passed } else { TriState::Failed };
                        if passed {
                            self.snapshot.consecutive_test_failures = 0;
                        } else {
                            self.snapshot.consecutive_test_failures += 1;
                        }
                        if self.snapshot.consecutive_test_failures >= 2 {
                            self.snapshot.in_test_fix_cycle = true;
                            if self.phase == Phase::Verifying {
                                self.transition(
                                    Phase::Acting,
                                    &format!(
                                        "Test failed {} times, fixing",
                                        self.snapshot.consecutive_test_failures
                                    ),
                                );
                            }
                        }
                    }
                }
            }
            _ => {}
        }

        self.update_saturation();
    }

    fn update_saturation(&mut self) {
        if self.phase != Phase::Exploring {
            self.snapshot.should_transition = false;
            return;
        }
        let no_files_modified = self.snapshot.files_modified.is_empty();
        let by_file_count = self.snapshot.files_read.len() as u32 >= self.config.exploration_file_threshold && no_files_modified;
        let by_stall = self.snapshot.iterations >= self.config.exploration_iter_threshold
            && self.snapshot.recent_new_files < 2
            && no_files_modified;
        self.snapshot.should_transition = by_file_count || by_stall;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn illegal_transition_has_no_side_effect() {
        assert!(!Phase::Exploring.is_legal_transition(Phase::Verifying));
    }

    #[test]
    fn legal_transitions_match_spec_table() {
        assert!(Phase::Exploring.is_legal_transition(Phase::Planning));
        assert!(Phase::Exploring.is_legal_transition(Phase::Acting));
        assert!(Phase::Planning.is_legal_transition(Phase::Acting));
        assert!(Phase::Planning.is_legal_transition(Phase::Exploring));
        assert!(Phase::Acting.is_legal_transition(Phase::Verifying));
        assert!(Phase::Acting.is_legal_transition(Phase::Exploring));
        assert!(Phase::Verifying.is_legal_transition(Phase::Acting));
        assert!(Phase::Verifying.is_legal_transition(Phase::Exploring));
        assert!(!Phase::Verifying.is_legal_transition(Phase::Planning));
    }

    #[test]
    fn first_file_edit_transitions_to_acting() {
        let mut sm = AgentStateMachine::new(StateMachineConfig::default());
        sm.record_tool_call("write_file", &json!({"path": "/a.rs"}), None);
        assert_eq!(sm.phase(), Phase::Acting);
        assert_eq!(sm.history().last().unwrap().reason, "First file edit made");
    }

    #[test]
    fn bash_after_edit_transitions_to_verifying() {
        let mut sm = AgentStateMachine::new(StateMachineConfig::default());
        sm.record_tool_call("write_file", &json!({"path": "/a.rs"}), None);
        sm.record_tool_call(
            "bash",
            &json!({"command": "echo hi"}),
            Some(&BashResult { exit_code: 0, output: String::new() }),
        );
        assert_eq!(sm.phase(), Phase::Verifying);
    }

    #[test]
    fn repeated_test_failures_return_to_acting() {
        let mut sm = AgentStateMachine::new(StateMachineConfig::default());
        sm.record_tool_call("write_file", &json!({"path": "/a.rs"}), None);
        sm.record_tool_call(
            "bash",
            &json!({"command": "cargo test"}),
            Some(&BashResult { exit_code: 1, output: String::new() }),
        );
        assert_eq!(sm.phase(), Phase::Verifying);
        sm.record_tool_call(
            "bash",
            &json!({"command": "cargo test"}),
            Some(&BashResult { exit_code: 1, output: String::new() }),
        );
        assert_eq!(sm.phase(), Phase::Acting);
        assert!(sm.history().last().unwrap().reason.contains("Test failed"));
    }

    #[test]
    fn saturation_trips_on_file_read_threshold_without_modification() {
        let mut sm = AgentStateMachine::new(StateMachineConfig {
            exploration_file_threshold: 2,
            exploration_iter_threshold: 100,
        });
        sm.record_tool_call("read_file", &json!({"path": "/a.rs"}), None);
        assert!(!sm.snapshot().should_transition);
        sm.record_tool_call("read_file", &json!({"path": "/b.rs"}), None);
        assert!(sm.snapshot().should_transition);
    }

    #[test]
    fn recent_new_files_resets_every_third_iteration() {
        let mut sm = AgentStateMachine::new(StateMachineConfig::default());
        sm.record_tool_call("read_file", &json!({"path": "/a.rs"}), None);
        sm.record_tool_call("read_file", &json!({"path": "/b.rs"}), None);
        assert_eq!(sm.snapshot().recent_new_files, 2);
        sm.record_tool_call("read_file", &json!({"path": "/c.rs"}), None);
        // third call resets the counter before recording this call's read
        assert_eq!(sm.snapshot().recent_new_files, 1);
    }

    #[test]
    fn search_tool_records_canonical_query() {
        let mut sm = AgentStateMachine::new(StateMachineConfig::default());
        sm.record_tool_call("grep", &json!({"pattern": "TODO"}), None);
        assert!(sm.snapshot().searches.contains("TODO"));
    }
}
