//! Verification Gate (C8, §4.7).
//!
//! Only instantiated when at least one acceptance criterion applies;
//! the orchestrator skips the gate entirely for subtasks with no
//! required tests, no file-change requirement, and no compilation
//! requirement.

use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct VerificationGateConfig {
    pub required_tests: Vec<String>,
    pub require_file_changes: bool,
    pub require_compilation: bool,
    pub max_attempts: u32,
}

impl VerificationGateConfig {
    pub fn has_any_criterion(&self) -> bool {
        !self.required_tests.is_empty() || self.require_file_changes || self.require_compilation
    }
}

impl Default for VerificationGateConfig {
    fn default() -> Self {
        Self {
            required_tests: Vec::new(),
            require_file_changes: false,
            require_compilation: false,
            max_attempts: env_or("SWARM_VERIFICATION_MAX_ATTEMPTS", 2),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub satisfied: bool,
    pub force_allow: bool,
    pub missing: Vec<String>,
    pub nudge: Option<String>,
}

struct TestRunOutcome {
    ran: bool,
    any_passed: bool,
}

/// Parses `bash` output for pass/fail markers (§4.7). Recognises plain
/// "passed"/"failed" text and pytest-style `N passed, M failed` summaries.
fn parse_test_output(output: &str, exit_code: i32) -> TestRunOutcome {
    let lower = output.to_lowercase();
    let mentions_passed = lower.contains("passed") || exit_code == 0;
    let mentions_failed = lower.contains("failed") && !lower.contains("0 failed");
    TestRunOutcome {
        ran: true,
        any_passed: mentions_passed && !mentions_failed,
    }
}

pub struct VerificationGate {
    config: VerificationGateConfig,
    files_changed: bool,
    tests_executed: HashSet<String>,
    tests_passed: HashSet<String>,
    compilation_passed: Option<bool>,
    compilation_error_count: u32,
    nudge_count: u32,
}

impl VerificationGate {
    pub fn new(config: VerificationGateConfig) -> Self {
        Self {
            config,
            files_changed: false,
            tests_executed: HashSet::new(),
            tests_passed: HashSet::new(),
            compilation_passed: None,
            compilation_error_count: 0,
            nudge_count: 0,
        }
    }

    pub fn record_file_change(&mut self) {
        self.files_changed = true;
    }

    /// `command` identifies which required test (if any) this run maps to.
    pub fn record_bash_execution(&mut self, command: &str, output: &str, exit_code: i32) {
        for required in &self.config.required_tests {
            if command.contains(required.as_str()) {
                self.tests_executed.insert(required.clone());
                let outcome = parse_test_output(output, exit_code);
                if outcome.ran && outcome.any_passed {
                    self.tests_passed.insert(required.clone());
                }
            }
        }
    }

    pub fn record_compilation_result(&mut self, passed: bool, error_count: u32) {
        self.compilation_passed = Some(passed);
        self.compilation_error_count = error_count;
    }

    pub fn increment_compilation_nudge(&mut self) {
        self.nudge_count += 1;
    }

    pub fn check(&mut self) -> VerificationResult {
        if self.nudge_count >= self.config.max_attempts {
            return VerificationResult { satisfied: false, force_allow: true, missing: Vec::new(), nudge: None };
        }

        let mut missing = Vec::new();

        if self.config.require_file_changes && !self.files_changed {
            missing.push("file changes".to_string());
        }
        for required in &self.config.required_tests {
            if !self.tests_passed.contains(required) {
                missing.push(format!("passing run of test `{required}`"));
            }
        }
        if self.config.require_compilation && self.compilation_passed != Some(true) {
            missing.push("successful compilation".to_string());
        }

        if missing.is_empty() {
            return VerificationResult { satisfied: true, force_allow: false, missing, nudge: None };
        }

        self.nudge_count += 1;
        let recommended_test = self.config.required_tests.first().cloned();
        let nudge = match recommended_test {
            Some(test) => format!("Still missing: {}. Run `{test}` and ensure it passes.", missing.join(", ")),
            None => format!("Still missing: {}.", missing.join(", ")),
        };

        VerificationResult { satisfied: false, force_allow: false, missing, nudge: Some(nudge) }
    }
}
