//! Loop Detector (C4, §4.4).
//!
//! Two-tier per-worker detection over the trailing run of tool calls,
//! plus summary-loop, test-fix-cycle, and bash-failure-cascade detection.
//! Returns `true` only on the call where the detector transitions from
//! "not in doom loop" to "in doom loop"; it stays silent on subsequent
//! calls while still inside the same loop.

pub mod fingerprint;

use serde_json::Value;

use fingerprint::{exact_fingerprint, fingerprint as fuzzy_fingerprint};

#[derive(Debug, Clone)]
pub struct LoopDetectorConfig {
    pub exact_threshold: u32,
    pub fuzzy_threshold: u32,
    pub summary_loop_threshold: u32,
    pub bash_failure_cascade_threshold: u32,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        let exact_threshold = env_or("SWARM_LOOP_EXACT_THRESHOLD", 3);
        let fuzzy_threshold = env_or("SWARM_LOOP_FUZZY_THRESHOLD", 4).max(exact_threshold + 1);
        Self {
            exact_threshold,
            fuzzy_threshold,
            summary_loop_threshold: env_or("SWARM_LOOP_SUMMARY_THRESHOLD", 3),
            bash_failure_cascade_threshold: env_or("SWARM_LOOP_BASH_CASCADE_THRESHOLD", 3),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Which detector tripped, for remediation-prompt selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Exact,
    Fuzzy,
    SummaryLoop,
    TestFixCycle,
    BashFailureCascade,
}

#[derive(Debug, Clone)]
pub struct LoopCheck {
    pub newly_detected: bool,
    pub kind: Option<LoopKind>,
    pub count: u32,
    pub remediation: Option<String>,
}

fn is_file_read(tool: &str) -> bool {
    matches!(tool, "read_file" | "cat" | "bash")
}

/// Remediation prompt selected by severity and tool kind (§4.4).
fn remediation_for(kind: LoopKind, count: u32, tool: &str) -> String {
    match kind {
        LoopKind::BashFailureCascade if is_file_read(tool) => {
            "Repeated bash failures while inspecting files; use the dedicated file-read tool instead of bash.".to_string()
        }
        LoopKind::Exact if count >= 6 => {
            format!("The same {tool} call has been repeated {count} times with no progress; stop and reconsider the approach entirely.")
        }
        LoopKind::Exact => {
            format!("The same {tool} call has been repeated {count} times; try a different argument or tool.")
        }
        LoopKind::Fuzzy => {
            format!("Calls to {tool} with similar arguments have repeated {count} times; broaden or change the approach.")
        }
        LoopKind::SummaryLoop => {
            "Several turns have passed with no tool call; take a concrete action or report completion.".to_string()
        }
        LoopKind::TestFixCycle => {
            "The same test has failed repeatedly; re-examine the failure output before retrying.".to_string()
        }
        LoopKind::BashFailureCascade => {
            format!("{count} consecutive non-zero exit codes from bash; verify the command itself is correct.")
        }
    }
}

struct ToolCallRecord {
    tool: String,
    exact_fp: String,
    fuzzy_fp: String,
}

/// Per-worker loop detector state.
pub struct LoopDetector {
    config: LoopDetectorConfig,
    history: Vec<ToolCallRecord>,
    in_doom_loop: bool,
    consecutive_text_only_turns: u32,
    consecutive_bash_failures: u32,
    consecutive_test_failures: u32,
}

impl LoopDetector {
    pub fn new(config: LoopDetectorConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
            in_doom_loop: false,
            consecutive_text_only_turns: 0,
            consecutive_bash_failures: 0,
            consecutive_test_failures: 0,
        }
    }

    fn trailing_run<F: Fn(&ToolCallRecord) -> &str>(&self, key: F, needle: &str) -> u32 {
        let mut count = 0;
        for record in self.history.iter().rev() {
            if key(record) == needle {
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    /// Observe a tool invocation. `exit_code` is `Some` for `bash`.
    pub fn observe_tool_call(&mut self, tool: &str, args: &Value, exit_code: Option<i32>) -> LoopCheck {
        self.consecutive_text_only_turns = 0;

        if tool == "bash" {
            match exit_code {
                Some(0) | None => self.consecutive_bash_failures = 0,
                Some(_) => self.consecutive_bash_failures += 1,
            }
        }

        let exact_fp = exact_fingerprint(tool, args);
        let fuzzy_fp = fuzzy_fingerprint(tool, args);
        self.history.push(ToolCallRecord {
            tool: tool.to_string(),
            exact_fp: exact_fp.clone(),
            fuzzy_fp: fuzzy_fp.clone(),
        });

        let exact_count = self.trailing_run(|r| &r.exact_fp, &exact_fp);
        let fuzzy_count = self.trailing_run(|r| &r.fuzzy_fp, &fuzzy_fp);

        let tripped = if exact_count >= self.config.exact_threshold {
            Some((LoopKind::Exact, exact_count))
        } else if fuzzy_count >= self.config.fuzzy_threshold {
            Some((LoopKind::Fuzzy, fuzzy_count))
        } else if self.consecutive_bash_failures >= self.config.bash_failure_cascade_threshold {
            Some((LoopKind::BashFailureCascade, self.consecutive_bash_failures))
        } else {
            None
        };

        match tripped {
            Some((kind, count)) => {
                let newly_detected = !self.in_doom_loop;
                self.in_doom_loop = true;
                LoopCheck {
                    newly_detected,
                    kind: Some(kind),
                    count,
                    remediation: if newly_detected {
                        Some(remediation_for(kind, count, tool))
                    } else {
                        None
                    },
                }
            }
            None => {
                self.in_doom_loop = false;
                LoopCheck {
                    newly_detected: false,
                    kind: None,
                    count: 0,
                    remediation: None,
                }
            }
        }
    }

    /// Record a test execution outcome observed via `bash`. Returns
    /// `true` the first time a test-fix cycle (>= 2 consecutive failures
    /// on the same command) is detected.
    pub fn observe_test_result(&mut self, passed: bool) -> bool {
        if passed {
            self.consecutive_test_failures = 0;
            false
        } else {
            self.consecutive_test_failures += 1;
            self.consecutive_test_failures >= 2
        }
    }

    /// Record a text-only turn (no tool call). Returns `true` the first
    /// time the summary-loop threshold is crossed.
    pub fn observe_text_only_turn(&mut self) -> bool {
        self.consecutive_text_only_turns += 1;
        self.consecutive_text_only_turns == self.config.summary_loop_threshold
    }
}
