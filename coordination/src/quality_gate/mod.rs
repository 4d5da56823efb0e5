//! Quality Gate (C9, §4.8).
//!
//! Wraps an external judge's score with retry, last-attempt bypass,
//! artifact auto-fail, and a rejection circuit breaker that disables the
//! gate for the remainder of a wave once it has rejected too many times
//! in a row — a judge that is itself broken should not death-spiral the
//! whole wave.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeScore {
    pub score: u8,
    pub feedback: String,
    pub passed: bool,
    pub artifact_auto_fail: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Accepted,
    RejectRetry,
    AcceptedByLastAttemptBypass,
    AcceptedByCircuitBreakerDisabled,
}

#[derive(Debug, Clone)]
pub struct QualityGateDecision {
    pub outcome: GateOutcome,
    pub artifact_auto_fail: bool,
    pub disabled_this_call: bool,
}

#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    pub quality_threshold: u8,
    pub worker_retries: u32,
    pub rejection_circuit_threshold: u32,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            quality_threshold: env_or("SWARM_QUALITY_THRESHOLD", 3),
            worker_retries: env_or("SWARM_QUALITY_WORKER_RETRIES", 2),
            rejection_circuit_threshold: env_or("SWARM_QUALITY_REJECTION_CIRCUIT_THRESHOLD", 8),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

pub struct QualityGate {
    config: QualityGateConfig,
    consecutive_rejections: u32,
    disabled: bool,
}

impl QualityGate {
    pub fn new(config: QualityGateConfig) -> Self {
        Self { config, consecutive_rejections: 0, disabled: false }
    }

    /// Reset for a new wave: clears the disabled state and the rejection
    /// counter (§9 decision: resets happen only here and in
    /// `record_pass`, never on a bare rejection).
    pub fn begin_wave(&mut self) {
        self.consecutive_rejections = 0;
        self.disabled = false;
    }

    fn record_pass(&mut self) {
        self.consecutive_rejections = 0;
    }

    /// `artifacts_produced` is whether the worker's declared
    /// `relevantFiles` were actually touched.
    pub fn evaluate(&mut self, score: &JudgeScore, attempt: u32, artifacts_produced: bool) -> QualityGateDecision {
        if self.disabled {
            self.record_pass();
            return QualityGateDecision {
                outcome: GateOutcome::AcceptedByCircuitBreakerDisabled,
                artifact_auto_fail: false,
                disabled_this_call: false,
            };
        }

        let last_attempt = attempt >= self.config.worker_retries + 1;
        let artifact_auto_fail = score.score <= 1 && !artifacts_produced;

        if last_attempt {
            self.record_pass();
            return QualityGateDecision {
                outcome: GateOutcome::AcceptedByLastAttemptBypass,
                artifact_auto_fail,
                disabled_this_call: false,
            };
        }

        if score.score >= self.config.quality_threshold {
            self.record_pass();
            return QualityGateDecision {
                outcome: GateOutcome::Accepted,
                artifact_auto_fail,
                disabled_this_call: false,
            };
        }

        self.consecutive_rejections += 1;
        let disabled_this_call = self.consecutive_rejections >= self.config.rejection_circuit_threshold;
        if disabled_this_call {
            self.disabled = true;
        }

        QualityGateDecision {
            outcome: GateOutcome::RejectRetry,
            artifact_auto_fail,
            disabled_this_call,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> QualityGateConfig {
        QualityGateConfig { quality_threshold: 3, worker_retries: 2, rejection_circuit_threshold: 8 }
    }

    fn score(value: u8) -> JudgeScore {
        JudgeScore { score: value, feedback: String::new(), passed: value >= 3, artifact_auto_fail: None }
    }

    #[test]
    fn rejects_and_retries_below_threshold_before_last_attempt() {
        let mut gate = QualityGate::new(config());
        let decision = gate.evaluate(&score(2), 1, true);
        assert_eq!(decision.outcome, GateOutcome::RejectRetry);
    }

    #[test]
    fn accepts_at_or_above_threshold() {
        let mut gate = QualityGate::new(config());
        let decision = gate.evaluate(&score(3), 1, true);
        assert_eq!(decision.outcome, GateOutcome::Accepted);
    }

    #[test]
    fn last_attempt_bypasses_gate_regardless_of_score() {
        let mut gate = QualityGate::new(config());
        // worker_retries=2 -> last attempt is attempt 3
        let decision = gate.evaluate(&score(2), 3, true);
        assert_eq!(decision.outcome, GateOutcome::AcceptedByLastAttemptBypass);
    }

    #[test]
    fn artifact_auto_fail_set_on_low_score_with_no_artifacts() {
        let mut gate = QualityGate::new(config());
        let decision = gate.evaluate(&score(1), 1, false);
        assert!(decision.artifact_auto_fail);
    }

    #[test]
    fn artifact_auto_fail_not_set_when_artifacts_produced() {
        let mut gate = QualityGate::new(config());
        let decision = gate.evaluate(&score(1), 1, true);
        assert!(!decision.artifact_auto_fail);
    }

    #[test]
    fn disables_after_exactly_rejection_circuit_threshold() {
        let mut gate = QualityGate::new(config());
        for i in 0..7 {
            let d = gate.evaluate(&score(2), 1, true);
            assert!(!d.disabled_this_call, "should not disable at rejection {}", i + 1);
        }
        let eighth = gate.evaluate(&score(2), 1, true);
        assert!(eighth.disabled_this_call);
        assert!(gate.is_disabled());
    }

    #[test]
    fn disabled_gate_accepts_everything_for_rest_of_wave() {
        let mut gate = QualityGate::new(config());
        for _ in 0..8 {
            gate.evaluate(&score(2), 1, true);
        }
        assert!(gate.is_disabled());
        let decision = gate.evaluate(&score(0), 1, true);
        assert_eq!(decision.outcome, GateOutcome::AcceptedByCircuitBreakerDisabled);
    }

    #[test]
    fn begin_wave_resets_disabled_state_and_counter() {
        let mut gate = QualityGate::new(config());
        for _ in 0..8 {
            gate.evaluate(&score(2), 1, true);
        }
        assert!(gate.is_disabled());
        gate.begin_wave();
        assert!(!gate.is_disabled());
        let decision = gate.evaluate(&score(2), 1, true);
        assert_eq!(decision.outcome, GateOutcome::RejectRetry);
    }

    #[test]
    fn a_bare_rejection_does_not_reset_the_counter() {
        let mut gate = QualityGate::new(config());
        for _ in 0..7 {
            gate.evaluate(&score(2), 1, true);
        }
        // still short of threshold; one more rejection (not a pass) must tip it
        let eighth = gate.evaluate(&score(2), 1, true);
        assert!(eighth.disabled_this_call);
    }
}
