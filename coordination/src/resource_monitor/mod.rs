//! Resource Monitor (C3, §4.3).
//!
//! Tracks memory, accumulated CPU time, and concurrent-operation count
//! against configured maxima, and exposes both a polling `check()` and
//! wrapped-execution helpers that gate on the result.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Healthy,
    Warning,
    Critical,
    Exceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Continue,
    SlowDown,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_bytes: u64,
    pub cpu_time_ms: u64,
    pub concurrent_ops: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceCheck {
    pub status: ResourceStatus,
    pub usage: ResourceUsage,
    pub message: Option<String>,
    pub recommendation: Recommendation,
}

#[derive(Debug, Error)]
#[error("resource limit exceeded: {0}")]
pub struct ResourceLimitError(pub String);

#[derive(Debug, Clone)]
pub struct ResourceMonitorConfig {
    pub max_memory_bytes: u64,
    pub max_cpu_time_ms: u64,
    pub max_concurrent_ops: i64,
    pub warn_threshold: f64,
    pub critical_threshold: f64,
}

impl Default for ResourceMonitorConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: env_or("SWARM_RESOURCE_MAX_MEMORY_BYTES", 2_147_483_648),
            max_cpu_time_ms: env_or("SWARM_RESOURCE_MAX_CPU_TIME_MS", 300_000),
            max_concurrent_ops: env_or("SWARM_RESOURCE_MAX_CONCURRENT_OPS", 16),
            warn_threshold: env_or("SWARM_RESOURCE_WARN_THRESHOLD", 0.7),
            critical_threshold: env_or("SWARM_RESOURCE_CRITICAL_THRESHOLD", 0.9),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Release handle returned by [`ResourceMonitor::start_operation`]. Must
/// be invoked exactly once; the concurrent-op count decrements on drop.
pub struct OperationHandle {
    concurrent_ops: Arc<AtomicI64>,
    released: bool,
}

impl OperationHandle {
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if !self.released {
            self.released = true;
            let mut current = self.concurrent_ops.load(Ordering::SeqCst);
            while current > 0 {
                match self.concurrent_ops.compare_exchange(
                    current,
                    current - 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        }
    }
}

impl Drop for OperationHandle {
    fn drop(&mut self) {
        self.do_release();
    }
}

pub struct ResourceMonitor {
    config: ResourceMonitorConfig,
    start: Instant,
    cpu_baseline: Arc<AtomicU64>,
    cpu_time_ms: Arc<AtomicU64>,
    concurrent_ops: Arc<AtomicI64>,
    memory_bytes: Arc<AtomicU64>,
}

impl ResourceMonitor {
    pub fn new(config: ResourceMonitorConfig) -> Self {
        Self {
            config,
            start: Instant::now(),
            cpu_baseline: Arc::new(AtomicU64::new(0)),
            cpu_time_ms: Arc::new(AtomicU64::new(0)),
            concurrent_ops: Arc::new(AtomicI64::new(0)),
            memory_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Report the current resident memory; a real embedding application
    /// samples this from the OS and calls it periodically.
    pub fn report_memory(&self, bytes: u64) {
        self.memory_bytes.store(bytes, Ordering::SeqCst);
    }

    pub fn report_cpu_time(&self, ms: u64) {
        self.cpu_time_ms.store(ms, Ordering::SeqCst);
    }

    fn ratio(&self) -> f64 {
        let memory_ratio = self.memory_bytes.load(Ordering::SeqCst) as f64 / self.config.max_memory_bytes as f64;
        let cpu_elapsed = self
            .cpu_time_ms
            .load(Ordering::SeqCst)
            .saturating_sub(self.cpu_baseline.load(Ordering::SeqCst));
        let cpu_ratio = cpu_elapsed as f64 / self.config.max_cpu_time_ms as f64;
        let ops_ratio = self.concurrent_ops.load(Ordering::SeqCst) as f64 / self.config.max_concurrent_ops as f64;
        memory_ratio.max(cpu_ratio).max(ops_ratio)
    }

    pub fn check(&self) -> ResourceCheck {
        let ratio = self.ratio();
        let usage = ResourceUsage {
            memory_bytes: self.memory_bytes.load(Ordering::SeqCst),
            cpu_time_ms: self
                .cpu_time_ms
                .load(Ordering::SeqCst)
                .saturating_sub(self.cpu_baseline.load(Ordering::SeqCst)),
            concurrent_ops: self.concurrent_ops.load(Ordering::SeqCst),
        };

        let (status, recommendation, message) = if ratio >= 1.0 {
            (
                ResourceStatus::Exceeded,
                Recommendation::Stop,
                Some(format!("resource usage at {:.0}% of configured maximum", ratio * 100.0)),
            )
        } else if ratio >= self.config.critical_threshold {
            (
                ResourceStatus::Critical,
                Recommendation::Stop,
                Some(format!("resource usage at {:.0}% of configured maximum", ratio * 100.0)),
            )
        } else if ratio >= self.config.warn_threshold {
            (
                ResourceStatus::Warning,
                Recommendation::SlowDown,
                Some(format!("resource usage at {:.0}% of configured maximum", ratio * 100.0)),
            )
        } else {
            (ResourceStatus::Healthy, Recommendation::Continue, None)
        };

        ResourceCheck { status, usage, message, recommendation }
    }

    /// Increment the concurrent-op count and return a release handle.
    pub fn start_operation(&self) -> OperationHandle {
        self.concurrent_ops.fetch_add(1, Ordering::SeqCst);
        OperationHandle {
            concurrent_ops: self.concurrent_ops.clone(),
            released: false,
        }
    }

    /// Check first; fail before invoking `op` if `exceeded`, otherwise
    /// wrap it between `start_operation` and release.
    pub async fn run_tracked<F, Fut, T>(&self, op: F) -> Result<T, ResourceLimitError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let check = self.check();
        if check.status == ResourceStatus::Exceeded {
            return Err(ResourceLimitError(
                check.message.unwrap_or_else(|| "resource limit exceeded".to_string()),
            ));
        }
        let handle = self.start_operation();
        let result = op().await;
        handle.release();
        Ok(result)
    }

    /// Non-throwing variant: returns `fallback` on critical or exceeded.
    pub async fn run_if_available<F, Fut, T>(&self, op: F, fallback: T) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let check = self.check();
        if matches!(check.status, ResourceStatus::Critical | ResourceStatus::Exceeded) {
            return fallback;
        }
        let handle = self.start_operation();
        let result = op().await;
        handle.release();
        result
    }

    /// Reset the CPU-time baseline (per-prompt) while preserving
    /// concurrent-op counts.
    pub fn reset_cpu_time(&self) {
        self.cpu_baseline.store(self.cpu_time_ms.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    /// Zero everything, including concurrent-op counts.
    pub fn reset(&self) {
        self.cpu_time_ms.store(0, Ordering::SeqCst);
        self.cpu_baseline.store(0, Ordering::SeqCst);
        self.memory_bytes.store(0, Ordering::SeqCst);
        self.concurrent_ops.store(0, Ordering::SeqCst);
    }

    pub fn elapsed_since_start(&self) -> Duration {
        self.start.elapsed()
    }
}
