//! Execution control plane for a multi-agent code-modification swarm.
//!
//! This crate hosts the components that decide *when* and *whether*
//! work happens — cancellation, circuit breaking, budgets, loop
//! detection, quality and verification gates, approval scope, the audit
//! ledger, the pending-plan queue, and persistence — independent of any
//! particular model provider or tool implementation. The worker pool
//! and orchestrator that drive agents through these components live in
//! the `swarm_agents` crate.

#![allow(clippy::uninlined_format_args)]

pub mod approval;
pub mod budget;
pub mod cancellation;
pub mod circuit_breaker;
pub mod config;
pub mod events;
pub mod ledger;
pub mod loop_detector;
pub mod model;
pub mod persistence;
pub mod plan;
pub mod quality_gate;
pub mod resource_monitor;
pub mod state_machine;
pub mod verification_gate;

pub use config::SwarmConfig;
