//! # ClickFlow Scheduler
//!
//! The scheduling core: turns a task's daily click target into an
//! hourly plan, drives each (plan, hour) slot to completion against the
//! token ledger, and reconciles usage after every hour.
//!
//! ## Architecture
//! ```text
//! Scheduler (three tokio loops on one fixed-offset clock)
//!   ├── daily   @ 00:00 → plan generation (idempotent per task+day)
//!   ├── hourly  @ HH:00 → ExecutionEngine::run_hour per due slot
//!   └── usage   @ HH:05 → per-user reconciliation + anomaly flags
//!
//! ExecutionEngine::run_hour
//!   ├── remaining = target - actual   (crash-safe resume point)
//!   ├── quota gate (whole hour, conservative)
//!   ├── normal-sampled instants inside the hour, sorted
//!   └── per attempt: balance re-check → proxy → visit → consume → persist
//! ```
//!
//! All three triggers re-derive "work remaining" from the store, so a
//! missed or crashed run heals itself on the next tick.

pub mod engine;
pub mod plan;
pub mod reconcile;
pub mod triggers;

pub use engine::{EngineSettings, ExecutionEngine, HourOutcome};
pub use plan::build_hourly_targets;
pub use reconcile::reconcile_hour;
pub use triggers::Scheduler;
