//! # ClickFlow Store
//!
//! SQLite-backed persistence — survives restarts, supports concurrent access.
//! Two independent surfaces over the same database file:
//!
//! - [`PlanStore`]: tasks, daily plans, hourly executions, daily summaries,
//!   usage records. Upsert semantics throughout, so every scheduler trigger
//!   can re-derive "work remaining" from durable state.
//! - [`TokenLedger`]: per-user token balances with an atomic
//!   decrement-with-floor — a balance can never go below zero, even under
//!   concurrent consumers.

pub mod ledger;
pub mod plan_store;

pub use ledger::{BalanceCheck, TokenLedger};
pub use plan_store::PlanStore;
