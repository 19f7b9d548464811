//! # ClickFlow Core
//!
//! Shared foundation for the ClickFlow workspace: the task/plan data model,
//! the TOML configuration surface, and the workspace-wide error type.
//! No I/O beyond config file reads — persistence lives in `clickflow-store`.

pub mod config;
pub mod error;
pub mod types;

pub use config::ClickflowConfig;
pub use error::{ClickflowError, Result};
pub use types::{
    ActiveWindow, AttemptLog, DailyPlan, DailySummary, HourlyExecution, SummaryStatus, Task,
    TaskStatus, UsageRecord, VisitorStrategy,
};
