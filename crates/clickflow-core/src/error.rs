//! Workspace-wide error type.

/// Convenience alias used across all ClickFlow crates.
pub type Result<T> = std::result::Result<T, ClickflowError>;

/// All error categories the scheduler core can surface.
///
/// Per-attempt visit failures are *not* errors — they are recorded as data
/// on the hourly execution and feed the strategy-escalation signal.
#[derive(Debug, thiserror::Error)]
pub enum ClickflowError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Token ledger error: {0}")]
    Ledger(String),

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Visitor error: {0}")]
    Visitor(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
