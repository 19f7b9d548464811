//! # ClickFlow Visitor
//!
//! The visit boundary: one trait, two interchangeable strategies.
//! A visit never returns `Err` — network failures, timeouts, and bad
//! responses are data on the outcome, because the execution engine feeds
//! them into its success-rate signal rather than propagating them.

pub mod browser;
pub mod http;
pub mod proxy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clickflow_core::types::VisitorStrategy;

pub use browser::BrowserVisitor;
pub use http::HttpVisitor;
pub use proxy::ProxyPool;

/// Everything one visit needs.
#[derive(Debug, Clone)]
pub struct VisitRequest {
    pub url: String,
    pub referer: String,
    /// `host:port`, already resolved from the rotating pool.
    pub proxy: Option<String>,
    pub user_agent: String,
    /// Hard cap — a visit that exceeds this is a failure, not a hang.
    pub timeout: Duration,
}

/// Outcome of one visit attempt.
#[derive(Debug, Clone)]
pub struct VisitOutcome {
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Raw diagnostic detail (status line, byte count, dwell).
    pub detail: String,
}

impl VisitOutcome {
    pub fn failure(duration_ms: u64, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            duration_ms,
            detail: error.clone(),
            error: Some(error),
        }
    }
}

/// A visiting strategy. Implementations must be cheap to share — the
/// engine holds one instance per strategy for the whole process.
#[async_trait]
pub trait Visitor: Send + Sync {
    /// Which strategy this visitor implements.
    fn strategy(&self) -> VisitorStrategy;

    /// Perform one visit. Failures are reported on the outcome, never as Err.
    async fn visit(&self, req: &VisitRequest) -> VisitOutcome;
}

/// Maps a plan's current strategy to a concrete visitor.
/// Injected into the engine so tests can swap in scripted doubles.
#[derive(Clone)]
pub struct VisitorFactory {
    lightweight: Arc<dyn Visitor>,
    browser: Arc<dyn Visitor>,
}

impl VisitorFactory {
    pub fn new(lightweight: Arc<dyn Visitor>, browser: Arc<dyn Visitor>) -> Self {
        Self { lightweight, browser }
    }

    /// Production wiring: reqwest-backed visitors for both strategies.
    pub fn standard() -> Self {
        Self::new(Arc::new(HttpVisitor::new()), Arc::new(BrowserVisitor::new()))
    }

    pub fn for_strategy(&self, strategy: VisitorStrategy) -> Arc<dyn Visitor> {
        match strategy {
            VisitorStrategy::Lightweight => Arc::clone(&self.lightweight),
            VisitorStrategy::Browser => Arc::clone(&self.browser),
        }
    }
}
