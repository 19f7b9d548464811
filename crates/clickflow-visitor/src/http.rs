//! Lightweight HTTP visitor — a single GET per visit.

use async_trait::async_trait;
use clickflow_core::types::VisitorStrategy;
use std::time::Instant;

use crate::{VisitOutcome, VisitRequest, Visitor};

/// The cheap strategy: one GET with referer and fixed user agent.
/// A client is built per visit because the proxy can change every attempt.
pub struct HttpVisitor;

impl HttpVisitor {
    pub fn new() -> Self {
        Self
    }

    fn build_client(req: &VisitRequest) -> Result<reqwest::Client, String> {
        let mut builder = reqwest::Client::builder()
            .user_agent(req.user_agent.clone())
            .timeout(req.timeout)
            .redirect(reqwest::redirect::Policy::limited(5));
        if let Some(proxy) = &req.proxy {
            let proxy = reqwest::Proxy::all(format!("http://{proxy}"))
                .map_err(|e| format!("Bad proxy: {e}"))?;
            builder = builder.proxy(proxy);
        }
        builder.build().map_err(|e| format!("Client build: {e}"))
    }
}

impl Default for HttpVisitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Visitor for HttpVisitor {
    fn strategy(&self) -> VisitorStrategy {
        VisitorStrategy::Lightweight
    }

    async fn visit(&self, req: &VisitRequest) -> VisitOutcome {
        let start = Instant::now();

        let client = match Self::build_client(req) {
            Ok(c) => c,
            Err(e) => return VisitOutcome::failure(0, e),
        };

        let mut request = client.get(&req.url);
        if !req.referer.is_empty() {
            request = request.header(reqwest::header::REFERER, &req.referer);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as u64;
                let kind = if e.is_timeout() { "timeout" } else { "request failed" };
                return VisitOutcome::failure(elapsed, format!("{kind}: {e}"));
            }
        };

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(b) => b.len(),
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as u64;
                return VisitOutcome::failure(elapsed, format!("Read body: {e}"));
            }
        };

        let elapsed = start.elapsed().as_millis() as u64;
        let detail = format!("HTTP {status} ({bytes} bytes)");
        if status.is_success() {
            VisitOutcome {
                success: true,
                duration_ms: elapsed,
                error: None,
                detail,
            }
        } else {
            VisitOutcome::failure(elapsed, detail)
        }
    }
}
