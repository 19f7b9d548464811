//! Browser-profile visitor — the expensive, more realistic strategy.
//!
//! Not a headless browser: page rendering stays out of scope. This client
//! carries the header set and cookie behavior of a real browser session and
//! dwells on the page for a randomized interval after load, which is what
//! escalation buys when the lightweight GET is being rejected.

use async_trait::async_trait;
use clickflow_core::types::VisitorStrategy;
use rand::Rng;
use std::time::{Duration, Instant};

use crate::{VisitOutcome, VisitRequest, Visitor};

/// Dwell bounds after a successful load, in milliseconds.
const DWELL_MIN_MS: u64 = 800;
const DWELL_MAX_MS: u64 = 3200;

pub struct BrowserVisitor;

impl BrowserVisitor {
    pub fn new() -> Self {
        Self
    }

    fn build_client(req: &VisitRequest) -> Result<reqwest::Client, String> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(
            reqwest::header::UPGRADE_INSECURE_REQUESTS,
            reqwest::header::HeaderValue::from_static("1"),
        );

        let mut builder = reqwest::Client::builder()
            .user_agent(req.user_agent.clone())
            .default_headers(headers)
            .cookie_store(true)
            .timeout(req.timeout)
            .redirect(reqwest::redirect::Policy::limited(10));
        if let Some(proxy) = &req.proxy {
            let proxy = reqwest::Proxy::all(format!("http://{proxy}"))
                .map_err(|e| format!("Bad proxy: {e}"))?;
            builder = builder.proxy(proxy);
        }
        builder.build().map_err(|e| format!("Client build: {e}"))
    }
}

impl Default for BrowserVisitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Visitor for BrowserVisitor {
    fn strategy(&self) -> VisitorStrategy {
        VisitorStrategy::Browser
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

        if !status.is_success() {
            let elapsed = start.elapsed().as_millis() as u64;
            return VisitOutcome::failure(elapsed, format!("HTTP {status} ({bytes} bytes)"));
        }

        // Simulated on-page dwell, so the session timing looks human
        let dwell_ms = rand::thread_rng().gen_range(DWELL_MIN_MS..=DWELL_MAX_MS);
        tokio::time::sleep(Duration::from_millis(dwell_ms)).await;

        let elapsed = start.elapsed().as_millis() as u64;
        VisitOutcome {
            success: true,
            duration_ms: elapsed,
            error: None,
            detail: format!("HTTP {status} ({bytes} bytes, dwell {dwell_ms}ms)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_target_is_failure() {
        let visitor = BrowserVisitor::new();
        let outcome = visitor
            .visit(&VisitRequest {
                url: "http://nonexistent.invalid/page".into(),
                referer: String::new(),
                proxy: None,
                user_agent: "test-agent".into(),
                timeout: Duration::from_secs(2),
            })
            .await;
        assert!(!outcome.success);
        // Failures skip the dwell, so this returns fast
        assert!(outcome.duration_ms < 10_000);
    }
}
