//! Rotating proxy source.
//!
//! Fetches `host:port` lines from a configured HTTP endpoint, caches them,
//! and hands them out round-robin. The pool is best-effort: when the
//! endpoint is down or unset, visits simply go direct.

use std::time::Duration;

use tokio::sync::Mutex;

struct PoolState {
    proxies: Vec<String>,
    cursor: usize,
}

pub struct ProxyPool {
    endpoint: Option<String>,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    /// Pool backed by an HTTP list endpoint. `None` disables proxying.
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            state: Mutex::new(PoolState {
                proxies: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Fixed pool, no endpoint. Used by tests and static configurations.
    pub fn from_static(proxies: Vec<String>) -> Self {
        Self {
            endpoint: None,
            state: Mutex::new(PoolState { proxies, cursor: 0 }),
        }
    }

    /// Next proxy address, or `None` when the pool is disabled or empty.
    pub async fn next(&self) -> Option<String> {
        let mut state = self.state.lock().await;

        if state.proxies.is_empty() {
            if let Some(endpoint) = &self.endpoint {
                match Self::fetch_list(endpoint).await {
                    Ok(list) => {
                        tracing::info!("Proxy pool refreshed: {} entries", list.len());
                        state.proxies = list;
                        state.cursor = 0;
                    }
                    Err(e) => {
                        tracing::warn!("Proxy pool refresh failed, visits go direct: {e}");
                    }
                }
            }
        }

        if state.proxies.is_empty() {
            return None;
        }
        let proxy = state.proxies[state.cursor % state.proxies.len()].clone();
        state.cursor = state.cursor.wrapping_add(1);
        Some(proxy)
    }

    async fn fetch_list(endpoint: &str) -> Result<Vec<String>, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| format!("Client build: {e}"))?;
        let body = client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| format!("Fetch: {e}"))?
            .text()
            .await
            .map_err(|e| format!("Read: {e}"))?;

        let list: Vec<String> = body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && l.contains(':'))
            .map(String::from)
            .collect();
        if list.is_empty() {
            return Err("endpoint returned no usable proxies".into());
        }
        Ok(list)
    }
}
