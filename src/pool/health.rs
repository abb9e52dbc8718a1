//! Health probing for upstream proxies
//!
//! A probe sends one HTTP request through the proxy to an IP echo endpoint
//! and expects a 2xx answer whose body carries an IP address.

use std::any::Any;
use std::collections::HashMap;
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use rand::seq::SliceRandom;
use serde::{Serialize, Serializer};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::config::PoolConfig;
use crate::models::Proxy;

/// Why a probe did not count as healthy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeFailure {
    #[error("timeout")]
    Timeout,

    #[error("http_status:{0}")]
    HttpStatus(u16),

    #[error("invalid_response_body")]
    InvalidResponseBody,

    #[error("transport_error:{0}")]
    Transport(String),

    /// The probe task itself panicked
    #[error("probe_fault:{0}")]
    Fault(String),
}

impl Serialize for ProbeFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<reqwest::Error> for ProbeFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeFailure::Timeout
        } else {
            ProbeFailure::Transport(error_chain(&err))
        }
    }
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub healthy: bool,
    /// Measured from dispatch to full body, also on failure
    pub latency_ms: f64,
    pub error: Option<ProbeFailure>,
}

impl ProbeOutcome {
    pub fn healthy(latency_ms: f64) -> Self {
        Self {
            healthy: true,
            latency_ms,
            error: None,
        }
    }

    pub fn failed(latency_ms: f64, failure: ProbeFailure) -> Self {
        Self {
            healthy: false,
            latency_ms,
            error: Some(failure),
        }
    }

    /// Failure reason as it is logged and reported
    pub fn reason(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Anything that can judge a proxy's health
#[async_trait]
pub trait ProxyProber: Send + Sync {
    /// Probe one proxy. Never fails; problems are folded into the outcome.
    async fn probe(&self, proxy: &Proxy) -> ProbeOutcome;

    /// Probe many proxies with at most `concurrency` probes in flight.
    ///
    /// A probe that panics is recorded as [`ProbeFailure::Fault`] instead of
    /// taking the batch down.
    async fn probe_batch(&self, proxies: &[Proxy], concurrency: usize) -> HashMap<i32, ProbeOutcome> {
        let probes: Vec<_> = proxies
            .iter()
            .map(|proxy| async move {
                let start = Instant::now();
                let outcome = AssertUnwindSafe(self.probe(proxy))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        let msg = panic_message(panic.as_ref());
                        warn!(proxy_id = proxy.id, error = %msg, "Probe panicked");
                        ProbeOutcome::failed(elapsed_ms(start), ProbeFailure::Fault(msg))
                    });
                (proxy.id, outcome)
            })
            .collect();

        futures::stream::iter(probes)
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }
}

/// Health checker configuration
#[derive(Debug, Clone)]
pub struct HealthCheckerConfig {
    /// Echo endpoints; one is picked at random per probe
    pub probe_urls: Vec<String>,
    /// Timeout for each probe
    pub probe_timeout: Duration,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for HealthCheckerConfig {
    fn from(pool: &PoolConfig) -> Self {
        Self {
            probe_urls: pool.probe_urls.clone(),
            probe_timeout: pool.probe_timeout(),
        }
    }
}

/// HTTP prober going through the proxy under test
pub struct HealthChecker {
    config: HealthCheckerConfig,
}

impl HealthChecker {
    pub fn new(config: HealthCheckerConfig) -> Self {
        Self { config }
    }

    fn pick_url(&self) -> Option<&str> {
        self.config
            .probe_urls
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }

    async fn fetch(&self, proxy: &Proxy) -> Result<(), ProbeFailure> {
        let target = self
            .pick_url()
            .ok_or_else(|| ProbeFailure::Transport("no probe endpoints configured".into()))?;

        let upstream = reqwest::Proxy::all(proxy.egress_descriptor().url())
            .map_err(|e| ProbeFailure::Transport(error_chain(&e)))?;

        let client = reqwest::Client::builder()
            .proxy(upstream)
            .timeout(self.config.probe_timeout)
            .build()
            .map_err(|e| ProbeFailure::Transport(error_chain(&e)))?;

        debug!(target_url = target, "Dispatching probe");

        let response = client.get(target).send().await?;
        let status = response.status();
        let body = response.text().await;

        if !status.is_success() {
            return Err(ProbeFailure::HttpStatus(status.as_u16()));
        }

        if looks_like_ip(&body?) {
            Ok(())
        } else {
            Err(ProbeFailure::InvalidResponseBody)
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthCheckerConfig::default())
    }
}

#[async_trait]
impl ProxyProber for HealthChecker {
    #[instrument(skip(self, proxy), fields(proxy_id = proxy.id, endpoint = %proxy.endpoint()))]
    async fn probe(&self, proxy: &Proxy) -> ProbeOutcome {
        let start = Instant::now();
        let result = timeout(self.config.probe_timeout, self.fetch(proxy)).await;
        let latency_ms = elapsed_ms(start);

        match result {
            Ok(Ok(())) => {
                debug!(latency_ms, "Proxy is healthy");
                ProbeOutcome::healthy(latency_ms)
            }
            Ok(Err(failure)) => {
                debug!(latency_ms, error = %failure, "Proxy probe failed");
                ProbeOutcome::failed(latency_ms, failure)
            }
            Err(_) => {
                debug!(latency_ms, "Proxy probe timed out");
                ProbeOutcome::failed(latency_ms, ProbeFailure::Timeout)
            }
        }
    }
}

/// True when some token of hex digits, dots and colons is an IP address.
///
/// Punctuation glued to an address (`ip:1.2.3.4`, `1.2.3.4.`) is tolerated.
pub fn looks_like_ip(body: &str) -> bool {
    body.split(|c: char| !(c.is_ascii_hexdigit() || c == '.' || c == ':'))
        .map(|token| token.trim_matches(|c| c == '.' || c == ':'))
        .filter(|token| !token.is_empty())
        .any(|token| {
            token.parse::<IpAddr>().is_ok()
                || token
                    .split(':')
                    .any(|part| part.parse::<std::net::Ipv4Addr>().is_ok())
        })
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
