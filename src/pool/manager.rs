//! Pool manager
//!
//! Hands out proxies with per-proxy capacity enforcement, admits and retires
//! them, and runs health cycles that keep status and statistics current.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::health::{ProbeOutcome, ProxyProber};
use super::rotation::RotationPolicy;
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::models::{
    EgressDescriptor, NewProxy, PoolStatistics, Proxy, ProxyFilter, ProxyStatus, UpdateProxy,
};
use crate::repository::ProxyStore;

/// Why no proxy could be handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    /// No proxy is in the active state
    NoActiveProxies,
    /// Every active proxy is at its reservation cap
    AllSaturated,
    /// The store could not be read; already logged
    StoreError,
}

/// Outcome of an acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Acquired(EgressDescriptor),
    /// Proxying is switched off
    Disabled,
    Unavailable(Unavailable),
}

impl Acquisition {
    pub fn into_descriptor(self) -> Option<EgressDescriptor> {
        match self {
            Self::Acquired(descriptor) => Some(descriptor),
            _ => None,
        }
    }
}

/// Counts from one health cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    pub probed: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// FAILED -> ACTIVE
    pub recovered: usize,
    /// ACTIVE -> FAILED
    pub failed: usize,
    /// Probe results that could not be written back
    pub errors: usize,
    pub statistics: PoolStatistics,
}

#[derive(Debug, Clone)]
pub struct PoolManagerConfig {
    pub enabled: bool,
    /// Maximum probes in flight during a health cycle
    pub probe_concurrency: usize,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_concurrency: 50,
        }
    }
}

impl From<&PoolConfig> for PoolManagerConfig {
    fn from(pool: &PoolConfig) -> Self {
        Self {
            enabled: pool.enabled,
            probe_concurrency: pool.probe_concurrency,
        }
    }
}

pub struct PoolManager {
    store: Arc<dyn ProxyStore>,
    prober: Arc<dyn ProxyProber>,
    policy: RotationPolicy,
    enabled: AtomicBool,
    probe_concurrency: usize,
}

impl PoolManager {
    pub fn new(
        store: Arc<dyn ProxyStore>,
        prober: Arc<dyn ProxyProber>,
        policy: RotationPolicy,
        config: PoolManagerConfig,
    ) -> Self {
        Self {
            store,
            prober,
            policy,
            enabled: AtomicBool::new(config.enabled),
            probe_concurrency: config.probe_concurrency.max(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Administrative switch; reservations already handed out stay valid
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!(enabled, "Proxy pool switched");
    }

    /// Reserve a proxy and report why when none can be given.
    ///
    /// A reservation rejected by the store (the proxy filled up or failed
    /// since the listing) drops that candidate and selects again.
    pub async fn acquire(&self) -> Acquisition {
        if !self.is_enabled() {
            debug!("Proxy pool disabled, no proxy handed out");
            return Acquisition::Disabled;
        }

        let active = match self.store.list_active().await {
            Ok(proxies) => proxies,
            Err(e) => {
                error!(error = %e, "Failed to load active proxies");
                return Acquisition::Unavailable(Unavailable::StoreError);
            }
        };

        if active.is_empty() {
            warn!("No active proxies available");
            return Acquisition::Unavailable(Unavailable::NoActiveProxies);
        }

        let mut candidates: Vec<Proxy> = active.into_iter().filter(Proxy::is_candidate).collect();

        while let Some(idx) = self.policy.select_index(&candidates) {
            let proxy = candidates.swap_remove(idx);

            match self.store.increment_usage(proxy.id).await {
                Ok(Some(usage)) => {
                    info!(
                        proxy_id = proxy.id,
                        endpoint = %proxy.endpoint(),
                        current_usage = usage,
                        max_concurrent_usage = proxy.max_concurrent_usage,
                        "Assigned proxy"
                    );
                    return Acquisition::Acquired(proxy.egress_descriptor());
                }
                Ok(None) => {
                    debug!(proxy_id = proxy.id, "Reservation race lost, selecting again");
                }
                Err(e) => {
                    error!(proxy_id = proxy.id, error = %e, "Failed to reserve proxy");
                    return Acquisition::Unavailable(Unavailable::StoreError);
                }
            }
        }

        warn!("All active proxies are at capacity");
        Acquisition::Unavailable(Unavailable::AllSaturated)
    }

    /// Reserve a proxy, `None` when proxying is off or nothing is free
    pub async fn get_proxy(&self) -> Option<EgressDescriptor> {
        self.acquire().await.into_descriptor()
    }

    /// Give back a reservation obtained from [`get_proxy`](Self::get_proxy).
    ///
    /// The record owning the descriptor's username wins; a descriptor that
    /// matches no username falls back to the endpoint.
    pub async fn release_proxy(&self, descriptor: &EgressDescriptor) {
        let proxy = match self.resolve_released(descriptor).await {
            Ok(Some(proxy)) => proxy,
            Ok(None) => {
                warn!(
                    host = %descriptor.host,
                    port = descriptor.port,
                    "Released proxy is not in the pool"
                );
                return;
            }
            Err(e) => {
                error!(host = %descriptor.host, port = descriptor.port, error = %e, "Failed to resolve released proxy");
                return;
            }
        };

        match self.store.decrement_usage(proxy.id).await {
            Ok(Some(0)) => {
                warn!(proxy_id = proxy.id, "Release without reservation, usage clamped at zero");
            }
            Ok(Some(before)) => {
                info!(
                    proxy_id = proxy.id,
                    endpoint = %proxy.endpoint(),
                    current_usage = before - 1,
                    "Released proxy"
                );
            }
            Ok(None) => {
                warn!(proxy_id = proxy.id, "Proxy vanished before release");
            }
            Err(e) => {
                error!(proxy_id = proxy.id, error = %e, "Failed to release proxy");
            }
        }
    }

    async fn resolve_released(&self, descriptor: &EgressDescriptor) -> Result<Option<Proxy>> {
        let exact = self
            .store
            .get_by_identity(
                &descriptor.host,
                descriptor.port,
                descriptor.username.as_deref(),
            )
            .await?;
        match exact {
            Some(proxy) => Ok(Some(proxy)),
            None => {
                self.store
                    .get_by_endpoint(&descriptor.host, descriptor.port)
                    .await
            }
        }
    }

    /// Admit a proxy and probe it once.
    ///
    /// An endpoint that is already known returns the existing record
    /// unchanged.
    pub async fn add_proxy(&self, new: NewProxy) -> Result<Proxy> {
        let new = new.validate()?;

        if let Some(existing) = self.store.get_by_endpoint(&new.host, new.port).await? {
            info!(proxy_id = existing.id, endpoint = %existing.endpoint(), "Proxy already registered");
            return Ok(existing);
        }

        let proxy = match self.store.insert(&new).await {
            Ok(proxy) => proxy,
            Err(PoolError::DuplicateProxy { host, port }) => {
                // Lost an admission race for the same endpoint
                return self
                    .store
                    .get_by_endpoint(&host, port)
                    .await?
                    .ok_or_else(|| {
                        PoolError::Internal(format!("proxy {}:{} disappeared after insert", host, port))
                    });
            }
            Err(e) => return Err(e),
        };

        let outcome = self.prober.probe(&proxy).await;

        if outcome.healthy {
            self.store
                .record_probe_result(proxy.id, outcome.latency_ms, true)
                .await?;
            self.store
                .transition_status(proxy.id, ProxyStatus::Inactive, ProxyStatus::Active)
                .await?;
        } else {
            self.store.mark_checked(proxy.id).await?;
            self.store
                .transition_status(proxy.id, ProxyStatus::Inactive, ProxyStatus::Failed)
                .await?;
        }

        let admitted = self.get(proxy.id).await?;
        info!(
            proxy_id = admitted.id,
            endpoint = %admitted.endpoint(),
            status = %admitted.status,
            latency_ms = outcome.latency_ms,
            error = outcome.reason().as_deref().unwrap_or(""),
            "Admitted proxy"
        );

        Ok(admitted)
    }

    /// Retire an idle proxy. `false` when it is still in use, unknown, or the
    /// store failed.
    pub async fn remove_proxy(&self, id: i32) -> bool {
        match self.store.delete(id).await {
            Ok(true) => {
                info!(proxy_id = id, "Removed proxy");
                true
            }
            Ok(false) => {
                match self.store.get_by_id(id).await {
                    Ok(Some(proxy)) => warn!(
                        proxy_id = id,
                        current_usage = proxy.current_usage,
                        "Removal blocked, proxy is in use"
                    ),
                    Ok(None) => warn!(proxy_id = id, "Removal of unknown proxy"),
                    Err(e) => error!(proxy_id = id, error = %e, "Failed to inspect proxy"),
                }
                false
            }
            Err(e) => {
                error!(proxy_id = id, error = %e, "Failed to remove proxy");
                false
            }
        }
    }

    /// Change administrative fields of a proxy
    pub async fn update_proxy(&self, id: i32, update: UpdateProxy) -> Result<Proxy> {
        let update = update.validate()?;
        self.store
            .update(id, &update)
            .await?
            .ok_or(PoolError::ProxyNotFound { id })
    }

    pub async fn get(&self, id: i32) -> Result<Proxy> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or(PoolError::ProxyNotFound { id })
    }

    pub async fn list(&self, filter: &ProxyFilter) -> Result<Vec<Proxy>> {
        self.store.list(filter).await
    }

    /// Probe a proxy on demand without touching its record
    pub async fn test_proxy(&self, id: i32) -> Result<ProbeOutcome> {
        let proxy = self.get(id).await?;
        Ok(self.prober.probe(&proxy).await)
    }

    pub async fn statistics(&self) -> Result<PoolStatistics> {
        let proxies = self.store.list_all().await?;
        Ok(PoolStatistics::from_proxies(&proxies))
    }

    /// Probe every known proxy once and apply the results.
    ///
    /// Only FAILED -> ACTIVE and ACTIVE -> FAILED happen here; an INACTIVE
    /// proxy collects statistics but stays out of rotation.
    #[instrument(skip(self))]
    pub async fn run_health_cycle(&self) -> Result<CycleSummary> {
        let proxies = self.store.list_all().await?;
        info!(count = proxies.len(), "Checking health of proxies");

        let outcomes = self
            .prober
            .probe_batch(&proxies, self.probe_concurrency)
            .await;

        let mut summary = CycleSummary {
            probed: outcomes.len(),
            ..Default::default()
        };

        for proxy in &proxies {
            let Some(outcome) = outcomes.get(&proxy.id) else {
                continue;
            };

            if outcome.healthy {
                summary.healthy += 1;
            } else {
                summary.unhealthy += 1;
            }

            if let Err(e) = self.apply_cycle_probe(proxy, outcome, &mut summary).await {
                summary.errors += 1;
                warn!(proxy_id = proxy.id, error = %e, "Failed to record probe result");
            }
        }

        summary.statistics = self.statistics().await?;

        info!(
            probed = summary.probed,
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            recovered = summary.recovered,
            failed = summary.failed,
            errors = summary.errors,
            "Health cycle complete"
        );
        info!(
            total = summary.statistics.total,
            active = summary.statistics.active,
            failed = summary.statistics.failed,
            total_usage = summary.statistics.total_usage,
            avg_latency_ms = summary.statistics.avg_latency_active,
            avg_success_rate = summary.statistics.avg_success_rate_active,
            "Pool statistics"
        );

        Ok(summary)
    }

    async fn apply_cycle_probe(
        &self,
        proxy: &Proxy,
        outcome: &ProbeOutcome,
        summary: &mut CycleSummary,
    ) -> Result<()> {
        let Some(updated) = self
            .store
            .record_probe_result(proxy.id, outcome.latency_ms, outcome.healthy)
            .await?
        else {
            // Removed while the probe was in flight
            return Ok(());
        };

        match (outcome.healthy, updated.status) {
            (true, ProxyStatus::Failed) => {
                if self
                    .store
                    .transition_status(proxy.id, ProxyStatus::Failed, ProxyStatus::Active)
                    .await?
                {
                    summary.recovered += 1;
                    info!(
                        proxy_id = proxy.id,
                        endpoint = %proxy.endpoint(),
                        latency_ms = outcome.latency_ms,
                        "Proxy recovered"
                    );
                }
            }
            (false, ProxyStatus::Active) => {
                if self
                    .store
                    .transition_status(proxy.id, ProxyStatus::Active, ProxyStatus::Failed)
                    .await?
                {
                    summary.failed += 1;
                    warn!(
                        proxy_id = proxy.id,
                        endpoint = %proxy.endpoint(),
                        error = outcome.reason().as_deref().unwrap_or(""),
                        "Proxy failed health check"
                    );
                }
            }
            _ => {}
        }

        Ok(())
    }
}
