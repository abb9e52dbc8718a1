//! In-process proxy store
//!
//! Records live in a `DashMap`; every mutation runs while holding the
//! record's shard lock, which gives the same per-proxy atomicity the SQL
//! store gets from single-statement updates.

use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use super::ProxyStore;
use crate::error::{PoolError, Result};
use crate::models::{NewProxy, Proxy, ProxyFilter, ProxyStatus, UpdateProxy};

#[derive(Debug)]
pub struct MemoryProxyStore {
    proxies: DashMap<i32, Proxy>,
    next_id: AtomicI32,
    /// Serializes inserts so the uniqueness check and the insert are one step
    insert_lock: Mutex<()>,
}

impl MemoryProxyStore {
    pub fn new() -> Self {
        Self {
            proxies: DashMap::new(),
            next_id: AtomicI32::new(1),
            insert_lock: Mutex::new(()),
        }
    }

    /// Whether another record already owns `(host, port, username)`
    fn endpoint_taken(
        &self,
        host: &str,
        port: i32,
        username: Option<&str>,
        except: Option<i32>,
    ) -> bool {
        let username = username.unwrap_or("");
        self.proxies.iter().any(|entry| {
            let p = entry.value();
            Some(p.id) != except
                && p.host == host
                && p.port == port
                && p.username.as_deref().unwrap_or("") == username
        })
    }

    fn sorted(&self, keep: impl Fn(&Proxy) -> bool) -> Vec<Proxy> {
        let mut proxies: Vec<Proxy> = self
            .proxies
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        proxies.sort_by_key(|p| p.id);
        proxies
    }
}

impl Default for MemoryProxyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyStore for MemoryProxyStore {
    async fn list_active(&self) -> Result<Vec<Proxy>> {
        Ok(self.sorted(|p| p.status == ProxyStatus::Active))
    }

    async fn list_all(&self) -> Result<Vec<Proxy>> {
        Ok(self.sorted(|_| true))
    }

    async fn list(&self, filter: &ProxyFilter) -> Result<Vec<Proxy>> {
        Ok(self
            .sorted(|p| filter.matches(p))
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn get_by_id(&self, id: i32) -> Result<Option<Proxy>> {
        Ok(self.proxies.get(&id).map(|p| p.value().clone()))
    }

    async fn get_by_endpoint(&self, host: &str, port: u16) -> Result<Option<Proxy>> {
        Ok(self
            .sorted(|p| p.host == host && p.port == port as i32)
            .into_iter()
            .next())
    }

    async fn get_by_identity(
        &self,
        host: &str,
        port: u16,
        username: Option<&str>,
    ) -> Result<Option<Proxy>> {
        let username = username.unwrap_or("");
        Ok(self
            .proxies
            .iter()
            .find(|entry| {
                let p = entry.value();
                p.host == host
                    && p.port == port as i32
                    && p.username.as_deref().unwrap_or("") == username
            })
            .map(|entry| entry.value().clone()))
    }

    async fn insert(&self, new: &NewProxy) -> Result<Proxy> {
        let _guard = self.insert_lock.lock();

        if self.endpoint_taken(&new.host, new.port as i32, new.username.as_deref(), None) {
            return Err(PoolError::DuplicateProxy {
                host: new.host.clone(),
                port: new.port,
            });
        }

        let now = Utc::now();
        let proxy = Proxy {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            host: new.host.clone(),
            port: new.port as i32,
            kind: new.kind,
            username: new.username.clone(),
            password: new.password.clone(),
            status: ProxyStatus::Inactive,
            last_checked_at: None,
            response_time_ms: None,
            success_rate: 0.0,
            total_requests: 0,
            successful_requests: 0,
            current_usage: 0,
            max_concurrent_usage: new.max_concurrent_usage,
            weight: new.weight,
            country: new.country.clone(),
            region: new.region.clone(),
            provider: new.provider.clone(),
            notes: new.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        self.proxies.insert(proxy.id, proxy.clone());

        info!(id = proxy.id, endpoint = %proxy.endpoint(), "Created proxy");
        Ok(proxy)
    }

    async fn update(&self, id: i32, update: &UpdateProxy) -> Result<Option<Proxy>> {
        // Username changes move the record to another uniqueness key
        let _guard = self.insert_lock.lock();

        let Some(current) = self.proxies.get(&id).map(|p| p.value().clone()) else {
            return Ok(None);
        };
        if let Some(username) = update.username.as_deref() {
            if self.endpoint_taken(&current.host, current.port, Some(username), Some(id)) {
                return Err(PoolError::DuplicateProxy {
                    host: current.host,
                    port: current.port as u16,
                });
            }
        }

        let Some(mut entry) = self.proxies.get_mut(&id) else {
            return Ok(None);
        };
        update.apply_to(entry.value_mut());
        entry.updated_at = Utc::now();

        info!(id = id, endpoint = %entry.endpoint(), "Updated proxy");
        Ok(Some(entry.value().clone()))
    }

    async fn delete(&self, id: i32) -> Result<bool> {
        let deleted = self
            .proxies
            .remove_if(&id, |_, p| p.current_usage == 0)
            .is_some();
        if deleted {
            info!(id = id, "Deleted proxy");
        }
        Ok(deleted)
    }

    async fn increment_usage(&self, id: i32) -> Result<Option<i32>> {
        let Some(mut entry) = self.proxies.get_mut(&id) else {
            return Ok(None);
        };
        if !entry.is_candidate() {
            return Ok(None);
        }
        entry.current_usage += 1;
        entry.updated_at = Utc::now();
        Ok(Some(entry.current_usage))
    }

    async fn decrement_usage(&self, id: i32) -> Result<Option<i32>> {
        let Some(mut entry) = self.proxies.get_mut(&id) else {
            return Ok(None);
        };
        let before = entry.current_usage;
        entry.current_usage = (before - 1).max(0);
        entry.updated_at = Utc::now();
        Ok(Some(before))
    }

    async fn record_probe_result(
        &self,
        id: i32,
        latency_ms: f64,
        success: bool,
    ) -> Result<Option<Proxy>> {
        let Some(mut entry) = self.proxies.get_mut(&id) else {
            return Ok(None);
        };
        let now = Utc::now();
        entry.apply_probe(latency_ms, success, now);
        entry.updated_at = now;
        Ok(Some(entry.value().clone()))
    }

    async fn mark_checked(&self, id: i32) -> Result<()> {
        if let Some(mut entry) = self.proxies.get_mut(&id) {
            let now = Utc::now();
            entry.last_checked_at = Some(now);
            entry.updated_at = now;
        }
        Ok(())
    }

    async fn transition_status(
        &self,
        id: i32,
        from: ProxyStatus,
        to: ProxyStatus,
    ) -> Result<bool> {
        let Some(mut entry) = self.proxies.get_mut(&id) else {
            return Ok(false);
        };
        if entry.status != from {
            return Ok(false);
        }
        entry.status = to;
        entry.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    async fn active_proxy(store: &MemoryProxyStore, host: &str, max: i32) -> Proxy {
        let proxy = store
            .insert(&NewProxy::new(host, 8080).max_concurrent(max))
            .await
            .unwrap();
        assert!(store
            .transition_status(proxy.id, ProxyStatus::Inactive, ProxyStatus::Active)
            .await
            .unwrap());
        store.get_by_id(proxy.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_insert_starts_inactive() {
        let store = MemoryProxyStore::new();
        let proxy = assert_ok!(store.insert(&NewProxy::new("1.2.3.4", 8080)).await);

        assert_eq!(proxy.id, 1);
        assert_eq!(proxy.status, ProxyStatus::Inactive);
        assert_eq!(proxy.current_usage, 0);
        assert_eq!(proxy.response_time_ms, None);
        assert!(store.list_active().await.unwrap().is_empty());
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_triple() {
        let store = MemoryProxyStore::new();
        store.insert(&NewProxy::new("1.2.3.4", 8080)).await.unwrap();

        let err = assert_err!(store.insert(&NewProxy::new("1.2.3.4", 8080)).await);
        assert!(matches!(err, PoolError::DuplicateProxy { port: 8080, .. }));

        // a different username is a different record
        assert_ok!(
            store
                .insert(&NewProxy::new("1.2.3.4", 8080).credentials("bob", "pw"))
                .await
        );
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_by_endpoint_prefers_lowest_id() {
        let store = MemoryProxyStore::new();
        let first = store.insert(&NewProxy::new("1.2.3.4", 8080)).await.unwrap();
        store
            .insert(&NewProxy::new("1.2.3.4", 8080).credentials("bob", "pw"))
            .await
            .unwrap();

        let found = store.get_by_endpoint("1.2.3.4", 8080).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(store.get_by_endpoint("1.2.3.4", 9090).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_by_identity_matches_username() {
        let store = MemoryProxyStore::new();
        let anonymous = store.insert(&NewProxy::new("1.2.3.4", 8080)).await.unwrap();
        let bob = store
            .insert(&NewProxy::new("1.2.3.4", 8080).credentials("bob", "pw"))
            .await
            .unwrap();

        let found = store.get_by_identity("1.2.3.4", 8080, Some("bob")).await.unwrap();
        assert_eq!(found.map(|p| p.id), Some(bob.id));
        let found = store.get_by_identity("1.2.3.4", 8080, None).await.unwrap();
        assert_eq!(found.map(|p| p.id), Some(anonymous.id));
        assert!(store
            .get_by_identity("1.2.3.4", 8080, Some("carol"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_increment_respects_cap_and_status() {
        let store = MemoryProxyStore::new();
        let proxy = active_proxy(&store, "1.2.3.4", 2).await;

        assert_eq!(store.increment_usage(proxy.id).await.unwrap(), Some(1));
        assert_eq!(store.increment_usage(proxy.id).await.unwrap(), Some(2));
        assert_eq!(store.increment_usage(proxy.id).await.unwrap(), None);

        store
            .transition_status(proxy.id, ProxyStatus::Active, ProxyStatus::Failed)
            .await
            .unwrap();
        store.decrement_usage(proxy.id).await.unwrap();
        assert_eq!(store.increment_usage(proxy.id).await.unwrap(), None);
        assert_eq!(store.increment_usage(999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_decrement_clamps_at_zero() {
        let store = MemoryProxyStore::new();
        let proxy = active_proxy(&store, "1.2.3.4", 2).await;

        store.increment_usage(proxy.id).await.unwrap();
        assert_eq!(store.decrement_usage(proxy.id).await.unwrap(), Some(1));
        assert_eq!(store.decrement_usage(proxy.id).await.unwrap(), Some(0));

        let after = store.get_by_id(proxy.id).await.unwrap().unwrap();
        assert_eq!(after.current_usage, 0);
        assert_eq!(store.decrement_usage(999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_only_when_idle() {
        let store = MemoryProxyStore::new();
        let proxy = active_proxy(&store, "1.2.3.4", 2).await;

        store.increment_usage(proxy.id).await.unwrap();
        assert!(!store.delete(proxy.id).await.unwrap());
        assert!(store.get_by_id(proxy.id).await.unwrap().is_some());

        store.decrement_usage(proxy.id).await.unwrap();
        assert!(store.delete(proxy.id).await.unwrap());
        assert!(store.get_by_id(proxy.id).await.unwrap().is_none());
        assert!(!store.delete(proxy.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_probe_result_smooths_latency() {
        let store = MemoryProxyStore::new();
        let proxy = active_proxy(&store, "1.2.3.4", 2).await;

        store.record_probe_result(proxy.id, 100.0, true).await.unwrap();
        let updated = store
            .record_probe_result(proxy.id, 200.0, false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.total_requests, 2);
        assert_eq!(updated.successful_requests, 1);
        assert!((updated.success_rate - 0.5).abs() < 1e-9);
        assert!((updated.response_time_ms.unwrap() - 120.0).abs() < 1e-9);
        assert!(updated.last_checked_at.is_some());
        assert!(store.record_probe_result(999, 1.0, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = MemoryProxyStore::new();
        let proxy = store.insert(&NewProxy::new("1.2.3.4", 8080)).await.unwrap();

        assert!(!store
            .transition_status(proxy.id, ProxyStatus::Active, ProxyStatus::Failed)
            .await
            .unwrap());
        assert!(store
            .transition_status(proxy.id, ProxyStatus::Inactive, ProxyStatus::Failed)
            .await
            .unwrap());
        let after = store.get_by_id(proxy.id).await.unwrap().unwrap();
        assert_eq!(after.status, ProxyStatus::Failed);
    }

    #[tokio::test]
    async fn test_mark_checked_leaves_counters() {
        let store = MemoryProxyStore::new();
        let proxy = store.insert(&NewProxy::new("1.2.3.4", 8080)).await.unwrap();

        store.mark_checked(proxy.id).await.unwrap();
        let after = store.get_by_id(proxy.id).await.unwrap().unwrap();
        assert!(after.last_checked_at.is_some());
        assert_eq!(after.total_requests, 0);
    }

    #[tokio::test]
    async fn test_update_rejects_username_collision() {
        let store = MemoryProxyStore::new();
        store
            .insert(&NewProxy::new("1.2.3.4", 8080).credentials("alice", "pw"))
            .await
            .unwrap();
        let bob = store
            .insert(&NewProxy::new("1.2.3.4", 8080).credentials("bob", "pw"))
            .await
            .unwrap();

        let rename = UpdateProxy {
            username: Some("alice".to_string()),
            ..Default::default()
        };
        let err = assert_err!(store.update(bob.id, &rename).await);
        assert!(matches!(err, PoolError::DuplicateProxy { port: 8080, .. }));

        let alices = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.username.as_deref() == Some("alice"))
            .count();
        assert_eq!(alices, 1);
        assert_eq!(
            store.get_by_id(bob.id).await.unwrap().unwrap().username.as_deref(),
            Some("bob")
        );

        // keeping its own username is not a collision
        let same = UpdateProxy {
            username: Some("bob".to_string()),
            ..Default::default()
        };
        assert_ok!(store.update(bob.id, &same).await);
    }

    #[tokio::test]
    async fn test_update_and_list_filter() {
        let store = MemoryProxyStore::new();
        let a = store.insert(&NewProxy::new("1.1.1.1", 8080)).await.unwrap();
        store.insert(&NewProxy::new("2.2.2.2", 8080)).await.unwrap();

        let update = UpdateProxy {
            country: Some("US".to_string()),
            weight: Some(3.0),
            ..Default::default()
        };
        let updated = store.update(a.id, &update).await.unwrap().unwrap();
        assert_eq!(updated.weight, 3.0);
        assert!(store.update(999, &update).await.unwrap().is_none());

        let filter = ProxyFilter {
            country: Some("us".to_string()),
            ..Default::default()
        };
        let listed = store.list(&filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, a.id);

        let page = ProxyFilter {
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        };
        let listed = store.list(&page).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].host, "2.2.2.2");
    }
}
