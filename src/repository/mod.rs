//! Proxy persistence
//!
//! The pool manager only talks to storage through [`ProxyStore`]. Every
//! mutating method is atomic per proxy: the PostgreSQL store does each one in
//! a single statement, the in-memory store under the record's map lock.

pub mod memory;
pub mod proxy;

pub use memory::MemoryProxyStore;
pub use proxy::PgProxyStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewProxy, Proxy, ProxyFilter, ProxyStatus, UpdateProxy};

#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Proxies with status `active`, ordered by id
    async fn list_active(&self) -> Result<Vec<Proxy>>;

    /// Every proxy regardless of status, ordered by id
    async fn list_all(&self) -> Result<Vec<Proxy>>;

    /// Filtered, paginated listing
    async fn list(&self, filter: &ProxyFilter) -> Result<Vec<Proxy>>;

    async fn get_by_id(&self, id: i32) -> Result<Option<Proxy>>;

    /// Lookup by endpoint; the lowest id wins if several usernames share it
    async fn get_by_endpoint(&self, host: &str, port: u16) -> Result<Option<Proxy>>;

    /// Lookup by the full uniqueness key; a missing username matches only
    /// records without one
    async fn get_by_identity(
        &self,
        host: &str,
        port: u16,
        username: Option<&str>,
    ) -> Result<Option<Proxy>>;

    /// Insert with status `inactive` and zeroed counters.
    ///
    /// Fails with `DuplicateProxy` when `(host, port, username)` is taken.
    async fn insert(&self, new: &NewProxy) -> Result<Proxy>;

    /// Apply administrative changes
    async fn update(&self, id: i32, update: &UpdateProxy) -> Result<Option<Proxy>>;

    /// Delete the record if it holds no reservations
    async fn delete(&self, id: i32) -> Result<bool>;

    /// Reserve one slot. Succeeds only while the proxy is active and under its
    /// cap; returns the new usage, or `None` if the reservation was rejected.
    async fn increment_usage(&self, id: i32) -> Result<Option<i32>>;

    /// Release one slot, clamped at zero. Returns the usage before the
    /// decrement, or `None` if the proxy does not exist.
    async fn decrement_usage(&self, id: i32) -> Result<Option<i32>>;

    /// Fold one probe into the rolling statistics and stamp `last_checked_at`
    async fn record_probe_result(
        &self,
        id: i32,
        latency_ms: f64,
        success: bool,
    ) -> Result<Option<Proxy>>;

    /// Stamp `last_checked_at` without touching counters
    async fn mark_checked(&self, id: i32) -> Result<()>;

    /// Compare-and-set on status; `false` if the current status is not `from`
    async fn transition_status(&self, id: i32, from: ProxyStatus, to: ProxyStatus)
        -> Result<bool>;
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::error::PoolError;

    /// In-memory store whose reads and writes can be switched to fail
    #[derive(Default)]
    pub(crate) struct FlakyStore {
        pub(crate) inner: MemoryProxyStore,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        list_all_calls: AtomicUsize,
    }

    impl FlakyStore {
        pub(crate) fn failing() -> Self {
            let store = Self::default();
            store.fail_reads(true);
            store.fail_writes(true);
            store
        }

        pub(crate) fn fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn list_all_calls(&self) -> usize {
            self.list_all_calls.load(Ordering::SeqCst)
        }

        fn read(&self) -> Result<()> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(PoolError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }

        fn write(&self) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(PoolError::Database(sqlx::Error::PoolClosed));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ProxyStore for FlakyStore {
        async fn list_active(&self) -> Result<Vec<Proxy>> {
            self.read()?;
            self.inner.list_active().await
        }

        async fn list_all(&self) -> Result<Vec<Proxy>> {
            self.list_all_calls.fetch_add(1, Ordering::SeqCst);
            self.read()?;
            self.inner.list_all().await
        }

        async fn list(&self, filter: &ProxyFilter) -> Result<Vec<Proxy>> {
            self.read()?;
            self.inner.list(filter).await
        }

        async fn get_by_id(&self, id: i32) -> Result<Option<Proxy>> {
            self.read()?;
            self.inner.get_by_id(id).await
        }

        async fn get_by_endpoint(&self, host: &str, port: u16) -> Result<Option<Proxy>> {
            self.read()?;
            self.inner.get_by_endpoint(host, port).await
        }

        async fn get_by_identity(
            &self,
            host: &str,
            port: u16,
            username: Option<&str>,
        ) -> Result<Option<Proxy>> {
            self.read()?;
            self.inner.get_by_identity(host, port, username).await
        }

        async fn insert(&self, new: &NewProxy) -> Result<Proxy> {
            self.write()?;
            self.inner.insert(new).await
        }

        async fn update(&self, id: i32, update: &UpdateProxy) -> Result<Option<Proxy>> {
            self.write()?;
            self.inner.update(id, update).await
        }

        async fn delete(&self, id: i32) -> Result<bool> {
            self.write()?;
            self.inner.delete(id).await
        }

        async fn increment_usage(&self, id: i32) -> Result<Option<i32>> {
            self.write()?;
            self.inner.increment_usage(id).await
        }

        async fn decrement_usage(&self, id: i32) -> Result<Option<i32>> {
            self.write()?;
            self.inner.decrement_usage(id).await
        }

        async fn record_probe_result(
            &self,
            id: i32,
            latency_ms: f64,
            success: bool,
        ) -> Result<Option<Proxy>> {
            self.write()?;
            self.inner.record_probe_result(id, latency_ms, success).await
        }

        async fn mark_checked(&self, id: i32) -> Result<()> {
            self.write()?;
            self.inner.mark_checked(id).await
        }

        async fn transition_status(
            &self,
            id: i32,
            from: ProxyStatus,
            to: ProxyStatus,
        ) -> Result<bool> {
            self.write()?;
            self.inner.transition_status(id, from, to).await
        }
    }
}
