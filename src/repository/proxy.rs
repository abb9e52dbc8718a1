use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use super::ProxyStore;
use crate::error::{is_unique_violation, PoolError, Result};
use crate::models::{NewProxy, Proxy, ProxyFilter, ProxyStatus, UpdateProxy};

const PROXY_COLUMNS: &str = r#"
    id, host, port, proxy_type, username, password, status,
    last_checked_at, response_time_ms, success_rate,
    total_requests, successful_requests,
    current_usage, max_concurrent_usage, weight,
    country, region, provider, notes,
    created_at, updated_at
"#;

/// PostgreSQL-backed proxy store
#[derive(Clone)]
pub struct PgProxyStore {
    pool: PgPool,
}

impl PgProxyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProxyStore for PgProxyStore {
    async fn list_active(&self) -> Result<Vec<Proxy>> {
        let sql = format!(
            "SELECT {} FROM proxies WHERE status = $1 ORDER BY id",
            PROXY_COLUMNS
        );
        let proxies = sqlx::query_as::<_, Proxy>(&sql)
            .bind(ProxyStatus::Active)
            .fetch_all(&self.pool)
            .await?;

        Ok(proxies)
    }

    async fn list_all(&self) -> Result<Vec<Proxy>> {
        let sql = format!("SELECT {} FROM proxies ORDER BY id", PROXY_COLUMNS);
        let proxies = sqlx::query_as::<_, Proxy>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(proxies)
    }

    async fn list(&self, filter: &ProxyFilter) -> Result<Vec<Proxy>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT ");
        query.push(PROXY_COLUMNS).push(" FROM proxies WHERE 1=1");

        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        if let Some(country) = filter.country_upper() {
            query.push(" AND country = ").push_bind(country);
        }

        query
            .push(" ORDER BY id LIMIT ")
            .push_bind(filter.limit())
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let proxies: Vec<Proxy> = query.build_query_as().fetch_all(&self.pool).await?;
        Ok(proxies)
    }

    async fn get_by_id(&self, id: i32) -> Result<Option<Proxy>> {
        let sql = format!("SELECT {} FROM proxies WHERE id = $1", PROXY_COLUMNS);
        let proxy = sqlx::query_as::<_, Proxy>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(proxy)
    }

    async fn get_by_endpoint(&self, host: &str, port: u16) -> Result<Option<Proxy>> {
        let sql = format!(
            "SELECT {} FROM proxies WHERE host = $1 AND port = $2 ORDER BY id LIMIT 1",
            PROXY_COLUMNS
        );
        let proxy = sqlx::query_as::<_, Proxy>(&sql)
            .bind(host)
            .bind(port as i32)
            .fetch_optional(&self.pool)
            .await?;

        Ok(proxy)
    }

    async fn get_by_identity(
        &self,
        host: &str,
        port: u16,
        username: Option<&str>,
    ) -> Result<Option<Proxy>> {
        let sql = format!(
            r#"
            SELECT {} FROM proxies
            WHERE host = $1 AND port = $2 AND COALESCE(username, '') = COALESCE($3, '')
            "#,
            PROXY_COLUMNS
        );
        let proxy = sqlx::query_as::<_, Proxy>(&sql)
            .bind(host)
            .bind(port as i32)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(proxy)
    }

    async fn insert(&self, new: &NewProxy) -> Result<Proxy> {
        let sql = format!(
            r#"
            INSERT INTO proxies (
                host, port, proxy_type, username, password, status,
                max_concurrent_usage, weight, country, region, provider, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            PROXY_COLUMNS
        );
        let proxy = sqlx::query_as::<_, Proxy>(&sql)
            .bind(&new.host)
            .bind(new.port as i32)
            .bind(new.kind)
            .bind(&new.username)
            .bind(&new.password)
            .bind(ProxyStatus::Inactive)
            .bind(new.max_concurrent_usage)
            .bind(new.weight)
            .bind(&new.country)
            .bind(&new.region)
            .bind(&new.provider)
            .bind(&new.notes)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PoolError::from_insert(e, &new.host, new.port))?;

        info!(id = proxy.id, endpoint = %proxy.endpoint(), "Created proxy");
        Ok(proxy)
    }

    async fn update(&self, id: i32, update: &UpdateProxy) -> Result<Option<Proxy>> {
        let sql = format!(
            r#"
            UPDATE proxies
            SET username = COALESCE($2, username),
                password = COALESCE($3, password),
                max_concurrent_usage = COALESCE($4, max_concurrent_usage),
                weight = COALESCE($5, weight),
                status = COALESCE($6, status),
                country = COALESCE($7, country),
                region = COALESCE($8, region),
                provider = COALESCE($9, provider),
                notes = COALESCE($10, notes)
            WHERE id = $1
            RETURNING {}
            "#,
            PROXY_COLUMNS
        );
        let proxy = sqlx::query_as::<_, Proxy>(&sql)
            .bind(id)
            .bind(&update.username)
            .bind(&update.password)
            .bind(update.max_concurrent_usage)
            .bind(update.weight)
            .bind(update.status)
            .bind(&update.country)
            .bind(&update.region)
            .bind(&update.provider)
            .bind(&update.notes)
            .fetch_optional(&self.pool)
            .await;

        let proxy = match proxy {
            Ok(proxy) => proxy,
            Err(e) if is_unique_violation(&e) => {
                // A username change collided with another record on the same endpoint
                return Err(match self.get_by_id(id).await? {
                    Some(current) => PoolError::DuplicateProxy {
                        host: current.host,
                        port: current.port as u16,
                    },
                    None => PoolError::Database(e),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(ref p) = proxy {
            info!(id = p.id, endpoint = %p.endpoint(), "Updated proxy");
        }

        Ok(proxy)
    }

    async fn delete(&self, id: i32) -> Result<bool> {
        let result = sqlx::query("DELETE FROM proxies WHERE id = $1 AND current_usage = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(id = id, "Deleted proxy");
        }

        Ok(deleted)
    }

    async fn increment_usage(&self, id: i32) -> Result<Option<i32>> {
        let usage = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE proxies
            SET current_usage = current_usage + 1
            WHERE id = $1
              AND status = $2
              AND current_usage < max_concurrent_usage
            RETURNING current_usage
            "#,
        )
        .bind(id)
        .bind(ProxyStatus::Active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(usage)
    }

    async fn decrement_usage(&self, id: i32) -> Result<Option<i32>> {
        let before = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE proxies p
            SET current_usage = GREATEST(p.current_usage - 1, 0)
            FROM (SELECT id, current_usage FROM proxies WHERE id = $1 FOR UPDATE) prev
            WHERE p.id = prev.id
            RETURNING prev.current_usage
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(before)
    }

    async fn record_probe_result(
        &self,
        id: i32,
        latency_ms: f64,
        success: bool,
    ) -> Result<Option<Proxy>> {
        let sql = format!(
            r#"
            UPDATE proxies
            SET total_requests = total_requests + 1,
                successful_requests = successful_requests + CASE WHEN $3 THEN 1 ELSE 0 END,
                success_rate = (successful_requests + CASE WHEN $3 THEN 1 ELSE 0 END)::DOUBLE PRECISION
                    / (total_requests + 1),
                response_time_ms = CASE
                    WHEN response_time_ms IS NULL THEN $2
                    ELSE response_time_ms * 0.8 + $2 * 0.2
                END,
                last_checked_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PROXY_COLUMNS
        );
        let proxy = sqlx::query_as::<_, Proxy>(&sql)
            .bind(id)
            .bind(latency_ms)
            .bind(success)
            .fetch_optional(&self.pool)
            .await?;

        Ok(proxy)
    }

    async fn mark_checked(&self, id: i32) -> Result<()> {
        sqlx::query("UPDATE proxies SET last_checked_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn transition_status(
        &self,
        id: i32,
        from: ProxyStatus,
        to: ProxyStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE proxies SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from)
            .bind(to)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
