use crate::error::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Run all pending migrations.
///
/// Each migration and its `schema_migrations` row commit together, so a
/// failed migration leaves nothing half-applied.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    create_migrations_table(pool).await?;

    for (version, name, sql) in get_migrations() {
        if is_migration_applied(pool, version).await? {
            continue;
        }

        info!(version = version, name = name, "Applying migration");

        let mut tx = pool.begin().await?;
        // Simple-query execution: a migration may hold several statements
        (&mut *tx).execute(sql).await?;
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(version)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version = version, name = name, "Migration applied successfully");
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .await?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let applied = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM schema_migrations WHERE version = $1)",
    )
    .bind(version)
    .fetch_one(pool)
    .await?;

    Ok(applied)
}

/// Get all migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "proxies_table", MIGRATION_001_PROXIES),
        (2, "proxies_unique_endpoint", MIGRATION_002_UNIQUE_ENDPOINT),
    ]
}

// Migration 1: proxies table
const MIGRATION_001_PROXIES: &str = r#"
CREATE TABLE IF NOT EXISTS proxies (
    id SERIAL PRIMARY KEY,
    host VARCHAR(255) NOT NULL,
    port INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
    proxy_type VARCHAR(20) NOT NULL DEFAULT 'http',
    username VARCHAR(255),
    password TEXT,
    status VARCHAR(20) NOT NULL DEFAULT 'inactive',
    last_checked_at TIMESTAMPTZ,
    response_time_ms DOUBLE PRECISION,
    success_rate DOUBLE PRECISION NOT NULL DEFAULT 0,
    total_requests BIGINT NOT NULL DEFAULT 0,
    successful_requests BIGINT NOT NULL DEFAULT 0,
    current_usage INTEGER NOT NULL DEFAULT 0 CHECK (current_usage >= 0),
    max_concurrent_usage INTEGER NOT NULL DEFAULT 5 CHECK (max_concurrent_usage >= 1),
    weight DOUBLE PRECISION NOT NULL DEFAULT 1.0 CHECK (weight > 0),
    country VARCHAR(2),
    region VARCHAR(100),
    provider VARCHAR(100),
    notes TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_proxies_status ON proxies(status);
CREATE INDEX IF NOT EXISTS idx_proxies_endpoint ON proxies(host, port);

-- Updated_at trigger
CREATE OR REPLACE FUNCTION update_updated_at_column()
RETURNS TRIGGER AS $$
BEGIN
    NEW.updated_at = NOW();
    RETURN NEW;
END;
$$ language 'plpgsql';

DROP TRIGGER IF EXISTS update_proxies_updated_at ON proxies;
CREATE TRIGGER update_proxies_updated_at
    BEFORE UPDATE ON proxies
    FOR EACH ROW
    EXECUTE FUNCTION update_updated_at_column();
"#;

// Migration 2: (host, port, username) uniqueness, NULL username counted as empty
const MIGRATION_002_UNIQUE_ENDPOINT: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS unique_proxy
    ON proxies (host, port, COALESCE(username, ''));
"#;
