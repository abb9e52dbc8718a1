use crate::error::{PoolError, Result};
use crate::pool::rotation::RotationStrategy;
use std::env;
use std::time::Duration;

const DEFAULT_PROBE_URLS: &str =
    "http://httpbin.org/ip,https://api.ipify.org?format=json,http://icanhazip.com";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy pool behaviour
    pub pool: PoolConfig,
    /// Where proxy records live
    pub store: StoreBackend,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Administrative switch; when off no proxy is ever handed out
    pub enabled: bool,
    /// Rotation strategy (round_robin, random, weighted)
    pub rotation_strategy: RotationStrategy,
    /// Seconds between health cycles
    pub health_check_interval_secs: u64,
    /// Seconds before a single probe counts as timed out
    pub probe_timeout_secs: u64,
    /// Maximum probes in flight during one cycle
    pub probe_concurrency: usize,
    /// Echo endpoints a probe picks from
    pub probe_urls: Vec<String>,
    /// Reservation cap for seeded proxies
    pub default_max_concurrent: i32,
    /// Proxy URLs admitted at start-up
    pub seed: Vec<String>,
}

impl PoolConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rotation_strategy: RotationStrategy::RoundRobin,
            health_check_interval_secs: 300,
            probe_timeout_secs: 30,
            probe_concurrency: 50,
            probe_urls: split_list(DEFAULT_PROBE_URLS),
            default_max_concurrent: 5,
            seed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Database name
    pub name: String,
    /// SSL mode (disable, require, prefer)
    pub ssl_mode: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
}

impl DatabaseConfig {
    /// Get the database connection URL
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            pool: PoolConfig {
                enabled: parse_bool("PROXY_ENABLED", "true")?,
                rotation_strategy: RotationStrategy::from_str(&get_env_or(
                    "PROXY_ROTATION_STRATEGY",
                    "round_robin",
                ))
                .ok_or_else(|| {
                    PoolError::InvalidConfig(
                        "PROXY_ROTATION_STRATEGY must be one of round_robin, random, weighted"
                            .into(),
                    )
                })?,
                health_check_interval_secs: parse_positive("PROXY_HEALTH_CHECK_INTERVAL", "300")?,
                probe_timeout_secs: parse_positive("PROXY_TIMEOUT", "30")?,
                probe_concurrency: parse_positive("PROXY_PROBE_CONCURRENCY", "50")? as usize,
                probe_urls: parse_probe_urls()?,
                default_max_concurrent: get_env_or("PROXY_DEFAULT_MAX_CONCURRENT", "5")
                    .parse::<i32>()
                    .ok()
                    .filter(|n| (1..=100).contains(n))
                    .ok_or_else(|| {
                        PoolError::InvalidConfig(
                            "PROXY_DEFAULT_MAX_CONCURRENT must be in 1-100".into(),
                        )
                    })?,
                seed: split_list(&get_env_or("PROXY_SEED", "")),
            },
            store: match get_env_or("STORE_BACKEND", "postgres").to_lowercase().as_str() {
                "postgres" | "postgresql" => StoreBackend::Postgres,
                "memory" => StoreBackend::Memory,
                other => {
                    return Err(PoolError::InvalidConfig(format!(
                        "STORE_BACKEND has unsupported value: {}",
                        other
                    )))
                }
            },
            database: DatabaseConfig {
                host: get_env_or("DB_HOST", "localhost"),
                port: get_env_or("DB_PORT", "5432").parse().map_err(|_| {
                    PoolError::InvalidConfig("DB_PORT must be a valid port number".into())
                })?,
                user: get_env_or("DB_USER", "pool"),
                password: get_env_or("DB_PASSWORD", "pool_password"),
                name: get_env_or("DB_NAME", "egress_pool"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: get_env_or("DB_MAX_CONNECTIONS", "20")
                    .parse()
                    .map_err(|_| {
                        PoolError::InvalidConfig("DB_MAX_CONNECTIONS must be a valid number".into())
                    })?,
                min_connections: get_env_or("DB_MIN_CONNECTIONS", "2").parse().map_err(|_| {
                    PoolError::InvalidConfig("DB_MIN_CONNECTIONS must be a valid number".into())
                })?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

fn parse_bool(key: &str, default: &str) -> Result<bool> {
    match get_env_or(key, default).trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(PoolError::InvalidConfig(format!("{} must be a boolean", key))),
    }
}

fn parse_positive(key: &str, default: &str) -> Result<u64> {
    get_env_or(key, default)
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| PoolError::InvalidConfig(format!("{} must be a positive integer", key)))
}

fn parse_probe_urls() -> Result<Vec<String>> {
    let urls = split_list(&get_env_or("PROXY_PROBE_URLS", DEFAULT_PROBE_URLS));
    if urls.is_empty() {
        return Err(PoolError::InvalidConfig(
            "PROXY_PROBE_URLS must list at least one URL".into(),
        ));
    }
    for raw in &urls {
        url::Url::parse(raw).map_err(|e| {
            PoolError::InvalidConfig(format!("PROXY_PROBE_URLS entry {} is invalid: {}", raw, e))
        })?;
    }
    Ok(urls)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
