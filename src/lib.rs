//! Egress Pool - proxy pool manager
//!
//! Hands out outbound proxies to concurrent automation sessions.
//!
//! ## Features
//!
//! - Per-proxy concurrency caps enforced by atomic store operations
//! - Round-robin, random and performance-weighted rotation
//! - HTTP probing through each proxy with smoothed latency and success rate
//! - Periodic health cycle that fails and recovers proxies
//! - PostgreSQL or in-memory proxy store

pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod pool;
pub mod repository;
pub mod services;

pub use config::Config;
pub use database::Database;
pub use error::{PoolError, Result};
pub use pool::PoolManager;
