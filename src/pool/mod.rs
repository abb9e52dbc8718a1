//! Egress proxy pool: probing, rotation and the manager that ties them to the store

pub mod health;
pub mod manager;
pub mod rotation;

pub use health::{HealthChecker, HealthCheckerConfig, ProbeFailure, ProbeOutcome, ProxyProber};
pub use manager::{Acquisition, CycleSummary, PoolManager, PoolManagerConfig, Unavailable};
pub use rotation::{RotationPolicy, RotationStrategy};
