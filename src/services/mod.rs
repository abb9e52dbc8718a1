//! Background services

pub mod health_cycle;

pub use health_cycle::{HealthCycleHandle, HealthCycleService};
