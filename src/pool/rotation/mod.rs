//! Proxy rotation policies
//!
//! Selection is a pure function over a candidate slice; the pool manager
//! guarantees the slice is non-empty and already filtered to proxies that
//! are active and under capacity.

mod random;
mod round_robin;
mod weighted;

pub use random::RandomSelector;
pub use round_robin::RoundRobinSelector;
pub use weighted::{selection_weight, WeightedSelector};

use crate::models::Proxy;

/// Strategy names accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    Random,
    Weighted,
}

impl RotationStrategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "round_robin" | "roundrobin" | "round-robin" => Some(Self::RoundRobin),
            "random" => Some(Self::Random),
            "weighted" => Some(Self::Weighted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
            Self::Weighted => "weighted",
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The configured selection policy, with whatever state it carries
#[derive(Debug)]
pub enum RotationPolicy {
    RoundRobin(RoundRobinSelector),
    Random(RandomSelector),
    Weighted(WeightedSelector),
}

impl RotationPolicy {
    pub fn new(strategy: RotationStrategy) -> Self {
        match strategy {
            RotationStrategy::RoundRobin => Self::RoundRobin(RoundRobinSelector::new()),
            RotationStrategy::Random => Self::Random(RandomSelector),
            RotationStrategy::Weighted => Self::Weighted(WeightedSelector),
        }
    }

    pub fn strategy(&self) -> RotationStrategy {
        match self {
            Self::RoundRobin(_) => RotationStrategy::RoundRobin,
            Self::Random(_) => RotationStrategy::Random,
            Self::Weighted(_) => RotationStrategy::Weighted,
        }
    }

    /// Index of the chosen candidate, `None` only for an empty slice
    pub fn select_index(&self, candidates: &[Proxy]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let idx = match self {
            Self::RoundRobin(s) => s.select_index(candidates.len()),
            Self::Random(s) => s.select_index(candidates.len()),
            Self::Weighted(s) => s.select_index(candidates),
        };

        Some(idx)
    }

    pub fn select<'a>(&self, candidates: &'a [Proxy]) -> Option<&'a Proxy> {
        self.select_index(candidates).and_then(|i| candidates.get(i))
    }
}

impl From<RotationStrategy> for RotationPolicy {
    fn from(strategy: RotationStrategy) -> Self {
        Self::new(strategy)
    }
}
