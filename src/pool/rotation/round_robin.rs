//! Round-robin proxy selection strategy

use std::sync::atomic::{AtomicUsize, Ordering};

/// Cycles through candidates in order
///
/// The cursor is taken modulo the length of whatever slice it is handed, so
/// order is only strict while the candidate set stays the same between calls.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    index: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
        }
    }

    pub fn select_index(&self, len: usize) -> usize {
        self.index.fetch_add(1, Ordering::Relaxed) % len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::proxy::tests::base_proxy;
    use crate::pool::rotation::RotationPolicy;
    use std::collections::HashSet;

    #[test]
    fn test_round_robin_order() {
        let selector = RoundRobinSelector::new();

        // Should cycle through 0, 1, 2, 0, 1, 2...
        let picks: Vec<usize> = (0..6).map(|_| selector.select_index(3)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_round_robin_visits_each_candidate_once_per_lap() {
        let policy = RotationPolicy::RoundRobin(RoundRobinSelector::new());
        let candidates: Vec<_> = (1..=5).map(base_proxy).collect();

        // Offset the cursor first so the lap does not start at zero
        policy.select(&candidates);
        policy.select(&candidates);

        let seen: HashSet<i32> = (0..candidates.len())
            .filter_map(|_| policy.select(&candidates).map(|p| p.id))
            .collect();
        assert_eq!(seen.len(), candidates.len());
    }

    #[test]
    fn test_round_robin_shrinking_set_stays_in_bounds() {
        let selector = RoundRobinSelector::new();
        for len in [5, 4, 3, 2, 1, 3] {
            assert!(selector.select_index(len) < len);
        }
    }
}
