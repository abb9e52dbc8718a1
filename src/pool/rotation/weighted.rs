//! Performance-weighted proxy selection strategy

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::models::Proxy;

/// Weight given to a proxy that has no successful probe on record
const SUCCESS_FLOOR: f64 = 0.1;

/// Weighted random draw favouring reliable, fast proxies
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedSelector;

impl WeightedSelector {
    pub fn select_index(&self, candidates: &[Proxy]) -> usize {
        let mut rng = rand::thread_rng();
        let weights = candidates.iter().map(selection_weight);

        match WeightedIndex::new(weights) {
            Ok(dist) => dist.sample(&mut rng),
            // All weights zero or non-finite: fall back to a uniform pick
            Err(_) => rng.gen_range(0..candidates.len()),
        }
    }
}

/// `success_weight * latency_weight * configured_weight`
///
/// Never zero for a proxy with a positive configured weight, so untested
/// proxies stay selectable.
pub fn selection_weight(proxy: &Proxy) -> f64 {
    let success = if proxy.success_rate > 0.0 {
        proxy.success_rate
    } else {
        SUCCESS_FLOOR
    };

    let latency = match proxy.response_time_ms {
        Some(ms) => 1.0 / (ms.max(0.0) + 1.0),
        None => 1.0,
    };

    success * latency * proxy.weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::proxy::tests::base_proxy;

    #[test]
    fn test_selection_weight_formula() {
        let mut proxy = base_proxy(1);
        proxy.success_rate = 0.5;
        proxy.response_time_ms = Some(9.0);
        proxy.weight = 2.0;
        assert!((selection_weight(&proxy) - 0.5 * 0.1 * 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_untested_proxy_keeps_floor_weight() {
        let proxy = base_proxy(1);
        assert!((selection_weight(&proxy) - SUCCESS_FLOOR).abs() < 1e-12);
    }

    #[test]
    fn test_fast_reliable_proxy_wins_more_often() {
        let mut fast = base_proxy(1);
        fast.success_rate = 1.0;
        fast.response_time_ms = Some(10.0);

        let mut slow = base_proxy(2);
        slow.success_rate = 0.1;
        slow.response_time_ms = Some(500.0);

        let candidates = vec![fast, slow];
        let selector = WeightedSelector;

        let mut counts = [0usize; 2];
        for _ in 0..10_000 {
            counts[selector.select_index(&candidates)] += 1;
        }

        assert!(counts[0] > counts[1], "counts: {:?}", counts);
    }

    #[test]
    fn test_zero_weights_fall_back_to_uniform() {
        let mut a = base_proxy(1);
        a.weight = 0.0;
        let mut b = base_proxy(2);
        b.weight = 0.0;

        let candidates = vec![a, b];
        for _ in 0..100 {
            assert!(WeightedSelector.select_index(&candidates) < 2);
        }
    }
}
