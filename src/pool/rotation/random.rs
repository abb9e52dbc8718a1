//! Random proxy selection strategy

use rand::Rng;

/// Uniform pick over the candidates
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl RandomSelector {
    pub fn select_index(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_stays_in_bounds() {
        let selector = RandomSelector;
        for _ in 0..1000 {
            assert!(selector.select_index(4) < 4);
        }
    }

    #[test]
    fn test_random_eventually_hits_every_candidate() {
        let selector = RandomSelector;
        let mut hits = [0usize; 3];
        for _ in 0..3000 {
            hits[selector.select_index(3)] += 1;
        }
        assert!(hits.iter().all(|&h| h > 0), "hits: {:?}", hits);
    }
}
