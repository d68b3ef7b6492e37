//! Seeded random source shared by the simulators.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Bounded numeric samples on top of a seedable generator.
///
/// Every simulator owns its own `SimRng` so a seed makes a whole run
/// reproducible regardless of how the simulators interleave.
#[derive(Debug, Clone)]
pub struct SimRng {
    inner: StdRng,
}

impl SimRng {
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            inner: StdRng::from_entropy(),
        }
    }

    /// Build from an optional seed, falling back to entropy.
    pub fn from_seed_option(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::seeded)
    }

    /// Derive an independent generator, used to hand each simulator its own stream.
    pub fn fork(&mut self) -> Self {
        Self::seeded(self.inner.gen())
    }

    /// Uniform sample in `[min, max]`. Reversed bounds are swapped.
    pub fn uniform(&mut self, min: f64, max: f64) -> f64 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        if lo == hi {
            return lo;
        }
        self.inner.gen_range(lo..=hi)
    }

    /// Uniform integer in `[min, max]`.
    pub fn range_i32(&mut self, min: i32, max: i32) -> i32 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        self.inner.gen_range(lo..=hi)
    }

    /// Uniform integer in `[0, bound)`. Returns 0 for an empty bound.
    pub fn below(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        self.inner.gen_range(0..bound)
    }

    /// True with the given percent probability.
    pub fn chance_percent(&mut self, percent: u8) -> bool {
        self.below(100) < u32::from(percent)
    }

    pub fn byte(&mut self) -> u8 {
        self.inner.gen()
    }
}

impl Default for SimRng {
    fn default() -> Self {
        Self::from_entropy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = SimRng::seeded(7);
        let mut b = SimRng::seeded(7);
        for _ in 0..32 {
            assert_eq!(a.range_i32(-5, 5), b.range_i32(-5, 5));
        }
    }

    #[test]
    fn test_uniform_stays_in_bounds() {
        let mut rng = SimRng::seeded(42);
        for _ in 0..1000 {
            let v = rng.uniform(1013.0, 1013.5);
            assert!((1013.0..=1013.5).contains(&v));
        }
        assert_eq!(rng.uniform(3.0, 3.0), 3.0);
        let swapped = rng.uniform(10.0, 0.0);
        assert!((0.0..=10.0).contains(&swapped));
    }

    #[test]
    fn test_chance_extremes() {
        let mut rng = SimRng::seeded(1);
        assert!((0..100).all(|_| !rng.chance_percent(0)));
        assert!((0..100).all(|_| rng.chance_percent(100)));
    }

    #[test]
    fn test_below_zero_bound() {
        let mut rng = SimRng::seeded(3);
        assert_eq!(rng.below(0), 0);
        assert!(rng.below(11) < 11);
    }
}
