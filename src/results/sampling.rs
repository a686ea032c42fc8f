//! Exploration sampling of uncertain subjects.
//!
//! A uniformly random slice of the low-confidence subjects is sent back to
//! the active set alongside the confident ones.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Draws random subsets of subject ids at a configurable rate.
#[derive(Debug, Clone, Default)]
pub struct ExplorationSampler {
    /// Random seed for reproducibility (None = non-deterministic).
    seed: Option<u64>,
}

impl ExplorationSampler {
    /// Creates a sampler backed by the thread RNG.
    pub fn new() -> Self {
        Self { seed: None }
    }

    /// Sets a random seed so repeated samples pick the same subjects.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Returns the number of subjects `sample` would draw from `pool_size`.
    ///
    /// `floor(pool_size * rate)`, with `rate` clamped to `[0, 1]` and NaN
    /// treated as zero.
    pub fn sample_size(pool_size: usize, rate: f64) -> usize {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        let size = (pool_size as f64 * rate).floor() as usize;
        size.min(pool_size)
    }

    /// Samples `floor(|ids| * rate)` distinct subjects uniformly without
    /// replacement. `ids` is left untouched.
    pub fn sample(&self, ids: &BTreeSet<String>, rate: f64) -> BTreeSet<String> {
        let n = Self::sample_size(ids.len(), rate);
        if n == 0 {
            return BTreeSet::new();
        }

        let mut pool: Vec<&String> = ids.iter().collect();
        let mut rng = self.create_rng();
        pool.shuffle(&mut rng);
        pool.truncate(n);

        pool.into_iter().cloned().collect()
    }

    fn create_rng(&self) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        }
    }
}
