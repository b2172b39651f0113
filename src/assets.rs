use std::collections::{HashMap, HashSet};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::calendar::Period;

/// Factor name the providers use for the size characteristic.
pub const SIZE_FACTOR: &str = "size";

/// One instrument's joined attributes for a rebalance period.
///
/// Inclusion is membership in the period's universe; rows only exist for
/// included codes.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub code: String,
    /// Return realized over the month following the period.
    pub future_return: f64,
    pub size: f64,
    pub factor: f64,
}

/// Source of per-period cross-sections.
///
/// Each call returns a complete snapshot or fails. Missing instruments are
/// normal and handled by the assembler.
#[allow(async_fn_in_trait)]
pub trait DataProvider {
    async fn fetch_universe(&self, period: Period) -> Result<HashSet<String>>;
    async fn fetch_future_return(&self, period: Period) -> Result<HashMap<String, f64>>;
    async fn fetch_factor(&self, period: Period, factor_name: &str) -> Result<HashMap<String, f64>>;
}

/// Deterministic random cross-sections for demo runs.
#[derive(Debug, Clone)]
pub struct MockProvider {
    pub universe_size: usize,
    pub seed: u64,
    /// Upper bound on the share of codes each source leaves out.
    pub max_drop_fraction: f64,
    /// Scale applied to standard normal draws.
    pub scale: f64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            universe_size: 4000,
            seed: 0,
            max_drop_fraction: 0.1,
            scale: 1.0 / 25.0,
        }
    }
}

impl MockProvider {
    pub fn new(universe_size: usize, seed: u64) -> Self {
        Self {
            universe_size,
            seed,
            ..Self::default()
        }
    }

    fn code(i: usize) -> String {
        format!("{:0>5}", i)
    }

    fn rng(&self, period: Period, source: &str) -> StdRng {
        // FNV-1a over the source name keeps each source on its own stream.
        let salt = source
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3));
        let period_bits = (period.yyyymm() as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        StdRng::seed_from_u64(self.seed ^ salt ^ period_bits)
    }

    fn surviving_indices(&self, rng: &mut StdRng) -> Vec<usize> {
        let max_drop = (self.universe_size as f64 * self.max_drop_fraction) as usize;
        let n_drop = rng.gen_range(0..=max_drop);
        let dropped: HashSet<usize> = index::sample(rng, self.universe_size, n_drop)
            .into_iter()
            .collect();
        (0..self.universe_size)
            .filter(|i| !dropped.contains(i))
            .collect()
    }

    fn draw_values(&self, period: Period, source: &str) -> HashMap<String, f64> {
        let mut rng = self.rng(period, source);
        let values: Vec<f64> = (0..self.universe_size)
            .map(|_| rng.sample::<f64, _>(StandardNormal) * self.scale)
            .collect();
        self.surviving_indices(&mut rng)
            .into_iter()
            .map(|i| (Self::code(i), values[i]))
            .collect()
    }
}

impl DataProvider for MockProvider {
    async fn fetch_universe(&self, period: Period) -> Result<HashSet<String>> {
        let mut rng = self.rng(period, "universe");
        Ok(self
            .surviving_indices(&mut rng)
            .into_iter()
            .map(Self::code)
            .collect())
    }

    async fn fetch_future_return(&self, period: Period) -> Result<HashMap<String, f64>> {
        Ok(self.draw_values(period, "future_return"))
    }

    async fn fetch_factor(&self, period: Period, factor_name: &str) -> Result<HashMap<String, f64>> {
        Ok(self.draw_values(period, &format!("factor:{}", factor_name)))
    }
}
