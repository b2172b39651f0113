use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::buckets::Bucket;
use crate::error::{SimError, SimResult};

/// Tolerance for the per-bucket weight-sum invariant.
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Holding {
    pub bucket: Bucket,
    pub weight: f64,
}

/// Bucket membership and weight per instrument code.
///
/// Weights inside every non-empty bucket sum to one. Membership only changes
/// at a rebalance; between rebalances instruments can only drop out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioState {
    pub holdings: BTreeMap<String, Holding>,
}

/// What one bucket earned over a period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BucketContribution {
    pub members: usize,
    pub weight: f64,
    /// Sum of weight × return, i.e. the bucket's realized return.
    pub contribution: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodContribution {
    pub by_instrument: BTreeMap<String, f64>,
    pub by_bucket: BTreeMap<Bucket, BucketContribution>,
}

impl PortfolioState {
    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    pub fn get(&self, code: &str) -> Option<&Holding> {
        self.holdings.get(code)
    }

    pub fn weight(&self, code: &str) -> Option<f64> {
        self.holdings.get(code).map(|h| h.weight)
    }

    pub fn bucket_of(&self, code: &str) -> Option<Bucket> {
        self.holdings.get(code).map(|h| h.bucket)
    }

    pub fn assignments(&self) -> BTreeMap<String, Bucket> {
        self.holdings
            .iter()
            .map(|(code, h)| (code.clone(), h.bucket))
            .collect()
    }

    pub fn group_sums(&self) -> BTreeMap<Bucket, f64> {
        let mut sums = BTreeMap::new();
        for holding in self.holdings.values() {
            *sums.entry(holding.bucket).or_insert(0.0) += holding.weight;
        }
        sums
    }

    /// Keeps only holdings whose code satisfies `keep`. Weights are left as is.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) -> PortfolioState {
        PortfolioState {
            holdings: self
                .holdings
                .iter()
                .filter(|(code, _)| keep(code))
                .map(|(code, h)| (code.clone(), *h))
                .collect(),
        }
    }
}

/// Value weights within each bucket, using `|size|` as the market-value proxy.
pub fn initialize_weights(
    assignments: &BTreeMap<String, Bucket>,
    sizes: &HashMap<String, f64>,
) -> SimResult<PortfolioState> {
    let mut groups: BTreeMap<Bucket, Vec<(&String, f64)>> = BTreeMap::new();
    for (code, bucket) in assignments {
        if let Some(size) = sizes.get(code) {
            groups.entry(*bucket).or_default().push((code, size.abs()));
        }
    }

    let mut holdings = BTreeMap::new();
    for (bucket, members) in groups {
        if let [(code, _)] = members.as_slice() {
            holdings.insert((*code).clone(), Holding { bucket, weight: 1.0 });
            continue;
        }
        let mass: f64 = members.iter().map(|(_, proxy)| proxy).sum();
        if !(mass > 0.0) {
            return Err(SimError::DegenerateWeighting {
                bucket,
                members: members.len(),
            });
        }
        for (code, proxy) in members {
            holdings.insert(
                code.clone(),
                Holding {
                    bucket,
                    weight: proxy / mass,
                },
            );
        }
    }
    Ok(PortfolioState { holdings })
}

/// Rescales each bucket so its weights sum to one again.
///
/// A bucket with no positive mass left cannot be rescaled and is removed.
pub fn renormalize(state: &PortfolioState) -> PortfolioState {
    let sums = state.group_sums();
    let mut holdings = BTreeMap::new();
    for (code, holding) in &state.holdings {
        let total = sums[&holding.bucket];
        if !(total > 0.0) {
            continue;
        }
        holdings.insert(
            code.clone(),
            Holding {
                bucket: holding.bucket,
                weight: holding.weight / total,
            },
        );
    }
    for (bucket, total) in &sums {
        if !(*total > 0.0) {
            warn!(%bucket, total, "bucket has no positive weight left, dropping it");
        }
    }

    let out = PortfolioState { holdings };
    debug_assert!(
        out.group_sums()
            .values()
            .all(|s| (s - 1.0).abs() < WEIGHT_TOLERANCE),
        "Weights do not add up to 1"
    );
    out
}

/// Compounds each weight by `1 + return` and renormalizes within bucket.
///
/// Holdings without a return for the period are dropped first.
pub fn drift_and_renormalize(
    state: &PortfolioState,
    returns: &HashMap<String, f64>,
) -> PortfolioState {
    let drifted = PortfolioState {
        holdings: state
            .holdings
            .iter()
            .filter_map(|(code, h)| {
                returns.get(code).map(|r| {
                    (
                        code.clone(),
                        Holding {
                            bucket: h.bucket,
                            weight: h.weight * (1.0 + r),
                        },
                    )
                })
            })
            .collect(),
    };
    renormalize(&drifted)
}

/// Weight × return per instrument, summed per bucket. Holdings without a
/// return contribute nothing.
pub fn period_contribution(
    state: &PortfolioState,
    returns: &HashMap<String, f64>,
) -> PeriodContribution {
    let mut report = PeriodContribution::default();
    for (code, holding) in &state.holdings {
        let Some(r) = returns.get(code) else {
            continue;
        };
        let dw = holding.weight * r;
        report.by_instrument.insert(code.clone(), dw);
        let bucket = report.by_bucket.entry(holding.bucket).or_default();
        bucket.members += 1;
        bucket.weight += holding.weight;
        bucket.contribution += dw;
    }
    report
}
