//! Joins provider snapshots into the per-period table.
//!
//! Every join is an inner join on instrument code. Rows missing a field, or
//! carrying a non-finite value, are dropped for the period without imputation.

use std::collections::{HashMap, HashSet};

use futures::try_join;
use tracing::debug;

use crate::assets::{DataProvider, Instrument, SIZE_FACTOR};
use crate::calendar::Period;
use crate::error::SimResult;
use crate::portfolio::PortfolioState;

/// Population accounting for one join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    /// Rows on the driving side of the join (universe or held instruments).
    pub candidates: usize,
    pub dropped: usize,
}

impl JoinStats {
    fn new(candidates: usize, kept: usize) -> Self {
        Self {
            candidates,
            dropped: candidates - kept,
        }
    }
}

/// Snapshots needed to build a rebalance cross-section.
#[derive(Debug, Clone, Default)]
pub struct RebalanceInputs {
    pub universe: HashSet<String>,
    pub returns: HashMap<String, f64>,
    pub size: HashMap<String, f64>,
    pub factor: HashMap<String, f64>,
}

impl RebalanceInputs {
    /// Fetches the four sources of a rebalance period concurrently.
    pub async fn fetch<P: DataProvider>(
        provider: &P,
        period: Period,
        factor_name: &str,
        returns: HashMap<String, f64>,
    ) -> SimResult<Self> {
        let (universe, size, factor) = try_join!(
            provider.fetch_universe(period),
            provider.fetch_factor(period, SIZE_FACTOR),
            provider.fetch_factor(period, factor_name),
        )?;
        Ok(Self {
            universe,
            returns,
            size,
            factor,
        })
    }
}

fn finite(map: &HashMap<String, f64>, code: &str) -> Option<f64> {
    map.get(code).copied().filter(|v| v.is_finite())
}

/// Universe ∩ return ∩ size ∩ style factor.
pub fn assemble_rebalance(inputs: &RebalanceInputs) -> (Vec<Instrument>, JoinStats) {
    let mut rows: Vec<Instrument> = inputs
        .universe
        .iter()
        .filter_map(|code| {
            Some(Instrument {
                code: code.clone(),
                future_return: finite(&inputs.returns, code)?,
                size: finite(&inputs.size, code)?,
                factor: finite(&inputs.factor, code)?,
            })
        })
        .collect();
    rows.sort_by(|a, b| a.code.cmp(&b.code));

    let stats = JoinStats::new(inputs.universe.len(), rows.len());
    debug!(?stats, "assembled rebalance cross-section");
    (rows, stats)
}

/// Held instruments ∩ return. Weights are carried over untouched.
pub fn assemble_carry(
    state: &PortfolioState,
    returns: &HashMap<String, f64>,
) -> (PortfolioState, JoinStats) {
    let kept = state.retain(|code| finite(returns, code).is_some());
    let stats = JoinStats::new(state.len(), kept.len());
    debug!(?stats, "assembled carry cross-section");
    (kept, stats)
}

/// The subset of `returns` usable for the period (finite values only).
pub fn usable_returns(returns: HashMap<String, f64>) -> HashMap<String, f64> {
    returns.into_iter().filter(|(_, r)| r.is_finite()).collect()
}
