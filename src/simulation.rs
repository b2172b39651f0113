//! Month-by-month driver alternating between rebalance and carry-forward.

use std::collections::{BTreeMap, HashMap};

use tracing::{info, warn};

use crate::assets::DataProvider;
use crate::buckets::{classify, Bucket};
use crate::calendar::{is_rebalance_due, Period};
use crate::error::{SimError, SimResult};
use crate::portfolio::{
    drift_and_renormalize, initialize_weights, period_contribution, renormalize,
    BucketContribution, PortfolioState,
};
use crate::universe::{assemble_carry, assemble_rebalance, usable_returns, JoinStats, RebalanceInputs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Buckets and weights rebuilt from a fresh cross-section.
    Rebalance,
    /// Prior buckets kept, weights drifted.
    Carry,
}

impl Mode {
    pub fn marker(&self) -> &'static str {
        match self {
            Mode::Rebalance => "reb",
            Mode::Carry => "not reb",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub start: Period,
    pub end: Period,
    /// Period the rebalance schedule is counted from.
    pub anchor: Period,
    pub factor_name: String,
    pub frequency_months: u32,
}

impl SimulationConfig {
    pub fn builder() -> SimulationConfigBuilder {
        SimulationConfigBuilder::new()
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.frequency_months < 1 {
            return Err(SimError::invalid_config(
                "rebalance frequency must be at least one month",
            ));
        }
        if self.end < self.start {
            return Err(SimError::invalid_config(format!(
                "end period {} precedes start period {}",
                self.end, self.start
            )));
        }
        if self.factor_name.trim().is_empty() {
            return Err(SimError::invalid_config("factor name is empty"));
        }
        Ok(())
    }
}

pub struct SimulationConfigBuilder {
    start: Option<Period>,
    end: Option<Period>,
    anchor: Option<Period>,
    factor_name: String,
    frequency_months: u32,
}

impl Default for SimulationConfigBuilder {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            anchor: None,
            factor_name: String::new(),
            frequency_months: 1,
        }
    }
}

impl SimulationConfigBuilder {
    pub fn new() -> SimulationConfigBuilder {
        SimulationConfigBuilder::default()
    }

    pub fn start(mut self, start: Period) -> Self {
        self.start = Some(start);
        self
    }

    pub fn end(mut self, end: Period) -> Self {
        self.end = Some(end);
        self
    }

    /// Overrides the rebalance anchor, which otherwise is the start period.
    pub fn anchor(mut self, anchor: Option<Period>) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn factor_name(mut self, name: &str) -> Self {
        self.factor_name = name.to_owned();
        self
    }

    pub fn frequency_months(mut self, months: u32) -> Self {
        self.frequency_months = months;
        self
    }

    pub fn build(self) -> SimResult<SimulationConfig> {
        let start = self
            .start
            .ok_or_else(|| SimError::invalid_config("start period is required"))?;
        let end = self
            .end
            .ok_or_else(|| SimError::invalid_config("end period is required"))?;
        let config = SimulationConfig {
            start,
            end,
            anchor: self.anchor.unwrap_or(start),
            factor_name: self.factor_name,
            frequency_months: self.frequency_months,
        };
        config.validate()?;
        Ok(config)
    }
}

/// What happened in one simulated month.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodReport {
    pub period: Period,
    pub mode: Mode,
    /// Instruments holding weight this period.
    pub population: usize,
    /// Instruments lost to missing data this period.
    pub dropped: usize,
    /// Every bucket, empty ones included.
    pub buckets: BTreeMap<Bucket, BucketContribution>,
}

impl PeriodReport {
    fn new(period: Period, mode: Mode, stats: JoinStats, state: &PortfolioState, returns: &HashMap<String, f64>) -> Self {
        let mut buckets: BTreeMap<Bucket, BucketContribution> =
            Bucket::all().map(|b| (b, BucketContribution::default())).collect();
        buckets.extend(period_contribution(state, returns).by_bucket);
        Self {
            period,
            mode,
            population: state.len(),
            dropped: stats.dropped,
            buckets,
        }
    }

    /// Sum of bucket returns, for logging.
    fn total_contribution(&self) -> f64 {
        self.buckets.values().map(|b| b.contribution).sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CumulativeReturn {
    /// Periods in which the bucket had members.
    pub periods: usize,
    pub total_return: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<PeriodReport>,
    /// Carry-in state left after the last period.
    pub final_state: Option<PortfolioState>,
}

impl RunSummary {
    /// Compounded return per bucket, `prod(1 + r) - 1` over populated periods.
    pub fn cumulative_returns(&self) -> BTreeMap<Bucket, CumulativeReturn> {
        let mut growth: BTreeMap<Bucket, (usize, f64)> =
            Bucket::all().map(|b| (b, (0, 1.0))).collect();
        for report in &self.reports {
            for (bucket, c) in &report.buckets {
                if c.members == 0 {
                    continue;
                }
                let entry = growth.entry(*bucket).or_insert((0, 1.0));
                entry.0 += 1;
                entry.1 *= 1.0 + c.contribution;
            }
        }
        growth
            .into_iter()
            .map(|(bucket, (periods, g))| {
                (
                    bucket,
                    CumulativeReturn {
                        periods,
                        total_return: g - 1.0,
                    },
                )
            })
            .collect()
    }
}

pub struct Simulation<P> {
    config: SimulationConfig,
    provider: P,
}

impl<P: DataProvider> Simulation<P> {
    pub fn new(config: SimulationConfig, provider: P) -> Self {
        Self { config, provider }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub async fn run(&self) -> SimResult<RunSummary> {
        self.run_with(|_| Ok(())).await
    }

    /// Runs every period from start to end, handing each report to `on_period`
    /// as soon as the period closes.
    pub async fn run_with<F>(&self, mut on_period: F) -> SimResult<RunSummary>
    where
        F: FnMut(&PeriodReport) -> SimResult<()>,
    {
        let config = &self.config;
        config.validate()?;

        let mut summary = RunSummary::default();
        let mut state: Option<PortfolioState> = None;
        let mut current = config.start;

        while current <= config.end {
            let returns = usable_returns(self.provider.fetch_future_return(current).await?);

            let mode = if is_rebalance_due(config.anchor, current, config.frequency_months)? {
                Mode::Rebalance
            } else {
                Mode::Carry
            };

            let (held, stats) = match mode {
                Mode::Rebalance => {
                    let inputs = RebalanceInputs::fetch(
                        &self.provider,
                        current,
                        &config.factor_name,
                        returns.clone(),
                    )
                    .await?;
                    let (rows, stats) = assemble_rebalance(&inputs);
                    let assignments = classify(&rows);
                    let sizes: HashMap<String, f64> =
                        rows.iter().map(|r| (r.code.clone(), r.size)).collect();
                    (initialize_weights(&assignments, &sizes)?, stats)
                }
                Mode::Carry => {
                    let prior = state.as_ref().ok_or_else(|| {
                        SimError::fatal_precondition(format!(
                            "period {} is a carry period but no portfolio has been formed (anchor {}, every {} months)",
                            current, config.anchor, config.frequency_months
                        ))
                    })?;
                    let (kept, stats) = assemble_carry(prior, &returns);
                    if kept.is_empty() {
                        warn!(period = %current, "no held instrument has a return this period");
                    }
                    (renormalize(&kept), stats)
                }
            };

            let report = PeriodReport::new(current, mode, stats, &held, &returns);
            info!(
                period = %current,
                mode = mode.marker(),
                population = report.population,
                candidates = stats.candidates,
                dropped = report.dropped,
                contribution = report.total_contribution(),
                "period closed"
            );
            on_period(&report)?;
            summary.reports.push(report);

            state = Some(drift_and_renormalize(&held, &returns));
            current = current.next();
        }

        summary.final_state = state;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::fixtures::FixtureProvider;
    use crate::assets::{MockProvider, SIZE_FACTOR};
    use crate::buckets::{FactorBucket, SizeBucket};
    use crate::portfolio::WEIGHT_TOLERANCE;

    const FACTOR: &str = "value";

    fn p(encoded: i32) -> Period {
        Period::from_yyyymm(encoded).unwrap()
    }

    fn config(start: i32, end: i32, frequency: u32) -> SimulationConfig {
        SimulationConfig::builder()
            .start(p(start))
            .end(p(end))
            .factor_name(FACTOR)
            .frequency_months(frequency)
            .build()
            .unwrap()
    }

    fn codes() -> Vec<String> {
        (0..12).map(|i| format!("{:0>5}", i)).collect()
    }

    /// Twelve instruments, full coverage in every period from 202001 to 202006.
    /// Factor ordering flips every month so monthly rebalances reshuffle buckets.
    fn fixture() -> FixtureProvider {
        let codes = codes();
        let refs: Vec<&str> = codes.iter().map(|c| c.as_str()).collect();
        let mut provider = FixtureProvider::default();
        for (m, period) in [202001, 202002, 202003, 202004, 202005, 202006]
            .into_iter()
            .map(p)
            .enumerate()
        {
            let sign = if m % 2 == 0 { 1.0 } else { -1.0 };
            let returns: Vec<(&str, f64)> = refs
                .iter()
                .enumerate()
                .map(|(i, c)| (*c, 0.01 * (i as f64 - 5.5) / 5.5))
                .collect();
            let size: Vec<(&str, f64)> = refs
                .iter()
                .enumerate()
                .map(|(i, c)| (*c, 1.0 + i as f64))
                .collect();
            let factor: Vec<(&str, f64)> = refs
                .iter()
                .enumerate()
                .map(|(i, c)| (*c, sign * ((i * 7) % 12) as f64))
                .collect();
            provider = provider
                .with_universe(period, &refs)
                .with_returns(period, &returns)
                .with_factor(period, SIZE_FACTOR, &size)
                .with_factor(period, FACTOR, &factor);
        }
        provider
    }

    fn assert_normalized(state: &PortfolioState) {
        for (bucket, sum) in state.group_sums() {
            assert!((sum - 1.0).abs() < WEIGHT_TOLERANCE, "{} sums to {}", bucket, sum);
        }
    }

    #[test]
    fn builder_defaults_anchor_to_start() {
        let config = config(202001, 202003, 1);
        assert_eq!(config.anchor, p(202001));
    }

    #[test]
    fn builder_rejects_bad_configuration() {
        let zero = SimulationConfig::builder()
            .start(p(202001))
            .end(p(202003))
            .factor_name(FACTOR)
            .frequency_months(0)
            .build();
        assert!(matches!(zero, Err(SimError::InvalidConfiguration(_))));

        let backwards = SimulationConfig::builder()
            .start(p(202003))
            .end(p(202001))
            .factor_name(FACTOR)
            .build();
        assert!(matches!(backwards, Err(SimError::InvalidConfiguration(_))));

        let missing = SimulationConfig::builder().end(p(202001)).build();
        assert!(matches!(missing, Err(SimError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn monthly_frequency_rebalances_every_period() {
        let sim = Simulation::new(config(202001, 202003, 1), fixture());
        let summary = sim.run().await.unwrap();

        assert_eq!(summary.reports.len(), 3);
        assert!(summary.reports.iter().all(|r| r.mode == Mode::Rebalance));
        let labels: Vec<Period> = summary.reports.iter().map(|r| r.period).collect();
        assert_eq!(labels, vec![p(202001), p(202002), p(202003)]);
        for report in &summary.reports {
            assert_eq!(report.buckets.len(), 6);
            assert_eq!(report.population, 12);
        }
    }

    #[tokio::test]
    async fn quarterly_frequency_carries_between_rebalances() {
        let sim = Simulation::new(config(202001, 202004, 3), fixture());
        let mut seen = Vec::new();
        let summary = sim
            .run_with(|r| {
                seen.push((r.period, r.mode));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![
                (p(202001), Mode::Rebalance),
                (p(202002), Mode::Carry),
                (p(202003), Mode::Carry),
                (p(202004), Mode::Rebalance),
            ]
        );
        // carry periods report the same bucket populations as the rebalance
        let members = |i: usize| -> Vec<usize> {
            summary.reports[i].buckets.values().map(|b| b.members).collect()
        };
        assert_eq!(members(0), members(1));
        assert_eq!(members(0), members(2));
        assert_normalized(summary.final_state.as_ref().unwrap());
    }

    #[tokio::test]
    async fn carry_reuses_rebalance_assignments() {
        let provider = fixture();
        let rebalance_only = Simulation::new(config(202001, 202001, 3), provider.clone())
            .run()
            .await
            .unwrap();
        let carried = Simulation::new(config(202001, 202002, 3), provider)
            .run()
            .await
            .unwrap();

        let formed = rebalance_only.final_state.unwrap().assignments();
        let after_carry = carried.final_state.unwrap().assignments();
        assert_eq!(formed, after_carry);
    }

    async fn assignments_after(start: i32, end: i32, frequency: u32) -> BTreeMap<String, Bucket> {
        Simulation::new(config(start, end, frequency), fixture())
            .run()
            .await
            .unwrap()
            .final_state
            .unwrap()
            .assignments()
    }

    #[tokio::test]
    async fn monthly_rebalance_reshuffles_buckets() {
        let january = assignments_after(202001, 202001, 1).await;
        let february = assignments_after(202001, 202002, 1).await;
        assert_eq!(january.len(), february.len());
        assert_ne!(january, february);

        // the factor sort flips, so the lowest tercile of January is the top in February
        let small_s = Bucket::new(SizeBucket::Small, FactorBucket::S);
        let small_l = Bucket::new(SizeBucket::Small, FactorBucket::L);
        for (code, bucket) in &january {
            if *bucket == small_s {
                assert_eq!(february[code], small_l, "{}", code);
            }
        }
    }

    #[tokio::test]
    async fn quarterly_rebalance_replaces_prior_assignments() {
        let formed = assignments_after(202001, 202001, 3).await;
        let last_carry = assignments_after(202001, 202003, 3).await;
        let reformed = assignments_after(202001, 202004, 3).await;

        assert_eq!(formed, last_carry);
        assert_ne!(formed, reformed);
        assert_eq!(
            reformed,
            assignments_after(202004, 202004, 3).await,
            "202004 assignments depend only on the 202004 cross-section"
        );
    }

    #[tokio::test]
    async fn instrument_missing_return_in_carry_is_dropped() {
        let codes = codes();
        let gone = codes[3].clone();
        let mut provider = fixture();
        provider
            .returns
            .get_mut(&p(202002))
            .unwrap()
            .remove(&gone);

        let summary = Simulation::new(config(202001, 202002, 3), provider)
            .run()
            .await
            .unwrap();

        let carry = &summary.reports[1];
        assert_eq!(carry.mode, Mode::Carry);
        assert_eq!(carry.population, 11);
        assert_eq!(carry.dropped, 1);
        for c in carry.buckets.values().filter(|c| c.members > 0) {
            assert!((c.weight - 1.0).abs() < WEIGHT_TOLERANCE);
        }
        let state = summary.final_state.unwrap();
        assert!(state.get(&gone).is_none());
        assert_normalized(&state);
    }

    #[tokio::test]
    async fn rebalance_weights_are_compounded_once_before_carry_in() {
        let provider = fixture();
        let summary = Simulation::new(config(202001, 202001, 1), provider.clone())
            .run()
            .await
            .unwrap();
        let state = summary.final_state.unwrap();

        // rebuild the freshly formed weights and drift them by hand
        let inputs = RebalanceInputs::fetch(
            &provider,
            p(202001),
            FACTOR,
            provider.returns[&p(202001)].clone(),
        )
        .await
        .unwrap();
        let (rows, _) = assemble_rebalance(&inputs);
        let sizes: HashMap<String, f64> = rows.iter().map(|r| (r.code.clone(), r.size)).collect();
        let formed = initialize_weights(&classify(&rows), &sizes).unwrap();
        let expected = drift_and_renormalize(&formed, &inputs.returns);

        for (code, h) in &expected.holdings {
            assert!((state.weight(code).unwrap() - h.weight).abs() < 1e-12);
        }
        assert_ne!(formed, state);
    }

    #[tokio::test]
    async fn misaligned_anchor_is_fatal_before_weighting() {
        let config = SimulationConfig::builder()
            .start(p(202002))
            .end(p(202004))
            .anchor(Some(p(202001)))
            .factor_name(FACTOR)
            .frequency_months(3)
            .build()
            .unwrap();
        let mut calls = 0;
        let err = Simulation::new(config, fixture())
            .run_with(|_| {
                calls += 1;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::FatalPrecondition(_)));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn zero_size_bucket_is_degenerate() {
        let period = p(202001);
        let provider = FixtureProvider::default()
            .with_universe(period, &["a", "b"])
            .with_returns(period, &[("a", 0.0), ("b", 0.0)])
            .with_factor(period, SIZE_FACTOR, &[("a", 0.0), ("b", 0.0)])
            .with_factor(period, FACTOR, &[("a", 1.0), ("b", 1.0)]);
        let err = Simulation::new(config(202001, 202001, 1), provider)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::DegenerateWeighting { .. }));
    }

    #[tokio::test]
    async fn cumulative_returns_compound_bucket_returns() {
        let summary = Simulation::new(config(202001, 202003, 1), fixture())
            .run()
            .await
            .unwrap();
        let cumulative = summary.cumulative_returns();
        assert_eq!(cumulative.len(), 6);
        for (bucket, c) in &cumulative {
            let expected = summary
                .reports
                .iter()
                .map(|r| 1.0 + r.buckets[bucket].contribution)
                .product::<f64>()
                - 1.0;
            assert_eq!(c.periods, 3);
            assert!((c.total_return - expected).abs() < 1e-12);
        }
    }

    #[tokio::test]
    async fn mock_run_keeps_weights_normalized() {
        let summary = Simulation::new(config(202001, 202006, 2), MockProvider::new(300, 11))
            .run()
            .await
            .unwrap();
        assert_eq!(summary.reports.len(), 6);
        for report in &summary.reports {
            for c in report.buckets.values().filter(|c| c.members > 0) {
                assert!((c.weight - 1.0).abs() < WEIGHT_TOLERANCE);
            }
        }
        assert_normalized(summary.final_state.as_ref().unwrap());
    }
}
