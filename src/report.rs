//! Console rendering of period reports as polars frames.

use anyhow::Result;
use polars::prelude::*;

use crate::portfolio::PortfolioState;
use crate::simulation::{PeriodReport, RunSummary};

pub fn period_to_dataframe(report: &PeriodReport) -> Result<DataFrame> {
    let size: Vec<&str> = report.buckets.keys().map(|b| b.size.as_str()).collect();
    let factor: Vec<&str> = report.buckets.keys().map(|b| b.factor.as_str()).collect();
    let members: Vec<u32> = report.buckets.values().map(|c| c.members as u32).collect();
    let weight: Vec<f64> = report.buckets.values().map(|c| c.weight).collect();
    let contribution: Vec<f64> = report.buckets.values().map(|c| c.contribution).collect();
    Ok(df!(
        "SIZE_G" => size,
        "FACTOR_G" => factor,
        "members" => members,
        "weight" => weight,
        "DW" => contribution
    )?)
}

pub fn summary_to_dataframe(summary: &RunSummary) -> Result<DataFrame> {
    let cumulative = summary.cumulative_returns();
    let size: Vec<&str> = cumulative.keys().map(|b| b.size.as_str()).collect();
    let factor: Vec<&str> = cumulative.keys().map(|b| b.factor.as_str()).collect();
    let periods: Vec<u32> = cumulative.values().map(|c| c.periods as u32).collect();
    let total: Vec<f64> = cumulative.values().map(|c| c.total_return).collect();
    Ok(df!(
        "SIZE_G" => size,
        "FACTOR_G" => factor,
        "periods" => periods,
        "cumulative_return" => total
    )?)
}

pub fn holdings_to_dataframe(state: &PortfolioState) -> Result<DataFrame> {
    let codes: Vec<&str> = state.holdings.keys().map(|c| c.as_str()).collect();
    let size: Vec<&str> = state.holdings.values().map(|h| h.bucket.size.as_str()).collect();
    let factor: Vec<&str> = state.holdings.values().map(|h| h.bucket.factor.as_str()).collect();
    let weight: Vec<f64> = state.holdings.values().map(|h| h.weight).collect();
    Ok(df!(
        "NRI_CODE" => codes,
        "SIZE_G" => size,
        "FACTOR_G" => factor,
        "weight" => weight
    )?)
}

/// Marker line, bucket table, period label.
pub fn print_period(report: &PeriodReport) -> Result<()> {
    let df = period_to_dataframe(report)?;
    println!("{}", report.mode.marker());
    println!("{}", df);
    println!("{}", report.period);
    Ok(())
}
