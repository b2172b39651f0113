//! Double-sorted size/factor portfolio simulation over monthly periods.
//!
//! Each rebalance sorts the cross-section into size halves and style-factor
//! terciles and value-weights within every bucket. Between rebalances the
//! bucket weights drift with realized returns.

pub mod assets;
pub mod buckets;
pub mod calendar;
pub mod error;
pub mod portfolio;
pub mod report;
pub mod simulation;
pub mod universe;
