//! Two-stage size/factor quantile sort.

use std::collections::BTreeMap;
use std::fmt;

use crate::assets::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeBucket {
    Small,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FactorBucket {
    S,
    M,
    L,
}

impl SizeBucket {
    pub const ALL: [SizeBucket; 2] = [SizeBucket::Small, SizeBucket::Big];

    fn from_label(label: usize) -> Self {
        match label {
            0 => SizeBucket::Small,
            _ => SizeBucket::Big,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeBucket::Small => "small",
            SizeBucket::Big => "big",
        }
    }
}

impl FactorBucket {
    pub const ALL: [FactorBucket; 3] = [FactorBucket::S, FactorBucket::M, FactorBucket::L];

    fn from_label(label: usize) -> Self {
        match label {
            0 => FactorBucket::S,
            1 => FactorBucket::M,
            _ => FactorBucket::L,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FactorBucket::S => "S",
            FactorBucket::M => "M",
            FactorBucket::L => "L",
        }
    }
}

/// A (size, factor) group. Weights sum to one inside each bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket {
    pub size: SizeBucket,
    pub factor: FactorBucket,
}

impl Bucket {
    pub fn new(size: SizeBucket, factor: FactorBucket) -> Self {
        Self { size, factor }
    }

    /// All six buckets in report order.
    pub fn all() -> impl Iterator<Item = Bucket> {
        SizeBucket::ALL
            .into_iter()
            .flat_map(|size| FactorBucket::ALL.into_iter().map(move |factor| Bucket::new(size, factor)))
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.size.as_str(), self.factor.as_str())
    }
}

/// Bin edges at `k / bins` quantiles, linearly interpolated between order statistics.
pub fn quantile_edges(values: &[f64], bins: usize) -> Vec<f64> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let last = (sorted.len() - 1) as f64;

    (0..=bins)
        .map(|k| {
            let pos = last * k as f64 / bins as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        })
        .collect()
}

/// Equal-population bin label for every value, bins closed on the right.
///
/// Ties on an edge fall into the lower bin, so identical inputs all land in
/// bin 0 and the upper bins come back empty.
pub fn quantile_labels(values: &[f64], bins: usize) -> Vec<usize> {
    let edges = quantile_edges(values, bins);
    if edges.is_empty() {
        return Vec::new();
    }
    let interior = &edges[1..bins];
    values
        .iter()
        .map(|v| interior.partition_point(|edge| *edge < *v))
        .collect()
}

/// Sorts instruments into size halves, then factor terciles within each half.
pub fn classify(instruments: &[Instrument]) -> BTreeMap<String, Bucket> {
    let sizes: Vec<f64> = instruments.iter().map(|i| i.size).collect();
    let size_labels = quantile_labels(&sizes, 2);

    let mut by_size: BTreeMap<SizeBucket, Vec<&Instrument>> = BTreeMap::new();
    for (instrument, label) in instruments.iter().zip(size_labels) {
        by_size
            .entry(SizeBucket::from_label(label))
            .or_default()
            .push(instrument);
    }

    let mut assignments = BTreeMap::new();
    for (size, members) in by_size {
        let factors: Vec<f64> = members.iter().map(|i| i.factor).collect();
        for (instrument, label) in members.iter().zip(quantile_labels(&factors, 3)) {
            assignments.insert(
                instrument.code.clone(),
                Bucket::new(size, FactorBucket::from_label(label)),
            );
        }
    }
    assignments
}
