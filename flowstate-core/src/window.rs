//! Windowed metrics over an ordered bucket series
//!
//! For each bucket, in ascending order: trailing rolling average, running
//! cumulative total, lag-1 prior value, absolute delta and null-safe percent
//! change.
//!
//! Windows run over the buckets present in the input. A bucket with no rows
//! is absent, not zero, so a rolling average may span a wall-clock gap.

use crate::aggregate::{BucketSeries, CategorySeries};
use crate::period::Bucket;
use crate::types::Chain;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// Default number of buckets in the rolling window (current + 3 preceding).
pub const DEFAULT_ROLLING_WINDOW: usize = 4;

/// One bucket of a [`MetricSeries`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPoint {
    pub bucket: Bucket,
    pub raw_value: f64,
    pub rolling_avg: f64,
    pub cumulative_total: f64,
    /// Value of the preceding bucket; `None` for the first bucket
    pub prior_value: Option<f64>,
    /// `raw_value - prior_value`, zero without a prior
    pub delta: f64,
    /// Percent change vs the prior bucket; zero when the prior is absent or zero
    pub pct_change: f64,
}

impl MetricPoint {
    /// `"value (delta)"`, e.g. `"150 (60)"`.
    pub fn diff_label(&self) -> String {
        format!("{} ({})", format_number(self.raw_value), format_number(self.delta))
    }
}

/// Percent change with the null-safe convention: zero when there is no
/// usable prior.
pub fn pct_change(current: f64, prior: Option<f64>) -> f64 {
    match prior {
        Some(prior) if prior != 0.0 => (current - prior) / prior * 100.0,
        _ => 0.0,
    }
}

/// Integers print without a fractional part; everything else with two places.
pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

/// Derived metrics for an ordered series of buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSeries {
    points: Vec<MetricPoint>,
}

impl MetricSeries {
    /// Compute metrics for `(bucket, value)` pairs.
    ///
    /// Pairs are sorted by bucket first; cumulative totals start at the first
    /// bucket of the input. A `window` of zero is treated as one.
    pub fn compute<I>(values: I, window: usize) -> Self
    where
        I: IntoIterator<Item = (Bucket, f64)>,
    {
        let mut values: Vec<(Bucket, f64)> = values.into_iter().collect();
        values.sort_by_key(|(bucket, _)| *bucket);

        let window = window.max(1);
        let mut trailing: VecDeque<f64> = VecDeque::with_capacity(window);
        let mut trailing_sum = 0.0;
        let mut cumulative = 0.0;
        let mut prior: Option<f64> = None;

        let points = values
            .into_iter()
            .map(|(bucket, raw_value)| {
                if trailing.len() == window {
                    if let Some(oldest) = trailing.pop_front() {
                        trailing_sum -= oldest;
                    }
                }
                trailing.push_back(raw_value);
                trailing_sum += raw_value;
                cumulative += raw_value;

                let point = MetricPoint {
                    bucket,
                    raw_value,
                    rolling_avg: trailing_sum / trailing.len() as f64,
                    cumulative_total: cumulative,
                    prior_value: prior,
                    delta: prior.map(|p| raw_value - p).unwrap_or(0.0),
                    pct_change: pct_change(raw_value, prior),
                };
                prior = Some(raw_value);
                point
            })
            .collect();

        Self { points }
    }

    /// Compute metrics for an aggregated bucket series.
    pub fn from_buckets(series: &BucketSeries, window: usize) -> Self {
        Self::compute(series.iter().map(|(b, v)| (*b, *v)), window)
    }

    /// Points in ascending bucket order.
    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    /// Points most recent first, for presentation.
    pub fn descending(&self) -> impl Iterator<Item = &MetricPoint> {
        self.points.iter().rev()
    }

    /// Most recent point.
    pub fn latest(&self) -> Option<&MetricPoint> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Sum of every raw value.
    pub fn total(&self) -> f64 {
        self.latest().map(|p| p.cumulative_total).unwrap_or(0.0)
    }
}

/// One [`MetricSeries`] per chain; windows and lags never cross chains.
pub fn per_chain(series: &CategorySeries, window: usize) -> BTreeMap<Chain, MetricSeries> {
    series
        .iter()
        .map(|(chain, buckets)| (*chain, MetricSeries::from_buckets(buckets, window)))
        .collect()
}
