//! Bucketed aggregation
//!
//! Groups raw rows into `(chain, bucket)` cells and reduces each cell to a
//! single number. Rows outside `[start, bucket_cutoff)` are dropped; input
//! order does not matter.

use crate::period::{Bucket, PeriodSpec};
use crate::types::{Chain, Event};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Values per bucket, ascending by bucket.
pub type BucketSeries = BTreeMap<Bucket, f64>;

/// One [`BucketSeries`] per chain.
pub type CategorySeries = BTreeMap<Chain, BucketSeries>;

/// How the rows of one cell collapse into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Distinct `entity_id`s
    CountDistinct,
    /// Number of rows
    Count,
    /// Sum of present measures
    Sum,
    /// Mean of present measures
    Avg,
    /// Percentage of rows with a known outcome that succeeded
    SuccessShare,
}

impl Reduction {
    /// Whether per-chain values may be added together across chains.
    pub fn is_additive(&self) -> bool {
        matches!(
            self,
            Reduction::CountDistinct | Reduction::Count | Reduction::Sum
        )
    }
}

/// Running state for one cell.
#[derive(Debug, Default)]
struct Cell<'a> {
    entities: HashSet<&'a str>,
    rows: u64,
    measure_sum: f64,
    measured: u64,
    outcomes: u64,
    successes: u64,
}

impl<'a> Cell<'a> {
    fn push(&mut self, event: &'a Event, reduction: Reduction) {
        self.rows += 1;
        match reduction {
            Reduction::CountDistinct => {
                self.entities.insert(event.entity_id.as_str());
            }
            Reduction::Count => {}
            Reduction::Sum | Reduction::Avg => {
                if let Some(measure) = event.measure {
                    self.measure_sum += measure;
                    self.measured += 1;
                }
            }
            Reduction::SuccessShare => {
                if let Some(succeeded) = event.succeeded {
                    self.outcomes += 1;
                    if succeeded {
                        self.successes += 1;
                    }
                }
            }
        }
    }

    /// `None` when the cell has no value under this reduction.
    fn finish(&self, reduction: Reduction) -> Option<f64> {
        match reduction {
            Reduction::CountDistinct => Some(self.entities.len() as f64),
            Reduction::Count => Some(self.rows as f64),
            Reduction::Sum => Some(self.measure_sum),
            Reduction::Avg => {
                (self.measured > 0).then(|| self.measure_sum / self.measured as f64)
            }
            Reduction::SuccessShare => (self.outcomes > 0)
                .then(|| self.successes as f64 / self.outcomes as f64 * 100.0),
        }
    }
}

fn reduce<'a, K: Ord>(cells: BTreeMap<K, Cell<'a>>, reduction: Reduction) -> BTreeMap<K, f64> {
    cells
        .into_iter()
        .filter_map(|(key, cell)| cell.finish(reduction).map(|value| (key, value)))
        .collect()
}

/// Aggregate rows per chain and bucket.
pub fn aggregate(events: &[Event], spec: &PeriodSpec, reduction: Reduction) -> CategorySeries {
    let mut cells: BTreeMap<(Chain, Bucket), Cell<'_>> = BTreeMap::new();
    let mut dropped = 0usize;

    for event in events {
        let Some(bucket) = spec.bucket_of(event.timestamp) else {
            dropped += 1;
            continue;
        };
        cells
            .entry((event.category, bucket))
            .or_default()
            .push(event, reduction);
    }

    let mut series = CategorySeries::new();
    for ((chain, bucket), value) in reduce(cells, reduction) {
        series.entry(chain).or_default().insert(bucket, value);
    }

    tracing::debug!(
        period = %spec.key,
        ?reduction,
        rows = events.len(),
        dropped,
        chains = series.len(),
        "Aggregated rows by chain"
    );

    series
}

/// Aggregate rows per bucket, ignoring chain.
///
/// Needed for non-additive reductions (averages, shares) where per-chain
/// results cannot simply be summed.
pub fn aggregate_combined(events: &[Event], spec: &PeriodSpec, reduction: Reduction) -> BucketSeries {
    let mut cells: BTreeMap<Bucket, Cell<'_>> = BTreeMap::new();

    for event in events {
        if let Some(bucket) = spec.bucket_of(event.timestamp) {
            cells.entry(bucket).or_default().push(event, reduction);
        }
    }

    reduce(cells, reduction)
}
