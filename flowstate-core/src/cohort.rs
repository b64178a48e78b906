//! New vs active cohorts
//!
//! Runs in two phases:
//!
//! 1. [`first_seen`] finds every entity's first bucket over **all** rows
//!    supplied, including rows before the window.
//! 2. [`CohortSeries::compute`] walks the window's buckets and counts
//!    entities active in each bucket, and those whose first bucket it is.
//!
//! Keeping phase 1 unfiltered means an entity that merely re-appears inside
//! the window is active there but never new.

use crate::period::{Bucket, Granularity, PeriodSpec};
use crate::types::Event;
use crate::window::MetricSeries;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// First bucket each entity appeared in, across every chain.
pub fn first_seen(events: &[Event], granularity: Granularity) -> HashMap<&str, Bucket> {
    let mut earliest: HashMap<&str, chrono::DateTime<chrono::Utc>> = HashMap::new();
    for event in events {
        earliest
            .entry(event.entity_id.as_str())
            .and_modify(|ts| *ts = (*ts).min(event.timestamp))
            .or_insert(event.timestamp);
    }
    earliest
        .into_iter()
        .map(|(entity, ts)| (entity, granularity.bucket(ts)))
        .collect()
}

/// Counts for one bucket of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CohortPoint {
    pub bucket: Bucket,
    /// Entities whose first bucket is this one
    pub new_count: u64,
    /// Entities with at least one row in this bucket
    pub active_count: u64,
    /// Running sum of `new_count` from the window's first bucket
    pub unique_total: u64,
}

/// New/active/total counts per bucket, ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CohortSeries {
    points: Vec<CohortPoint>,
}

impl CohortSeries {
    /// Compute cohorts for the window described by `spec`.
    ///
    /// `events` should hold the full history available, not just rows in the
    /// window; rows outside the window only feed first-seen detection.
    pub fn compute(events: &[Event], spec: &PeriodSpec) -> Self {
        let first = first_seen(events, spec.granularity);

        let mut active: BTreeMap<Bucket, HashSet<&str>> = BTreeMap::new();
        for event in events {
            if let Some(bucket) = spec.bucket_of(event.timestamp) {
                active
                    .entry(bucket)
                    .or_default()
                    .insert(event.entity_id.as_str());
            }
        }

        let mut unique_total = 0u64;
        let points: Vec<CohortPoint> = active
            .into_iter()
            .map(|(bucket, entities)| {
                let new_count = entities
                    .iter()
                    .filter(|entity| first.get(*entity) == Some(&bucket))
                    .count() as u64;
                unique_total += new_count;
                CohortPoint {
                    bucket,
                    new_count,
                    active_count: entities.len() as u64,
                    unique_total,
                }
            })
            .collect();

        tracing::debug!(
            period = %spec.key,
            entities = first.len(),
            buckets = points.len(),
            new_in_window = unique_total,
            "Computed cohorts"
        );

        Self { points }
    }

    pub fn points(&self) -> &[CohortPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// New entities per bucket as a windowed series.
    pub fn new_series(&self, window: usize) -> MetricSeries {
        self.series(window, |p| p.new_count)
    }

    /// Active entities per bucket as a windowed series.
    pub fn active_series(&self, window: usize) -> MetricSeries {
        self.series(window, |p| p.active_count)
    }

    /// Running unique total as a windowed series.
    pub fn total_series(&self, window: usize) -> MetricSeries {
        self.series(window, |p| p.unique_total)
    }

    fn series(&self, window: usize, value: impl Fn(&CohortPoint) -> u64) -> MetricSeries {
        MetricSeries::compute(
            self.points.iter().map(|p| (p.bucket, value(p) as f64)),
            window,
        )
    }
}
