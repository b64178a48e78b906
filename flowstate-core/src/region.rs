//! Region inference from hourly activity
//!
//! Each entity's busiest hours of the day (UTC) are matched against a fixed
//! catalog of regions, each described by the six UTC hours that correspond
//! to its local morning and evening peaks. The region with the strictly
//! highest overlap wins; any tie for the top score, including a tie at zero,
//! leaves the entity unassigned.
//!
//! Per-bucket counts of unassigned entities are then spread over the known
//! regions in proportion to their observed share.

use crate::period::{Bucket, PeriodSpec};
use crate::types::Event;
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Default number of busiest hours kept per entity.
pub const DEFAULT_TOP_HOURS: usize = 6;

// ============================================
// Regions
// ============================================

/// Fine-grained catalog regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    UsEast,
    UsCentral,
    UsWest,
    LatinAmerica,
    EuropeWest,
    EuropeEast,
    SouthAsia,
    EastAsia,
    Oceania,
}

/// Reporting labels that fine-grained regions collapse into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum BroadRegion {
    #[serde(rename = "US")]
    Us,
    Europe,
    #[serde(rename = "Latin America")]
    LatinAmerica,
    #[serde(rename = "South Asia")]
    SouthAsia,
    #[serde(rename = "East Asia")]
    EastAsia,
    Oceania,
}

impl Region {
    pub fn name(&self) -> &'static str {
        match self {
            Region::UsEast => "US East",
            Region::UsCentral => "US Central",
            Region::UsWest => "US West",
            Region::LatinAmerica => "Latin America",
            Region::EuropeWest => "Europe West",
            Region::EuropeEast => "Europe East",
            Region::SouthAsia => "South Asia",
            Region::EastAsia => "East Asia",
            Region::Oceania => "Oceania",
        }
    }

    /// Collapse into the reporting label.
    pub fn broad(&self) -> BroadRegion {
        match self {
            Region::UsEast | Region::UsCentral | Region::UsWest => BroadRegion::Us,
            Region::EuropeWest | Region::EuropeEast => BroadRegion::Europe,
            Region::LatinAmerica => BroadRegion::LatinAmerica,
            Region::SouthAsia => BroadRegion::SouthAsia,
            Region::EastAsia => BroadRegion::EastAsia,
            Region::Oceania => BroadRegion::Oceania,
        }
    }
}

impl BroadRegion {
    pub fn label(&self) -> &'static str {
        match self {
            BroadRegion::Us => "US",
            BroadRegion::Europe => "Europe",
            BroadRegion::LatinAmerica => "Latin America",
            BroadRegion::SouthAsia => "South Asia",
            BroadRegion::EastAsia => "East Asia",
            BroadRegion::Oceania => "Oceania",
        }
    }
}

impl std::fmt::Display for BroadRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================
// Catalog
// ============================================

/// A region and its characteristic UTC hours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionProfile {
    pub region: Region,
    peak_hours: [bool; 24],
}

impl RegionProfile {
    /// Hours outside 0-23 are ignored.
    pub fn new(region: Region, hours: &[u8]) -> Self {
        let mut peak_hours = [false; 24];
        for &hour in hours {
            if let Some(slot) = peak_hours.get_mut(usize::from(hour)) {
                *slot = true;
            }
        }
        Self { region, peak_hours }
    }

    /// Number of `hours` that fall in this region's peak set.
    pub fn score(&self, hours: &[u8]) -> usize {
        hours
            .iter()
            .filter(|&&h| self.peak_hours.get(usize::from(h)).copied().unwrap_or(false))
            .count()
    }
}

/// Fixed lookup table of regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCatalog {
    profiles: Vec<RegionProfile>,
}

impl Default for RegionCatalog {
    /// Local 9-11am and 7-9pm, shifted to UTC by each region's main offset.
    fn default() -> Self {
        Self::new(vec![
            RegionProfile::new(Region::UsEast, &[14, 15, 16, 0, 1, 2]),
            RegionProfile::new(Region::UsCentral, &[15, 16, 17, 1, 2, 3]),
            RegionProfile::new(Region::UsWest, &[17, 18, 19, 3, 4, 5]),
            RegionProfile::new(Region::LatinAmerica, &[12, 13, 14, 22, 23, 0]),
            RegionProfile::new(Region::EuropeWest, &[8, 9, 10, 18, 19, 20]),
            RegionProfile::new(Region::EuropeEast, &[7, 8, 9, 17, 18, 19]),
            RegionProfile::new(Region::SouthAsia, &[4, 5, 6, 14, 15, 16]),
            RegionProfile::new(Region::EastAsia, &[1, 2, 3, 11, 12, 13]),
            RegionProfile::new(Region::Oceania, &[23, 0, 1, 9, 10, 11]),
        ])
    }
}

impl RegionCatalog {
    pub fn new(profiles: Vec<RegionProfile>) -> Self {
        Self { profiles }
    }

    /// Pick the region with the strictly highest score.
    ///
    /// Returns the winning region (if any) and the top score. Every profile
    /// is scored before deciding; a shared maximum yields `None`.
    pub fn classify(&self, top_hours: &[u8]) -> (Option<Region>, usize) {
        let mut best: Option<Region> = None;
        let mut best_score = 0usize;
        let mut tied = true;

        for profile in &self.profiles {
            let score = profile.score(top_hours);
            if best.is_none() || score > best_score {
                best = Some(profile.region);
                best_score = score;
                tied = false;
            } else if score == best_score {
                tied = true;
            }
        }

        if tied || best_score == 0 {
            (None, best_score)
        } else {
            (best, best_score)
        }
    }
}

// ============================================
// Per-entity profiles
// ============================================

/// Hour-of-day histogram for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityProfile {
    pub histogram: [u64; 24],
}

impl ActivityProfile {
    pub fn from_timestamps<I>(timestamps: I) -> Self
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        let mut histogram = [0u64; 24];
        for ts in timestamps {
            histogram[ts.hour() as usize] += 1;
        }
        Self { histogram }
    }

    /// Up to `n` busiest hours; ties go to the earlier hour, idle hours are
    /// never included.
    pub fn top_hours(&self, n: usize) -> Vec<u8> {
        let mut hours: Vec<(u8, u64)> = (0u8..24)
            .map(|h| (h, self.histogram[usize::from(h)]))
            .filter(|(_, count)| *count > 0)
            .collect();
        hours.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        hours.truncate(n);
        hours.into_iter().map(|(h, _)| h).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.iter().all(|c| *c == 0)
    }
}

/// Region inferred for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionAssignment {
    pub entity_id: String,
    /// `None` when unknown
    pub region: Option<Region>,
    /// Collapsed label; `None` when unknown
    pub broad: Option<BroadRegion>,
    /// Overlap of the entity's top hours with the best region
    pub score: usize,
}

impl RegionAssignment {
    pub fn label(&self) -> &'static str {
        self.broad.map(|b| b.label()).unwrap_or("Unknown")
    }
}

/// Classify every entity present in `events`, sorted by entity id.
pub fn classify_entities(
    events: &[Event],
    catalog: &RegionCatalog,
    top_n: usize,
) -> Vec<RegionAssignment> {
    let mut by_entity: HashMap<&str, Vec<DateTime<Utc>>> = HashMap::new();
    for event in events {
        by_entity
            .entry(event.entity_id.as_str())
            .or_default()
            .push(event.timestamp);
    }

    let mut assignments: Vec<RegionAssignment> = by_entity
        .into_iter()
        .map(|(entity, timestamps)| {
            let profile = ActivityProfile::from_timestamps(timestamps);
            let (region, score) = catalog.classify(&profile.top_hours(top_n));
            RegionAssignment {
                entity_id: entity.to_string(),
                region,
                broad: region.map(|r| r.broad()),
                score,
            }
        })
        .collect();
    assignments.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    assignments
}

// ============================================
// Distribution and redistribution
// ============================================

/// Spread `unknown` over the known regions by observed share.
///
/// `adjusted[r] = observed[r] * (known + unknown) / known`. With no known
/// entities every region reports zero.
pub fn redistribute(
    observed: &BTreeMap<BroadRegion, u64>,
    unknown: u64,
) -> BTreeMap<BroadRegion, f64> {
    let known: u64 = observed.values().sum();
    observed
        .iter()
        .map(|(region, count)| {
            let adjusted = if known == 0 {
                0.0
            } else {
                *count as f64 * (known + unknown) as f64 / known as f64
            };
            (*region, adjusted)
        })
        .collect()
}

/// Observed and redistributed counts for one slice of entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegionCounts {
    pub observed: BTreeMap<BroadRegion, u64>,
    pub unknown: u64,
    pub adjusted: BTreeMap<BroadRegion, f64>,
}

impl RegionCounts {
    fn from_labels<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = Option<BroadRegion>>,
    {
        let mut observed: BTreeMap<BroadRegion, u64> = BTreeMap::new();
        let mut unknown = 0u64;
        for label in labels {
            match label {
                Some(region) => *observed.entry(region).or_insert(0) += 1,
                None => unknown += 1,
            }
        }
        let adjusted = redistribute(&observed, unknown);
        Self {
            observed,
            unknown,
            adjusted,
        }
    }

    pub fn known(&self) -> u64 {
        self.observed.values().sum()
    }
}

/// Region counts for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionBucket {
    pub bucket: Bucket,
    pub counts: RegionCounts,
}

/// Flat row for export: one per bucket and label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionRow {
    pub bucket: Bucket,
    pub region: String,
    pub observed: u64,
    pub adjusted: f64,
}

/// Flat row for export: one per classified entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentRow {
    pub entity_id: String,
    pub region: String,
    pub broad_region: String,
    pub score: usize,
}

/// Region mix of active entities over a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegionDistribution {
    /// One entry per bucket with activity, ascending
    pub buckets: Vec<RegionBucket>,
    /// Every entity in the window counted once
    pub overall: RegionCounts,
    pub assignments: Vec<RegionAssignment>,
}

impl RegionDistribution {
    /// Classify entities from their rows inside the window, then count each
    /// bucket's active entities by region.
    pub fn compute(
        events: &[Event],
        spec: &PeriodSpec,
        catalog: &RegionCatalog,
        top_n: usize,
    ) -> Self {
        let in_window: Vec<Event> = events
            .iter()
            .filter(|e| spec.contains(e.timestamp))
            .cloned()
            .collect();

        let assignments = classify_entities(&in_window, catalog, top_n);
        let labels: HashMap<&str, Option<BroadRegion>> = assignments
            .iter()
            .map(|a| (a.entity_id.as_str(), a.broad))
            .collect();

        let mut active: BTreeMap<Bucket, HashSet<&str>> = BTreeMap::new();
        for event in &in_window {
            active
                .entry(spec.granularity.bucket(event.timestamp))
                .or_default()
                .insert(event.entity_id.as_str());
        }

        let buckets: Vec<RegionBucket> = active
            .into_iter()
            .map(|(bucket, entities)| RegionBucket {
                bucket,
                counts: RegionCounts::from_labels(
                    entities
                        .into_iter()
                        .map(|entity| labels.get(entity).copied().flatten()),
                ),
            })
            .collect();

        let overall = RegionCounts::from_labels(assignments.iter().map(|a| a.broad));

        tracing::debug!(
            period = %spec.key,
            entities = assignments.len(),
            unknown = overall.unknown,
            buckets = buckets.len(),
            "Computed region distribution"
        );

        Self {
            buckets,
            overall,
            assignments,
        }
    }

    /// One row per entity; unassigned entities read `Unknown`.
    pub fn assignment_rows(&self) -> Vec<AssignmentRow> {
        self.assignments
            .iter()
            .map(|a| AssignmentRow {
                entity_id: a.entity_id.clone(),
                region: a.region.map_or("Unknown", |r| r.name()).to_string(),
                broad_region: a.label().to_string(),
                score: a.score,
            })
            .collect()
    }

    /// Flatten into one row per bucket and label, unknowns included.
    pub fn rows(&self) -> Vec<RegionRow> {
        let mut rows = Vec::new();
        for bucket in &self.buckets {
            for (region, observed) in &bucket.counts.observed {
                rows.push(RegionRow {
                    bucket: bucket.bucket,
                    region: region.label().to_string(),
                    observed: *observed,
                    adjusted: bucket.counts.adjusted.get(region).copied().unwrap_or(0.0),
                });
            }
            if bucket.counts.unknown > 0 {
                rows.push(RegionRow {
                    bucket: bucket.bucket,
                    region: "Unknown".to_string(),
                    observed: bucket.counts.unknown,
                    adjusted: 0.0,
                });
            }
        }
        rows
    }
}
