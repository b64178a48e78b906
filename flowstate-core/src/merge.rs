//! Cross-chain merging
//!
//! Combines per-chain series into a single series with an outer join on
//! bucket: a bucket that only one chain reported still contributes, and a
//! chain missing from a bucket counts as zero.

use crate::aggregate::{BucketSeries, CategorySeries};
use crate::period::Bucket;
use crate::types::Chain;
use serde::Serialize;
use std::collections::BTreeMap;

/// Sum every chain's value per bucket.
pub fn merge(series: &CategorySeries) -> BucketSeries {
    let mut merged = BucketSeries::new();
    for per_chain in series.values() {
        for (bucket, value) in per_chain {
            *merged.entry(*bucket).or_insert(0.0) += value;
        }
    }
    merged
}

/// One chain's share of a single bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainShare {
    pub chain: Chain,
    pub value: f64,
    /// Percentage of the bucket total (0-100)
    pub share_pct: f64,
}

/// Shares of the most recent bucket any chain reported.
///
/// Chains absent from that bucket report a zero value. When the bucket total
/// is zero every share is zero.
pub fn latest_shares(series: &CategorySeries) -> Option<(Bucket, Vec<ChainShare>)> {
    let latest = series
        .values()
        .filter_map(|per_chain| per_chain.keys().next_back())
        .max()
        .copied()?;

    let values: Vec<(Chain, f64)> = series
        .iter()
        .map(|(chain, per_chain)| (*chain, per_chain.get(&latest).copied().unwrap_or(0.0)))
        .collect();
    let total: f64 = values.iter().map(|(_, v)| v).sum();

    let shares = values
        .into_iter()
        .map(|(chain, value)| ChainShare {
            chain,
            value,
            share_pct: if total > 0.0 { value / total * 100.0 } else { 0.0 },
        })
        .collect();

    Some((latest, shares))
}

/// Totals per chain plus the combined total.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChainTotals {
    pub per_chain: BTreeMap<Chain, f64>,
    pub total: f64,
}

impl ChainTotals {
    /// Value for one chain, zero when it reported nothing.
    pub fn get(&self, chain: Chain) -> f64 {
        self.per_chain.get(&chain).copied().unwrap_or(0.0)
    }
}

/// Sum every bucket of every chain.
pub fn totals(series: &CategorySeries) -> ChainTotals {
    let per_chain: BTreeMap<Chain, f64> = series
        .iter()
        .map(|(chain, per_chain)| (*chain, per_chain.values().sum()))
        .collect();
    let total = per_chain.values().sum();
    ChainTotals { per_chain, total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn day(d: u32) -> Bucket {
        Bucket(Utc.with_ymd_and_hms(2024, 5, d, 0, 0, 0).unwrap())
    }

    fn series(points: &[(Chain, u32, f64)]) -> CategorySeries {
        let mut out = CategorySeries::new();
        for (chain, d, v) in points {
            out.entry(*chain).or_default().insert(day(*d), *v);
        }
        out
    }

    #[test]
    fn test_merge_outer_joins_buckets() {
        let input = series(&[
            (Chain::Cadence, 1, 10.0),
            (Chain::Cadence, 2, 20.0),
            (Chain::Evm, 2, 5.0),
            (Chain::Evm, 3, 7.0),
        ]);
        let merged = merge(&input);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[&day(1)], 10.0);
        assert_eq!(merged[&day(2)], 25.0);
        assert_eq!(merged[&day(3)], 7.0);
    }

    #[test]
    fn test_merge_with_one_chain_missing() {
        let input = series(&[(Chain::Evm, 4, 3.0)]);
        let merged = merge(&input);
        assert_eq!(merged.into_iter().collect::<Vec<_>>(), vec![(day(4), 3.0)]);
        assert!(merge(&CategorySeries::new()).is_empty());
    }

    #[test]
    fn test_latest_shares() {
        let input = series(&[
            (Chain::Cadence, 1, 10.0),
            (Chain::Cadence, 3, 30.0),
            (Chain::Evm, 1, 5.0),
            (Chain::Evm, 2, 10.0),
        ]);
        let (bucket, shares) = latest_shares(&input).unwrap();
        assert_eq!(bucket, day(3));
        assert_eq!(shares[0].chain, Chain::Cadence);
        assert_eq!(shares[0].share_pct, 100.0);
        assert_eq!(shares[1].value, 0.0);
        assert_eq!(shares[1].share_pct, 0.0);
    }

    #[test]
    fn test_latest_shares_zero_total() {
        let input = series(&[(Chain::Cadence, 1, 0.0), (Chain::Evm, 1, 0.0)]);
        let (_, shares) = latest_shares(&input).unwrap();
        assert!(shares.iter().all(|s| s.share_pct == 0.0));
        assert!(latest_shares(&CategorySeries::new()).is_none());
    }

    #[test]
    fn test_totals() {
        let input = series(&[
            (Chain::Cadence, 1, 10.0),
            (Chain::Cadence, 2, 20.0),
            (Chain::Evm, 2, 5.0),
        ]);
        let totals = totals(&input);
        assert_eq!(totals.get(Chain::Cadence), 30.0);
        assert_eq!(totals.get(Chain::Evm), 5.0);
        assert_eq!(totals.total, 35.0);
    }
}
