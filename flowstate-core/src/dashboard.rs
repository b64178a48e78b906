//! Dashboard tabs
//!
//! [`Dashboard`] wires a row source to the pipeline and produces one result
//! per tab. Every tab takes an already resolved [`PeriodSpec`], so all tabs
//! of a single render share the same window and "now".
//!
//! Tabs:
//! - [`Tab::Transactions`]: distinct transactions over time, both chains merged
//! - [`Tab::Distribution`]: per-chain transactions and the latest bucket's share
//! - [`Tab::Kpis`]: distinct transactions per chain since the period start
//! - [`Tab::Accounts`]: new, active and total accounts
//! - [`Tab::Fees`]: total and average fees plus transaction success share
//! - [`Tab::Staking`]: active stakers and staked amount
//! - [`Tab::Regions`]: inferred region mix of active accounts

use crate::aggregate::{aggregate, aggregate_combined, BucketSeries, Reduction};
use crate::cohort::CohortSeries;
use crate::config::Config;
use crate::delta::{Delta, DeltaReport};
use crate::error::{Error, Result};
use crate::export::{to_table, Table};
use crate::merge::{latest_shares, merge, ChainShare, ChainTotals};
use crate::period::{Bucket, PeriodKey, PeriodResolver, PeriodSpec};
use crate::region::{BroadRegion, RegionCatalog, RegionDistribution, DEFAULT_TOP_HOURS};
use crate::source::{RowQuery, RowSource};
use crate::types::{Chain, Dataset, Event};
use crate::window::{per_chain, MetricSeries, DEFAULT_ROLLING_WINDOW};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

// ============================================
// Tabs
// ============================================

/// One dashboard view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    Transactions,
    Distribution,
    Kpis,
    Accounts,
    Fees,
    Staking,
    Regions,
}

impl Tab {
    pub const ALL: [Tab; 7] = [
        Tab::Transactions,
        Tab::Distribution,
        Tab::Kpis,
        Tab::Accounts,
        Tab::Fees,
        Tab::Staking,
        Tab::Regions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tab::Transactions => "transactions",
            Tab::Distribution => "distribution",
            Tab::Kpis => "kpis",
            Tab::Accounts => "accounts",
            Tab::Fees => "fees",
            Tab::Staking => "staking",
            Tab::Regions => "regions",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Tab::Transactions => "Transactions Over Time",
            Tab::Distribution => "Distribution of Transactions",
            Tab::Kpis => "Transaction KPIs",
            Tab::Accounts => "New / Active / Total Accounts",
            Tab::Fees => "Fees",
            Tab::Staking => "Staking",
            Tab::Regions => "Regions",
        }
    }
}

impl std::str::FromStr for Tab {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Tab::ALL
            .into_iter()
            .find(|tab| tab.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown tab: {}", s)))
    }
}

impl std::fmt::Display for Tab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Tab results
// ============================================

/// Flat export row for a single metric series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRow {
    pub bucket: Bucket,
    pub value: f64,
    /// `"value (delta)"`
    pub diff: String,
    pub pct_change: f64,
    pub cumulative_total: f64,
    pub rolling_avg: f64,
}

/// Most recent bucket first.
fn series_rows(series: &MetricSeries) -> Vec<SeriesRow> {
    series
        .descending()
        .map(|p| SeriesRow {
            bucket: p.bucket,
            value: p.raw_value,
            diff: p.diff_label(),
            pct_change: p.pct_change,
            cumulative_total: p.cumulative_total,
            rolling_avg: p.rolling_avg,
        })
        .collect()
}

/// Latest rolling average against the one before it.
fn rolling_delta(series: &MetricSeries) -> Option<Delta> {
    let points = series.points();
    let latest = points.last()?;
    let prior = points.len().checked_sub(2).map(|i| points[i].rolling_avg);
    Some(Delta::between(latest.rolling_avg, prior))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionsOverTime {
    pub period: PeriodSpec,
    pub series: MetricSeries,
}

impl TransactionsOverTime {
    pub fn summary(&self) -> DeltaReport {
        let mut report = DeltaReport::new();
        report.push_series("Transactions", &self.series);
        report.push("Rolling average", rolling_delta(&self.series));
        report
    }

    pub fn table(&self) -> Result<Table> {
        to_table(&series_rows(&self.series))
    }
}

/// Chain shares of the latest bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestShares {
    pub bucket: Bucket,
    pub shares: Vec<ChainShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionRow {
    pub bucket: Bucket,
    pub chain: String,
    pub transactions: f64,
    pub share_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionDistribution {
    pub period: PeriodSpec,
    pub per_chain: BTreeMap<Chain, MetricSeries>,
    pub latest: Option<LatestShares>,
}

impl TransactionDistribution {
    pub fn summary(&self) -> DeltaReport {
        let mut report = DeltaReport::new();
        for chain in Chain::ALL {
            let name = format!("Transactions [{}]", chain.display_name());
            match self.per_chain.get(&chain) {
                Some(series) => report.push_series(name, series),
                None => report.push(name, None),
            }
        }
        if let Some(latest) = &self.latest {
            for share in &latest.shares {
                report.push(
                    format!("Share % [{}]", share.chain.display_name()),
                    Some(Delta::between(share.share_pct, None)),
                );
            }
        }
        report
    }

    /// One row per bucket and chain, newest bucket first.
    pub fn table(&self) -> Result<Table> {
        let mut totals: BTreeMap<Bucket, f64> = BTreeMap::new();
        for series in self.per_chain.values() {
            for point in series.points() {
                *totals.entry(point.bucket).or_insert(0.0) += point.raw_value;
            }
        }

        let mut rows = Vec::new();
        for (bucket, total) in totals.iter().rev() {
            for (chain, series) in &self.per_chain {
                if let Some(point) = series.points().iter().find(|p| p.bucket == *bucket) {
                    rows.push(DistributionRow {
                        bucket: *bucket,
                        chain: chain.display_name().to_string(),
                        transactions: point.raw_value,
                        share_pct: if *total > 0.0 {
                            point.raw_value / total * 100.0
                        } else {
                            0.0
                        },
                    });
                }
            }
        }
        to_table(&rows)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiRow {
    pub cadence: f64,
    pub evm: f64,
    pub total_transactions: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionKpis {
    pub period: PeriodSpec,
    pub totals: ChainTotals,
}

impl TransactionKpis {
    pub fn summary(&self) -> DeltaReport {
        let mut report = DeltaReport::new();
        report.push(
            "Transactions [EVM + Cadence]",
            Some(Delta::between(self.totals.total, None)),
        );
        report.push(
            "Transactions [EVM]",
            Some(Delta::between(self.totals.get(Chain::Evm), None)),
        );
        report.push(
            "Transactions [Cadence]",
            Some(Delta::between(self.totals.get(Chain::Cadence), None)),
        );
        report
    }

    pub fn table(&self) -> Result<Table> {
        to_table(&[KpiRow {
            cadence: self.totals.get(Chain::Cadence),
            evm: self.totals.get(Chain::Evm),
            total_transactions: self.totals.total,
        }])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountCohorts {
    pub period: PeriodSpec,
    pub cohorts: CohortSeries,
    pub new_accounts: MetricSeries,
    pub active_accounts: MetricSeries,
    pub total_accounts: MetricSeries,
}

impl AccountCohorts {
    pub fn summary(&self) -> DeltaReport {
        let mut report = DeltaReport::new();
        report.push_series("New accounts", &self.new_accounts);
        report.push_series("Active accounts", &self.active_accounts);
        report.push_series("Total accounts", &self.total_accounts);
        report
    }

    /// Newest bucket first.
    pub fn table(&self) -> Result<Table> {
        let points: Vec<_> = self.cohorts.points().iter().rev().collect();
        to_table(&points)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeRow {
    pub bucket: Bucket,
    pub total_fees: Option<f64>,
    pub average_fee: Option<f64>,
    pub success_share_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeMetrics {
    pub period: PeriodSpec,
    pub total_fees: MetricSeries,
    pub average_fee: MetricSeries,
    pub success_share: MetricSeries,
}

impl FeeMetrics {
    pub fn summary(&self) -> DeltaReport {
        let mut report = DeltaReport::new();
        report.push_series("Total fees", &self.total_fees);
        report.push_series("Average fee", &self.average_fee);
        report.push_series("Success share %", &self.success_share);
        report
    }

    /// Joined on bucket, newest first. Buckets without a value for a column
    /// leave it empty.
    pub fn table(&self) -> Result<Table> {
        let lookup = |series: &MetricSeries| -> BTreeMap<Bucket, f64> {
            series.points().iter().map(|p| (p.bucket, p.raw_value)).collect()
        };
        let total = lookup(&self.total_fees);
        let average = lookup(&self.average_fee);
        let share = lookup(&self.success_share);

        let buckets: BTreeSet<Bucket> = total
            .keys()
            .chain(average.keys())
            .chain(share.keys())
            .copied()
            .collect();

        let rows: Vec<FeeRow> = buckets
            .into_iter()
            .rev()
            .map(|bucket| FeeRow {
                bucket,
                total_fees: total.get(&bucket).copied(),
                average_fee: average.get(&bucket).copied(),
                success_share_pct: share.get(&bucket).copied(),
            })
            .collect();
        to_table(&rows)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakingRow {
    pub bucket: Bucket,
    pub stakers: f64,
    pub staked: f64,
    pub cumulative_staked: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakingActivity {
    pub period: PeriodSpec,
    pub stakers: MetricSeries,
    pub staked: MetricSeries,
}

impl StakingActivity {
    pub fn summary(&self) -> DeltaReport {
        let mut report = DeltaReport::new();
        report.push_series("Active stakers", &self.stakers);
        report.push_series("Staked amount", &self.staked);
        report
    }

    pub fn table(&self) -> Result<Table> {
        let rows: Vec<StakingRow> = self
            .staked
            .descending()
            .map(|p| StakingRow {
                bucket: p.bucket,
                stakers: self
                    .stakers
                    .points()
                    .iter()
                    .find(|s| s.bucket == p.bucket)
                    .map(|s| s.raw_value)
                    .unwrap_or(0.0),
                staked: p.raw_value,
                cumulative_staked: p.cumulative_total,
            })
            .collect();
        to_table(&rows)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionBreakdown {
    pub period: PeriodSpec,
    pub distribution: RegionDistribution,
}

impl RegionBreakdown {
    /// Adjusted count per broad region, latest bucket vs the one before.
    pub fn summary(&self) -> DeltaReport {
        let mut report = DeltaReport::new();
        let buckets = &self.distribution.buckets;

        let regions: BTreeSet<BroadRegion> = buckets
            .iter()
            .flat_map(|b| b.counts.observed.keys().copied())
            .collect();
        let window = buckets.len().max(1);

        for region in regions {
            let series = MetricSeries::compute(
                buckets.iter().map(|b| {
                    (
                        b.bucket,
                        b.counts.adjusted.get(&region).copied().unwrap_or(0.0),
                    )
                }),
                window,
            );
            report.push_series(format!("Accounts [{}]", region.label()), &series);
        }

        let unknown = MetricSeries::compute(
            buckets.iter().map(|b| (b.bucket, b.counts.unknown as f64)),
            window,
        );
        report.push_series("Unclassified accounts", &unknown);
        report
    }

    pub fn table(&self) -> Result<Table> {
        let mut rows = self.distribution.rows();
        rows.reverse();
        to_table(&rows)
    }

    /// Region assigned to each entity active in the window.
    pub fn assignments_table(&self) -> Result<Table> {
        to_table(&self.distribution.assignment_rows())
    }
}

/// The result of computing one tab.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tab", rename_all = "snake_case")]
pub enum TabOutput {
    Transactions(TransactionsOverTime),
    Distribution(TransactionDistribution),
    Kpis(TransactionKpis),
    Accounts(AccountCohorts),
    Fees(FeeMetrics),
    Staking(StakingActivity),
    Regions(RegionBreakdown),
}

impl TabOutput {
    pub fn tab(&self) -> Tab {
        match self {
            TabOutput::Transactions(_) => Tab::Transactions,
            TabOutput::Distribution(_) => Tab::Distribution,
            TabOutput::Kpis(_) => Tab::Kpis,
            TabOutput::Accounts(_) => Tab::Accounts,
            TabOutput::Fees(_) => Tab::Fees,
            TabOutput::Staking(_) => Tab::Staking,
            TabOutput::Regions(_) => Tab::Regions,
        }
    }

    pub fn summary(&self) -> DeltaReport {
        match self {
            TabOutput::Transactions(t) => t.summary(),
            TabOutput::Distribution(t) => t.summary(),
            TabOutput::Kpis(t) => t.summary(),
            TabOutput::Accounts(t) => t.summary(),
            TabOutput::Fees(t) => t.summary(),
            TabOutput::Staking(t) => t.summary(),
            TabOutput::Regions(t) => t.summary(),
        }
    }

    /// Raw data of the tab as a flat table.
    pub fn table(&self) -> Result<Table> {
        match self {
            TabOutput::Transactions(t) => t.table(),
            TabOutput::Distribution(t) => t.table(),
            TabOutput::Kpis(t) => t.table(),
            TabOutput::Accounts(t) => t.table(),
            TabOutput::Fees(t) => t.table(),
            TabOutput::Staking(t) => t.table(),
            TabOutput::Regions(t) => t.table(),
        }
    }

    /// Per-entity detail behind the tab, for tabs that classify entities.
    pub fn entity_table(&self) -> Result<Option<Table>> {
        match self {
            TabOutput::Regions(t) => t.assignments_table().map(Some),
            _ => Ok(None),
        }
    }
}

// ============================================
// Dashboard
// ============================================

/// Tunables for the windowed and region stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardOptions {
    pub rolling_window: usize,
    pub top_hours: usize,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            rolling_window: DEFAULT_ROLLING_WINDOW,
            top_hours: DEFAULT_TOP_HOURS,
        }
    }
}

/// Computes dashboard tabs from a row source.
pub struct Dashboard<S> {
    source: S,
    resolver: PeriodResolver,
    catalog: RegionCatalog,
    options: DashboardOptions,
}

impl<S: RowSource> Dashboard<S> {
    /// Dashboard with default resolver, catalog and options.
    pub fn new(source: S) -> Self {
        Self {
            source,
            resolver: PeriodResolver::default(),
            catalog: RegionCatalog::default(),
            options: DashboardOptions::default(),
        }
    }

    /// Dashboard tuned by the `[metrics]` config section.
    pub fn from_config(source: S, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(source)
            .with_resolver(config.metrics.resolver()?)
            .with_options(DashboardOptions {
                rolling_window: config.metrics.rolling_window,
                top_hours: config.metrics.top_hours,
            }))
    }

    pub fn with_resolver(mut self, resolver: PeriodResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_catalog(mut self, catalog: RegionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_options(mut self, options: DashboardOptions) -> Self {
        self.options = options;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn options(&self) -> DashboardOptions {
        self.options
    }

    /// Resolve `key` against `now` with this dashboard's epoch.
    pub fn resolve(&self, key: PeriodKey, now: DateTime<Utc>) -> Result<PeriodSpec> {
        self.resolver.resolve(key, now)
    }

    /// Force the next fetch of every query to go to the source.
    pub fn refresh(&self) {
        self.source.refresh();
    }

    fn period_rows(&self, dataset: Dataset, spec: &PeriodSpec) -> Result<Vec<Event>> {
        let rows = self.source.fetch(&RowQuery::for_period(dataset, spec.key))?;
        tracing::debug!(
            dataset = dataset.as_str(),
            period = %spec.key,
            rows = rows.len(),
            source = self.source.name(),
            "Fetched period rows"
        );
        Ok(rows)
    }

    fn history_rows(&self, dataset: Dataset) -> Result<Vec<Event>> {
        let rows = self.source.fetch(&RowQuery::full_history(dataset))?;
        tracing::debug!(
            dataset = dataset.as_str(),
            rows = rows.len(),
            source = self.source.name(),
            "Fetched full history"
        );
        Ok(rows)
    }

    /// Per-chain values summed into one series. Only meaningful for
    /// reductions that add across chains.
    fn merged(&self, rows: &[Event], spec: &PeriodSpec, reduction: Reduction) -> BucketSeries {
        debug_assert!(
            reduction.is_additive(),
            "{:?} cannot be summed across chains",
            reduction
        );
        merge(&aggregate(rows, spec, reduction))
    }

    fn series(&self, values: &BucketSeries) -> MetricSeries {
        MetricSeries::from_buckets(values, self.options.rolling_window)
    }

    /// Distinct transactions per bucket, chains merged.
    pub fn transactions_over_time(&self, spec: &PeriodSpec) -> Result<TransactionsOverTime> {
        let rows = self.period_rows(Dataset::Transactions, spec)?;
        let merged = self.merged(&rows, spec, Reduction::CountDistinct);
        Ok(TransactionsOverTime {
            period: *spec,
            series: self.series(&merged),
        })
    }

    pub fn transaction_distribution(&self, spec: &PeriodSpec) -> Result<TransactionDistribution> {
        let rows = self.period_rows(Dataset::Transactions, spec)?;
        let by_chain = aggregate(&rows, spec, Reduction::CountDistinct);
        let latest =
            latest_shares(&by_chain).map(|(bucket, shares)| LatestShares { bucket, shares });
        Ok(TransactionDistribution {
            period: *spec,
            per_chain: per_chain(&by_chain, self.options.rolling_window),
            latest,
        })
    }

    /// Distinct transactions per chain from the period start up to "now",
    /// the current incomplete bucket included.
    pub fn transaction_kpis(&self, spec: &PeriodSpec) -> Result<TransactionKpis> {
        let rows = self.period_rows(Dataset::Transactions, spec)?;

        let mut seen: BTreeMap<Chain, HashSet<&str>> = BTreeMap::new();
        for event in &rows {
            if spec.start <= event.timestamp && event.timestamp <= spec.resolved_at {
                seen.entry(event.category)
                    .or_default()
                    .insert(event.entity_id.as_str());
            }
        }

        let per_chain: BTreeMap<Chain, f64> = Chain::ALL
            .into_iter()
            .map(|chain| (chain, seen.get(&chain).map_or(0, |s| s.len()) as f64))
            .collect();
        let total = per_chain.values().sum();
        Ok(TransactionKpis {
            period: *spec,
            totals: ChainTotals { per_chain, total },
        })
    }

    /// Cohorts need every account row ever seen to tell new from returning.
    pub fn account_cohorts(&self, spec: &PeriodSpec) -> Result<AccountCohorts> {
        let rows = self.history_rows(Dataset::Accounts)?;
        let cohorts = CohortSeries::compute(&rows, spec);
        let window = self.options.rolling_window;
        Ok(AccountCohorts {
            period: *spec,
            new_accounts: cohorts.new_series(window),
            active_accounts: cohorts.active_series(window),
            total_accounts: cohorts.total_series(window),
            cohorts,
        })
    }

    pub fn fees(&self, spec: &PeriodSpec) -> Result<FeeMetrics> {
        let rows = self.period_rows(Dataset::Transactions, spec)?;
        let total = self.merged(&rows, spec, Reduction::Sum);
        let average = aggregate_combined(&rows, spec, Reduction::Avg);
        let share = aggregate_combined(&rows, spec, Reduction::SuccessShare);
        Ok(FeeMetrics {
            period: *spec,
            total_fees: self.series(&total),
            average_fee: self.series(&average),
            success_share: self.series(&share),
        })
    }

    pub fn staking_over_time(&self, spec: &PeriodSpec) -> Result<StakingActivity> {
        let rows = self.period_rows(Dataset::Staking, spec)?;
        let stakers = self.merged(&rows, spec, Reduction::CountDistinct);
        let staked = self.merged(&rows, spec, Reduction::Sum);
        Ok(StakingActivity {
            period: *spec,
            stakers: self.series(&stakers),
            staked: self.series(&staked),
        })
    }

    pub fn regions(&self, spec: &PeriodSpec) -> Result<RegionBreakdown> {
        let rows = self.period_rows(Dataset::Accounts, spec)?;
        Ok(RegionBreakdown {
            period: *spec,
            distribution: RegionDistribution::compute(
                &rows,
                spec,
                &self.catalog,
                self.options.top_hours,
            ),
        })
    }

    /// Compute any tab.
    pub fn tab(&self, tab: Tab, spec: &PeriodSpec) -> Result<TabOutput> {
        let output = match tab {
            Tab::Transactions => TabOutput::Transactions(self.transactions_over_time(spec)?),
            Tab::Distribution => TabOutput::Distribution(self.transaction_distribution(spec)?),
            Tab::Kpis => TabOutput::Kpis(self.transaction_kpis(spec)?),
            Tab::Accounts => TabOutput::Accounts(self.account_cohorts(spec)?),
            Tab::Fees => TabOutput::Fees(self.fees(spec)?),
            Tab::Staking => TabOutput::Staking(self.staking_over_time(spec)?),
            Tab::Regions => TabOutput::Regions(self.regions(spec)?),
        };
        tracing::debug!(tab = %tab, period = %spec.key, "Computed tab");
        Ok(output)
    }
}
