//! Integration tests for the flowstate pipeline
//!
//! These tests read the row files in `tests/fixtures/flow/` through
//! [`JsonlSource`] and check each dashboard tab end to end.

use chrono::{DateTime, TimeZone, Utc};
use flowstate_core::region::BroadRegion;
use flowstate_core::{
    Bucket, CachedSource, Chain, Config, Dashboard, Dataset, Error, JsonlSource, PeriodKey,
    RowQuery, RowSource, Tab,
};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Directory holding the fixture row files
fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/flow")
}

/// Wednesday 2024-05-15 12:00 UTC
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap()
}

fn day(m: u32, d: u32) -> Bucket {
    Bucket(Utc.with_ymd_and_hms(2024, m, d, 0, 0, 0).unwrap())
}

fn dashboard() -> Dashboard<JsonlSource> {
    flowstate_core::logging::init_test();
    Dashboard::new(JsonlSource::new(fixture_dir()))
}

// ============================================
// Row source
// ============================================

#[test]
fn test_jsonl_skips_malformed_and_blank_lines() {
    let source = JsonlSource::new(fixture_dir());
    let rows = source
        .fetch(&RowQuery::full_history(Dataset::Transactions))
        .expect("lenient fetch should succeed");
    assert_eq!(rows.len(), 8);
    assert!(rows.iter().all(|r| r.entity_id != "e9"));

    let evm = source
        .fetch(&RowQuery::full_history(Dataset::Transactions).with_category(Chain::Evm))
        .unwrap();
    assert_eq!(evm.len(), 4);
}

#[test]
fn test_strict_source_reports_line() {
    let source = JsonlSource::new(fixture_dir()).strict();
    match source.fetch(&RowQuery::full_history(Dataset::Transactions)) {
        Err(Error::Parse {
            source_name, line, ..
        }) => {
            assert!(source_name.ends_with("transactions.jsonl"));
            assert_eq!(line, 5);
        }
        other => panic!("expected a parse error, got {:?}", other),
    }
}

#[test]
fn test_missing_dataset_is_empty() {
    let temp = TempDir::new().unwrap();
    std::fs::copy(
        fixture_dir().join("transactions.jsonl"),
        temp.path().join("transactions.jsonl"),
    )
    .unwrap();

    let dash = Dashboard::new(JsonlSource::new(temp.path()));
    let spec = dash.resolve(PeriodKey::LastWeek, now()).unwrap();
    let staking = dash.staking_over_time(&spec).unwrap();
    assert!(staking.staked.is_empty());
    assert_eq!(
        staking.summary().lines(),
        vec!["Active stakers: no data", "Staked amount: no data"]
    );

    let transactions = dash.transactions_over_time(&spec).unwrap();
    assert_eq!(transactions.series.len(), 2);
}

// ============================================
// Transactions tabs
// ============================================

#[test]
fn test_last_week_transactions() {
    let dash = dashboard();
    let spec = dash.resolve(PeriodKey::LastWeek, now()).unwrap();
    let result = dash.transactions_over_time(&spec).unwrap();

    let buckets: Vec<Bucket> = result.series.points().iter().map(|p| p.bucket).collect();
    assert_eq!(buckets, vec![day(5, 12), day(5, 14)]);

    let summary = result.summary().lines();
    assert_eq!(summary[0], "Transactions: 3 (+0), +0.0%");
}

#[test]
fn test_last_month_runs_over_present_buckets() {
    let dash = dashboard();
    let spec = dash.resolve(PeriodKey::LastMonth, now()).unwrap();
    let series = dash.transactions_over_time(&spec).unwrap().series;

    let values: Vec<f64> = series.points().iter().map(|p| p.raw_value).collect();
    assert_eq!(values, vec![1.0, 3.0, 3.0]);

    let latest = series.latest().unwrap();
    assert_eq!(latest.cumulative_total, 7.0);
    assert!((latest.rolling_avg - 7.0 / 3.0).abs() < 1e-9);
    assert_eq!(series.descending().next().unwrap().bucket, day(5, 14));
}

#[test]
fn test_all_time_single_bucket() {
    let dash = dashboard();
    let spec = dash.resolve(PeriodKey::AllTime, now()).unwrap();
    let series = dash.transactions_over_time(&spec).unwrap().series;

    assert_eq!(series.len(), 1);
    let point = series.latest().unwrap();
    assert_eq!(point.bucket, Bucket(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()));
    assert_eq!(point.prior_value, None);
    assert_eq!(point.pct_change, 0.0);

    let delta = flowstate_core::Delta::from_series(&series).unwrap();
    assert_eq!(delta.percent_delta, None);
}

#[test]
fn test_kpis_and_distribution() {
    let dash = dashboard();
    let spec = dash.resolve(PeriodKey::LastWeek, now()).unwrap();

    let kpis = dash.transaction_kpis(&spec).unwrap();
    assert_eq!(kpis.totals.get(Chain::Cadence), 3.0);
    assert_eq!(kpis.totals.get(Chain::Evm), 4.0);
    assert_eq!(kpis.totals.total, 7.0);

    let dist = dash.transaction_distribution(&spec).unwrap();
    let latest = dist.latest.expect("latest shares");
    assert_eq!(latest.bucket, day(5, 14));
    let total_share: f64 = latest.shares.iter().map(|s| s.share_pct).sum();
    assert!((total_share - 100.0).abs() < 1e-9);
}

#[test]
fn test_fee_success_share() {
    let dash = dashboard();
    let spec = dash.resolve(PeriodKey::LastWeek, now()).unwrap();
    let fees = dash.fees(&spec).unwrap();

    let share: Vec<f64> = fees.success_share.points().iter().map(|p| p.raw_value).collect();
    assert!((share[0] - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(share[1], 100.0);

    let avg = fees.average_fee.latest().unwrap().raw_value;
    assert!((avg - 0.011 / 3.0).abs() < 1e-12);
}

// ============================================
// Accounts and regions
// ============================================

#[test]
fn test_cohorts_see_history_before_window() {
    let dash = dashboard();
    let spec = dash.resolve(PeriodKey::LastWeek, now()).unwrap();
    let accounts = dash.account_cohorts(&spec).unwrap();
    let points = accounts.cohorts.points();

    assert_eq!(points.len(), 2);
    assert_eq!(
        (points[0].active_count, points[0].new_count, points[0].unique_total),
        (2, 1, 1)
    );
    assert_eq!(
        (points[1].active_count, points[1].new_count, points[1].unique_total),
        (2, 1, 2)
    );
    for point in points {
        assert!(point.new_count <= point.active_count);
    }
}

#[test]
fn test_region_assignment_and_redistribution() {
    let dash = dashboard();
    let spec = dash.resolve(PeriodKey::LastWeek, now()).unwrap();
    let dist = dash.regions(&spec).unwrap().distribution;

    let labels: Vec<(&str, &str)> = dist
        .assignments
        .iter()
        .map(|a| (a.entity_id.as_str(), a.label()))
        .collect();
    assert_eq!(
        labels,
        vec![("alice", "Europe"), ("bob", "Unknown"), ("carol", "US")]
    );

    assert_eq!(dist.overall.unknown, 1);
    assert_eq!(dist.overall.adjusted[&BroadRegion::Europe], 1.5);
    assert_eq!(dist.overall.adjusted[&BroadRegion::Us], 1.5);

    assert_eq!(dist.buckets.len(), 2);
    for bucket in &dist.buckets {
        let adjusted: f64 = bucket.counts.adjusted.values().sum();
        let entities = bucket.counts.known() + bucket.counts.unknown;
        assert!((adjusted - entities as f64).abs() < 1e-9);
    }
}

// ============================================
// Cache and export
// ============================================

#[test]
fn test_cached_dashboard_reuses_fetches() {
    let dash = Dashboard::new(CachedSource::new(
        JsonlSource::new(fixture_dir()),
        Duration::from_secs(600),
    ));
    let spec = dash.resolve(PeriodKey::LastWeek, now()).unwrap();

    for tab in [Tab::Transactions, Tab::Distribution, Tab::Kpis, Tab::Fees] {
        dash.tab(tab, &spec).unwrap();
    }
    let stats = dash.source().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 3);

    dash.refresh();
    dash.tab(Tab::Transactions, &spec).unwrap();
    assert_eq!(dash.source().stats().misses, 2);
}

#[test]
fn test_concurrent_tabs_share_one_fetch() {
    let dash = Dashboard::new(CachedSource::new(
        JsonlSource::new(fixture_dir()),
        Duration::from_secs(600),
    ));
    let spec = dash.resolve(PeriodKey::LastWeek, now()).unwrap();

    std::thread::scope(|scope| {
        for tab in [Tab::Transactions, Tab::Distribution, Tab::Kpis, Tab::Fees] {
            let dash = &dash;
            let spec = &spec;
            scope.spawn(move || dash.tab(tab, spec).unwrap());
        }
    });

    let stats = dash.source().stats();
    assert_eq!((stats.misses, stats.hits, stats.entries), (1, 3, 1));
}

#[test]
fn test_region_assignments_export() {
    let dash = dashboard();
    let spec = dash.resolve(PeriodKey::LastWeek, now()).unwrap();
    let table = dash.regions(&spec).unwrap().assignments_table().unwrap();

    assert_eq!(table.columns, vec!["entity_id", "region", "broad_region", "score"]);
    let cells: Vec<(&str, &str)> = table
        .rows
        .iter()
        .map(|row| (row[0].as_str().unwrap(), row[2].as_str().unwrap()))
        .collect();
    assert_eq!(
        cells,
        vec![("alice", "Europe"), ("bob", "Unknown"), ("carol", "US")]
    );
}

#[test]
fn test_every_tab_exports_flat_table() {
    let dash = dashboard();
    let spec = dash.resolve(PeriodKey::LastWeek, now()).unwrap();
    for tab in Tab::ALL {
        let output = dash.tab(tab, &spec).unwrap();
        let table = output.table().unwrap();
        assert!(!table.columns.is_empty(), "{} exported no columns", tab);
        assert!(!table.is_empty(), "{} exported no rows", tab);
        for row in &table.rows {
            assert_eq!(row.len(), table.columns.len());
        }
    }
}

#[test]
fn test_dashboard_from_config_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(
        &path,
        "[metrics]\nrolling_window = 2\nepoch = \"2024-04-01\"\n",
    )
    .unwrap();
    let config = Config::load_from(&path).unwrap();

    let dash = Dashboard::from_config(JsonlSource::new(fixture_dir()), &config).unwrap();
    let spec = dash.resolve(PeriodKey::LastMonth, now()).unwrap();
    let latest = dash
        .transactions_over_time(&spec)
        .unwrap()
        .series
        .latest()
        .cloned()
        .unwrap();
    assert_eq!(latest.rolling_avg, 3.0);
}
