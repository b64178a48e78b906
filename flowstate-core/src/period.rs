//! Period resolution
//!
//! Maps a requested [`PeriodKey`] to a concrete [`PeriodSpec`]: the bucket
//! granularity, the start of the window, and the cutoff that excludes the
//! current, not-yet-complete bucket.
//!
//! The mapping lives in a single table ([`PeriodKey::rule`]) so every query
//! site agrees on it.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Granularity and buckets
// ============================================

/// Size of a time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    /// ISO weeks, starting Monday 00:00 UTC
    Week,
    Month,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    /// Truncate an instant to the start of its bucket.
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let day_start = ts.date_naive().and_time(NaiveTime::MIN).and_utc();
        match self {
            Granularity::Hour => {
                let into_hour = i64::from(ts.minute() * 60 + ts.second());
                ts - Duration::seconds(into_hour) - Duration::nanoseconds(i64::from(ts.nanosecond()))
            }
            Granularity::Day => day_start,
            Granularity::Week => {
                day_start - Duration::days(i64::from(ts.weekday().num_days_from_monday()))
            }
            Granularity::Month => day_start - Duration::days(i64::from(ts.day0())),
        }
    }

    /// The bucket containing `ts`.
    pub fn bucket(&self, ts: DateTime<Utc>) -> Bucket {
        Bucket(self.truncate(ts))
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start instant of a time bucket.
///
/// Buckets are totally ordered by time. Only buckets that actually hold rows
/// appear in results; gaps are not filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bucket(pub DateTime<Utc>);

impl Bucket {
    pub fn start(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M"))
    }
}

// ============================================
// Period keys
// ============================================

/// The closed set of periods a caller may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKey {
    AllTime,
    LastYear,
    #[serde(rename = "last_3_months")]
    Last3Months,
    LastMonth,
    LastWeek,
    #[serde(rename = "last_24h")]
    Last24h,
}

/// How far back a period reaches from "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    /// From the configured epoch (earliest chain data)
    Epoch,
    Months(u32),
    Days(i64),
    Hours(i64),
}

/// One row of the period table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodRule {
    pub granularity: Granularity,
    pub lookback: Lookback,
}

impl PeriodKey {
    pub const ALL: [PeriodKey; 6] = [
        PeriodKey::AllTime,
        PeriodKey::LastYear,
        PeriodKey::Last3Months,
        PeriodKey::LastMonth,
        PeriodKey::LastWeek,
        PeriodKey::Last24h,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKey::AllTime => "all_time",
            PeriodKey::LastYear => "last_year",
            PeriodKey::Last3Months => "last_3_months",
            PeriodKey::LastMonth => "last_month",
            PeriodKey::LastWeek => "last_week",
            PeriodKey::Last24h => "last_24h",
        }
    }

    /// Human-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            PeriodKey::AllTime => "All time",
            PeriodKey::LastYear => "Last year",
            PeriodKey::Last3Months => "Last 3 months",
            PeriodKey::LastMonth => "Last month",
            PeriodKey::LastWeek => "Last week",
            PeriodKey::Last24h => "Last 24 hours",
        }
    }

    /// Granularity and lookback for this period.
    pub fn rule(&self) -> PeriodRule {
        let (granularity, lookback) = match self {
            PeriodKey::AllTime => (Granularity::Month, Lookback::Epoch),
            PeriodKey::LastYear => (Granularity::Week, Lookback::Months(12)),
            PeriodKey::Last3Months => (Granularity::Week, Lookback::Months(3)),
            PeriodKey::LastMonth => (Granularity::Day, Lookback::Months(1)),
            PeriodKey::LastWeek => (Granularity::Day, Lookback::Days(7)),
            PeriodKey::Last24h => (Granularity::Hour, Lookback::Hours(24)),
        };
        PeriodRule {
            granularity,
            lookback,
        }
    }
}

impl std::str::FromStr for PeriodKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PeriodKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| Error::InvalidPeriod(format!("unknown period key '{}'", s)))
    }
}

impl std::fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Resolved periods
// ============================================

/// A period resolved against a concrete "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodSpec {
    pub key: PeriodKey,
    pub granularity: Granularity,
    /// Inclusive lower bound on row timestamps
    pub start: DateTime<Utc>,
    /// Start of the current, incomplete bucket (exclusive upper bound)
    pub bucket_cutoff: DateTime<Utc>,
    /// The "now" this spec was resolved against
    pub resolved_at: DateTime<Utc>,
}

impl PeriodSpec {
    /// Whether a timestamp falls in `[start, bucket_cutoff)`.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.bucket_cutoff
    }

    /// The bucket for `ts`, or `None` when it falls outside the window.
    pub fn bucket_of(&self, ts: DateTime<Utc>) -> Option<Bucket> {
        self.contains(ts).then(|| self.granularity.bucket(ts))
    }
}

/// Resolves period keys into [`PeriodSpec`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodResolver {
    epoch: NaiveDate,
}

/// First day of chain data used by `all_time`.
pub fn default_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default()
}

impl Default for PeriodResolver {
    fn default() -> Self {
        Self::new(default_epoch())
    }
}

impl PeriodResolver {
    pub fn new(epoch: NaiveDate) -> Self {
        Self { epoch }
    }

    pub fn epoch(&self) -> NaiveDate {
        self.epoch
    }

    /// Resolve a key against `now`.
    pub fn resolve(&self, key: PeriodKey, now: DateTime<Utc>) -> Result<PeriodSpec> {
        let rule = key.rule();
        let start = match rule.lookback {
            Lookback::Epoch => self.epoch.and_time(NaiveTime::MIN).and_utc(),
            Lookback::Months(months) => now
                .checked_sub_months(Months::new(months))
                .ok_or_else(|| Error::InvalidPeriod(format!("{} underflows the calendar", key)))?,
            Lookback::Days(days) => now - Duration::days(days),
            Lookback::Hours(hours) => now - Duration::hours(hours),
        };
        let bucket_cutoff = rule.granularity.truncate(now);

        if start >= bucket_cutoff {
            return Err(Error::InvalidPeriod(format!(
                "{} resolves to an empty window ({} >= {})",
                key, start, bucket_cutoff
            )));
        }

        tracing::debug!(
            period = %key,
            granularity = %rule.granularity,
            start = %start,
            cutoff = %bucket_cutoff,
            "Resolved period"
        );

        Ok(PeriodSpec {
            key,
            granularity: rule.granularity,
            start,
            bucket_cutoff,
            resolved_at: now,
        })
    }

    /// Parse and resolve a raw period string.
    pub fn resolve_str(&self, key: &str, now: DateTime<Utc>) -> Result<PeriodSpec> {
        self.resolve(key.parse()?, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_truncate_each_granularity() {
        // 2024-05-15 is a Wednesday
        let ts = at(2024, 5, 15, 13, 47) + Duration::milliseconds(250);
        assert_eq!(Granularity::Hour.truncate(ts), at(2024, 5, 15, 13, 0));
        assert_eq!(Granularity::Day.truncate(ts), at(2024, 5, 15, 0, 0));
        assert_eq!(Granularity::Week.truncate(ts), at(2024, 5, 13, 0, 0));
        assert_eq!(Granularity::Month.truncate(ts), at(2024, 5, 1, 0, 0));
    }

    #[test]
    fn test_week_truncation_on_monday_and_sunday() {
        assert_eq!(
            Granularity::Week.truncate(at(2024, 5, 13, 0, 0)),
            at(2024, 5, 13, 0, 0)
        );
        assert_eq!(
            Granularity::Week.truncate(at(2024, 5, 19, 23, 59)),
            at(2024, 5, 13, 0, 0)
        );
    }

    #[test]
    fn test_period_table() {
        let resolver = PeriodResolver::default();
        let now = at(2024, 5, 15, 13, 47);

        let all = resolver.resolve(PeriodKey::AllTime, now).unwrap();
        assert_eq!(all.granularity, Granularity::Month);
        assert_eq!(all.start, at(2020, 1, 1, 0, 0));
        assert_eq!(all.bucket_cutoff, at(2024, 5, 1, 0, 0));

        let year = resolver.resolve(PeriodKey::LastYear, now).unwrap();
        assert_eq!(year.granularity, Granularity::Week);
        assert_eq!(year.start, at(2023, 5, 15, 13, 47));
        assert_eq!(year.bucket_cutoff, at(2024, 5, 13, 0, 0));

        let quarter = resolver.resolve(PeriodKey::Last3Months, now).unwrap();
        assert_eq!(quarter.granularity, Granularity::Week);
        assert_eq!(quarter.start, at(2024, 2, 15, 13, 47));

        let month = resolver.resolve(PeriodKey::LastMonth, now).unwrap();
        assert_eq!(month.granularity, Granularity::Day);
        assert_eq!(month.start, at(2024, 4, 15, 13, 47));
        assert_eq!(month.bucket_cutoff, at(2024, 5, 15, 0, 0));

        let week = resolver.resolve(PeriodKey::LastWeek, now).unwrap();
        assert_eq!(week.start, at(2024, 5, 8, 13, 47));

        let day = resolver.resolve(PeriodKey::Last24h, now).unwrap();
        assert_eq!(day.granularity, Granularity::Hour);
        assert_eq!(day.start, at(2024, 5, 14, 13, 47));
        assert_eq!(day.bucket_cutoff, at(2024, 5, 15, 13, 0));
    }

    #[test]
    fn test_start_before_cutoff_for_every_key() {
        let resolver = PeriodResolver::default();
        let now = at(2025, 1, 1, 0, 0);
        for key in PeriodKey::ALL {
            let spec = resolver.resolve(key, now).unwrap();
            assert!(spec.start < spec.bucket_cutoff, "{key}");
        }
    }

    #[test]
    fn test_unknown_key_is_invalid_period() {
        let resolver = PeriodResolver::default();
        let err = resolver.resolve_str("last_decade", at(2024, 1, 1, 0, 0));
        assert!(matches!(err, Err(Error::InvalidPeriod(_))));
        assert!(matches!("".parse::<PeriodKey>(), Err(Error::InvalidPeriod(_))));
    }

    #[test]
    fn test_future_epoch_is_invalid_period() {
        let resolver = PeriodResolver::new(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap());
        let err = resolver.resolve(PeriodKey::AllTime, at(2024, 1, 1, 0, 0));
        assert!(matches!(err, Err(Error::InvalidPeriod(_))));
    }

    #[test]
    fn test_contains_excludes_cutoff_bucket() {
        let spec = PeriodResolver::default()
            .resolve(PeriodKey::LastWeek, at(2024, 5, 15, 13, 47))
            .unwrap();
        assert!(spec.contains(at(2024, 5, 14, 23, 59)));
        assert!(!spec.contains(at(2024, 5, 15, 0, 0)));
        assert!(!spec.contains(at(2024, 5, 8, 13, 46)));
        assert_eq!(
            spec.bucket_of(at(2024, 5, 10, 8, 0)),
            Some(Bucket(at(2024, 5, 10, 0, 0)))
        );
    }

    #[test]
    fn test_key_labels_and_serde() {
        assert_eq!(PeriodKey::Last3Months.label(), "Last 3 months");
        assert_eq!(
            serde_json::to_string(&PeriodKey::Last3Months).unwrap(),
            "\"last_3_months\""
        );
        assert_eq!(
            serde_json::to_string(&PeriodKey::Last24h).unwrap(),
            "\"last_24h\""
        );
        for key in PeriodKey::ALL {
            assert_eq!(key.as_str().parse::<PeriodKey>().unwrap(), key);
        }
    }
}
