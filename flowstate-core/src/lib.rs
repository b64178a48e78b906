//! # flowstate-core
//!
//! Core library for flowstate - period-aware metrics for Flow chain activity.
//!
//! This library provides:
//! - Period resolution and time bucketing
//! - Per-chain aggregation and cross-chain merging
//! - Windowed metrics (rolling averages, cumulative totals, deltas)
//! - New/active account cohorts
//! - Region inference from hourly activity
//! - Row sources, a query cache, configuration and logging
//!
//! ## Architecture
//!
//! Data flows one way:
//! - **Rows:** a [`RowSource`] returns raw [`Event`]s for a query
//! - **Series:** [`aggregate`] buckets rows per chain, [`merge`] combines chains
//! - **Metrics:** [`window`], [`cohort`] and [`region`] derive displayable series
//! - **Summary:** [`delta`] reduces series to latest-vs-previous changes
//!
//! [`Dashboard`] wires these stages together for each tab.
//!
//! ## Example
//!
//! ```rust,no_run
//! use flowstate_core::{Config, Dashboard, JsonlSource, PeriodKey, Tab};
//!
//! let config = Config::load().expect("failed to load config");
//! let source = JsonlSource::new(config.rows_dir());
//! let dashboard = Dashboard::from_config(source, &config).expect("invalid config");
//!
//! let spec = dashboard
//!     .resolve(PeriodKey::LastWeek, chrono::Utc::now())
//!     .expect("failed to resolve period");
//! let output = dashboard.tab(Tab::Transactions, &spec).expect("failed to compute tab");
//! for line in output.summary().lines() {
//!     println!("{}", line);
//! }
//! ```

// Re-export commonly used items at the crate root
pub use aggregate::{BucketSeries, CategorySeries, Reduction};
pub use cache::CachedSource;
pub use cohort::{CohortPoint, CohortSeries};
pub use config::Config;
pub use dashboard::{Dashboard, DashboardOptions, Tab, TabOutput};
pub use delta::{Delta, DeltaReport};
pub use error::{Error, Result};
pub use export::Table;
pub use period::{Bucket, Granularity, PeriodKey, PeriodResolver, PeriodSpec};
pub use region::{BroadRegion, Region, RegionCatalog, RegionDistribution};
pub use source::{JsonlSource, MemorySource, RowQuery, RowSource};
pub use types::*;
pub use window::{MetricPoint, MetricSeries};

// Public modules
pub mod aggregate;
pub mod cache;
pub mod cohort;
pub mod config;
pub mod dashboard;
pub mod delta;
pub mod error;
pub mod export;
pub mod logging;
pub mod merge;
pub mod period;
pub mod region;
pub mod source;
pub mod types;
pub mod window;
