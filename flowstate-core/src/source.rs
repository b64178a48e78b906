//! Row sources
//!
//! The pipeline never talks to a warehouse. It asks a [`RowSource`] for the
//! rows of a [`RowQuery`] and does all filtering and bucketing itself, so a
//! source may return rows in any order and may return more history than the
//! period asks for.
//!
//! ## Built-in sources
//!
//! - [`MemorySource`]: rows held in memory (tests, fakes, embedding callers)
//! - [`JsonlSource`]: one `<dataset>.jsonl` file per dataset in a directory

use crate::error::{Error, Result};
use crate::period::PeriodKey;
use crate::types::{Chain, Dataset, Event};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// What rows to fetch.
///
/// Two queries that compare equal are the same request; the query cache
/// relies on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowQuery {
    pub dataset: Dataset,
    /// `None` asks for the full history
    pub period: Option<PeriodKey>,
    /// `None` asks for every chain
    pub category: Option<Chain>,
}

impl RowQuery {
    /// Rows of `dataset` for one period, every chain.
    pub fn for_period(dataset: Dataset, period: PeriodKey) -> Self {
        Self {
            dataset,
            period: Some(period),
            category: None,
        }
    }

    /// Every row of `dataset` ever recorded.
    pub fn full_history(dataset: Dataset) -> Self {
        Self {
            dataset,
            period: None,
            category: None,
        }
    }

    /// Restrict to one chain.
    pub fn with_category(mut self, chain: Chain) -> Self {
        self.category = Some(chain);
        self
    }

    fn matches(&self, event: &Event) -> bool {
        self.category.map_or(true, |chain| event.category == chain)
    }
}

/// Supplies raw rows to the pipeline.
///
/// Implementations must be safe to share between threads; dashboard tabs
/// may fetch concurrently.
pub trait RowSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Fetch rows for `query`. Order is unspecified.
    fn fetch(&self, query: &RowQuery) -> Result<Vec<Event>>;

    /// Drop anything remembered between fetches. No-op for uncached sources.
    fn refresh(&self) {}
}

impl<S: RowSource + ?Sized> RowSource for std::sync::Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&self, query: &RowQuery) -> Result<Vec<Event>> {
        (**self).fetch(query)
    }

    fn refresh(&self) {
        (**self).refresh()
    }
}

// ============================================
// In-memory source
// ============================================

/// Rows held in memory, keyed by dataset.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    rows: HashMap<Dataset, Vec<Event>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rows to a dataset.
    pub fn with_rows(mut self, dataset: Dataset, rows: impl IntoIterator<Item = Event>) -> Self {
        self.rows.entry(dataset).or_default().extend(rows);
        self
    }
}

impl RowSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(&self, query: &RowQuery) -> Result<Vec<Event>> {
        Ok(self
            .rows
            .get(&query.dataset)
            .map(|rows| rows.iter().filter(|e| query.matches(e)).cloned().collect())
            .unwrap_or_default())
    }
}

// ============================================
// JSONL directory source
// ============================================

/// Reads `<dir>/<dataset>.jsonl`, one [`Event`] JSON object per line.
///
/// A missing file is an empty dataset. Blank lines are skipped. Malformed
/// lines are logged and skipped unless the source is [`strict`](Self::strict).
#[derive(Debug, Clone)]
pub struct JsonlSource {
    dir: PathBuf,
    strict: bool,
}

impl JsonlSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            strict: false,
        }
    }

    /// Fail on the first malformed line instead of skipping it.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `dataset`.
    pub fn dataset_path(&self, dataset: Dataset) -> PathBuf {
        self.dir.join(format!("{}.jsonl", dataset.as_str()))
    }

    fn read_file(&self, path: &Path, query: &RowQuery) -> Result<Vec<Event>> {
        let reader = BufReader::new(File::open(path)?);
        let source_name = path.display().to_string();
        let mut rows = Vec::new();
        let mut skipped = 0usize;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Event>(&line) {
                Ok(event) => {
                    if query.matches(&event) {
                        rows.push(event);
                    }
                }
                Err(e) if self.strict => {
                    return Err(Error::Parse {
                        source_name,
                        line: index + 1,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        file = %source_name,
                        line = index + 1,
                        error = %e,
                        "Skipping malformed row"
                    );
                }
            }
        }

        tracing::debug!(
            file = %source_name,
            rows = rows.len(),
            skipped,
            "Read rows"
        );
        Ok(rows)
    }
}

impl RowSource for JsonlSource {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn fetch(&self, query: &RowQuery) -> Result<Vec<Event>> {
        let path = self.dataset_path(query.dataset);
        if !path.exists() {
            tracing::debug!(file = %path.display(), "Dataset file missing, treating as empty");
            return Ok(Vec::new());
        }
        self.read_file(&path, query)
    }
}
