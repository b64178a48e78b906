//! Latest-vs-previous deltas
//!
//! Reduces a series to its most recent value, the value before it, and the
//! absolute and percent change between them, then renders named deltas as a
//! short text summary.

use crate::window::{format_number, pct_change, MetricSeries};
use serde::Serialize;

/// Latest value of a series compared with the bucket before it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Delta {
    pub current_value: f64,
    /// `None` when the series has a single bucket
    pub prior_value: Option<f64>,
    pub absolute_delta: Option<f64>,
    /// `None` when unavailable; zero when the prior is zero
    pub percent_delta: Option<f64>,
}

impl Delta {
    /// Compare two values directly.
    pub fn between(current_value: f64, prior_value: Option<f64>) -> Self {
        Self {
            current_value,
            prior_value,
            absolute_delta: prior_value.map(|p| current_value - p),
            percent_delta: prior_value.map(|p| pct_change(current_value, Some(p))),
        }
    }

    /// Delta of the last two buckets; `None` for an empty series.
    pub fn from_series(series: &MetricSeries) -> Option<Self> {
        let latest = series.latest()?;
        Some(Self::between(latest.raw_value, latest.prior_value))
    }

    /// `"1,234 (+56)"`; without a prior just the value.
    pub fn render(&self) -> String {
        match self.absolute_delta {
            Some(delta) => format!(
                "{} ({}{})",
                group_thousands(self.current_value),
                if delta >= 0.0 { "+" } else { "-" },
                group_thousands(delta.abs())
            ),
            None => group_thousands(self.current_value),
        }
    }

    /// Percent change for display, `"n/a"` when unavailable.
    pub fn render_percent(&self) -> String {
        self.percent_delta
            .map(format_percent)
            .unwrap_or_else(|| "n/a".to_string())
    }
}

/// Format a percent change (e.g., "+23.0%" or "-15.5%").
pub fn format_percent(pct: f64) -> String {
    if pct >= 0.0 {
        format!("+{:.1}%", pct)
    } else {
        format!("{:.1}%", pct)
    }
}

/// Digits grouped by thousands; two decimals for non-integers.
pub fn group_thousands(value: f64) -> String {
    let formatted = format_number(value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (formatted, None),
    };

    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    match frac_part {
        Some(frac) => format!("{}{}.{}", sign, grouped, frac),
        None => format!("{}{}", sign, grouped),
    }
}

/// Named deltas rendered as a summary list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeltaReport {
    pub entries: Vec<(String, Option<Delta>)>,
}

impl DeltaReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the latest delta of `series` under `name`.
    pub fn push_series(&mut self, name: impl Into<String>, series: &MetricSeries) {
        self.entries.push((name.into(), Delta::from_series(series)));
    }

    pub fn push(&mut self, name: impl Into<String>, delta: Option<Delta>) {
        self.entries.push((name.into(), delta));
    }

    /// One line per metric: `"name: value (delta), pct"`, or just the value
    /// when there is nothing to compare against.
    pub fn lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(name, delta)| match delta {
                Some(delta) if delta.prior_value.is_some() => {
                    format!("{}: {}, {}", name, delta.render(), delta.render_percent())
                }
                Some(delta) => format!("{}: {}", name, delta.render()),
                None => format!("{}: no data", name),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
