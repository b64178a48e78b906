//! Flat tabular export
//!
//! Any list of flat serializable records (one JSON object per record, scalar
//! fields only) becomes a [`Table`] of named columns and rows. The calling
//! layer decides how to write it out.

use crate::error::{Error, Result};
use crate::window::format_number;
use serde::Serialize;
use serde_json::Value;

/// Column names plus one row of scalar cells per record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Render as a GitHub-flavored markdown table.
    pub fn to_markdown(&self) -> String {
        if self.columns.is_empty() {
            return String::new();
        }

        let mut out = String::new();
        out.push_str(&format!("| {} |\n", self.columns.join(" | ")));
        out.push_str(&format!(
            "|{}\n",
            self.columns.iter().map(|_| "---|").collect::<String>()
        ));
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(cell_text).collect();
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
        out
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.as_f64().map(format_number).unwrap_or_else(|| n.to_string()),
        other => other.to_string(),
    }
}

/// Flatten `records` into a table.
///
/// Columns come from the first record in field order. Every record must
/// serialize to an object with the same keys and scalar values only.
pub fn to_table<T: Serialize>(records: &[T]) -> Result<Table> {
    let mut table = Table::default();

    for (index, record) in records.iter().enumerate() {
        let object = match serde_json::to_value(record)? {
            Value::Object(map) => map,
            other => {
                return Err(Error::Export(format!(
                    "record {} is not an object: {}",
                    index, other
                )))
            }
        };

        if index == 0 {
            table.columns = object.keys().cloned().collect();
        } else if object.len() != table.columns.len()
            || !table.columns.iter().all(|c| object.contains_key(c))
        {
            return Err(Error::Export(format!(
                "record {} does not match columns {:?}",
                index, table.columns
            )));
        }

        let mut row = Vec::with_capacity(table.columns.len());
        for column in &table.columns {
            let value = object.get(column).cloned().unwrap_or(Value::Null);
            if value.is_object() || value.is_array() {
                return Err(Error::Export(format!(
                    "field '{}' of record {} is nested",
                    column, index
                )));
            }
            row.push(value);
        }
        table.rows.push(row);
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::Bucket;
    use crate::window::MetricSeries;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    #[derive(Serialize)]
    struct Flat {
        name: &'static str,
        value: f64,
        note: Option<&'static str>,
    }

    #[derive(Serialize)]
    struct Nested {
        name: &'static str,
        parts: Vec<u32>,
    }

    #[test]
    fn test_flat_records() {
        let table = to_table(&[
            Flat {
                name: "a",
                value: 1.5,
                note: None,
            },
            Flat {
                name: "b",
                value: 2.0,
                note: Some("x"),
            },
        ])
        .unwrap();

        assert_eq!(table.columns, vec!["name", "value", "note"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0], vec![json!("a"), json!(1.5), Value::Null]);
        assert_eq!(table.rows[1][2], json!("x"));
    }

    #[test]
    fn test_nested_rejected() {
        let result = to_table(&[Nested {
            name: "a",
            parts: vec![1, 2],
        }]);
        assert!(matches!(result, Err(Error::Export(_))));

        let result = to_table(&[1u32, 2u32]);
        assert!(matches!(result, Err(Error::Export(_))));
    }

    #[test]
    fn test_empty_input() {
        let table = to_table::<Flat>(&[]).unwrap();
        assert!(table.is_empty());
        assert!(table.columns.is_empty());
        assert_eq!(table.to_markdown(), "");
    }

    #[test]
    fn test_metric_points_export() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let series = MetricSeries::compute(
            (0..3).map(|i| (Bucket(base + Duration::days(i)), 10.0 * (i + 1) as f64)),
            4,
        );
        let table = to_table(series.points()).unwrap();
        assert_eq!(table.columns[0], "bucket");
        assert!(table.columns.contains(&"cumulative_total".to_string()));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_markdown_rendering() {
        let table = to_table(&[Flat {
            name: "fees",
            value: 1234.5,
            note: None,
        }])
        .unwrap();
        assert_eq!(
            table.to_markdown(),
            "| name | value | note |\n|---|---|---|\n| fees | 1234.50 |  |\n"
        );
    }
}
