//! Tabular data sources
//!
//! Source fields (`source_reference` in a specification) are looked up in
//! named tables supplied by the caller through [`SourceDataFrame`]. Tables
//! are read-only: the engine filters and projects them but never mutates
//! them. Tables the caller does not hold locally can be served by an
//! [`ExternalSourceResolver`] (for example a registry behind a network API).
//!
//! # Example
//!
//! ```ignore
//! use machine_law_engine::sources::{RecordFrame, SourceTables};
//! use machine_law_engine::Value;
//!
//! let frame = RecordFrame::from_rows(
//!     &["bsn", "bedrag"],
//!     vec![vec![Value::from("999993653"), Value::Int(2_500_000)]],
//! );
//! let mut tables = SourceTables::new();
//! tables.insert("inkomens", frame);
//! ```

use crate::error::{EngineError, Result};
use crate::types::{values_equal, Record, Value};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Comparison applied by [`DataFrame::filter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Column equals the value
    Equals,
    /// Column equals any element of the value (a scalar acts as a one-element list)
    In,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOp::Equals => f.write_str("="),
            FilterOp::In => f.write_str("in"),
        }
    }
}

/// One `select_on` condition after its value has been resolved
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFilter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl SourceFilter {
    pub fn matches(&self, record: &Record) -> bool {
        let Some(cell) = record.get(&self.column) else {
            return false;
        };
        match (self.op, &self.value) {
            (FilterOp::In, Value::Array(options)) => options.iter().any(|o| values_equal(cell, o)),
            _ => values_equal(cell, &self.value),
        }
    }
}

/// Read-only table
pub trait DataFrame: Send + Sync + fmt::Debug {
    /// Rows whose `column` matches `value` under `op`.
    fn filter(&self, column: &str, op: FilterOp, value: &Value) -> Result<Box<dyn DataFrame>>;

    /// Projection onto the given columns; unknown columns are ignored.
    fn select(&self, columns: &[String]) -> Box<dyn DataFrame>;

    fn to_records(&self) -> Vec<Record>;

    fn has_column(&self, column: &str) -> bool;

    /// Values of one column, `null` where a row lacks it.
    fn column_values(&self, column: &str) -> Vec<Value>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Provider of named tables
pub trait SourceDataFrame: Send + Sync + fmt::Debug {
    fn get(&self, table: &str) -> Option<&dyn DataFrame>;

    /// Digest of the table contents.
    ///
    /// Results of nested law evaluations are only shared between requests
    /// whose tables have the same fingerprint. Without one they are not
    /// cached at all.
    fn fingerprint(&self) -> Option<String> {
        None
    }
}

/// Resolver for tables that are not held locally.
///
/// Returns `None` when the lookup found nothing; errors abort the
/// evaluation.
pub trait ExternalSourceResolver: Send + Sync {
    fn lookup(&self, table: &str, filters: &[SourceFilter]) -> Result<Option<Vec<Record>>>;
}

/// In-memory table of records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordFrame {
    columns: Vec<String>,
    records: Vec<Record>,
}

impl RecordFrame {
    /// Build a frame from records; the columns are the union of their keys.
    pub fn new(records: Vec<Record>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, records }
    }

    /// Build a frame from a header and positional rows.
    pub fn from_rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let records = rows
            .into_iter()
            .map(|row| columns.iter().cloned().zip(row).collect())
            .collect();
        Self { columns, records }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl DataFrame for RecordFrame {
    fn filter(&self, column: &str, op: FilterOp, value: &Value) -> Result<Box<dyn DataFrame>> {
        if !self.has_column(column) {
            return Err(EngineError::SourceError(format!("column '{}' not found", column)));
        }
        let filter = SourceFilter {
            column: column.to_string(),
            op,
            value: value.clone(),
        };
        let records = self
            .records
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        Ok(Box::new(RecordFrame {
            columns: self.columns.clone(),
            records,
        }))
    }

    fn select(&self, columns: &[String]) -> Box<dyn DataFrame> {
        let kept: Vec<String> = columns
            .iter()
            .filter(|c| self.has_column(c))
            .cloned()
            .collect();
        let records = self
            .records
            .iter()
            .map(|record| {
                kept.iter()
                    .filter_map(|c| record.get(c).map(|v| (c.clone(), v.clone())))
                    .collect()
            })
            .collect();
        Box::new(RecordFrame {
            columns: kept,
            records,
        })
    }

    fn to_records(&self) -> Vec<Record> {
        self.records.clone()
    }

    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    fn column_values(&self, column: &str) -> Vec<Value> {
        self.records
            .iter()
            .map(|record| record.get(column).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Named in-memory tables
#[derive(Debug, Clone, Default)]
pub struct SourceTables {
    tables: BTreeMap<String, RecordFrame>,
    digest: String,
}

impl SourceTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a table.
    pub fn insert(&mut self, table: impl Into<String>, frame: RecordFrame) {
        self.tables.insert(table.into(), frame);
        self.digest = serde_json::to_vec(&self.tables)
            .map(|bytes| hex::encode(Sha256::digest(bytes)))
            .unwrap_or_default();
    }

    pub fn with_table(mut self, table: impl Into<String>, frame: RecordFrame) -> Self {
        self.insert(table, frame);
        self
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(|k| k.as_str()).collect()
    }
}

impl SourceDataFrame for SourceTables {
    fn get(&self, table: &str) -> Option<&dyn DataFrame> {
        self.tables.get(table).map(|frame| frame as &dyn DataFrame)
    }

    fn fingerprint(&self) -> Option<String> {
        Some(self.digest.clone())
    }
}
