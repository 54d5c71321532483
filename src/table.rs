use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

/// Printed in place of any missing cell once a table has been sentinel-filled.
pub const NOT_AVAILABLE: &str = "N/A";

static NULL: Value = Value::Null;

/// A single cell. `Null` is an absent value that has not been cleaned yet;
/// `NotAvailable` is the sentinel that replaced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    NotAvailable,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    /// True for both the raw null and the sentinel.
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Null | Value::NotAvailable)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(value) if value.is_finite() => Some(*value),
            Value::Text(value) => value.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(date) => Some(*date),
            _ => None,
        }
    }

    /// Key used when grouping. `None` for raw nulls so callers can drop them.
    pub fn group_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::NotAvailable => f.write_str(NOT_AVAILABLE),
            Value::Text(value) => f.write_str(value),
            Value::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
                write!(f, "{value:.0}")
            }
            Value::Number(value) => write!(f, "{value}"),
            Value::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Number(value) => serializer.serialize_f64(*value),
            other => serializer.collect_str(other),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

/// One row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value.into());
        self
    }

    /// Missing columns read as `Value::Null`.
    pub fn get(&self, column: &str) -> &Value {
        self.fields.get(column).unwrap_or(&NULL)
    }

    pub fn set(&mut self, column: &str, value: Value) {
        self.fields.insert(column.to_string(), value);
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.fields.remove(column)
    }

    /// Composite key over `columns`; `None` when any part is a raw null.
    pub fn key(&self, columns: &[&str]) -> Option<Vec<String>> {
        columns.iter().map(|column| self.get(column).group_key()).collect()
    }
}

/// A rectangular result set: ordered column names plus rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Record>,
}

impl Table {
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Record>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Record] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn push(&mut self, record: Record) {
        self.rows.push(record);
    }

    /// Adds `column` to the header if absent. Existing rows read it as null.
    pub fn ensure_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
    }

    pub fn drop_column(&mut self, column: &str) {
        self.columns.retain(|c| c != column);
        for row in &mut self.rows {
            row.remove(column);
        }
    }

    /// Keeps only `columns`, in that order. Columns the source lacks are
    /// added as nulls and reported back.
    pub fn select(&self, columns: &[&str]) -> (Table, Vec<String>) {
        let missing: Vec<String> = columns
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut projected = Record::new();
                for column in columns {
                    projected.set(column, row.get(column).clone());
                }
                projected
            })
            .collect();
        let header = columns.iter().map(|c| c.to_string()).collect();
        (Table::from_rows(header, rows), missing)
    }

    /// Vertical concatenation; the header is the union of both headers.
    pub fn concat(mut self, other: Table) -> Table {
        for column in &other.columns {
            self.ensure_column(column);
        }
        self.rows.extend(other.rows);
        self
    }

    pub fn filter<F>(&self, mut keep: F) -> Table
    where
        F: FnMut(&Record) -> bool,
    {
        let rows = self.rows.iter().filter(|row| keep(row)).cloned().collect();
        Table::from_rows(self.columns.clone(), rows)
    }

    /// Rewrites every cell of `column`. No-op when the column is absent.
    pub fn map_column<F>(&mut self, column: &str, mut f: F)
    where
        F: FnMut(&Value) -> Value,
    {
        if !self.has_column(column) {
            return;
        }
        for row in &mut self.rows {
            let mapped = f(row.get(column));
            row.set(column, mapped);
        }
    }

    /// Distinct rendered values of `column`, in first-seen order.
    pub fn distinct(&self, column: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter_map(|row| row.get(column).group_key())
            .filter(|value| seen.insert(value.clone()))
            .collect()
    }

    /// Number of distinct non-null values of `column`.
    pub fn count_distinct(&self, column: &str) -> usize {
        self.rows
            .iter()
            .filter_map(|row| row.get(column).group_key())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn date_bounds(&self, column: &str) -> Option<(NaiveDate, NaiveDate)> {
        let mut dates = self.rows.iter().filter_map(|row| row.get(column).as_date());
        let first = dates.next()?;
        Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
    }
}
