//! Fetch adapters for the SQL export and the two spreadsheet workbooks.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use calamine::{open_workbook, DataType, Reader, Xlsx};
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DashboardConfig;
use crate::normalize::serial_to_date;
use crate::table::{Record, Table, Value};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source not configured: {0}")]
    NotConfigured(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("workbook error: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("workbook {path} has no sheet at index {index}")]
    MissingSheet { path: PathBuf, index: usize },

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("background read failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Identity of one fetchable result set; also the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKey {
    /// A SQL statement read from this file.
    Query(PathBuf),
    /// One worksheet, by position, of a workbook.
    Worksheet { workbook: PathBuf, sheet: usize },
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKey::Query(path) => write!(f, "query:{}", path.display()),
            SourceKey::Worksheet { workbook, sheet } => {
                write!(f, "sheet:{}#{}", workbook.display(), sheet)
            }
        }
    }
}

/// Anything that can produce a table for a [`SourceKey`].
pub trait TableSource {
    fn fetch(&self, key: &SourceKey) -> impl Future<Output = Result<Table, SourceError>>;
}

/// Production adapters: MySQL over TLS and local workbook exports.
pub struct LiveSources {
    pool: Option<MySqlPool>,
}

impl LiveSources {
    /// Builds the adapters. The pool connects lazily, so a missing or bad
    /// database URL only surfaces when a query source is fetched.
    pub fn from_config(config: &DashboardConfig) -> Self {
        let pool = match std::env::var(&config.database.url_env) {
            Ok(url) => match MySqlConnectOptions::from_str(&url) {
                Ok(options) => {
                    let options = if config.database.require_tls {
                        options.ssl_mode(MySqlSslMode::Required)
                    } else {
                        options
                    };
                    Some(
                        MySqlPoolOptions::new()
                            .max_connections(config.database.max_connections)
                            .acquire_timeout(config.timeout())
                            .connect_lazy_with(options),
                    )
                }
                Err(err) => {
                    warn!(env = %config.database.url_env, error = %err, "invalid database URL");
                    None
                }
            },
            Err(_) => {
                warn!(env = %config.database.url_env, "database URL not set");
                None
            }
        };

        Self { pool }
    }

    async fn run_query(&self, path: &Path) -> Result<Table, SourceError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| SourceError::NotConfigured(format!("no database for {}", path.display())))?;
        let sql = std::fs::read_to_string(path)?;
        let rows = sqlx::query(&sql).fetch_all(pool).await?;
        Ok(rows_to_table(&rows))
    }
}

impl TableSource for LiveSources {
    async fn fetch(&self, key: &SourceKey) -> Result<Table, SourceError> {
        match key {
            SourceKey::Query(path) => self.run_query(path).await,
            SourceKey::Worksheet { workbook, sheet } => {
                let path = workbook.clone();
                let sheet = *sheet;
                tokio::task::spawn_blocking(move || read_worksheet(&path, sheet)).await?
            }
        }
    }
}

fn rows_to_table(rows: &[MySqlRow]) -> Table {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let records = rows.iter().map(decode_row).collect();
    Table::from_rows(columns, records)
}

fn decode_row(row: &MySqlRow) -> Record {
    let mut record = Record::new();
    for column in row.columns() {
        let index = column.ordinal();
        let value = decode_cell(row, index, column.type_info().name()).unwrap_or_else(|err| {
            debug!(column = column.name(), error = %err, "undecodable cell");
            Value::Null
        });
        record.set(column.name(), value);
    }
    record
}

fn decode_cell(row: &MySqlRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }
    let value = match type_name {
        "BOOLEAN" => Value::Number(if row.try_get::<bool, _>(index)? { 1.0 } else { 0.0 }),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::Number(row.try_get::<i64, _>(index)? as f64)
        }
        name if name.ends_with("UNSIGNED") => Value::Number(row.try_get::<u64, _>(index)? as f64),
        "FLOAT" => Value::Number(row.try_get::<f32, _>(index)? as f64),
        "DOUBLE" => Value::Number(row.try_get::<f64, _>(index)?),
        "DATE" => Value::Date(row.try_get::<NaiveDate, _>(index)?),
        "DATETIME" | "TIMESTAMP" => Value::Date(row.try_get::<NaiveDateTime, _>(index)?.date()),
        "DECIMAL" => {
            let raw: String = row.try_get_unchecked(index)?;
            raw.parse::<f64>().map(Value::Number).unwrap_or(Value::Text(raw))
        }
        _ => Value::Text(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

/// Reads one worksheet; the first row is the header.
pub fn read_worksheet(path: &Path, index: usize) -> Result<Table, SourceError> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let range = workbook
        .worksheet_range_at(index)
        .ok_or_else(|| SourceError::MissingSheet {
            path: path.to_path_buf(),
            index,
        })??;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(first) => first
            .iter()
            .map(|cell| cell_to_value(cell).to_string().trim().to_string())
            .collect(),
        None => return Ok(Table::empty()),
    };
    let columns: Vec<String> = headers.iter().filter(|h| !h.is_empty()).cloned().collect();

    let mut table = Table::new(&columns);
    for row in rows {
        if row.iter().all(|cell| matches!(cell, DataType::Empty)) {
            continue;
        }
        let mut record = Record::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            if !header.is_empty() {
                record.set(header, cell_to_value(cell));
            }
        }
        table.push(record);
    }
    debug!(path = %path.display(), sheet = index, rows = table.len(), "read worksheet");
    Ok(table)
}

fn cell_to_value(cell: &DataType) -> Value {
    match cell {
        DataType::String(value) => Value::Text(value.clone()),
        DataType::Float(value) => Value::Number(*value),
        DataType::Int(value) => Value::Number(*value as f64),
        DataType::Bool(value) => Value::Text(if *value { "TRUE" } else { "FALSE" }.to_string()),
        DataType::DateTime(serial) => serial_to_date(*serial).map(Value::Date).unwrap_or(Value::Null),
        DataType::Error(err) => Value::Text(err.to_string()),
        DataType::Empty => Value::Text(String::new()),
        other => Value::Text(other.to_string()),
    }
}
