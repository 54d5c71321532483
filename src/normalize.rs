//! Per-source cleansing applied right after a fetch.
//!
//! Everything here is fail-soft: a cell that cannot be interpreted becomes a
//! null (or the sentinel) and the rest of the table is untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};

use crate::models::{Gender, EMAIL, LAYER, LAYER_GROUP};
use crate::table::{Table, Value};

/// Width of the zero-padded employee id used as a join key.
pub const EMPLOYEE_ID_WIDTH: usize = 6;

/// Spreadsheet error marker produced by broken formulas.
const SHEET_ERROR_MARKER: &str = "#VALUE!";

const MALE_ALIASES: [&str; 5] = ["male", "laki-laki", "laki - laki", "pria", "m"];
const FEMALE_ALIASES: [&str; 4] = ["female", "perempuan", "wanita", "f"];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Normalises the `email` join key of every row.
pub fn normalize_email_column(table: &mut Table) {
    table.map_column(EMAIL, |value| match value {
        Value::Text(raw) => Value::Text(normalize_email(raw)),
        Value::Number(_) => Value::Text(normalize_email(&value.to_string())),
        other => other.clone(),
    });
}

fn is_blank_marker(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || trimmed == SHEET_ERROR_MARKER
}

/// Replaces nulls, blank strings and the spreadsheet error marker with the
/// sentinel, across every column.
pub fn fill_not_available(table: &mut Table) {
    let columns = table.columns().to_vec();
    for row in table.rows_mut() {
        for column in &columns {
            let replace = match row.get(column) {
                Value::Null => true,
                Value::Text(raw) => is_blank_marker(raw),
                Value::Number(value) => !value.is_finite(),
                _ => false,
            };
            if replace {
                row.set(column, Value::NotAvailable);
            }
        }
    }
}

/// Renders an employee id as a zero-padded string of [`EMPLOYEE_ID_WIDTH`].
pub fn pad_employee_id(value: &Value) -> Value {
    let raw = match value {
        Value::Text(raw) => raw.trim().to_string(),
        Value::Number(_) => value.to_string(),
        other => return other.clone(),
    };
    if raw.is_empty() {
        return Value::Null;
    }
    Value::Text(format!("{raw:0>width$}", width = EMPLOYEE_ID_WIDTH))
}

/// Collapses free-text gender labels into the canonical vocabulary.
/// Unrecognised input maps to [`Gender::Unknown`].
pub fn normalize_gender(raw: &str) -> Gender {
    let folded = raw.trim().to_lowercase();
    if MALE_ALIASES.contains(&folded.as_str()) {
        Gender::Male
    } else if FEMALE_ALIASES.contains(&folded.as_str()) {
        Gender::Female
    } else {
        Gender::Unknown
    }
}

pub fn gender_value(value: &Value) -> Value {
    let gender = match value {
        Value::Text(raw) => normalize_gender(raw),
        _ => Gender::Unknown,
    };
    Value::text(gender.as_str())
}

/// Converts a spreadsheet serial day number into a calendar date.
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.floor() as i64))
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.date_naive());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|parsed| parsed.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        })
}

/// Unparseable cells become null rather than failing the table.
pub fn coerce_date(value: &Value) -> Value {
    let parsed = match value {
        Value::Date(date) => Some(*date),
        Value::Text(raw) => parse_date(raw),
        Value::Number(serial) => serial_to_date(*serial),
        _ => None,
    };
    parsed.map(Value::Date).unwrap_or(Value::Null)
}

pub fn coerce_date_column(table: &mut Table, column: &str) {
    table.map_column(column, coerce_date);
}

pub fn coerce_score(value: &Value) -> Value {
    value.as_f64().map(Value::Number).unwrap_or(Value::Null)
}

/// Forces a column to text so ids read from numeric cells still compare equal.
pub fn coerce_text_column(table: &mut Table, column: &str) {
    table.map_column(column, |value| match value {
        Value::Number(_) | Value::Date(_) => Value::Text(value.to_string()),
        other => other.clone(),
    });
}

/// Derives `layer_group` from the raw `layer` label. Labels missing from
/// `groups` become the sentinel.
pub fn assign_layer_groups(table: &mut Table, groups: &BTreeMap<String, String>) {
    if !table.has_column(LAYER) {
        return;
    }
    table.ensure_column(LAYER_GROUP);
    for row in table.rows_mut() {
        let group = match row.get(LAYER) {
            Value::Text(raw) => groups.get(raw.trim()).map(|g| Value::text(g.as_str())),
            _ => None,
        };
        row.set(LAYER_GROUP, group.unwrap_or(Value::NotAvailable));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Record;

    #[test]
    fn emails_are_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Jane.Doe@Co.COM \t"), "jane.doe@co.com");
        let once = normalize_email(" MiXeD@Example.org ");
        assert_eq!(normalize_email(&once), once);
    }

    #[test]
    fn email_column_normalisation_leaves_other_columns() {
        let mut table = Table::new(&["email", "name"]);
        table.push(Record::new().with("email", " Jane@Co.com ").with("name", " Jane "));
        normalize_email_column(&mut table);
        assert_eq!(table.rows()[0].get("email"), &Value::text("jane@co.com"));
        assert_eq!(table.rows()[0].get("name"), &Value::text(" Jane "));
    }

    #[test]
    fn sentinel_fill_covers_blank_null_and_error_marker() {
        let mut table = Table::new(&["a", "b", "c", "d"]);
        table.push(
            Record::new()
                .with("a", "")
                .with("b", "#VALUE!")
                .with("d", "kept"),
        );
        fill_not_available(&mut table);
        let row = &table.rows()[0];
        assert_eq!(row.get("a"), &Value::NotAvailable);
        assert_eq!(row.get("b"), &Value::NotAvailable);
        assert_eq!(row.get("c"), &Value::NotAvailable);
        assert_eq!(row.get("d"), &Value::text("kept"));
    }

    #[test]
    fn employee_ids_are_zero_padded() {
        assert_eq!(pad_employee_id(&Value::Number(1234.0)), Value::text("001234"));
        assert_eq!(pad_employee_id(&Value::text("98")), Value::text("000098"));
        assert_eq!(pad_employee_id(&Value::text("1234567")), Value::text("1234567"));
        assert_eq!(pad_employee_id(&Value::Null), Value::Null);
    }

    #[test]
    fn gender_vocabulary_is_total_and_case_insensitive() {
        let inputs = ["Pria", "F", "unknown", ""];
        let normalised: Vec<&str> = inputs.iter().map(|g| normalize_gender(g).as_str()).collect();
        assert_eq!(normalised, vec!["Male", "Female", "n/a", "n/a"]);

        assert_eq!(normalize_gender("LAKI - LAKI"), Gender::Male);
        assert_eq!(normalize_gender(" Wanita "), Gender::Female);
        assert_eq!(gender_value(&Value::NotAvailable), Value::text("n/a"));
        assert_eq!(gender_value(&Value::Number(1.0)), Value::text("n/a"));
    }

    #[test]
    fn dates_parse_or_degrade_to_null() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();
        assert_eq!(coerce_date(&Value::text("2024-05-17")), Value::Date(expected));
        assert_eq!(coerce_date(&Value::text("2024-05-17 08:30:00")), Value::Date(expected));
        assert_eq!(coerce_date(&Value::text("2024-05-17T08:30:00+07:00")), Value::Date(expected));
        assert_eq!(coerce_date(&Value::text("05/17/2024")), Value::Date(expected));
        assert_eq!(coerce_date(&Value::text("17/05/2024")), Value::Date(expected));
        assert_eq!(coerce_date(&Value::Number(45429.0)), Value::Date(expected));
        assert_eq!(coerce_date(&Value::text("not a date")), Value::Null);
        assert_eq!(coerce_date(&Value::NotAvailable), Value::Null);
    }

    #[test]
    fn scores_coerce_from_text() {
        assert_eq!(coerce_score(&Value::text(" 87.5 ")), Value::Number(87.5));
        assert_eq!(coerce_score(&Value::text("eighty")), Value::Null);
        assert_eq!(coerce_score(&Value::NotAvailable), Value::Null);
    }

    #[test]
    fn layer_groups_collapse_structural_layers() {
        let groups: BTreeMap<String, String> = [
            ("Group 3 Str Layer 3A", "Layer 3"),
            ("Group 3 Str Layer 3B", "Layer 3"),
            ("Group 2", "Non Struktural"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let mut table = Table::new(&["layer"]);
        for layer in ["Group 3 Str Layer 3A", "Group 3 Str Layer 3B", "Group 2", "Intern"] {
            table.push(Record::new().with("layer", layer));
        }
        assign_layer_groups(&mut table, &groups);
        let grouped: Vec<String> =
            table.rows().iter().map(|r| r.get("layer_group").to_string()).collect();
        assert_eq!(grouped, vec!["Layer 3", "Layer 3", "Non Struktural", "N/A"]);
    }
}
