use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::{LearnerStatus, EMAIL, GENDER, NIK, STATUS_LEARNER};
use crate::normalize::{gender_value, normalize_email};
use crate::table::{Record, Table, Value};

/// What to do when the registry lists the same email more than once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Match only the first registry row for an email.
    #[default]
    KeepFirst,
    /// Emit one reconciled row per matching registry row.
    FanOut,
}

fn email_key(value: &Value) -> Option<String> {
    match value {
        Value::Text(raw) => {
            let key = normalize_email(raw);
            (!key.is_empty()).then_some(key)
        }
        _ => None,
    }
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Text(raw) => raw.trim().is_empty(),
        other => other.is_missing(),
    }
}

/// Left-joins learner activity onto the employee registry by email.
///
/// Every activity row yields at least one output row, tagged Internal when
/// the registry knows its email and External otherwise. Columns present on
/// both sides take the registry value unless it is missing. `gender` is
/// reduced to the canonical vocabulary and `nik` is dropped.
pub fn reconcile(activity: &Table, registry: &Table, policy: DuplicatePolicy) -> Table {
    let mut index: HashMap<String, Vec<&Record>> = HashMap::new();
    let mut duplicates = 0usize;
    for row in registry.rows() {
        let Some(key) = email_key(row.get(EMAIL)) else {
            continue;
        };
        let matches = index.entry(key).or_default();
        if !matches.is_empty() {
            duplicates += 1;
            if policy == DuplicatePolicy::KeepFirst {
                continue;
            }
        }
        matches.push(row);
    }
    if duplicates > 0 {
        warn!(duplicates, ?policy, "registry contains repeated emails");
    }

    let registry_columns: Vec<&str> = registry
        .columns()
        .iter()
        .map(String::as_str)
        .filter(|c| *c != EMAIL && *c != NIK)
        .collect();

    let mut columns: Vec<String> = activity
        .columns()
        .iter()
        .filter(|c| c.as_str() != NIK)
        .cloned()
        .collect();
    for column in registry_columns.iter().chain([GENDER, STATUS_LEARNER].iter()) {
        if !columns.iter().any(|c| c == column) {
            columns.push(column.to_string());
        }
    }

    let mut rows = Vec::with_capacity(activity.len());
    let mut internal = 0usize;
    for source in activity.rows() {
        let mut base = source.clone();
        base.remove(NIK);
        let key = email_key(source.get(EMAIL));
        if let Some(key) = &key {
            base.set(EMAIL, Value::text(key.as_str()));
        }

        let matches = key.as_ref().and_then(|k| index.get(k));
        match matches {
            Some(matches) => {
                internal += 1;
                for employee in matches {
                    let mut merged = base.clone();
                    for column in &registry_columns {
                        let value = employee.get(column);
                        if !is_absent(value) || merged.get(column) == &Value::Null {
                            merged.set(column, value.clone());
                        }
                    }
                    rows.push(finish(merged, LearnerStatus::Internal));
                }
            }
            None => rows.push(finish(base, LearnerStatus::External)),
        }
    }

    debug!(
        activity = activity.len(),
        registry = registry.len(),
        internal,
        reconciled = rows.len(),
        "reconciled learners against registry"
    );
    Table::from_rows(columns, rows)
}

fn finish(mut row: Record, status: LearnerStatus) -> Record {
    let gender = gender_value(row.get(GENDER));
    row.set(GENDER, gender);
    row.set(STATUS_LEARNER, Value::text(status.as_str()));
    row
}
