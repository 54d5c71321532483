//! Grouped counts behind every chart and summary table.
//!
//! One parameterised operation covers the platform, unit, layer, gender,
//! generation, institution, company and typology views: the caller names
//! the dimension columns, what to count and how percentages are framed.

use std::collections::{HashMap, HashSet};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::config::BundleRule;
use crate::models::{
    LearnerCounts, UserCounts, CUSTOMER_ID, EMAIL, FINAL_RESULT, LAST_UPDATED, LEARNER_STATUS,
    STATUS_LEARNER, TITLE,
};
use crate::table::{Record, Table, Value};

/// How percentages are framed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ChartShape {
    /// Share of the grand total, largest first.
    #[default]
    Bar,
    /// Share within the group of the first dimension, groups largest first.
    Stacked,
    /// Share of the grand total, largest first.
    Pie,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountMode {
    /// Every row counts.
    Rows,
    /// Distinct tuples of these columns.
    Distinct(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct BreakdownSpec {
    pub dimensions: Vec<String>,
    pub count: CountMode,
    pub shape: ChartShape,
}

impl BreakdownSpec {
    pub fn distinct(dimensions: &[&str], by: &[&str], shape: ChartShape) -> Self {
        Self {
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            count: CountMode::Distinct(by.iter().map(|c| c.to_string()).collect()),
            shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownRow {
    pub keys: Vec<String>,
    pub count: usize,
    pub percentage: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 / whole as f64 * 100.0)
    }
}

/// Groups `table` by the requested dimensions and counts each group.
///
/// Rows with a null dimension are dropped; the sentinel is a regular group.
/// Empty input, or input where every key is null, yields no rows.
pub fn breakdown(table: &Table, spec: &BreakdownSpec) -> Vec<BreakdownRow> {
    let dimensions: Vec<&str> = spec.dimensions.iter().map(String::as_str).collect();
    let distinct: Option<Vec<&str>> = match &spec.count {
        CountMode::Rows => None,
        CountMode::Distinct(columns) => Some(columns.iter().map(String::as_str).collect()),
    };

    let mut order: Vec<Vec<String>> = Vec::new();
    let mut counts: HashMap<Vec<String>, usize> = HashMap::new();
    let mut seen: HashMap<Vec<String>, HashSet<Vec<String>>> = HashMap::new();

    for row in table.rows() {
        let Some(key) = row.key(&dimensions) else {
            continue;
        };
        if let Some(columns) = &distinct {
            let Some(identity) = row.key(columns) else {
                continue;
            };
            if !seen.entry(key.clone()).or_default().insert(identity) {
                continue;
            }
        }
        let count = counts.entry(key.clone()).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }

    let mut rows: Vec<BreakdownRow> = order
        .into_iter()
        .map(|keys| {
            let count = counts[&keys];
            BreakdownRow {
                keys,
                count,
                percentage: 0.0,
            }
        })
        .collect();

    match spec.shape {
        ChartShape::Bar | ChartShape::Pie => {
            let total: usize = rows.iter().map(|r| r.count).sum();
            for row in &mut rows {
                row.percentage = percent(row.count, total);
            }
            rows.sort_by(|a, b| b.count.cmp(&a.count));
        }
        ChartShape::Stacked => {
            let mut group_totals: HashMap<String, usize> = HashMap::new();
            for row in &rows {
                let group = row.keys.first().cloned().unwrap_or_default();
                *group_totals.entry(group).or_insert(0) += row.count;
            }
            let total_of = |row: &BreakdownRow| {
                row.keys
                    .first()
                    .and_then(|group| group_totals.get(group))
                    .copied()
                    .unwrap_or(0)
            };
            for row in &mut rows {
                row.percentage = percent(row.count, total_of(row));
            }
            rows.sort_by(|a, b| {
                total_of(b)
                    .cmp(&total_of(a))
                    .then_with(|| a.keys.first().cmp(&b.keys.first()))
                    .then_with(|| b.count.cmp(&a.count))
            });
        }
    }
    rows
}

/// Renders breakdown rows as a table for export.
pub fn to_table(rows: &[BreakdownRow], dimensions: &[String], count_label: &str) -> Table {
    let mut columns = dimensions.to_vec();
    columns.push(count_label.to_string());
    columns.push("percentage".to_string());
    let records = rows
        .iter()
        .map(|row| {
            let mut record = Record::new();
            for (column, key) in dimensions.iter().zip(&row.keys) {
                record.set(column, Value::text(key.as_str()));
            }
            record.set(count_label, Value::Number(row.count as f64));
            record.set("percentage", Value::Number(row.percentage));
            record
        })
        .collect();
    Table::from_rows(columns, records)
}

fn distinct_where(table: &Table, column: &str, expected: &str, id: &str) -> usize {
    table
        .filter(|row| row.get(column).to_string() == expected)
        .count_distinct(id)
}

/// Overall, internal and external learners among reconciled rows.
pub fn learner_counts(reconciled: &Table, id: &str) -> LearnerCounts {
    LearnerCounts {
        overall: reconciled.count_distinct(EMAIL),
        internal: distinct_where(reconciled, STATUS_LEARNER, "Internal", id),
        external: distinct_where(reconciled, STATUS_LEARNER, "External", id),
    }
}

/// Registered, active and passive users among registrations.
pub fn user_counts(registrations: &Table) -> UserCounts {
    UserCounts {
        overall: registrations.count_distinct(EMAIL),
        active: distinct_where(registrations, LEARNER_STATUS, "Active", EMAIL),
        passive: distinct_where(registrations, LEARNER_STATUS, "Passive", EMAIL),
    }
}

/// Distinct learners per configured bundle, zero when a bundle has none.
pub fn bundle_learners(table: &Table, bundles: &[BundleRule]) -> Vec<BreakdownRow> {
    let counts: Vec<(String, usize)> = bundles
        .iter()
        .map(|b| (b.title.clone(), distinct_where(table, TITLE, &b.title, CUSTOMER_ID)))
        .collect();
    let total: usize = counts.iter().map(|(_, c)| c).sum();
    let mut rows: Vec<BreakdownRow> = counts
        .into_iter()
        .map(|(title, count)| BreakdownRow {
            keys: vec![title],
            count,
            percentage: percent(count, total),
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

/// Final results of best attempts, one vote per learner sitting.
pub fn final_results(best: &Table) -> Vec<BreakdownRow> {
    breakdown(
        best,
        &BreakdownSpec::distinct(&[FINAL_RESULT], &[CUSTOMER_ID, LAST_UPDATED], ChartShape::Pie),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learner(email: &str, unit: &str, platform: &str) -> Record {
        Record::new()
            .with("email", email)
            .with("unit", unit)
            .with("platform", platform)
    }

    fn sample() -> Table {
        let mut table = Table::new(&["email", "unit", "platform"]);
        for row in [
            learner("a@x.com", "Media", "Discovery"),
            learner("a@x.com", "Media", "Discovery"),
            learner("b@x.com", "Media", "Capture"),
            learner("c@x.com", "Retail", "Discovery"),
            learner("d@x.com", "Media", "Discovery"),
        ] {
            table.push(row);
        }
        table
    }

    #[test]
    fn bar_counts_distinct_learners() {
        let rows = breakdown(
            &sample(),
            &BreakdownSpec::distinct(&["unit"], &["email"], ChartShape::Bar),
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].keys, vec!["Media".to_string()]);
        assert_eq!(rows[0].count, 3);
        assert_eq!(rows[0].percentage, 75.0);
        assert_eq!(rows[1].count, 1);
    }

    #[test]
    fn row_counts_include_repeats() {
        let spec = BreakdownSpec {
            dimensions: vec!["unit".into()],
            count: CountMode::Rows,
            shape: ChartShape::Pie,
        };
        let rows = breakdown(&sample(), &spec);
        assert_eq!(rows[0].count, 4);
        assert_eq!(rows[0].percentage, 80.0);
    }

    #[test]
    fn stacked_percentages_are_within_first_dimension() {
        let rows = breakdown(
            &sample(),
            &BreakdownSpec::distinct(&["unit", "platform"], &["email"], ChartShape::Stacked),
        );
        let media: Vec<&BreakdownRow> = rows.iter().filter(|r| r.keys[0] == "Media").collect();
        assert_eq!(media.len(), 2);
        assert_eq!(media[0].keys[1], "Discovery");
        assert_eq!(media[0].percentage, 66.67);
        assert_eq!(media[1].percentage, 33.33);
        assert_eq!(rows.last().map(|r| r.keys[0].as_str()), Some("Retail"));
        assert_eq!(rows.last().map(|r| r.percentage), Some(100.0));
    }

    #[test]
    fn sentinel_is_a_group_but_null_is_dropped() {
        let mut table = Table::new(&["email", "unit"]);
        table.push(Record::new().with("email", "a@x.com").with("unit", Value::NotAvailable));
        table.push(Record::new().with("email", "b@x.com"));
        let rows = breakdown(
            &table,
            &BreakdownSpec::distinct(&["unit"], &["email"], ChartShape::Bar),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].keys, vec!["N/A".to_string()]);
    }

    #[test]
    fn empty_or_all_null_input_yields_nothing() {
        let spec = BreakdownSpec::distinct(&["unit"], &["email"], ChartShape::Stacked);
        assert!(breakdown(&Table::empty(), &spec).is_empty());

        let mut nulls = Table::new(&["email", "unit"]);
        nulls.push(Record::new().with("email", "a@x.com"));
        assert!(breakdown(&nulls, &spec).is_empty());
    }

    #[test]
    fn learner_counts_split_by_status() {
        let mut table = Table::new(&["email", "Customer ID", "status_learner"]);
        for (email, id, status) in [
            ("a@x.com", "1", "Internal"),
            ("a@x.com", "1", "Internal"),
            ("b@x.com", "2", "External"),
            ("c@x.com", "3", "External"),
        ] {
            table.push(
                Record::new()
                    .with("email", email)
                    .with("Customer ID", id)
                    .with("status_learner", status),
            );
        }
        let counts = learner_counts(&table, CUSTOMER_ID);
        assert_eq!(
            counts,
            LearnerCounts {
                overall: 3,
                internal: 1,
                external: 2
            }
        );
    }

    #[test]
    fn bundles_without_learners_report_zero() {
        let mut table = Table::new(&["Customer ID", "title"]);
        table.push(Record::new().with("Customer ID", "1").with("title", "GI"));
        table.push(Record::new().with("Customer ID", "1").with("title", "GI"));
        table.push(Record::new().with("Customer ID", "2").with("title", "GI"));
        let bundles = vec![
            BundleRule {
                title: "LEAN".into(),
                rank_cap: None,
            },
            BundleRule {
                title: "GI".into(),
                rank_cap: None,
            },
        ];
        let rows = bundle_learners(&table, &bundles);
        assert_eq!(rows[0].keys, vec!["GI".to_string()]);
        assert_eq!(rows[0].count, 2);
        assert_eq!(rows[1].count, 0);
    }

    #[test]
    fn final_results_count_each_sitting_once() {
        let mut table = Table::new(&["Customer ID", "last_updated", "final_result"]);
        for (id, date, result) in [
            ("1", "2024-01-02", "Pass"),
            ("1", "2024-01-02", "Pass"),
            ("2", "2024-01-02", "Fail"),
            ("1", "2024-02-02", "Pass"),
        ] {
            table.push(
                Record::new()
                    .with("Customer ID", id)
                    .with("last_updated", date)
                    .with("final_result", result),
            );
        }
        let rows = final_results(&table);
        assert_eq!(rows[0].keys, vec!["Pass".to_string()]);
        assert_eq!(rows[0].count, 2);
        assert_eq!(rows[1].count, 1);
    }

    #[test]
    fn export_table_has_dimension_count_and_percentage() {
        let rows = breakdown(
            &sample(),
            &BreakdownSpec::distinct(&["platform"], &["email"], ChartShape::Bar),
        );
        let table = to_table(&rows, &["platform".to_string()], "learners");
        assert_eq!(table.columns(), ["platform", "learners", "percentage"]);
        assert_eq!(table.rows()[0].get("learners"), &Value::Number(3.0));
    }
}
