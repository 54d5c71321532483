use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::breakdown::{breakdown, BreakdownRow, BreakdownSpec, ChartShape, CountMode};
use crate::config::BundleRule;
use crate::models::{CUSTOMER_ID, EMAIL, LAST_UPDATED, RANK, TEST_NAME, TITLE, TOTAL_SCORE};
use crate::table::{Record, Table, Value};

/// One attempt per person, test date and test.
pub const BEST_ATTEMPT_KEYS: [&str; 3] = [EMAIL, LAST_UPDATED, TEST_NAME];
/// Ranks are assigned within one person's sitting.
pub const RANK_GROUP_KEYS: [&str; 2] = [CUSTOMER_ID, LAST_UPDATED];
/// The most recent attempt per person and test.
pub const LATEST_ATTEMPT_KEYS: [&str; 2] = [EMAIL, TEST_NAME];

pub fn score_of(row: &Record) -> Option<f64> {
    row.get(TOTAL_SCORE).as_f64()
}

fn date_of(row: &Record) -> Option<NaiveDate> {
    row.get(LAST_UPDATED).as_date()
}

/// Keeps, for every group of `keys`, the row with the largest `measure`.
///
/// Earlier rows win ties. Rows without a measure are only kept when no row
/// of the group has one. Rows with a null key are dropped. Groups come out
/// in first-seen order.
fn keep_max_by<T, F>(table: &Table, keys: &[&str], measure: F) -> Table
where
    T: PartialOrd,
    F: Fn(&Record) -> Option<T>,
{
    let mut slots: HashMap<Vec<String>, usize> = HashMap::new();
    let mut chosen: Vec<(&Record, Option<T>)> = Vec::new();

    for row in table.rows() {
        let Some(key) = row.key(keys) else {
            continue;
        };
        let value = measure(row);
        match slots.get(&key) {
            Some(&slot) => {
                let better = match (&value, &chosen[slot].1) {
                    (Some(candidate), Some(best)) => candidate > best,
                    (Some(_), None) => true,
                    _ => false,
                };
                if better {
                    chosen[slot] = (row, value);
                }
            }
            None => {
                slots.insert(key, chosen.len());
                chosen.push((row, value));
            }
        }
    }

    let rows = chosen.into_iter().map(|(row, _)| row.clone()).collect();
    Table::from_rows(table.columns().to_vec(), rows)
}

/// Highest-scoring attempt per (email, test date, test name).
pub fn best_attempts(table: &Table) -> Table {
    let best = keep_max_by(table, &BEST_ATTEMPT_KEYS, score_of);
    debug!(input = table.len(), kept = best.len(), "selected best attempts");
    best
}

/// Most recent attempt per (email, test name).
pub fn latest_attempts(table: &Table) -> Table {
    keep_max_by(table, &LATEST_ATTEMPT_KEYS, date_of)
}

/// Adds a `rank` column: 1 for the highest score within each group of
/// `keys`, counting up without gaps. Ties and missing scores fall back to
/// row position, so no two rows of a group share a rank. Rows with a null
/// key cannot be ranked and are left out.
pub fn rank_within(table: &Table, keys: &[&str]) -> Table {
    let mut groups: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    let mut ranks: Vec<Option<usize>> = vec![None; table.len()];

    for (position, row) in table.rows().iter().enumerate() {
        if let Some(key) = row.key(keys) {
            groups.entry(key).or_default().push(position);
        }
    }

    for members in groups.values_mut() {
        members.sort_by(|&a, &b| {
            let left = score_of(&table.rows()[a]);
            let right = score_of(&table.rows()[b]);
            match (left, right) {
                (Some(l), Some(r)) => r.total_cmp(&l),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then(a.cmp(&b))
        });
        for (rank, &position) in members.iter().enumerate() {
            ranks[position] = Some(rank + 1);
        }
    }

    let mut columns = table.columns().to_vec();
    if !columns.iter().any(|c| c == RANK) {
        columns.push(RANK.to_string());
    }
    let rows = table
        .rows()
        .iter()
        .zip(ranks)
        .filter_map(|(row, rank)| {
            let mut ranked = row.clone();
            ranked.set(RANK, Value::Number(rank? as f64));
            Some(ranked)
        })
        .collect();
    Table::from_rows(columns, rows)
}

pub fn rank_of(row: &Record) -> Option<u32> {
    row.get(RANK).as_f64().map(|rank| rank as u32)
}

/// Drops ranked rows beyond `cap`.
pub fn within_cap(ranked: &Table, cap: u32) -> Table {
    ranked.filter(|row| rank_of(row).is_some_and(|rank| rank <= cap))
}

/// Best attempts of one bundle, ranked and capped when the bundle has a cap.
pub fn bundle_attempts(table: &Table, bundle: &BundleRule) -> Table {
    let scoped = table.filter(|row| row.get(TITLE).to_string() == bundle.title);
    let best = best_attempts(&scoped);
    match bundle.rank_cap {
        Some(cap) => within_cap(&rank_within(&best, &RANK_GROUP_KEYS), cap),
        None => best,
    }
}

/// Distinct learners per test among attempts holding `rank`.
pub fn tests_at_rank(ranked: &Table, rank: u32) -> Vec<BreakdownRow> {
    let slice = ranked.filter(|row| rank_of(row) == Some(rank));
    breakdown(
        &slice,
        &BreakdownSpec {
            dimensions: vec![TEST_NAME.to_string()],
            count: CountMode::Distinct(vec![CUSTOMER_ID.to_string()]),
            shape: ChartShape::Bar,
        },
    )
}
