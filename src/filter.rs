use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;

use crate::models::{
    COMPANY, INSTITUTION, LAYER, LAYER_GROUP, PLATFORM, STATUS_LEARNER, SUBUNIT, TITLE, UNIT,
};
use crate::table::Table;

/// Shortcut periods offered next to the manual date picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatePeriod {
    Lifetime,
    ThisYear,
    ThisMonth,
}

impl DatePeriod {
    /// Resolves the period against the data's date span, clamped so it never
    /// leaves `[min, max]`.
    pub fn resolve(self, today: NaiveDate, min: NaiveDate, max: NaiveDate) -> (NaiveDate, NaiveDate) {
        let (from, to) = match self {
            DatePeriod::Lifetime => (min, max),
            DatePeriod::ThisYear => (today.with_ordinal(1).unwrap_or(today), today),
            DatePeriod::ThisMonth => (today.with_day(1).unwrap_or(today), today),
        };
        clamp_range(from, to, min, max)
    }
}

pub fn clamp_range(
    from: NaiveDate,
    to: NaiveDate,
    min: NaiveDate,
    max: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    (from.max(min), to.min(max))
}

/// An immutable filter selection. Empty multi-selects place no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSelection {
    pub date_column: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub platform: Option<String>,
    pub status: Option<String>,
    pub units: Vec<String>,
    pub subunits: Vec<String>,
    pub layers: Vec<String>,
    pub layer_groups: Vec<String>,
    pub titles: Vec<String>,
    pub companies: Vec<String>,
    pub institutions: Vec<String>,
}

impl FilterSelection {
    pub fn between(column: &str, from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            date_column: Some(column.to_string()),
            from: Some(from),
            to: Some(to),
            ..Self::default()
        }
    }

    /// Rows matching every constraint. Rows without a parseable date are
    /// excluded once a date bound is set.
    pub fn apply(&self, table: &Table) -> Table {
        let single = [
            (PLATFORM, self.platform.as_deref()),
            (STATUS_LEARNER, self.status.as_deref()),
        ];
        let multi = [
            (UNIT, &self.units),
            (SUBUNIT, &self.subunits),
            (LAYER, &self.layers),
            (LAYER_GROUP, &self.layer_groups),
            (TITLE, &self.titles),
            (COMPANY, &self.companies),
            (INSTITUTION, &self.institutions),
        ];

        table.filter(|row| {
            if let Some(column) = &self.date_column {
                if self.from.is_some() || self.to.is_some() {
                    let Some(date) = row.get(column).as_date() else {
                        return false;
                    };
                    if self.from.is_some_and(|from| date < from)
                        || self.to.is_some_and(|to| date > to)
                    {
                        return false;
                    }
                }
            }
            let single_ok = single.iter().all(|(column, wanted)| match wanted {
                Some(wanted) => row.get(column).to_string() == *wanted,
                None => true,
            });
            let multi_ok = multi.iter().all(|(column, allowed)| {
                allowed.is_empty() || allowed.contains(&row.get(column).to_string())
            });
            single_ok && multi_ok
        })
    }

    /// The constraints registrations can honour: the date range and the
    /// platform. Registrations carry no organisational or learner-status
    /// columns, so those selections would otherwise drop every row.
    pub fn for_registrations(&self) -> FilterSelection {
        FilterSelection {
            date_column: self.date_column.clone(),
            from: self.from,
            to: self.to,
            platform: self.platform.clone(),
            ..FilterSelection::default()
        }
    }

    /// Human-readable summary of the active constraints.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        match (self.from, self.to) {
            (Some(from), Some(to)) => parts.push(format!("{from} to {to}")),
            (Some(from), None) => parts.push(format!("since {from}")),
            (None, Some(to)) => parts.push(format!("until {to}")),
            (None, None) => {}
        }
        for (label, value) in [("platform", &self.platform), ("status", &self.status)] {
            if let Some(value) = value {
                parts.push(format!("{label} {value}"));
            }
        }
        for (label, values) in [
            ("unit", &self.units),
            ("subunit", &self.subunits),
            ("layer", &self.layers),
            ("layer group", &self.layer_groups),
            ("title", &self.titles),
            ("company", &self.companies),
            ("institution", &self.institutions),
        ] {
            if !values.is_empty() {
                parts.push(format!("{label} {}", values.join("/")));
            }
        }
        if parts.is_empty() {
            "all learners".to_string()
        } else {
            parts.join(", ")
        }
    }
}
