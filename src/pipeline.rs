//! Fetch, clean, reconcile: produces the five finalized tables.

use tracing::{info, warn};

use crate::cache::{fetch_cached, SourceCache};
use crate::config::DashboardConfig;
use crate::models::{
    FinalizedData, CREATED_AT, CUSTOMER_ID, DONE_AT, GENDER, LAST_UPDATED, NIK, REGISTRY_COLUMNS,
    SCHEDULED_AT, TOTAL_SCORE,
};
use crate::normalize::{
    assign_layer_groups, coerce_date_column, coerce_score, coerce_text_column, fill_not_available,
    normalize_email_column, pad_employee_id,
};
use crate::reconcile::reconcile;
use crate::sources::{SourceKey, TableSource};
use crate::table::Table;

/// Raw tables as fetched, before any cleaning.
#[derive(Debug, Clone, Default)]
pub struct RawSources {
    pub discovery: Table,
    pub active_learners: Table,
    pub active_users: Table,
    pub capture_activity: Table,
    pub capture_registrations: Table,
    pub capture_schedule: Table,
    pub registry: Table,
}

/// The cache keys of every source named by the config.
pub fn source_keys(config: &DashboardConfig) -> [SourceKey; 7] {
    let capture = |sheet| SourceKey::Worksheet {
        workbook: config.workbooks.capture.clone(),
        sheet,
    };
    [
        SourceKey::Query(config.queries.discovery.clone()),
        SourceKey::Query(config.queries.active_learners.clone()),
        SourceKey::Query(config.queries.active_users.clone()),
        capture(0),
        capture(1),
        capture(2),
        SourceKey::Worksheet {
            workbook: config.workbooks.registry.clone(),
            sheet: 0,
        },
    ]
}

/// Fetches every source concurrently, each bounded by the configured
/// timeout. Unavailable sources come back empty.
pub async fn fetch_all<S: TableSource>(
    source: &S,
    cache: &SourceCache,
    config: &DashboardConfig,
) -> RawSources {
    let timeout = config.timeout();
    let [discovery, learners, users, activity, registrations, schedule, registry] =
        source_keys(config);
    let (
        discovery,
        active_learners,
        active_users,
        capture_activity,
        capture_registrations,
        capture_schedule,
        registry,
    ) = tokio::join!(
        fetch_cached(source, cache, &discovery, timeout),
        fetch_cached(source, cache, &learners, timeout),
        fetch_cached(source, cache, &users, timeout),
        fetch_cached(source, cache, &activity, timeout),
        fetch_cached(source, cache, &registrations, timeout),
        fetch_cached(source, cache, &schedule, timeout),
        fetch_cached(source, cache, &registry, timeout),
    );
    RawSources {
        discovery,
        active_learners,
        active_users,
        capture_activity,
        capture_registrations,
        capture_schedule,
        registry,
    }
}

pub async fn finalize<S: TableSource>(
    source: &S,
    cache: &SourceCache,
    config: &DashboardConfig,
) -> FinalizedData {
    let raw = fetch_all(source, cache, config).await;
    build(raw, config)
}

fn clean_learner_table(mut table: Table) -> Table {
    normalize_email_column(&mut table);
    fill_not_available(&mut table);
    table
}

fn clean_registry(raw: &Table) -> Table {
    let (mut registry, missing) = raw.select(&REGISTRY_COLUMNS);
    if !raw.is_empty() && !missing.is_empty() {
        warn!(?missing, "registry is missing expected columns");
    }
    normalize_email_column(&mut registry);
    registry.map_column(NIK, pad_employee_id);
    fill_not_available(&mut registry);
    registry
}

/// Cleans and joins already-fetched sources.
pub fn build(raw: RawSources, config: &DashboardConfig) -> FinalizedData {
    let discovery = clean_learner_table(raw.discovery);
    let registry = clean_registry(&raw.registry);

    let active_learners = clean_learner_table(raw.active_learners);
    let mut capture_activity = clean_learner_table(raw.capture_activity);
    capture_activity.ensure_column(GENDER);

    let mut learners = active_learners.concat(capture_activity);
    learners.drop_column(NIK);

    let mut reconciled = reconcile(&learners, &registry, config.reconcile.duplicate_emails);
    coerce_date_column(&mut reconciled, LAST_UPDATED);
    coerce_text_column(&mut reconciled, CUSTOMER_ID);
    reconciled.map_column(TOTAL_SCORE, coerce_score);
    assign_layer_groups(&mut reconciled, &config.layer_groups);
    fill_not_available(&mut reconciled);

    let active_users = clean_learner_table(raw.active_users);
    let capture_registrations = clean_learner_table(raw.capture_registrations);
    let mut activity_capture = active_users.concat(capture_registrations);
    coerce_date_column(&mut activity_capture, CREATED_AT);
    fill_not_available(&mut activity_capture);

    let mut capture_schedule = clean_learner_table(raw.capture_schedule);
    coerce_date_column(&mut capture_schedule, SCHEDULED_AT);
    coerce_date_column(&mut capture_schedule, DONE_AT);
    fill_not_available(&mut capture_schedule);

    info!(
        discovery = discovery.len(),
        registry = registry.len(),
        reconciled = reconciled.len(),
        activity_capture = activity_capture.len(),
        capture_schedule = capture_schedule.len(),
        "finalized dashboard data"
    );

    FinalizedData {
        discovery,
        registry,
        reconciled,
        activity_capture,
        capture_schedule,
    }
}
