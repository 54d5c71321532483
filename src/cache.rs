use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info};

use crate::sources::{SourceError, SourceKey, TableSource};
use crate::table::Table;

struct CachedTable {
    table: Table,
    fetched_at: DateTime<Utc>,
}

/// Memoised source results keyed by [`SourceKey`].
///
/// Entries live until [`SourceCache::clear`], [`SourceCache::invalidate`] or,
/// when a TTL is set, until they are older than the TTL.
pub struct SourceCache {
    ttl: Option<Duration>,
    entries: Mutex<HashMap<SourceKey, CachedTable>>,
}

impl SourceCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<SourceKey, CachedTable>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &SourceKey, now: DateTime<Utc>) -> Option<Table> {
        let mut entries = self.entries();
        let expired = match (entries.get(key), self.ttl) {
            (None, _) => return None,
            (Some(entry), Some(ttl)) => now - entry.fetched_at >= ttl,
            (Some(_), None) => false,
        };
        if expired {
            debug!(source = %key, "cache entry expired");
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.table.clone())
    }

    pub fn insert(&self, key: SourceKey, table: Table, now: DateTime<Utc>) {
        self.entries().insert(
            key,
            CachedTable {
                table,
                fetched_at: now,
            },
        );
    }

    pub fn invalidate(&self, key: &SourceKey) -> bool {
        self.entries().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fetches `key`, giving up with [`SourceError::Timeout`] after `timeout`.
pub async fn fetch_within<S: TableSource>(
    source: &S,
    key: &SourceKey,
    timeout: std::time::Duration,
) -> Result<Table, SourceError> {
    tokio::time::timeout(timeout, source.fetch(key))
        .await
        .map_err(|_| SourceError::Timeout(timeout))?
}

/// Returns the cached table for `key`, fetching it on a miss.
///
/// A failed or timed-out fetch is logged and yields an empty table so the
/// rest of the pipeline can run on partial data. Failures are not cached.
pub async fn fetch_cached<S: TableSource>(
    source: &S,
    cache: &SourceCache,
    key: &SourceKey,
    timeout: std::time::Duration,
) -> Table {
    if let Some(hit) = cache.get(key, Utc::now()) {
        debug!(source = %key, rows = hit.len(), "cache hit");
        return hit;
    }
    match fetch_within(source, key, timeout).await {
        Ok(table) => {
            info!(source = %key, rows = table.len(), "fetched source");
            cache.insert(key.clone(), table.clone(), Utc::now());
            table
        }
        Err(err) => {
            error!(source = %key, error = %err, "source unavailable, continuing without it");
            Table::empty()
        }
    }
}
