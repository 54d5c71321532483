use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::reconcile::DuplicatePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub database: DatabaseConfig,
    pub queries: QueryFiles,
    pub workbooks: WorkbookFiles,
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub reconcile: ReconcileConfig,
    pub bundles: Vec<BundleRule>,
    pub layer_groups: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Environment variable holding the MySQL connection URL.
    pub url_env: String,
    pub require_tls: bool,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryFiles {
    pub discovery: PathBuf,
    pub active_learners: PathBuf,
    pub active_users: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkbookFiles {
    pub capture: PathBuf,
    pub registry: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are refetched. Zero keeps them until cleared.
    pub ttl_hours: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub duplicate_emails: DuplicatePolicy,
}

/// A named group of tests and, for ranked bundles, how many ranks count.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BundleRule {
    pub title: String,
    #[serde(default)]
    pub rank_cap: Option<u32>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url_env: "DISCOVERY_DATABASE_URL".to_string(),
            require_tls: true,
            max_connections: 5,
        }
    }
}

impl Default for QueryFiles {
    fn default() -> Self {
        Self {
            discovery: PathBuf::from("queries/query_discovery.sql"),
            active_learners: PathBuf::from("queries/query_DiscoveryAL.sql"),
            active_users: PathBuf::from("queries/query_DiscoveryAU.sql"),
        }
    }
}

impl Default for WorkbookFiles {
    fn default() -> Self {
        Self {
            capture: PathBuf::from("data/capture.xlsx"),
            registry: PathBuf::from("data/active_employee.xlsx"),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_hours: 24 }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            queries: QueryFiles::default(),
            workbooks: WorkbookFiles::default(),
            fetch: FetchConfig::default(),
            cache: CacheConfig::default(),
            reconcile: ReconcileConfig::default(),
            bundles: default_bundles(),
            layer_groups: default_layer_groups(),
        }
    }
}

fn default_bundles() -> Vec<BundleRule> {
    [("GI", None), ("LEAN", None), ("ELITE", None), ("Genuine", Some(9)), ("Astaka", Some(6))]
        .into_iter()
        .map(|(title, rank_cap)| BundleRule {
            title: title.to_string(),
            rank_cap,
        })
        .collect()
}

fn default_layer_groups() -> BTreeMap<String, String> {
    [
        ("Group 5 Str Layer 1", "Layer 1"),
        ("Group 4 Str Layer 2", "Layer 2"),
        ("Group 3 Str Layer 3B", "Layer 3"),
        ("Group 3 Str Layer 3A", "Layer 3"),
        ("Group 2 Str Layer 4", "Layer 4"),
        ("Group 1 Str Layer 5", "Layer 5"),
        ("Group 1", "Non Struktural"),
        ("Group 2", "Non Struktural"),
        ("Group 3", "Non Struktural"),
        ("Group 4", "Non Struktural"),
        ("Group 5", "Non Struktural"),
    ]
    .into_iter()
    .map(|(raw, group)| (raw.to_string(), group.to_string()))
    .collect()
}

impl DashboardConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch.timeout_secs must be positive".into()));
        }
        for bundle in &self.bundles {
            if bundle.title.trim().is_empty() {
                return Err(ConfigError::Invalid("bundle title cannot be empty".into()));
            }
            if bundle.rank_cap == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "bundle '{}' has a rank cap of zero",
                    bundle.title
                )));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Option<chrono::Duration> {
        match self.cache.ttl_hours {
            0 => None,
            hours => i64::try_from(hours).ok().map(chrono::Duration::hours),
        }
    }

    pub fn bundle(&self, title: &str) -> Option<&BundleRule> {
        self.bundles.iter().find(|b| b.title.eq_ignore_ascii_case(title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_carry_bundle_caps() {
        let config = DashboardConfig::default();
        assert_eq!(config.bundle("genuine").and_then(|b| b.rank_cap), Some(9));
        assert_eq!(config.bundle("Astaka").and_then(|b| b.rank_cap), Some(6));
        assert_eq!(config.bundle("GI").and_then(|b| b.rank_cap), None);
        assert_eq!(config.layer_groups["Group 3 Str Layer 3A"], "Layer 3");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = DashboardConfig::from_toml(
            r#"
            [fetch]
            timeout_secs = 5

            [[bundles]]
            title = "Genuine"
            rank_cap = 3

            [reconcile]
            duplicate_emails = "fan_out"
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.bundles.len(), 1);
        assert_eq!(config.bundles[0].rank_cap, Some(3));
        assert_eq!(config.reconcile.duplicate_emails, DuplicatePolicy::FanOut);
        assert_eq!(config.database.url_env, "DISCOVERY_DATABASE_URL");
        assert_eq!(config.cache_ttl(), Some(chrono::Duration::hours(24)));
    }

    #[test]
    fn rejects_zero_rank_cap() {
        let err = DashboardConfig::from_toml(
            r#"
            [[bundles]]
            title = "Astaka"
            rank_cap = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DashboardConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.fetch.timeout_secs, 30);
    }

    #[test]
    fn loads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nttl_hours = 6").unwrap();
        let config = DashboardConfig::load(file.path()).unwrap();
        assert_eq!(config.cache_ttl(), Some(chrono::Duration::hours(6)));
    }

    #[test]
    fn zero_ttl_disables_expiry() {
        let config = DashboardConfig::from_toml("[cache]\nttl_hours = 0").unwrap();
        assert_eq!(config.cache_ttl(), None);
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let shipped = DashboardConfig::from_toml(include_str!("../dashboard.toml")).unwrap();
        let defaults = DashboardConfig::default();
        assert_eq!(shipped.bundles, defaults.bundles);
        assert_eq!(shipped.layer_groups, defaults.layer_groups);
        assert_eq!(shipped.queries.discovery, defaults.queries.discovery);
    }
}
