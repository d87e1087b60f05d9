//! Configuration for the memory layer

use crate::error::{MemoryError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How the context mapper derives its cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Key on query text and scope only. Requests that differ only in
    /// current context, persona or capabilities share one cached context.
    #[default]
    QueryAndScope,

    /// Key on the full request shape
    FullRequest,
}

/// Configuration for caches and memory tiers
///
/// Defaults:
/// - Default TTL: 5 minutes (the compatibility default for cached contexts)
/// - Fast tier: 5 minute TTL, 1000 entries with LRU eviction
/// - Search timeout: 5 seconds
/// - No background sweep: expiry is checked lazily on read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Root directory of the on-disk cache; one subdirectory per scope
    pub cache_root: PathBuf,

    /// TTL used when a caller does not specify one
    pub default_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0), 0.0 disables jitter
    pub ttl_jitter: f64,

    /// TTL of fast tier entries when save metadata carries none
    pub fast_tier_ttl: Duration,

    /// Maximum number of entries held by the fast tier
    pub fast_tier_max_entries: usize,

    /// Upper bound on one semantic search call
    pub search_timeout: Duration,

    /// Interval of the optional background sweep of expired entries
    pub sweep_interval: Option<Duration>,

    /// SQLite file for the persistent tier, in-memory database when `None`
    pub database_path: Option<PathBuf>,

    /// Cache key policy of the context mapper
    pub key_policy: KeyPolicy,

    /// Text splitter chunk size in characters
    pub chunk_size: usize,

    /// Text splitter overlap in characters
    pub chunk_overlap: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from(".memory_cache"),
            default_ttl: Duration::from_secs(300),
            ttl_jitter: 0.0,
            fast_tier_ttl: Duration::from_secs(300),
            fast_tier_max_entries: 1_000,
            search_timeout: Duration::from_secs(5),
            sweep_interval: None,
            database_path: None,
            key_policy: KeyPolicy::QueryAndScope,
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

impl MemoryConfig {
    /// Create a new builder for memory configuration
    pub fn builder() -> MemoryConfigBuilder {
        MemoryConfigBuilder::default()
    }

    /// Load configuration from the environment, reading `.env` if present
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("MEMORY_CACHE_DIR") {
            config.cache_root = PathBuf::from(dir);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "MEMORY_DEFAULT_TTL_SECS")? {
            config.default_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "MEMORY_FAST_TTL_MS")? {
            config.fast_tier_ttl = Duration::from_millis(ms);
        }
        if let Some(max) = parse_var::<usize>(&lookup, "MEMORY_FAST_MAX_ENTRIES")? {
            config.fast_tier_max_entries = max;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "MEMORY_SEARCH_TIMEOUT_MS")? {
            config.search_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "MEMORY_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(path) = lookup("MEMORY_DATABASE_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.fast_tier_max_entries == 0 {
            return Err(MemoryError::ConfigError(
                "fast_tier_max_entries must be greater than 0".to_string(),
            ));
        }

        if self.ttl_jitter < 0.0 || self.ttl_jitter > 1.0 {
            return Err(MemoryError::ConfigError(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.search_timeout.is_zero() {
            return Err(MemoryError::ConfigError(
                "search_timeout must be greater than 0".to_string(),
            ));
        }

        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(MemoryError::ConfigError(
                "chunk_overlap must be smaller than a non-zero chunk_size".to_string(),
            ));
        }

        if matches!(self.sweep_interval, Some(interval) if interval.is_zero()) {
            return Err(MemoryError::ConfigError(
                "sweep_interval must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply the configured jitter to a TTL
    pub fn jittered(&self, ttl: Duration) -> Duration {
        if self.ttl_jitter == 0.0 || ttl.is_zero() {
            return ttl;
        }

        let base_secs = ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(0.001);

        Duration::try_from_secs_f64(final_secs).unwrap_or(Duration::MAX)
    }

    /// Directory owned by one scope
    pub fn scope_dir(&self, scope: &str) -> PathBuf {
        self.cache_root.join(scope)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| MemoryError::ConfigError(format!("invalid value for {}: {:?}", name, raw))),
        None => Ok(None),
    }
}

/// Builder for memory configuration
#[derive(Debug, Default)]
pub struct MemoryConfigBuilder {
    cache_root: Option<PathBuf>,
    default_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    fast_tier_ttl: Option<Duration>,
    fast_tier_max_entries: Option<usize>,
    search_timeout: Option<Duration>,
    sweep_interval: Option<Duration>,
    database_path: Option<PathBuf>,
    key_policy: Option<KeyPolicy>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
}

impl MemoryConfigBuilder {
    pub fn cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    pub fn fast_tier_ttl(mut self, ttl: Duration) -> Self {
        self.fast_tier_ttl = Some(ttl);
        self
    }

    pub fn fast_tier_max_entries(mut self, max: usize) -> Self {
        self.fast_tier_max_entries = Some(max);
        self
    }

    pub fn search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = Some(timeout);
        self
    }

    /// Enable the periodic sweep of expired entries
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn key_policy(mut self, policy: KeyPolicy) -> Self {
        self.key_policy = Some(policy);
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.chunk_overlap = Some(overlap);
        self
    }

    /// Build the configuration
    pub fn build(self) -> MemoryConfig {
        let defaults = MemoryConfig::default();

        MemoryConfig {
            cache_root: self.cache_root.unwrap_or(defaults.cache_root),
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            fast_tier_ttl: self.fast_tier_ttl.unwrap_or(defaults.fast_tier_ttl),
            fast_tier_max_entries: self
                .fast_tier_max_entries
                .unwrap_or(defaults.fast_tier_max_entries),
            search_timeout: self.search_timeout.unwrap_or(defaults.search_timeout),
            sweep_interval: self.sweep_interval.or(defaults.sweep_interval),
            database_path: self.database_path.or(defaults.database_path),
            key_policy: self.key_policy.unwrap_or(defaults.key_policy),
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
            chunk_overlap: self.chunk_overlap.unwrap_or(defaults.chunk_overlap),
        }
    }
}

/// Preset configurations
impl MemoryConfig {
    /// Short TTLs for tests rooted at `cache_root`
    pub fn testing(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            default_ttl: Duration::from_secs(1),
            fast_tier_ttl: Duration::from_millis(100),
            fast_tier_max_entries: 100,
            search_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    /// Long-lived processes: sweep abandoned keys every 10 minutes
    pub fn long_lived() -> Self {
        Self {
            sweep_interval: Some(Duration::from_secs(600)),
            fast_tier_max_entries: 10_000,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = MemoryConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.fast_tier_ttl, Duration::from_secs(300));
        assert_eq!(config.key_policy, KeyPolicy::QueryAndScope);
        assert!(config.sweep_interval.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid = MemoryConfig::default();
        invalid.fast_tier_max_entries = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = MemoryConfig::default();
        invalid.ttl_jitter = 1.5;
        assert!(invalid.validate().is_err());

        let mut invalid = MemoryConfig::default();
        invalid.chunk_overlap = invalid.chunk_size;
        assert!(invalid.validate().is_err());

        let mut invalid = MemoryConfig::default();
        invalid.sweep_interval = Some(Duration::ZERO);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = MemoryConfig::builder()
            .cache_root("/tmp/agents")
            .default_ttl(Duration::from_secs(600))
            .fast_tier_max_entries(50)
            .key_policy(KeyPolicy::FullRequest)
            .build();

        assert_eq!(config.cache_root, PathBuf::from("/tmp/agents"));
        assert_eq!(config.default_ttl, Duration::from_secs(600));
        assert_eq!(config.fast_tier_max_entries, 50);
        assert_eq!(config.key_policy, KeyPolicy::FullRequest);
        assert_eq!(config.search_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("MEMORY_CACHE_DIR", "/var/cache/agents"),
            ("MEMORY_DEFAULT_TTL_SECS", "60"),
            ("MEMORY_FAST_TTL_MS", "250"),
            ("MEMORY_SWEEP_INTERVAL_SECS", "30"),
        ]
        .into_iter()
        .collect();

        let config = MemoryConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.cache_root, PathBuf::from("/var/cache/agents"));
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.fast_tier_ttl, Duration::from_millis(250));
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = MemoryConfig::from_lookup(|k| {
            (k == "MEMORY_DEFAULT_TTL_SECS").then(|| "five minutes".to_string())
        });
        assert!(matches!(result, Err(MemoryError::ConfigError(_))));
    }

    #[test]
    fn test_jitter_bounds() {
        let config = MemoryConfig {
            ttl_jitter: 0.1,
            ..Default::default()
        };
        let ttl = config.jittered(Duration::from_secs(100)).as_secs_f64();
        assert!((90.0..=110.0).contains(&ttl));

        let exact = MemoryConfig::default().jittered(Duration::from_secs(100));
        assert_eq!(exact, Duration::from_secs(100));
    }

    #[test]
    fn test_jitter_on_huge_ttl() {
        let config = MemoryConfig {
            ttl_jitter: 0.5,
            ..Default::default()
        };
        for _ in 0..20 {
            assert!(config.jittered(Duration::MAX) > Duration::from_secs(u64::MAX / 4));
        }
    }

    #[test]
    fn test_presets() {
        let long = MemoryConfig::long_lived();
        assert!(long.sweep_interval.is_some());
        assert!(long.validate().is_ok());

        let testing = MemoryConfig::testing("/tmp/x");
        assert_eq!(testing.fast_tier_ttl, Duration::from_millis(100));
        assert!(testing.validate().is_ok());
    }
}
