//! Configuration structs (ambient stack): every tunable the indexer,
//! search engine, and ignore engine expose, with defaults plus an
//! `from_env()` loader in the teacher's style of small typed config
//! structs over a monolithic settings blob.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Number of commits held in the sliding tile window.
    pub tile_size: usize,
    /// Minimum interval between full tile-arrival rebuilds.
    pub min_rebuild_interval: Duration,
    /// Traces above this flakiness threshold (distinct digests / commits in
    /// the window) are candidates for an ignore rule, surfaced for triagers
    /// rather than auto-ignored.
    pub flaky_trace_threshold: f64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            tile_size: 200,
            min_rebuild_interval: Duration::from_secs(60),
            flaky_trace_threshold: 0.5,
        }
    }
}

impl IndexerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tile_size: env_or("GOLD_TILE_SIZE", defaults.tile_size),
            min_rebuild_interval: Duration::from_secs(env_or(
                "GOLD_MIN_REBUILD_INTERVAL_SECS",
                defaults.min_rebuild_interval.as_secs(),
            )),
            flaky_trace_threshold: env_or(
                "GOLD_FLAKY_TRACE_THRESHOLD",
                defaults.flaky_trace_threshold,
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangelistIndexerConfig {
    /// How many CLs are indexed concurrently.
    pub parallelism: usize,
    /// Sub-indices older than this are evicted even if still open.
    pub ttl: Duration,
    /// Never hold sub-indices for more than this many open CLs at once.
    pub max_concurrent_cls: usize,
    /// Ignore CLs whose most recent tryjob result is older than this.
    pub recency_cutoff: Duration,
}

impl Default for ChangelistIndexerConfig {
    fn default() -> Self {
        Self {
            parallelism: 8,
            ttl: Duration::from_secs(4 * 60 * 60),
            max_concurrent_cls: 256,
            recency_cutoff: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl ChangelistIndexerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            parallelism: env_or("GOLD_CL_PARALLELISM", defaults.parallelism),
            ttl: Duration::from_secs(env_or("GOLD_CL_TTL_SECS", defaults.ttl.as_secs())),
            max_concurrent_cls: env_or("GOLD_CL_MAX_CONCURRENT", defaults.max_concurrent_cls),
            recency_cutoff: Duration::from_secs(env_or(
                "GOLD_CL_RECENCY_CUTOFF_SECS",
                defaults.recency_cutoff.as_secs(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Maximum number of reference (closest-positive/closest-negative)
    /// candidates scanned per digest before giving up.
    pub max_reference_candidates: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 500,
            max_reference_candidates: 5_000,
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_page_size: env_or("GOLD_SEARCH_PAGE_SIZE", defaults.default_page_size),
            max_page_size: env_or("GOLD_SEARCH_MAX_PAGE_SIZE", defaults.max_page_size),
            max_reference_candidates: env_or(
                "GOLD_SEARCH_MAX_REFERENCE_CANDIDATES",
                defaults.max_reference_candidates,
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IgnoreEngineConfig {
    /// When true, expired rules are dropped from bulk-restamp predicate
    /// synthesis but left in the rule list for audit/history purposes.
    pub skip_expired_in_predicate: bool,
}

impl IgnoreEngineConfig {
    pub fn from_env() -> Self {
        Self {
            skip_expired_in_predicate: env_or("GOLD_IGNORE_SKIP_EXPIRED", true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexer_config_defaults_are_sane() {
        let cfg = IndexerConfig::default();
        assert!(cfg.tile_size > 0);
        assert!(cfg.flaky_trace_threshold > 0.0 && cfg.flaky_trace_threshold <= 1.0);
    }

    #[test]
    fn changelist_config_parallelism_matches_spec_chunking() {
        assert_eq!(ChangelistIndexerConfig::default().parallelism, 8);
    }
}
