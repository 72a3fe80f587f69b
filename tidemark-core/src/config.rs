//! Runtime configuration for the cache.

use crate::{ConfigError, TidemarkResult};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_PAGE_SIZE: usize = 1000;
const DEFAULT_MAX_CONCURRENT_GAPS: usize = 1;
const DEFAULT_FEED_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_LMDB_MAP_SIZE_MB: usize = 1024;

/// Cache configuration.
///
/// Every field has a default, so a TOML file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TidemarkConfig {
    /// Rows fetched per page by observation cursors.
    pub page_size: usize,
    /// Gaps filled from the feed at the same time. 1 means sequential.
    pub max_concurrent_gaps: usize,
    /// Buffer size of each feed channel.
    pub feed_channel_capacity: usize,
    /// Upper bound on filling a single gap. `None` waits forever.
    pub feed_timeout_ms: Option<u64>,
    /// Added to the start of every gap that follows a cached range.
    pub from_exclusivity_offset_ns: Option<i64>,
    /// Subtracted from the end of every gap that precedes a cached range.
    pub to_exclusivity_offset_ns: Option<i64>,
    /// LMDB map size for the persistent stores.
    pub lmdb_map_size_mb: usize,
}

impl Default for TidemarkConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_concurrent_gaps: DEFAULT_MAX_CONCURRENT_GAPS,
            feed_channel_capacity: DEFAULT_FEED_CHANNEL_CAPACITY,
            feed_timeout_ms: None,
            from_exclusivity_offset_ns: None,
            to_exclusivity_offset_ns: None,
            lmdb_map_size_mb: DEFAULT_LMDB_MAP_SIZE_MB,
        }
    }
}

impl TidemarkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_concurrent_gaps(mut self, max: usize) -> Self {
        self.max_concurrent_gaps = max;
        self
    }

    pub fn with_feed_channel_capacity(mut self, capacity: usize) -> Self {
        self.feed_channel_capacity = capacity;
        self
    }

    pub fn with_feed_timeout(mut self, timeout: Duration) -> Self {
        self.feed_timeout_ms = Some(timeout.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn with_exclusivity_offsets(
        mut self,
        from_offset: Option<TimeDelta>,
        to_offset: Option<TimeDelta>,
    ) -> Self {
        self.from_exclusivity_offset_ns = from_offset.and_then(|d| d.num_nanoseconds());
        self.to_exclusivity_offset_ns = to_offset.and_then(|d| d.num_nanoseconds());
        self
    }

    pub fn with_lmdb_map_size_mb(mut self, size_mb: usize) -> Self {
        self.lmdb_map_size_mb = size_mb;
        self
    }

    pub fn feed_timeout(&self) -> Option<Duration> {
        self.feed_timeout_ms.map(Duration::from_millis)
    }

    pub fn from_exclusivity_offset(&self) -> Option<TimeDelta> {
        self.from_exclusivity_offset_ns.map(TimeDelta::nanoseconds)
    }

    pub fn to_exclusivity_offset(&self) -> Option<TimeDelta> {
        self.to_exclusivity_offset_ns.map(TimeDelta::nanoseconds)
    }

    /// Check every field. Called by the loaders; call it yourself after
    /// building a config by hand.
    pub fn validate(&self) -> TidemarkResult<()> {
        positive("page_size", self.page_size)?;
        positive("max_concurrent_gaps", self.max_concurrent_gaps)?;
        positive("feed_channel_capacity", self.feed_channel_capacity)?;
        positive("lmdb_map_size_mb", self.lmdb_map_size_mb)?;

        if self.feed_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "feed_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero when set".to_string(),
            }
            .into());
        }

        for (field, value) in [
            ("from_exclusivity_offset_ns", self.from_exclusivity_offset_ns),
            ("to_exclusivity_offset_ns", self.to_exclusivity_offset_ns),
        ] {
            if let Some(ns) = value.filter(|ns| *ns < 0) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: ns.to_string(),
                    reason: "must not be negative".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Load from `TIDEMARK_*` environment variables. Unset or unparsable
    /// variables keep their defaults.
    pub fn from_env() -> TidemarkResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> TidemarkResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let page_size = lookup("TIDEMARK_PAGE_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.page_size);

        let max_concurrent_gaps = lookup("TIDEMARK_MAX_CONCURRENT_GAPS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_concurrent_gaps);

        let feed_channel_capacity = lookup("TIDEMARK_FEED_CHANNEL_CAPACITY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.feed_channel_capacity);

        let feed_timeout_ms = lookup("TIDEMARK_FEED_TIMEOUT_MS").and_then(|s| s.parse().ok());

        let from_exclusivity_offset_ns =
            lookup("TIDEMARK_FROM_OFFSET_NS").and_then(|s| s.parse().ok());

        let to_exclusivity_offset_ns = lookup("TIDEMARK_TO_OFFSET_NS").and_then(|s| s.parse().ok());

        let lmdb_map_size_mb = lookup("TIDEMARK_LMDB_MAP_SIZE_MB")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.lmdb_map_size_mb);

        let config = Self {
            page_size,
            max_concurrent_gaps,
            feed_channel_capacity,
            feed_timeout_ms,
            from_exclusivity_offset_ns,
            to_exclusivity_offset_ns,
            lmdb_map_size_mb,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> TidemarkResult<Self> {
        let config: TidemarkConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> TidemarkResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }
}

fn positive(field: &str, value: usize) -> TidemarkResult<()> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        }
        .into());
    }
    Ok(())
}
