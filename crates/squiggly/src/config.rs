//! Configuration for views and packet ingestion.
//!
//! Both configs follow the same pattern: a plain struct with `Default`,
//! chained `with_*` builders, and a camelCase JSON form so a host can pass
//! options through unchanged. Unknown keys are rejected.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SquigglyError};

/// Default retention window: 5 minutes.
pub const DEFAULT_DURATION_MS: i64 = 300_000;

/// Default number of buckets across the retention window.
pub const DEFAULT_BUCKETS: u32 = 300;

/// Default cap on field search results.
pub const DEFAULT_SEARCH_RESULTS: usize = 10;

/// Default minimum time between partial chart notifications.
pub const DEFAULT_REFRESH_INTERVAL_MS: i64 = 300;

/// Default per-packet field count above which ingestion warns.
pub const DEFAULT_HIGH_FIELD_COUNT_WARN: usize = 100;

/// Default per-field byte size above which ingestion warns.
pub const DEFAULT_HIGH_FIELD_SIZE_WARN: usize = 1024;

/// Configuration for a [`View`](crate::view::View) and its packet store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ViewConfig {
    /// How long packets are retained, in milliseconds.
    ///
    /// Default: 5 minutes.
    pub duration: i64,

    /// How many time buckets the retention window is divided into.
    ///
    /// Default: 300 (one bucket per second with the default duration).
    pub buckets: u32,

    /// Whether numeric path segments share one trie node (`a[0]` and `a[1]`
    /// both index under `a.*`). Default: true.
    pub collapse_arrays: bool,

    /// Maximum number of fields returned by a field search. Default: 10.
    pub search_results: usize,

    /// Field prefixes sorted ahead of everything else in field listings.
    pub search_prefixes: Vec<String>,

    /// Minimum milliseconds between partial chart notifications. Default: 300.
    pub refresh_interval: i64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            duration: DEFAULT_DURATION_MS,
            buckets: DEFAULT_BUCKETS,
            collapse_arrays: true,
            search_results: DEFAULT_SEARCH_RESULTS,
            search_prefixes: Vec::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL_MS,
        }
    }
}

impl ViewConfig {
    /// Parses a configuration from its JSON form, filling in defaults.
    ///
    /// # Errors
    ///
    /// Returns `SquigglyError::Json` for malformed JSON or unknown keys, and
    /// `SquigglyError::InvalidConfig` for out-of-range values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Creates a new configuration with a custom retention window.
    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration = duration_ms;
        self
    }

    /// Creates a new configuration with a custom bucket count.
    pub fn with_buckets(mut self, buckets: u32) -> Self {
        self.buckets = buckets;
        self
    }

    /// Creates a new configuration with array collapsing toggled.
    pub fn with_collapse_arrays(mut self, collapse: bool) -> Self {
        self.collapse_arrays = collapse;
        self
    }

    /// Creates a new configuration with a custom search result cap.
    pub fn with_search_results(mut self, limit: usize) -> Self {
        self.search_results = limit;
        self
    }

    /// Creates a new configuration with custom search prefixes.
    pub fn with_search_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Creates a new configuration with a custom refresh interval.
    pub fn with_refresh_interval(mut self, interval_ms: i64) -> Self {
        self.refresh_interval = interval_ms;
        self
    }

    /// Width of one time bucket in milliseconds.
    pub fn ms_per_bucket(&self) -> f64 {
        self.duration as f64 / f64::from(self.buckets.max(1))
    }

    /// Checks that the derived bucket width is usable.
    pub fn validate(&self) -> Result<()> {
        if self.buckets == 0 {
            return Err(SquigglyError::InvalidConfig(
                "buckets must be greater than zero".to_string(),
            ));
        }
        if self.duration <= 0 {
            return Err(SquigglyError::InvalidConfig(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }
        if self.refresh_interval < 0 {
            return Err(SquigglyError::InvalidConfig(format!(
                "refreshInterval must not be negative, got {}",
                self.refresh_interval
            )));
        }
        Ok(())
    }
}

/// Configuration for turning JSON documents into packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct IngestConfig {
    /// Field masks (dotted paths, `*` and `**` allowed) whose values are
    /// replaced with the NULL sentinel instead of being flattened.
    pub json_filters: Vec<String>,

    /// Warn when a packet has more fields than this. Default: 100.
    pub high_field_count_warn: usize,

    /// Warn when a single field value exceeds this many bytes. Default: 1024.
    pub high_field_size_warn: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            json_filters: Vec::new(),
            high_field_count_warn: DEFAULT_HIGH_FIELD_COUNT_WARN,
            high_field_size_warn: DEFAULT_HIGH_FIELD_SIZE_WARN,
        }
    }
}

impl IngestConfig {
    /// Creates a new configuration with custom field masks.
    pub fn with_json_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.json_filters = filters.into_iter().map(Into::into).collect();
        self
    }

    /// Creates a new configuration with a custom field count warning level.
    pub fn with_high_field_count_warn(mut self, count: usize) -> Self {
        self.high_field_count_warn = count;
        self
    }

    /// Creates a new configuration with a custom field size warning level.
    pub fn with_high_field_size_warn(mut self, bytes: usize) -> Self {
        self.high_field_size_warn = bytes;
        self
    }
}
