//! Engine settings.
//!
//! Every struct derives `Deserialize` with per-field defaults so the
//! application can embed them directly in its TOML config. Tests pin the
//! behavior the numeric defaults produce.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Fusion weights (see [`crate::fusion`]).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_w_sim")]
    pub w_sim: f64,
    #[serde(default = "default_w_recency")]
    pub w_recency: f64,
    #[serde(default = "default_w_affinity")]
    pub w_affinity: f64,
    #[serde(default = "default_w_diversity")]
    pub w_diversity: f64,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
}

fn default_w_sim() -> f64 {
    1.0
}
fn default_w_recency() -> f64 {
    0.3
}
fn default_w_affinity() -> f64 {
    0.2
}
fn default_w_diversity() -> f64 {
    0.05
}
fn default_half_life_days() -> f64 {
    7.0
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            w_sim: default_w_sim(),
            w_recency: default_w_recency(),
            w_affinity: default_w_affinity(),
            w_diversity: default_w_diversity(),
            half_life_days: default_half_life_days(),
        }
    }
}

impl RankingConfig {
    /// Rejects non-finite or negative weights and a non-positive half-life.
    /// Values are never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = [
            ("ranking.w_sim", self.w_sim),
            ("ranking.w_recency", self.w_recency),
            ("ranking.w_affinity", self.w_affinity),
            ("ranking.w_diversity", self.w_diversity),
        ];
        for (field, value) in weights {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite { field, value });
            }
            if value < 0.0 {
                return Err(ConfigError::Negative { field, value });
            }
        }
        if !self.half_life_days.is_finite() {
            return Err(ConfigError::NotFinite {
                field: "ranking.half_life_days",
                value: self.half_life_days,
            });
        }
        if self.half_life_days <= 0.0 {
            return Err(ConfigError::NotPositive {
                field: "ranking.half_life_days",
                value: self.half_life_days,
            });
        }
        Ok(())
    }
}

/// Candidate depth and page sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FeedSettings {
    /// Candidates fetched from the index per request, before filtering and
    /// dedup. Pagination never goes deeper than this.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

fn default_candidate_k() -> usize {
    200
}
fn default_page_size() -> usize {
    20
}
fn default_max_page_size() -> usize {
    100
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            candidate_k: default_candidate_k(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl FeedSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candidate_k == 0 {
            return Err(ConfigError::Invalid {
                field: "feed.candidate_k",
                reason: "must be >= 1".into(),
            });
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "feed.default_page_size",
                reason: "page sizes must be >= 1".into(),
            });
        }
        if self.default_page_size > self.max_page_size {
            return Err(ConfigError::Invalid {
                field: "feed.default_page_size",
                reason: format!(
                    "{} exceeds feed.max_page_size {}",
                    self.default_page_size, self.max_page_size
                ),
            });
        }
        Ok(())
    }

    /// Resolve a requested page size: default when absent, capped at the max.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|n| *n > 0)
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size)
    }
}

/// Index maintenance thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct IndexSettings {
    /// Compact once tombstones exceed this share of stored entries.
    #[serde(default = "default_compact_ratio")]
    pub compact_tombstone_ratio: f64,
    /// Seconds between background compaction checks (server only).
    #[serde(default = "default_compact_interval_secs")]
    pub compact_interval_secs: u64,
}

fn default_compact_ratio() -> f64 {
    0.25
}
fn default_compact_interval_secs() -> u64 {
    60
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            compact_tombstone_ratio: default_compact_ratio(),
            compact_interval_secs: default_compact_interval_secs(),
        }
    }
}

impl IndexSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = self.compact_tombstone_ratio;
        if !r.is_finite() || r <= 0.0 || r > 1.0 {
            return Err(ConfigError::Invalid {
                field: "index.compact_tombstone_ratio",
                reason: format!("must be in (0, 1], got {}", r),
            });
        }
        Ok(())
    }
}

/// Normalizer bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct NormalizerSettings {
    /// Character budget of `body_summary`, ellipsis included.
    #[serde(default = "default_summary_chars")]
    pub summary_chars: usize,
}

fn default_summary_chars() -> usize {
    500
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            summary_chars: default_summary_chars(),
        }
    }
}

/// Timeout and retry bounds for embedder calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    200
}
fn default_max_backoff_ms() -> u64 {
    5_000
}
fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "embedding.max_attempts",
                reason: "must be >= 1".into(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "embedding.timeout_ms",
                reason: "must be >= 1".into(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `retry` (1-based): doubling from the
    /// initial backoff, capped at `max_backoff_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Everything a [`FeedEngine`](crate::FeedEngine) needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub normalizer: NormalizerSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Embedding cache capacity (entries).
    #[serde(default)]
    pub cache_capacity: Option<usize>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ranking.validate()?;
        self.feed.validate()?;
        self.index.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}
