use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{EngramError, Result};

/// Main configuration structure for Engram
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Physical storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Query result cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Adaptive batch sizing configuration
    #[serde(default)]
    pub batching: BatchConfig,
    /// Deduplication / compaction configuration
    #[serde(default)]
    pub compaction: CompactionConfig,
    /// Retention policy defaults
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Service-level knobs (deadlines)
    #[serde(default)]
    pub service: ServiceConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| EngramError::Config(format!("Invalid config: {e}")))
    }
}

/// Physical storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all LanceDB data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".engram"))
        .unwrap_or_else(|| PathBuf::from(".engram"))
}

/// Query result cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached query results
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    /// Time-to-live for cached results, in seconds. Writes never invalidate
    /// entries; this bounds the staleness window.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_max_entries() -> usize {
    1024
}

fn default_cache_ttl_secs() -> u64 {
    300
}

/// Adaptive batch sizing configuration.
///
/// The sizer starts from `base_batch_size`, caps the starting size for
/// medium/large vector dimensions, then shrinks or grows by `adjust_factor`
/// based on the mean latency of the last `window` samples.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Starting chunk size for bulk writes
    #[serde(default = "default_base_batch_size")]
    pub base_batch_size: usize,
    /// Hard upper bound on chunk size
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Dimension at or above which vectors count as "medium"
    #[serde(default = "default_medium_dim")]
    pub medium_dim: usize,
    /// Dimension at or above which vectors count as "large"
    #[serde(default = "default_large_dim")]
    pub large_dim: usize,
    /// Starting-size cap for medium-dimension vectors
    #[serde(default = "default_medium_cap")]
    pub medium_cap: usize,
    /// Starting-size cap for large-dimension vectors
    #[serde(default = "default_large_cap")]
    pub large_cap: usize,
    /// Mean latency above which chunks shrink, in milliseconds
    #[serde(default = "default_slow_ms")]
    pub slow_ms: f64,
    /// Mean latency below which chunks grow, in milliseconds
    #[serde(default = "default_fast_ms")]
    pub fast_ms: f64,
    /// Multiplicative shrink/grow factor; 1 disables latency adjustment
    #[serde(default = "default_adjust_factor")]
    pub adjust_factor: usize,
    /// Number of recent samples considered per operation kind
    #[serde(default = "default_window")]
    pub window: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            base_batch_size: default_base_batch_size(),
            max_batch_size: default_max_batch_size(),
            medium_dim: default_medium_dim(),
            large_dim: default_large_dim(),
            medium_cap: default_medium_cap(),
            large_cap: default_large_cap(),
            slow_ms: default_slow_ms(),
            fast_ms: default_fast_ms(),
            adjust_factor: default_adjust_factor(),
            window: default_window(),
        }
    }
}

fn default_base_batch_size() -> usize {
    128
}

fn default_max_batch_size() -> usize {
    512
}

fn default_medium_dim() -> usize {
    768
}

fn default_large_dim() -> usize {
    1536
}

fn default_medium_cap() -> usize {
    64
}

fn default_large_cap() -> usize {
    32
}

fn default_slow_ms() -> f64 {
    1000.0
}

fn default_fast_ms() -> f64 {
    100.0
}

fn default_adjust_factor() -> usize {
    2
}

fn default_window() -> usize {
    16
}

/// Deduplication / compaction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompactionConfig {
    /// Cosine similarity at or above which two records are duplicates
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Number of records fetched per scan page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Upper bound on the cross-page "seen" window. Duplicates farther
    /// apart than this in scan order are not detected in a single run;
    /// raising it trades memory for recall.
    #[serde(default = "default_max_seen")]
    pub max_seen: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            page_size: default_page_size(),
            max_seen: default_max_seen(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.95
}

fn default_page_size() -> usize {
    256
}

fn default_max_seen() -> usize {
    4096
}

/// Retention policy defaults
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// TTL in days for the built-in "default" policy
    #[serde(default = "default_ttl_days")]
    pub default_ttl_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_ttl_days: default_ttl_days(),
        }
    }
}

fn default_ttl_days() -> u32 {
    30
}

/// Service-level knobs
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Deadline applied to each blocking backend operation, in seconds
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            op_timeout_secs: default_op_timeout_secs(),
        }
    }
}

fn default_op_timeout_secs() -> u64 {
    30
}
