//! Configuration for segments, tiers and logging.
//!
//! Configuration is loaded from TOML:
//!
//! ```toml
//! [higher]
//! segments = 4
//! max_size = "64MB"
//!
//! [lower]
//! segments = 8
//! max_size = "4GB"
//! ttl = 3600
//!
//! [lower.persistence]
//! path = "/var/cache/tiering"
//! sync_mode = "async"
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

use crate::error::{TierError, TierResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for a two-level cache.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Fast, first-checked tier.
    #[serde(default)]
    pub higher: TierConfig,

    /// Larger, second-checked tier.
    #[serde(default)]
    pub lower: TierConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CacheConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> TierResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(contents: &str) -> TierResult<Self> {
        let config: CacheConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> TierResult<()> {
        self.higher.validate("higher")?;
        self.lower.validate("lower")?;
        if self.higher.persistence.is_some() {
            return Err(TierError::InvalidConfig(
                "higher tier cannot be persistent".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a single segmented tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    /// Number of segments (independently locked partitions).
    #[serde(default = "default_segments")]
    pub segments: usize,

    /// Total storage budget across all segments (e.g., "64MB").
    #[serde(default = "default_max_size", deserialize_with = "deserialize_size")]
    pub max_size: usize,

    /// Time-to-live for entries in seconds. Absent means entries never expire.
    #[serde(default)]
    pub ttl: Option<u64>,

    /// File-backed storage. Absent means heap storage.
    #[serde(default)]
    pub persistence: Option<PersistenceConfig>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            segments: default_segments(),
            max_size: default_max_size(),
            ttl: None,
            persistence: None,
        }
    }
}

impl TierConfig {
    /// Per-segment storage budget.
    pub fn segment_size(&self) -> usize {
        if self.segments == 0 {
            0
        } else {
            self.max_size / self.segments
        }
    }

    /// Entry time-to-live, if configured.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl.map(Duration::from_secs)
    }

    fn validate(&self, name: &str) -> TierResult<()> {
        if self.segments == 0 {
            return Err(TierError::InvalidConfig(format!(
                "{name}: segments must be at least 1"
            )));
        }
        if self.segment_size() == 0 {
            return Err(TierError::InvalidConfig(format!(
                "{name}: max_size ({}) must be at least segments ({})",
                self.max_size, self.segments
            )));
        }
        Ok(())
    }
}

/// File-backed storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Directory holding one file per segment.
    pub path: PathBuf,

    /// How aggressively writes are flushed.
    #[serde(default)]
    pub sync_mode: SyncMode,
}

/// Synchronization mode for file-backed writes.
///
/// Trades durability against write latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Flush each written range before the write returns.
    Sync,

    /// Schedule a flush of each written range without waiting for it.
    #[default]
    Async,

    /// No explicit flushing; the OS writes pages back on its own schedule.
    None,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "cache_tiering=debug").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps.
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include the event target.
    #[serde(default)]
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
            target: false,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human friendly.
    Pretty,
    /// Single line per event.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

fn default_segments() -> usize {
    4
}

fn default_max_size() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Accept either a byte count or a size string for a size field.
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSize {
        Bytes(usize),
        Text(String),
    }

    match RawSize::deserialize(deserializer)? {
        RawSize::Bytes(bytes) => Ok(bytes),
        RawSize::Text(text) => parse_size(&text).map_err(D::Error::custom),
    }
}

/// Parse a byte size with an optional binary unit: "4096", "512K", "64MB",
/// "2GiB". Units are case-insensitive and powers of 1024.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    let (number, unit) = s.split_at(digits);
    if number.is_empty() {
        return Err(format!("size `{s}` does not start with a number"));
    }

    let shift = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 10,
        "M" | "MB" | "MIB" => 20,
        "G" | "GB" | "GIB" => 30,
        "T" | "TB" | "TIB" => 40,
        other => return Err(format!("size `{s}` has unknown unit `{other}`")),
    };

    let count: usize = number
        .parse()
        .map_err(|_| format!("size `{s}` is out of range"))?;
    1usize
        .checked_shl(shift)
        .and_then(|unit| count.checked_mul(unit))
        .ok_or_else(|| format!("size `{s}` is out of range"))
}
