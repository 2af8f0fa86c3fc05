#![forbid(unsafe_code)]

//! Configuration for transition pools and the scheduler.
//!
//! # Loading
//!
//! ```toml
//! # ftui-transitions.toml
//! max_tick_seconds = 0.25
//!
//! [pool]
//! bucket_capacity = 128
//! merge_buckets = true
//! ```
//!
//! ```rust,ignore
//! let config = SchedulerConfig::from_toml_str(text)?;
//! let config = SchedulerConfig::from_json_str(json)?;
//! ```
//!
//! # Defaults
//!
//! `SchedulerConfig::default()` uses [`DEFAULT_BUCKET_CAPACITY`], enables
//! bucket merging and does not clamp frame deltas.

#[cfg(feature = "config")]
use std::path::Path;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

/// Slots per pool bucket unless configured otherwise.
pub const DEFAULT_BUCKET_CAPACITY: usize = 64;

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[cfg(feature = "config")]
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parse error.
    #[cfg(feature = "config")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration parsed but failed validation.
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

// ---------------------------------------------------------------------------
// PoolConfig
// ---------------------------------------------------------------------------

/// Tunables for a single [`TransitionPool`](crate::TransitionPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct PoolConfig {
    /// Fixed number of slots per bucket. A full pool grows by one bucket.
    pub bucket_capacity: usize,
    /// Merge under-filled buckets during the structure pass.
    pub merge_buckets: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            merge_buckets: true,
        }
    }
}

impl PoolConfig {
    /// Set the bucket capacity (builder pattern). Clamped to at least 1.
    #[must_use]
    pub fn with_bucket_capacity(mut self, capacity: usize) -> Self {
        self.bucket_capacity = capacity.max(1);
        self
    }

    /// Enable or disable bucket merging (builder pattern).
    #[must_use]
    pub fn with_merging(mut self, merge: bool) -> Self {
        self.merge_buckets = merge;
        self
    }

    /// Validate parameters. An empty list means the config is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.bucket_capacity == 0 {
            errors.push("pool.bucket_capacity must be > 0".into());
        }
        if u32::try_from(self.bucket_capacity).is_err() {
            errors.push(format!(
                "pool.bucket_capacity must fit in u32, got {}",
                self.bucket_capacity
            ));
        }
        errors
    }
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

/// Tunables for the [`TransitionScheduler`](crate::TransitionScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct SchedulerConfig {
    /// Configuration shared by every pool the scheduler creates.
    pub pool: PoolConfig,
    /// Upper bound applied to each frame delta, in seconds. Keeps a stalled
    /// frame from jumping every transition to its end.
    pub max_tick_seconds: Option<f64>,
}

impl SchedulerConfig {
    /// Validate parameters. An empty list means the config is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.pool.validate();
        if let Some(max) = self.max_tick_seconds
            && !(max.is_finite() && max > 0.0)
        {
            errors.push(format!("max_tick_seconds must be finite and > 0, got {max}"));
        }
        errors
    }

    /// Return `self` if it validates, otherwise [`ConfigError::Invalid`].
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Load from a TOML string.
    #[cfg(feature = "config")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validated()
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validated()
    }
}
