//! Engine Configuration
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration:
//!
//! ```json
//! {
//!   "dev_mode": true,
//!   "prefixes": ["tr-", "data-tr-"],
//!   "queue": { "capacity": 10000, "frame": { "kind": "immediate" } }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::directive::DEFAULT_PREFIXES;
use crate::error::ConfigError;

/// How the drain loop waits between batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameSource {
    /// Frame-aligned: sleep one frame interval before each batch.
    Animation { interval_ms: u64 },
    /// Fallback: yield to the runtime before each batch.
    Immediate,
}

impl Default for FrameSource {
    fn default() -> Self {
        FrameSource::Animation { interval_ms: 16 }
    }
}

/// Mutation queue tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pending operations kept before the oldest is evicted.
    pub capacity: usize,
    pub min_batch: usize,
    pub max_batch: usize,
    pub initial_batch: usize,
    /// Rolling average batch time above which batches shrink.
    pub frame_budget_ms: u64,
    pub adjustment_factor: f64,
    pub history_len: usize,
    pub frame: FrameSource,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            min_batch: 1,
            max_batch: 500,
            initial_batch: 50,
            frame_budget_ms: 16,
            adjustment_factor: 1.5,
            history_len: 5,
            frame: FrameSource::default(),
        }
    }
}

impl QueueConfig {
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(self.frame_budget_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("queue.capacity must be positive".into()));
        }
        if self.min_batch == 0 {
            return Err(ConfigError::Invalid("queue.min_batch must be positive".into()));
        }
        if !(self.min_batch <= self.initial_batch && self.initial_batch <= self.max_batch) {
            return Err(ConfigError::Invalid(format!(
                "queue batch bounds must satisfy min <= initial <= max, got {} <= {} <= {}",
                self.min_batch, self.initial_batch, self.max_batch
            )));
        }
        if !(self.adjustment_factor > 1.0) || !self.adjustment_factor.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "queue.adjustment_factor must be a finite number above 1, got {}",
                self.adjustment_factor
            )));
        }
        if self.history_len == 0 {
            return Err(ConfigError::Invalid("queue.history_len must be positive".into()));
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enables developer diagnostics (see [`crate::log`]).
    pub dev_mode: bool,
    /// Directive prefixes; the first is used for engine-written attributes.
    pub prefixes: Vec<String>,
    pub queue: QueueConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            prefixes: DEFAULT_PREFIXES.iter().map(|p| p.to_string()).collect(),
            queue: QueueConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefixes.is_empty() || self.prefixes.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid("prefixes must be non-empty strings".into()));
        }
        self.queue.validate()
    }
}
