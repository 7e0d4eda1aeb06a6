//! Player configuration
//!
//! All tunable parameters for the playback pipeline and the batch
//! analyzers. Values are validated up front so a bad configuration is
//! rejected before any background work starts.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Configuration for playback, buffering and analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Output sample rate in Hz
    pub output_sample_rate: u32,

    /// Maximum number of undelivered chunks held by the prefetch buffer
    pub max_buffered_chunks: usize,

    /// Buffered lookahead in milliseconds
    pub buffer_ahead_ms: u64,

    /// Delivery tolerance around the playback clock in milliseconds
    pub delivery_tolerance_ms: u64,

    /// Transport tick interval in milliseconds
    pub tick_interval_ms: u64,

    /// Progress event cadence in milliseconds
    pub progress_interval_ms: u64,

    /// Cool-down after a seek before audio delivery resumes, milliseconds
    pub seek_cooldown_ms: u64,

    /// Grace period for worker shutdown on stop, milliseconds
    pub stop_grace_ms: u64,

    /// Master gain, multiplied into every transmitter gain
    pub master_gain: f32,

    /// Normalized amplitude above which a sample counts as active
    pub silence_threshold: f32,

    /// Minimum fraction of samples over threshold for an active packet
    pub min_active_fraction: f32,

    /// Minimum activity period duration in milliseconds
    pub min_activity_duration_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            max_buffered_chunks: DEFAULT_MAX_BUFFERED_CHUNKS,
            buffer_ahead_ms: DEFAULT_BUFFER_AHEAD_MS,
            delivery_tolerance_ms: DELIVERY_TOLERANCE_MS,
            tick_interval_ms: 10,
            progress_interval_ms: 100,
            seek_cooldown_ms: 120,
            stop_grace_ms: 2000,
            master_gain: 1.0,
            silence_threshold: 500.0 / 32768.0,
            min_active_fraction: 0.05,
            min_activity_duration_ms: 100,
        }
    }
}

impl PlayerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PlayerConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all parameters; called before any background work starts
    pub fn validate(&self) -> Result<()> {
        if self.output_sample_rate == 0 {
            return Err(Error::Config("output_sample_rate must be nonzero".into()));
        }
        if self.max_buffered_chunks == 0 {
            return Err(Error::Config("max_buffered_chunks must be nonzero".into()));
        }
        if self.buffer_ahead_ms == 0 {
            return Err(Error::Config("buffer_ahead_ms must be nonzero".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be nonzero".into()));
        }
        if !(0.0..=2.0).contains(&self.master_gain) {
            return Err(Error::Config(format!(
                "master_gain {} outside [0, 2]",
                self.master_gain
            )));
        }
        if !(0.0..=1.0).contains(&self.silence_threshold) {
            return Err(Error::Config(format!(
                "silence_threshold {} outside [0, 1]",
                self.silence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.min_active_fraction) {
            return Err(Error::Config(format!(
                "min_active_fraction {} outside [0, 1]",
                self.min_active_fraction
            )));
        }
        Ok(())
    }

    pub fn buffer_ahead(&self) -> Duration {
        Duration::from_millis(self.buffer_ahead_ms)
    }

    pub fn delivery_tolerance(&self) -> Duration {
        Duration::from_millis(self.delivery_tolerance_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn seek_cooldown(&self) -> Duration {
        Duration::from_millis(self.seek_cooldown_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn min_activity_duration(&self) -> Duration {
        Duration::from_millis(self.min_activity_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PlayerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let config = PlayerConfig {
            max_buffered_chunks: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_gain() {
        let config = PlayerConfig {
            master_gain: 2.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = PlayerConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: PlayerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.max_buffered_chunks, config.max_buffered_chunks);
        assert_eq!(parsed.buffer_ahead_ms, config.buffer_ahead_ms);
    }
}
