//! Stream configuration and persistent application settings
//!
//! [`StreamConfig`] is fixed once a stream is opened. [`AppConfig`] holds the
//! tunable defaults in a JSON file at `<data_dir>/noiseinverter/config.json`.

use crate::audio::controller::CalibrationProfile;
use crate::dsp::filter::{FilterFamily, FilterParams};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Audio stream shape: rate, buffer size and channel counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Frames per processing buffer
    pub buffer_frames: u32,
    /// Input channel count (mono)
    pub input_channels: u16,
    /// Output channel count (stereo)
    pub output_channels: u16,
}

impl StreamConfig {
    /// Mono-in / stereo-out config at the given rate and buffer size
    pub fn new(sample_rate: u32, buffer_frames: u32) -> Self {
        Self {
            sample_rate,
            buffer_frames,
            input_channels: 1,
            output_channels: 2,
        }
    }

    /// Delay line capacity in samples (`sample_rate × 50 ms`, rounded down)
    pub fn delay_capacity(&self) -> usize {
        (self.sample_rate as f64 * crate::MAX_DELAY_SECONDS) as usize
    }

    /// Real-time budget for one buffer
    pub fn buffer_period(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.buffer_frames as f64 / self.sample_rate as f64)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new(crate::DEFAULT_SAMPLE_RATE, crate::DEFAULT_BUFFER_FRAMES)
    }
}

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_buffer_frames() -> u32 {
    crate::DEFAULT_BUFFER_FRAMES
}

fn default_delay_ms() -> f32 {
    2.0
}

fn default_gain() -> f32 {
    0.95
}

fn default_low_freq() -> f32 {
    50.0
}

fn default_high_freq() -> f32 {
    4000.0
}

fn default_visualization_capacity() -> usize {
    crate::DEFAULT_VISUALIZATION_CAPACITY
}

fn default_monitor_interval_ms() -> u64 {
    1000
}

fn default_calibration_gain() -> f32 {
    0.92
}

fn default_calibration_latency_factor() -> f32 {
    0.5
}

fn default_calibration_min_delay_ms() -> f32 {
    1.0
}

/// Persistent application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Frames per processing buffer
    #[serde(default = "default_buffer_frames")]
    pub buffer_frames: u32,
    /// Initial delay of the inverted copy in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: f32,
    /// Initial gain of the inverted copy
    #[serde(default = "default_gain")]
    pub gain: f32,
    /// Lower filter cutoff in Hz
    #[serde(default = "default_low_freq")]
    pub low_freq: f32,
    /// Upper filter cutoff in Hz
    #[serde(default = "default_high_freq")]
    pub high_freq: f32,
    /// Filter family
    #[serde(default)]
    pub filter_family: FilterFamily,
    /// Visualization snapshot length in sample pairs
    #[serde(default = "default_visualization_capacity")]
    pub visualization_capacity: usize,
    /// Health monitor polling interval in milliseconds
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    /// Gain applied by calibration
    #[serde(default = "default_calibration_gain")]
    pub calibration_gain: f32,
    /// Fraction of measured latency used as the calibrated delay
    #[serde(default = "default_calibration_latency_factor")]
    pub calibration_latency_factor: f32,
    /// Lower bound on the calibrated delay in milliseconds
    #[serde(default = "default_calibration_min_delay_ms")]
    pub calibration_min_delay_ms: f32,
    /// Last used input device id (numeric form)
    #[serde(default)]
    pub input_device: Option<u32>,
    /// Last used output device id (numeric form)
    #[serde(default)]
    pub output_device: Option<u32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            buffer_frames: default_buffer_frames(),
            delay_ms: default_delay_ms(),
            gain: default_gain(),
            low_freq: default_low_freq(),
            high_freq: default_high_freq(),
            filter_family: FilterFamily::default(),
            visualization_capacity: default_visualization_capacity(),
            monitor_interval_ms: default_monitor_interval_ms(),
            calibration_gain: default_calibration_gain(),
            calibration_latency_factor: default_calibration_latency_factor(),
            calibration_min_delay_ms: default_calibration_min_delay_ms(),
            input_device: None,
            output_device: None,
        }
    }
}

impl AppConfig {
    /// Config file path: `<data_dir>/noiseinverter/config.json`
    pub fn path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("noiseinverter")
            .join("config.json")
    }

    /// Load config from the default path, falling back to defaults on any error
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Reject stream shapes no device can open
    ///
    /// Filter cutoffs, delay and gain are not checked.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::Config("sample_rate must be positive".into()));
        }
        if self.buffer_frames == 0 {
            return Err(EngineError::Config("buffer_frames must be positive".into()));
        }
        if self.visualization_capacity == 0 {
            return Err(EngineError::Config(
                "visualization_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Stream shape described by this config
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig::new(self.sample_rate, self.buffer_frames)
    }

    /// Initial filter parameters
    pub fn filter_params(&self) -> FilterParams {
        FilterParams {
            low_freq: self.low_freq,
            high_freq: self.high_freq,
            family: self.filter_family,
        }
    }

    /// Calibration constants
    pub fn calibration(&self) -> CalibrationProfile {
        CalibrationProfile {
            gain: self.calibration_gain,
            latency_factor: self.calibration_latency_factor,
            min_delay_ms: self.calibration_min_delay_ms,
        }
    }

    /// Health monitor polling interval
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.sample_rate, 96000);
        assert_eq!(config.buffer_frames, 16);
        assert_eq!(config.delay_ms, 2.0);
        assert_eq!(config.gain, 0.95);
        assert_eq!(config.filter_family, FilterFamily::Bandpass);
        assert_eq!(config.visualization_capacity, 1000);
        assert_eq!(config.input_device, None);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"gain": 0.5, "filter_family": "highpass"}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.gain, 0.5);
        assert_eq!(config.filter_family, FilterFamily::Highpass);
        assert_eq!(config.sample_rate, 96000);
        assert_eq!(config.calibration_gain, 0.92);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.delay_ms, 2.0);
        assert_eq!(config.monitor_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = AppConfig {
            output_device: Some(1002),
            delay_ms: 3.5,
            ..AppConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.output_device, Some(1002));
        assert_eq!(loaded.delay_ms, 3.5);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.sample_rate, 96000);
    }

    #[test]
    fn test_validate_rejects_empty_stream_shape() {
        assert!(AppConfig::default().validate().is_ok());

        let config = AppConfig {
            buffer_frames: 0,
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: buffer_frames must be positive"
        );

        let config = AppConfig {
            sample_rate: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stream_config_derivations() {
        let config = StreamConfig::default();
        assert_eq!(config.input_channels, 1);
        assert_eq!(config.output_channels, 2);
        assert_eq!(config.delay_capacity(), 4800);
        let period = config.buffer_period().as_secs_f64();
        assert!((period - 16.0 / 96000.0).abs() < 1e-9);
    }
}
