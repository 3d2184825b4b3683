//! NoiseInverter Core - Real-time inverted-delay cancellation path
//!
//! This library reads a live mono signal, runs it through a fixed-coefficient
//! second-order filter, inverts and delays the result, mixes it back into the
//! original and emits it on a stereo output. Around that per-sample path it
//! provides stream lifecycle control, hot parameter updates, a one-shot
//! calibration heuristic, lock-free visualization snapshots and a background
//! health monitor.

pub mod audio;
pub mod config;
pub mod dsp;
pub mod error;
pub mod stats;

pub use audio::controller::{StreamController, StreamState};
pub use audio::device::{AudioDeviceDescriptor, DeviceId, DeviceLayer, Direction};
pub use audio::engine::{ParameterUpdate, ProcessingEngine};
pub use config::{AppConfig, StreamConfig};
pub use dsp::delay_line::DelayLine;
pub use dsp::filter::{FilterFamily, FilterParams, FilterStage};
pub use error::{EngineError, Result};
pub use stats::store::HealthStore;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Date the core crate was built (set by build.rs)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 96000;

/// Default buffer size in frames (kept tiny to minimise latency)
pub const DEFAULT_BUFFER_FRAMES: u32 = 16;

/// Maximum delay the delay line can hold, in seconds (50 ms)
pub const MAX_DELAY_SECONDS: f64 = 0.050;

/// Default visualization snapshot length in sample pairs
pub const DEFAULT_VISUALIZATION_CAPACITY: usize = 1000;

/// Offset added to a physical device index to form an output identifier
///
/// Only collision-free while the host reports fewer than this many devices.
pub const OUTPUT_ID_OFFSET: u32 = 1000;
