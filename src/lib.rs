//! NoiseInverter - real-time inverted-delay cancellation path
//!
//! This library re-exports the processing pipeline, stream controller,
//! device layers and health statistics from `noiseinverter-core`.

pub use noiseinverter_core::audio;
pub use noiseinverter_core::config;
pub use noiseinverter_core::dsp;
pub use noiseinverter_core::error;
pub use noiseinverter_core::stats;

pub use noiseinverter_core::{
    AppConfig, AudioDeviceDescriptor, DelayLine, DeviceId, DeviceLayer, Direction, EngineError,
    FilterFamily, FilterParams, FilterStage, HealthStore, ParameterUpdate, ProcessingEngine,
    Result, StreamConfig, StreamController, StreamState,
};
pub use noiseinverter_core::{
    BUILD_DATE, DEFAULT_BUFFER_FRAMES, DEFAULT_SAMPLE_RATE, DEFAULT_VISUALIZATION_CAPACITY, MAX_DELAY_SECONDS,
    OUTPUT_ID_OFFSET, VERSION,
};
