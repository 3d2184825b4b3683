//! Device layer contract
//!
//! The core never talks to audio hardware directly. It consumes a
//! [`DeviceLayer`] that enumerates physical devices, opens a duplex stream
//! and drives the per-buffer [`ProcessCallback`] on its own real-time thread.
//!
//! Device identifiers are tagged with a [`Direction`]. Their flat numeric form
//! keeps the classic encoding: inputs use the physical index, outputs use
//! `index + OUTPUT_ID_OFFSET`.

use crate::config::StreamConfig;
use crate::error::{DeviceError, Result};
use crate::OUTPUT_ID_OFFSET;
use std::fmt;
use std::sync::Arc;

/// Stream direction of a device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Capture side
    Input,
    /// Playback side
    Output,
}

/// Tagged device identifier: physical index plus direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    /// Physical index as reported by the device layer
    pub index: u32,
    /// Which side of the device this id selects
    pub direction: Direction,
}

impl DeviceId {
    /// Create a device id
    pub fn new(index: u32, direction: Direction) -> Self {
        Self { index, direction }
    }

    /// Input side of physical device `index`
    pub fn input(index: u32) -> Self {
        Self::new(index, Direction::Input)
    }

    /// Output side of physical device `index`
    pub fn output(index: u32) -> Self {
        Self::new(index, Direction::Output)
    }

    /// Flat numeric form: `index` for inputs, `index + 1000` for outputs
    pub fn numeric(&self) -> u32 {
        match self.direction {
            Direction::Input => self.index,
            Direction::Output => self.index + OUTPUT_ID_OFFSET,
        }
    }

    /// Parse a flat numeric id; values at or above the offset are outputs
    ///
    /// # Example
    /// ```
    /// use noiseinverter_core::audio::device::{DeviceId, Direction};
    ///
    /// let id = DeviceId::from_numeric(1003);
    /// assert_eq!(id.index, 3);
    /// assert_eq!(id.direction, Direction::Output);
    /// assert_eq!(id.numeric(), 1003);
    /// ```
    pub fn from_numeric(value: u32) -> Self {
        if value >= OUTPUT_ID_OFFSET {
            Self::output(value - OUTPUT_ID_OFFSET)
        } else {
            Self::input(value)
        }
    }

    /// Physical index with the direction offset removed
    pub fn physical_index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.numeric())
    }
}

/// Physical device as reported by the device layer
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalDevice {
    /// Index used to open the device
    pub index: u32,
    /// Device name
    pub name: String,
    /// Number of input channels (0 if capture is unsupported)
    pub input_channels: u16,
    /// Number of output channels (0 if playback is unsupported)
    pub output_channels: u16,
    /// Whether this is the host's default input
    pub is_default_input: bool,
    /// Whether this is the host's default output
    pub is_default_output: bool,
    /// Supported sample rates in Hz
    pub sample_rates: Vec<u32>,
}

/// One selectable side of a physical device
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDeviceDescriptor {
    /// Tagged identifier
    pub id: DeviceId,
    /// Device name
    pub name: String,
    /// Whether this descriptor is the host default for its direction
    pub is_default: bool,
    /// Channel count in this direction
    pub max_channels: u16,
    /// Supported sample rates in Hz
    pub sample_rates: Vec<u32>,
}

impl AudioDeviceDescriptor {
    /// Direction this descriptor selects
    pub fn direction(&self) -> Direction {
        self.id.direction
    }

    /// Whether this is a capture descriptor
    pub fn is_input(&self) -> bool {
        self.id.direction == Direction::Input
    }

    /// Whether this is a playback descriptor
    pub fn is_output(&self) -> bool {
        self.id.direction == Direction::Output
    }
}

/// Flatten physical devices into per-direction descriptors
///
/// A device supporting both directions yields an input descriptor followed by
/// an output descriptor.
pub fn describe_devices(devices: &[PhysicalDevice]) -> Vec<AudioDeviceDescriptor> {
    if devices.iter().any(|d| d.index >= OUTPUT_ID_OFFSET) {
        tracing::warn!(
            "Device index at or above {} makes output ids ambiguous",
            OUTPUT_ID_OFFSET
        );
    }

    let mut descriptors = Vec::with_capacity(devices.len() * 2);
    for device in devices {
        if device.input_channels > 0 {
            descriptors.push(AudioDeviceDescriptor {
                id: DeviceId::input(device.index),
                name: device.name.clone(),
                is_default: device.is_default_input,
                max_channels: device.input_channels,
                sample_rates: device.sample_rates.clone(),
            });
        }
        if device.output_channels > 0 {
            descriptors.push(AudioDeviceDescriptor {
                id: DeviceId::output(device.index),
                name: device.name.clone(),
                is_default: device.is_default_output,
                max_channels: device.output_channels,
                sample_rates: device.sample_rates.clone(),
            });
        }
    }
    descriptors
}

/// Completion code returned by the per-buffer callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    /// Buffer processed normally
    Continue,
    /// Engine was busy; the output buffer was filled with silence
    Silenced,
}

/// Per-buffer processing callback: mono input, interleaved stereo output
pub type ProcessCallback = Box<dyn FnMut(&[f32], &mut [f32]) -> CallbackStatus + Send + 'static>;

/// Parameters for opening a duplex stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamRequest {
    /// Physical input device index
    pub input_index: u32,
    /// Physical output device index
    pub output_index: u32,
    /// Rate, buffer size and channel counts
    pub config: StreamConfig,
}

/// Latency reported by an open stream
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamInfo {
    /// Capture latency in seconds
    pub input_latency_secs: f64,
    /// Playback latency in seconds
    pub output_latency_secs: f64,
}

impl StreamInfo {
    /// Combined input and output latency in milliseconds
    pub fn total_latency_ms(&self) -> f32 {
        ((self.input_latency_secs + self.output_latency_secs) * 1000.0) as f32
    }
}

/// Thread-safe CPU load query for an open stream
pub trait LoadProbe: Send + Sync {
    /// Fraction of the buffer period spent processing, in `[0, 1]`
    fn cpu_load(&self) -> std::result::Result<f32, DeviceError>;
}

/// Thread-safe latency query for an open stream
///
/// Backends that measure latency from callback timestamps report a rough
/// estimate until the first callbacks have run.
pub trait LatencyProbe: Send + Sync {
    /// Latency as currently measured
    fn stream_info(&self) -> StreamInfo;
}

impl LatencyProbe for StreamInfo {
    fn stream_info(&self) -> StreamInfo {
        *self
    }
}

/// Handle to an open stream
pub trait StreamHandle {
    /// Begin invoking the process callback
    fn start(&mut self) -> std::result::Result<(), DeviceError>;

    /// Stop invoking the process callback
    fn stop(&mut self) -> std::result::Result<(), DeviceError>;

    /// Release the stream
    fn close(self: Box<Self>) -> std::result::Result<(), DeviceError>;

    /// Whether the stream is currently started
    fn is_running(&self) -> bool;

    /// Latency reported by the stream
    fn info(&self) -> StreamInfo;

    /// Load probe usable from another thread
    fn load_probe(&self) -> Arc<dyn LoadProbe>;

    /// Latency probe usable from another thread
    fn latency_probe(&self) -> Arc<dyn LatencyProbe>;
}

/// Audio subsystem consumed by the stream controller
pub trait DeviceLayer {
    /// Enumerate physical devices; never cached
    fn enumerate_devices(&self) -> Result<Vec<PhysicalDevice>>;

    /// Open (but do not start) a duplex stream driving `callback`
    fn open_stream(
        &mut self,
        request: &StreamRequest,
        callback: ProcessCallback,
    ) -> Result<Box<dyn StreamHandle>>;
}
