//! cpal device layer
//!
//! Opens separate cpal input and output streams and bridges them with a
//! lock-free ring buffer:
//! - the input callback pushes mono frames (channel 0) into the ring
//! - the output callback pops one chunk of frames, runs the processing
//!   callback and writes the stereo result straight into the device buffer
//!
//! Devices are addressed by their position in `host.devices()`, which is
//! re-enumerated on every call.
//!
//! ## Latency
//!
//! Until the first callbacks arrive each direction reports one buffer period.
//! After that the values come from the cpal callback timestamps
//! (capture → callback for input, callback → playback for output). The
//! health monitor re-reads them on every tick.

use crate::audio::device::{
    CallbackStatus, DeviceLayer, LatencyProbe, LoadProbe, PhysicalDevice, ProcessCallback,
    StreamHandle, StreamInfo, StreamRequest,
};
use crate::audio::load::CallbackLoad;
use crate::audio::status::AtomicF32;
use crate::error::{DeviceError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, Stream};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sample rates probed for each device
const COMMON_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

/// Ring capacity between input and output callbacks, in buffers
const BRIDGE_BUFFERS: usize = 64;

/// Largest chunk the output callback processes in one call, in buffers
const MAX_CHUNK_BUFFERS: usize = 4;

/// Buffered input beyond this many buffers is dropped to bound latency
const MAX_BACKLOG_BUFFERS: usize = 4;

fn device_name(device: &Device) -> std::result::Result<String, cpal::DeviceNameError> {
    device.description().map(|d| d.name().to_string())
}

fn supported_rates(device: &Device) -> Vec<u32> {
    let mut rates = Vec::new();
    let mut collect = |min: u32, max: u32| {
        for &rate in &COMMON_RATES {
            if (min..=max).contains(&rate) && !rates.contains(&rate) {
                rates.push(rate);
            }
        }
    };

    if let Ok(configs) = device.supported_input_configs() {
        for config in configs {
            collect(config.min_sample_rate(), config.max_sample_rate());
        }
    }
    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            collect(config.min_sample_rate(), config.max_sample_rate());
        }
    }

    rates.sort_unstable();
    rates
}

/// [`DeviceLayer`] backed by the platform's default cpal host
pub struct CpalDeviceLayer {
    host: Host,
}

impl CpalDeviceLayer {
    /// Create a layer on the default host (ALSA, CoreAudio or WASAPI)
    pub fn new() -> Self {
        let host = cpal::default_host();
        tracing::info!(host = host.id().name(), "cpal device layer initialized");
        Self { host }
    }

    fn device_at(&self, index: u32) -> std::result::Result<Device, DeviceError> {
        self.host
            .devices()
            .map_err(|e| DeviceError::Enumerate(e.to_string()))?
            .nth(index as usize)
            .ok_or_else(|| DeviceError::Open(format!("no device at index {}", index)))
    }
}

impl Default for CpalDeviceLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLayer for CpalDeviceLayer {
    fn enumerate_devices(&self) -> Result<Vec<PhysicalDevice>> {
        let default_input = self
            .host
            .default_input_device()
            .and_then(|d| device_name(&d).ok());
        let default_output = self
            .host
            .default_output_device()
            .and_then(|d| device_name(&d).ok());

        let devices = self
            .host
            .devices()
            .map_err(|e| DeviceError::Enumerate(e.to_string()))?;

        let mut found = Vec::new();
        for (index, device) in devices.enumerate() {
            let name = device_name(&device).unwrap_or_else(|_| "Unknown".to_string());
            let input_channels = device
                .default_input_config()
                .map(|c| c.channels())
                .unwrap_or(0);
            let output_channels = device
                .default_output_config()
                .map(|c| c.channels())
                .unwrap_or(0);

            found.push(PhysicalDevice {
                index: index as u32,
                is_default_input: input_channels > 0 && default_input.as_ref() == Some(&name),
                is_default_output: output_channels > 0 && default_output.as_ref() == Some(&name),
                sample_rates: supported_rates(&device),
                name,
                input_channels,
                output_channels,
            });
        }

        tracing::debug!(count = found.len(), "Enumerated audio devices");
        Ok(found)
    }

    fn open_stream(
        &mut self,
        request: &StreamRequest,
        mut callback: ProcessCallback,
    ) -> Result<Box<dyn StreamHandle>> {
        let config = request.config;
        let input_device = self.device_at(request.input_index)?;
        let output_device = self.device_at(request.output_index)?;

        let buffer_frames = config.buffer_frames.max(1) as usize;
        let period_secs = config.buffer_period().as_secs_f32();
        let latency = Arc::new(MeasuredLatency {
            input_secs: AtomicF32::new(period_secs),
            output_secs: AtomicF32::new(period_secs),
        });
        let load = Arc::new(CallbackLoad::new(config.sample_rate));
        let silenced = Arc::new(AtomicU64::new(0));

        let (mut producer, mut consumer) =
            HeapRb::<f32>::new(buffer_frames * BRIDGE_BUFFERS).split();

        let input_config = cpal::StreamConfig {
            channels: config.input_channels,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(config.buffer_frames),
        };
        let output_config = cpal::StreamConfig {
            channels: config.output_channels,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(config.buffer_frames),
        };

        let input_channels = config.input_channels.max(1) as usize;
        let input_latency = Arc::clone(&latency);
        let input = input_device
            .build_input_stream(
                &input_config,
                move |data: &[f32], info: &cpal::InputCallbackInfo| {
                    for frame in data.chunks(input_channels) {
                        let _ = producer.try_push(frame[0]);
                    }
                    let ts = info.timestamp();
                    if let Some(d) = ts.callback.duration_since(&ts.capture) {
                        input_latency.input_secs.store(d.as_secs_f32());
                    }
                },
                move |err| {
                    tracing::error!("Input stream error: {}", err);
                },
                None,
            )
            .map_err(|e| DeviceError::Open(format!("input: {}", e)))?;

        let output_channels = config.output_channels.max(1) as usize;
        let output_latency = Arc::clone(&latency);
        let output_load = Arc::clone(&load);
        let output_silenced = Arc::clone(&silenced);
        let mut scratch = vec![0.0f32; buffer_frames * MAX_CHUNK_BUFFERS];
        let output = output_device
            .build_output_stream(
                &output_config,
                move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                    let started = output_load.begin();
                    let frames = data.len() / output_channels;

                    let backlog = consumer.occupied_len();
                    let limit = frames.max(buffer_frames) * MAX_BACKLOG_BUFFERS;
                    if backlog > limit {
                        consumer.skip(backlog - limit);
                    }

                    for chunk in data.chunks_mut(scratch.len() * output_channels) {
                        let input = &mut scratch[..chunk.len() / output_channels];
                        let got = consumer.pop_slice(input);
                        input[got..].fill(0.0);
                        if callback(input, chunk) == CallbackStatus::Silenced {
                            output_silenced.fetch_add(1, Ordering::Relaxed);
                        }
                    }

                    output_load.end(started, frames);
                    let ts = info.timestamp();
                    if let Some(d) = ts.playback.duration_since(&ts.callback) {
                        output_latency.output_secs.store(d.as_secs_f32());
                    }
                },
                move |err| {
                    tracing::error!("Output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| DeviceError::Open(format!("output: {}", e)))?;

        tracing::info!(
            input = request.input_index,
            output = request.output_index,
            sample_rate = config.sample_rate,
            buffer_frames = config.buffer_frames,
            "cpal streams opened"
        );

        Ok(Box::new(CpalStream {
            input,
            output,
            running: false,
            latency,
            load,
            silenced,
        }))
    }
}

/// Latency written by the stream callbacks from their timestamps
///
/// Seeded with one buffer period per direction until the first callbacks
/// have run.
#[derive(Debug)]
struct MeasuredLatency {
    input_secs: AtomicF32,
    output_secs: AtomicF32,
}

impl LatencyProbe for MeasuredLatency {
    fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            input_latency_secs: self.input_secs.load() as f64,
            output_latency_secs: self.output_secs.load() as f64,
        }
    }
}

/// Input and output cpal streams driven as one duplex stream
pub struct CpalStream {
    input: Stream,
    output: Stream,
    running: bool,
    latency: Arc<MeasuredLatency>,
    load: Arc<CallbackLoad>,
    silenced: Arc<AtomicU64>,
}

impl StreamHandle for CpalStream {
    fn start(&mut self) -> std::result::Result<(), DeviceError> {
        self.output
            .play()
            .map_err(|e| DeviceError::Start(e.to_string()))?;
        self.input
            .play()
            .map_err(|e| DeviceError::Start(e.to_string()))?;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> std::result::Result<(), DeviceError> {
        self.running = false;
        self.input
            .pause()
            .map_err(|e| DeviceError::Stop(e.to_string()))?;
        self.output
            .pause()
            .map_err(|e| DeviceError::Stop(e.to_string()))?;
        Ok(())
    }

    fn close(self: Box<Self>) -> std::result::Result<(), DeviceError> {
        let silenced = self.silenced.load(Ordering::Relaxed);
        if silenced > 0 {
            tracing::warn!(buffers = silenced, "Buffers silenced by engine contention");
        }
        drop(self);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn info(&self) -> StreamInfo {
        self.latency.stream_info()
    }

    fn load_probe(&self) -> Arc<dyn LoadProbe> {
        self.load.clone()
    }

    fn latency_probe(&self) -> Arc<dyn LatencyProbe> {
        self.latency.clone()
    }
}
