//! Simulated device layer for running without audio hardware
//!
//! Exposes one virtual duplex device. Starting a stream spawns a driver
//! thread that synthesizes a sine tone and calls the processing callback
//! once per buffer period, just as a real audio thread would.

use crate::audio::device::{
    DeviceLayer, LatencyProbe, LoadProbe, PhysicalDevice, ProcessCallback, StreamHandle,
    StreamInfo, StreamRequest,
};
use crate::audio::load::CallbackLoad;
use crate::config::StreamConfig;
use crate::error::{DeviceError, Result};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Name reported for the virtual device
pub const SIMULATED_DEVICE_NAME: &str = "Simulated duplex device";

/// Driver falls back to real time when it lags by more than this many buffers
const MAX_CATCH_UP_BUFFERS: u32 = 64;

/// Sine tone fed into the virtual input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    /// Frequency in Hz
    pub frequency: f32,
    /// Peak amplitude
    pub amplitude: f32,
}

impl Default for Tone {
    fn default() -> Self {
        Self {
            frequency: 440.0,
            amplitude: 0.5,
        }
    }
}

/// [`DeviceLayer`] with a single virtual duplex device at index 0
#[derive(Debug, Clone)]
pub struct SimulatedDeviceLayer {
    tone: Tone,
    latency: Option<Duration>,
}

impl SimulatedDeviceLayer {
    /// Layer feeding the default 440 Hz tone
    pub fn new() -> Self {
        Self {
            tone: Tone::default(),
            latency: None,
        }
    }

    /// Use a different input tone
    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }

    /// Report a fixed per-direction latency instead of one buffer period
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

impl Default for SimulatedDeviceLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLayer for SimulatedDeviceLayer {
    fn enumerate_devices(&self) -> Result<Vec<PhysicalDevice>> {
        Ok(vec![PhysicalDevice {
            index: 0,
            name: SIMULATED_DEVICE_NAME.to_string(),
            input_channels: 2,
            output_channels: 2,
            is_default_input: true,
            is_default_output: true,
            sample_rates: vec![44100, 48000, 96000],
        }])
    }

    fn open_stream(
        &mut self,
        request: &StreamRequest,
        callback: ProcessCallback,
    ) -> Result<Box<dyn StreamHandle>> {
        for index in [request.input_index, request.output_index] {
            if index != 0 {
                return Err(DeviceError::Open(format!("no device at index {}", index)).into());
            }
        }

        let latency = self
            .latency
            .unwrap_or_else(|| request.config.buffer_period());
        tracing::info!(
            sample_rate = request.config.sample_rate,
            buffer_frames = request.config.buffer_frames,
            "Simulated stream opened"
        );

        Ok(Box::new(SimulatedStream {
            config: request.config,
            tone: self.tone,
            latency,
            load: Arc::new(CallbackLoad::new(request.config.sample_rate)),
            callback: Some(callback),
            running: Arc::new(AtomicBool::new(false)),
            driver: None,
        }))
    }
}

/// Stream driven by a background thread
pub struct SimulatedStream {
    config: StreamConfig,
    tone: Tone,
    latency: Duration,
    load: Arc<CallbackLoad>,
    callback: Option<ProcessCallback>,
    running: Arc<AtomicBool>,
    driver: Option<JoinHandle<ProcessCallback>>,
}

impl SimulatedStream {
    fn drive(
        mut callback: ProcessCallback,
        config: StreamConfig,
        tone: Tone,
        load: Arc<CallbackLoad>,
        running: Arc<AtomicBool>,
    ) -> ProcessCallback {
        let frames = config.buffer_frames.max(1) as usize;
        let mut input = vec![0.0f32; frames];
        let mut output = vec![0.0f32; frames * 2];
        let step = TAU * tone.frequency / config.sample_rate.max(1) as f32;
        let mut phase = 0.0f32;

        let period = config.buffer_period();
        let mut deadline = Instant::now();

        while running.load(Ordering::Acquire) {
            for sample in input.iter_mut() {
                *sample = tone.amplitude * phase.sin();
                phase = (phase + step) % TAU;
            }

            let started = load.begin();
            callback(&input, &mut output);
            load.end(started, frames);

            deadline += period;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else if now - deadline > period * MAX_CATCH_UP_BUFFERS {
                deadline = now;
            }
        }

        callback
    }
}

impl StreamHandle for SimulatedStream {
    fn start(&mut self) -> std::result::Result<(), DeviceError> {
        if self.driver.is_some() {
            return Ok(());
        }
        let callback = self
            .callback
            .take()
            .ok_or_else(|| DeviceError::Start("stream callback lost".into()))?;

        self.running.store(true, Ordering::Release);
        let config = self.config;
        let tone = self.tone;
        let load = Arc::clone(&self.load);
        let running = Arc::clone(&self.running);

        let driver = thread::Builder::new()
            .name("simulated-audio".into())
            .spawn(move || Self::drive(callback, config, tone, load, running))
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                DeviceError::Start(e.to_string())
            })?;

        self.driver = Some(driver);
        Ok(())
    }

    fn stop(&mut self) -> std::result::Result<(), DeviceError> {
        self.running.store(false, Ordering::Release);
        if let Some(driver) = self.driver.take() {
            let callback = driver
                .join()
                .map_err(|_| DeviceError::Stop("driver thread panicked".into()))?;
            self.callback = Some(callback);
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> std::result::Result<(), DeviceError> {
        self.stop()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn info(&self) -> StreamInfo {
        StreamInfo {
            input_latency_secs: self.latency.as_secs_f64(),
            output_latency_secs: self.latency.as_secs_f64(),
        }
    }

    fn load_probe(&self) -> Arc<dyn LoadProbe> {
        self.load.clone()
    }

    fn latency_probe(&self) -> Arc<dyn LatencyProbe> {
        Arc::new(self.info())
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::CallbackStatus;
    use std::sync::atomic::AtomicUsize;

    fn request(input_index: u32, output_index: u32) -> StreamRequest {
        StreamRequest {
            input_index,
            output_index,
            config: StreamConfig::new(48000, 64),
        }
    }

    #[test]
    fn test_single_duplex_device() {
        let layer = SimulatedDeviceLayer::new();
        let devices = layer.enumerate_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].index, 0);
        assert_eq!(devices[0].name, SIMULATED_DEVICE_NAME);
    }

    #[test]
    fn test_unknown_index_fails_to_open() {
        let mut layer = SimulatedDeviceLayer::new();
        let result = layer.open_stream(&request(0, 3), Box::new(|_: &[f32], _: &mut [f32]| CallbackStatus::Continue));
        assert!(result.is_err());
    }

    #[test]
    fn test_driver_calls_back_until_stopped() {
        let mut layer = SimulatedDeviceLayer::new().with_tone(Tone {
            frequency: 1000.0,
            amplitude: 0.25,
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let peak = Arc::new(crate::audio::status::AtomicF32::new(0.0));
        let peak_writer = Arc::clone(&peak);

        let mut stream = layer
            .open_stream(
                &request(0, 0),
                Box::new(move |input: &[f32], output: &mut [f32]| {
                    assert_eq!(input.len(), 64);
                    assert_eq!(output.len(), 128);
                    let max = input.iter().fold(0.0f32, |m, x| m.max(x.abs()));
                    peak_writer.store(peak_writer.load().max(max));
                    counter.fetch_add(1, Ordering::Relaxed);
                    CallbackStatus::Continue
                }),
            )
            .unwrap();

        stream.start().unwrap();
        assert!(stream.is_running());
        thread::sleep(Duration::from_millis(50));
        stream.stop().unwrap();
        assert!(!stream.is_running());

        let after_stop = calls.load(Ordering::Relaxed);
        assert!(after_stop > 0);
        assert!(peak.load() <= 0.25 + 1e-6);
        assert!(peak.load() > 0.2);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::Relaxed), after_stop);

        // Restart reuses the callback
        stream.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        stream.close().unwrap();
        assert!(calls.load(Ordering::Relaxed) > after_stop);
    }

    #[test]
    fn test_reported_latency() {
        let mut layer = SimulatedDeviceLayer::new().with_latency(Duration::from_millis(5));
        let stream = layer
            .open_stream(&request(0, 0), Box::new(|_: &[f32], _: &mut [f32]| CallbackStatus::Continue))
            .unwrap();
        let info = stream.info();
        assert!((info.total_latency_ms() - 10.0).abs() < 1e-3);
        stream.close().unwrap();
    }
}
