//! Scripted device layer for driving the stream controller in tests
//!
//! The layer records every open request and keeps the registered process
//! callback so a test can pump buffers through it deterministically.

#![allow(dead_code)]

use noiseinverter::audio::device::{
    CallbackStatus, LatencyProbe, LoadProbe, PhysicalDevice, ProcessCallback, StreamHandle,
    StreamInfo, StreamRequest,
};
use noiseinverter::error::DeviceError;
use noiseinverter::{AppConfig, DeviceLayer, Result, StreamController};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

#[derive(Default)]
struct MockState {
    devices: Vec<PhysicalDevice>,
    requests: Vec<StreamRequest>,
    callback: Option<ProcessCallback>,
    running: bool,
    starts: usize,
    stops: usize,
    closes: usize,
    fail_open: bool,
    fail_start: bool,
    fail_stop: bool,
    info: StreamInfo,
    load: f32,
}

/// Device layer handed to the controller
pub struct MockLayer {
    state: Arc<Mutex<MockState>>,
}

/// Test-side view of the same state
#[derive(Clone)]
pub struct MockControl {
    state: Arc<Mutex<MockState>>,
}

/// Background thread pumping silence through the callback like an audio thread
pub struct Pumper {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<(usize, usize)>,
}

impl Pumper {
    /// Stop pumping and return `(processed, silenced)` buffer counts
    pub fn finish(self) -> (usize, usize) {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().unwrap()
    }
}

/// A physical device with the given channel counts
pub fn device(index: u32, name: &str, inputs: u16, outputs: u16) -> PhysicalDevice {
    PhysicalDevice {
        index,
        name: name.to_string(),
        input_channels: inputs,
        output_channels: outputs,
        is_default_input: index == 0 && inputs > 0,
        is_default_output: index == 0 && outputs > 0,
        sample_rates: vec![48000, 96000],
    }
}

/// Mock layer with one duplex device (index 0), one output-only device
/// (index 1) and one input-only device (index 2)
pub fn mock_layer() -> (MockLayer, MockControl) {
    let state = Arc::new(Mutex::new(MockState {
        devices: vec![
            device(0, "Duplex Interface", 2, 2),
            device(1, "Headphones", 0, 2),
            device(2, "USB Microphone", 1, 0),
        ],
        info: StreamInfo {
            input_latency_secs: 0.004,
            output_latency_secs: 0.006,
        },
        ..MockState::default()
    }));
    (
        MockLayer {
            state: Arc::clone(&state),
        },
        MockControl { state },
    )
}

/// Controller over a mock layer with default config
pub fn mock_controller() -> (StreamController, MockControl) {
    mock_controller_with(&AppConfig::default())
}

/// Controller over a mock layer with the given config
pub fn mock_controller_with(config: &AppConfig) -> (StreamController, MockControl) {
    let (layer, control) = mock_layer();
    (StreamController::new(Box::new(layer), config), control)
}

impl MockControl {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.lock().requests.clone()
    }

    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    pub fn stops(&self) -> usize {
        self.lock().stops
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn has_callback(&self) -> bool {
        self.lock().callback.is_some()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.lock().fail_start = fail;
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.lock().fail_stop = fail;
    }

    pub fn set_latency(&self, input_secs: f64, output_secs: f64) {
        self.lock().info = StreamInfo {
            input_latency_secs: input_secs,
            output_latency_secs: output_secs,
        };
    }

    pub fn set_load(&self, load: f32) {
        self.lock().load = load;
    }

    /// Run one buffer through the registered callback
    ///
    /// Returns the interleaved stereo output, or `None` when no stream is
    /// running.
    pub fn pump(&self, input: &[f32]) -> Option<(Vec<f32>, CallbackStatus)> {
        let mut state = self.lock();
        if !state.running {
            return None;
        }
        let callback = state.callback.as_mut()?;
        let mut output = vec![0.0f32; input.len() * 2];
        let status = callback(input, &mut output);
        Some((output, status))
    }

    /// Pump silence from another thread whenever a stream is running
    pub fn spawn_pumper(&self) -> Pumper {
        let control = self.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut processed = 0;
            let mut silenced = 0;
            while !stop_flag.load(Ordering::Relaxed) {
                match control.pump(&[0.0; 16]) {
                    Some((_, CallbackStatus::Silenced)) => silenced += 1,
                    Some(_) => processed += 1,
                    None => thread::yield_now(),
                }
            }
            (processed, silenced)
        });
        Pumper { stop, handle }
    }

    /// Pump `input` in 16-frame buffers and return the left channel
    pub fn pump_all(&self, input: &[f32]) -> Vec<f32> {
        let mut left = Vec::with_capacity(input.len());
        for chunk in input.chunks(16) {
            let (output, _) = self.pump(chunk).expect("stream running");
            left.extend(output.chunks_exact(2).map(|f| f[0]));
        }
        left
    }
}

impl DeviceLayer for MockLayer {
    fn enumerate_devices(&self) -> Result<Vec<PhysicalDevice>> {
        Ok(self.state.lock().unwrap().devices.clone())
    }

    fn open_stream(
        &mut self,
        request: &StreamRequest,
        callback: ProcessCallback,
    ) -> Result<Box<dyn StreamHandle>> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(*request);
        if state.fail_open {
            return Err(DeviceError::Open("mock open failure".into()).into());
        }
        state.callback = Some(callback);
        Ok(Box::new(MockStream {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockStream {
    state: Arc<Mutex<MockState>>,
}

impl StreamHandle for MockStream {
    fn start(&mut self) -> std::result::Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.starts += 1;
        if state.fail_start {
            return Err(DeviceError::Start("mock start failure".into()));
        }
        state.running = true;
        Ok(())
    }

    fn stop(&mut self) -> std::result::Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        state.running = false;
        if state.fail_stop {
            return Err(DeviceError::Stop("mock stop failure".into()));
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> std::result::Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.closes += 1;
        state.running = false;
        state.callback = None;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    fn info(&self) -> StreamInfo {
        self.state.lock().unwrap().info
    }

    fn load_probe(&self) -> Arc<dyn LoadProbe> {
        Arc::new(MockProbe {
            state: Arc::clone(&self.state),
        })
    }

    fn latency_probe(&self) -> Arc<dyn LatencyProbe> {
        Arc::new(MockProbe {
            state: Arc::clone(&self.state),
        })
    }
}

struct MockProbe {
    state: Arc<Mutex<MockState>>,
}

impl LoadProbe for MockProbe {
    fn cpu_load(&self) -> std::result::Result<f32, DeviceError> {
        Ok(self.state.lock().unwrap().load)
    }
}

impl LatencyProbe for MockProbe {
    fn stream_info(&self) -> StreamInfo {
        self.state.lock().unwrap().info
    }
}
