//! Stream lifecycle, parameter tuning and calibration
//!
//! [`StreamController`] owns the device layer, the processing engine and the
//! health monitor. It moves through `Idle → Opening → Running → Idle`.
//!
//! While the stream runs the engine belongs to the audio callback. The
//! controller talks to it only through the control queue, and only locks it
//! directly when no stream is open. Updates that do not fit in the queue are
//! kept as pending state, retried on the next update and applied directly
//! once the stream is stopped.

use crate::audio::device::{
    describe_devices, AudioDeviceDescriptor, CallbackStatus, DeviceId, DeviceLayer,
    ProcessCallback, StreamHandle, StreamRequest,
};
use crate::audio::engine::{
    control_channel, update_notifier, ControlMessage, ControlSender, EngineCounters,
    EngineSettings, MixParams, ParameterUpdate, ProcessingEngine, UpdateNotifier,
};
use crate::audio::monitor::{HealthMonitor, MonitorContext};
use crate::audio::snapshot::VisualizationSnapshot;
use crate::audio::status::StreamStatus;
use crate::config::{AppConfig, StreamConfig};
use crate::dsp::filter::FilterParams;
use crate::error::{EngineError, Result};
use crate::stats::store::{HealthStore, HealthSummary};
use basedrop::Collector;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No stream open
    Idle,
    /// Stream being opened and started
    Opening,
    /// Stream running
    Running,
}

/// Constants used by [`StreamController::calibrate`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationProfile {
    /// Gain set by calibration
    pub gain: f32,
    /// Fraction of the measured latency used as delay
    pub latency_factor: f32,
    /// Lower bound on the calibrated delay in milliseconds
    pub min_delay_ms: f32,
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self {
            gain: 0.92,
            latency_factor: 0.5,
            min_delay_ms: 1.0,
        }
    }
}

impl CalibrationProfile {
    /// Delay and gain derived from a measured latency
    ///
    /// # Example
    /// ```
    /// use noiseinverter_core::audio::controller::CalibrationProfile;
    ///
    /// let profile = CalibrationProfile::default();
    /// assert_eq!(profile.derive(10.0), (5.0, 0.92));
    /// assert_eq!(profile.derive(1.0), (1.0, 0.92));
    /// ```
    pub fn derive(&self, latency_ms: f32) -> (f32, f32) {
        let delay_ms = (latency_ms * self.latency_factor).max(self.min_delay_ms);
        (delay_ms, self.gain)
    }
}

fn lock_engine(engine: &Mutex<ProcessingEngine>) -> MutexGuard<'_, ProcessingEngine> {
    match engine.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Owns the audio stream and everything attached to it
pub struct StreamController {
    layer: Box<dyn DeviceLayer>,
    config: StreamConfig,
    state: StreamState,
    status: Arc<StreamStatus>,
    engine: Arc<Mutex<ProcessingEngine>>,
    counters: Arc<EngineCounters>,
    snapshot: Arc<VisualizationSnapshot>,
    controls: ControlSender,
    pending_settings: Option<EngineSettings>,
    pending_notifier: Option<Option<UpdateNotifier>>,
    mix: MixParams,
    filter: FilterParams,
    calibration: CalibrationProfile,
    stream: Option<Box<dyn StreamHandle>>,
    monitor: Option<HealthMonitor>,
    monitor_interval: Duration,
    health: Arc<Mutex<HealthStore>>,
    // Declared after the engine so released notifiers are freed last
    collector: Collector,
}

impl StreamController {
    /// Create an idle controller
    ///
    /// The delay line and visualization snapshot are allocated here and
    /// reused by every stream this controller opens.
    ///
    /// # Arguments
    /// * `layer` - Audio hardware access
    /// * `config` - Stream shape, initial parameters and calibration constants
    pub fn new(layer: Box<dyn DeviceLayer>, config: &AppConfig) -> Self {
        let stream_config = config.stream_config();
        let mix = MixParams {
            delay_ms: config.delay_ms.max(0.0),
            gain: config.gain.max(0.0),
        };
        let filter = config.filter_params();
        let snapshot = Arc::new(VisualizationSnapshot::new(config.visualization_capacity));

        let (controls, receiver) = control_channel();
        let mut engine = ProcessingEngine::new(&stream_config, mix, filter, Arc::clone(&snapshot));
        engine.attach_controls(receiver);
        let counters = engine.counters();

        Self {
            layer,
            config: stream_config,
            state: StreamState::Idle,
            status: Arc::new(StreamStatus::new()),
            engine: Arc::new(Mutex::new(engine)),
            counters,
            snapshot,
            controls,
            pending_settings: None,
            pending_notifier: None,
            mix,
            filter,
            calibration: config.calibration(),
            stream: None,
            monitor: None,
            monitor_interval: config.monitor_interval(),
            health: Arc::new(Mutex::new(HealthStore::new())),
            collector: Collector::new(),
        }
    }

    /// List every input and output endpoint, enumerated fresh
    pub fn list_devices(&self) -> Result<Vec<AudioDeviceDescriptor>> {
        let devices = self.layer.enumerate_devices()?;
        Ok(describe_devices(&devices))
    }

    /// Open and start a mono-in / stereo-out stream
    ///
    /// Does nothing if a stream is already running. On failure everything
    /// opened so far is closed and the controller returns to `Idle`.
    pub fn start(&mut self, input: DeviceId, output: DeviceId) -> Result<()> {
        if self.state == StreamState::Running {
            tracing::info!("Stream already running");
            return Ok(());
        }

        self.state = StreamState::Opening;
        tracing::info!(input = %input, output = %output, "Opening stream");

        match self.open(input, output) {
            Ok(stream) => {
                self.finish_start(stream);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start stream");
                self.state = StreamState::Idle;
                Err(e)
            }
        }
    }

    fn open(&mut self, input: DeviceId, output: DeviceId) -> Result<Box<dyn StreamHandle>> {
        let devices = self.layer.enumerate_devices()?;
        for id in [input, output] {
            if !devices.iter().any(|d| d.index == id.physical_index()) {
                return Err(EngineError::DeviceNotFound(id));
            }
        }

        // Anything queued while idle lands before the first buffer
        lock_engine(&self.engine).drain_controls();

        let request = StreamRequest {
            input_index: input.physical_index(),
            output_index: output.physical_index(),
            config: self.config,
        };
        let callback = self.process_callback();
        let mut stream = self.layer.open_stream(&request, callback)?;

        if let Err(e) = stream.start() {
            if let Err(close_err) = stream.close() {
                tracing::warn!(error = %close_err, "Failed to close stream after start failure");
            }
            return Err(e.into());
        }

        Ok(stream)
    }

    fn process_callback(&self) -> ProcessCallback {
        let engine = Arc::clone(&self.engine);
        Box::new(move |input: &[f32], output: &mut [f32]| match engine.try_lock() {
            Ok(mut engine) => engine.process(input, output),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().process(input, output),
            Err(TryLockError::WouldBlock) => {
                output.fill(0.0);
                CallbackStatus::Silenced
            }
        })
    }

    fn finish_start(&mut self, stream: Box<dyn StreamHandle>) {
        let latency_ms = stream.info().total_latency_ms();
        self.status.set_latency_ms(latency_ms);
        self.status.set_running(true);

        let context = MonitorContext {
            status: Arc::clone(&self.status),
            probe: stream.load_probe(),
            latency: stream.latency_probe(),
            health: Arc::clone(&self.health),
            counters: Arc::clone(&self.counters),
        };
        self.monitor = match HealthMonitor::spawn(context, self.monitor_interval) {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                tracing::warn!(error = %e, "Running without health monitor");
                None
            }
        };

        self.stream = Some(stream);
        self.state = StreamState::Running;
        tracing::info!(
            latency_ms,
            sample_rate = self.config.sample_rate,
            buffer_frames = self.config.buffer_frames,
            "Stream started"
        );
    }

    /// Stop and close the stream
    ///
    /// Does nothing if no stream is running. The controller always ends
    /// `Idle`; the first device error, if any, is returned.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != StreamState::Running {
            return Ok(());
        }

        self.status.set_running(false);

        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }

        let mut result = Ok(());
        if let Some(mut stream) = self.stream.take() {
            if stream.is_running() {
                if let Err(e) = stream.stop() {
                    tracing::error!(error = %e, "Failed to stop stream");
                    result = Err(e.into());
                }
            }
            if let Err(e) = stream.close() {
                tracing::error!(error = %e, "Failed to close stream");
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }

        self.settle_engine();
        self.state = StreamState::Idle;
        tracing::info!("Stream stopped");
        result
    }

    /// Derive delay and gain from the measured latency
    ///
    /// When idle returns the current pair unchanged. When running sets
    /// `delay = max(min_delay, latency × factor)` and the calibration gain.
    ///
    /// # Returns
    /// `(delay_ms, gain)` now in effect
    pub fn calibrate(&mut self) -> (f32, f32) {
        if self.state != StreamState::Running {
            tracing::info!("Calibration skipped: stream not running");
            return (self.mix.delay_ms, self.mix.gain);
        }

        if let Some(stream) = &self.stream {
            self.status.set_latency_ms(stream.info().total_latency_ms());
        }
        let latency_ms = self.status.latency_ms();
        let (delay_ms, gain) = self.calibration.derive(latency_ms);
        self.set_parameters(ParameterUpdate::new().delay_ms(delay_ms).gain(gain));

        tracing::info!(latency_ms, delay_ms, gain, "Calibrated");
        (self.mix.delay_ms, self.mix.gain)
    }

    /// Apply a partial parameter change
    ///
    /// Filter changes recompute coefficients and reset filter state. While
    /// running the change takes effect at the next buffer.
    pub fn set_parameters(&mut self, update: ParameterUpdate) {
        if update.is_empty() {
            return;
        }

        let reset_filter = update.apply_to(&mut self.mix, &mut self.filter);
        tracing::debug!(
            delay_ms = self.mix.delay_ms,
            gain = self.mix.gain,
            low_freq = self.filter.low_freq,
            high_freq = self.filter.high_freq,
            family = %self.filter.family,
            "Parameters updated"
        );

        self.send(ControlMessage::Settings(EngineSettings {
            mix: self.mix,
            filter: self.filter,
            reset_filter,
        }));
    }

    /// Register a function called after every processed buffer
    ///
    /// The function runs on the real-time thread and must return quickly.
    pub fn set_update_callback<F>(&mut self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let notifier = update_notifier(&self.collector.handle(), callback);
        self.send(ControlMessage::Notifier(Some(notifier)));
    }

    /// Remove the update callback
    pub fn clear_update_callback(&mut self) {
        self.send(ControlMessage::Notifier(None));
    }

    fn send(&mut self, message: ControlMessage) {
        self.collector.collect();

        if self.state != StreamState::Running {
            let mut engine = lock_engine(&self.engine);
            engine.drain_controls();
            match message {
                ControlMessage::Settings(settings) => engine.apply_settings(settings),
                ControlMessage::Notifier(notifier) => engine.set_notifier(notifier),
            }
            return;
        }

        // Settings are complete snapshots: a newer one replaces an unsent one
        match message {
            ControlMessage::Settings(mut settings) => {
                if let Some(unsent) = self.pending_settings.take() {
                    settings.reset_filter |= unsent.reset_filter;
                }
                self.pending_settings = Some(settings);
            }
            ControlMessage::Notifier(notifier) => self.pending_notifier = Some(notifier),
        }
        self.flush_pending();
    }

    /// Push pending updates into the control queue, keeping what does not fit
    fn flush_pending(&mut self) {
        if let Some(notifier) = self.pending_notifier.take() {
            if let Err(ControlMessage::Notifier(notifier)) =
                self.controls.send(ControlMessage::Notifier(notifier))
            {
                self.pending_notifier = Some(notifier);
            }
        }
        if let Some(settings) = self.pending_settings.take() {
            if self.controls.send(ControlMessage::Settings(settings)).is_err() {
                self.pending_settings = Some(settings);
            }
        }
        if self.pending_settings.is_some() || self.pending_notifier.is_some() {
            tracing::warn!("Control queue full, update deferred");
        }
    }

    /// Bring the stopped engine in line with the controller
    ///
    /// Applies queued messages first, then the controller's own parameters
    /// and any pending notifier, so nothing deferred is lost across restarts.
    fn settle_engine(&mut self) {
        let reset_filter = self
            .pending_settings
            .take()
            .is_some_and(|settings| settings.reset_filter);
        {
            let mut engine = lock_engine(&self.engine);
            engine.drain_controls();
            engine.apply_settings(EngineSettings {
                mix: self.mix,
                filter: self.filter,
                reset_filter,
            });
            if let Some(notifier) = self.pending_notifier.take() {
                engine.set_notifier(notifier);
            }
        }
        self.collector.collect();
    }

    /// Copy of the latest published visualization snapshot
    ///
    /// # Returns
    /// `(input, output)`, each exactly the snapshot capacity long
    pub fn visualization_data(&self) -> (Vec<f32>, Vec<f32>) {
        self.snapshot.read()
    }

    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether the stream is running
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Latency last reported by the stream, in milliseconds
    pub fn latency_ms(&self) -> f32 {
        self.status.latency_ms()
    }

    /// Last sampled CPU load, in percent
    pub fn cpu_load_percent(&self) -> f32 {
        self.status.cpu_load_percent()
    }

    /// Current delay and gain
    pub fn mix_params(&self) -> MixParams {
        self.mix
    }

    /// Current filter parameters
    pub fn filter_params(&self) -> FilterParams {
        self.filter
    }

    /// Stream shape used for every stream
    pub fn stream_config(&self) -> StreamConfig {
        self.config
    }

    /// Running statistics from the health monitor
    pub fn health_summary(&self) -> HealthSummary {
        match self.health.lock() {
            Ok(health) => health.summary().clone(),
            Err(poisoned) => poisoned.into_inner().summary().clone(),
        }
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
