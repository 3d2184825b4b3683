//! Per-buffer processing engine
//!
//! For every input sample the engine:
//! 1. runs the filter stage
//! 2. inverts and scales the filtered value and writes it to the delay line
//! 3. reads the delayed inverted value and mixes it into the original
//! 4. clamps to `[-1, 1]` and duplicates onto both output channels
//!
//! Every even frame is recorded into the visualization snapshot.
//!
//! ## Parameter hand-off
//!
//! The control thread never touches a running engine. It pushes complete
//! [`EngineSettings`] through a lock-free SPSC queue which the engine drains
//! at the start of each buffer, so a buffer always sees one consistent
//! parameter set.

use crate::audio::device::CallbackStatus;
use crate::audio::snapshot::VisualizationSnapshot;
use crate::config::StreamConfig;
use crate::dsp::delay_line::DelayLine;
use crate::dsp::filter::{FilterFamily, FilterParams, FilterStage};
use basedrop::{Handle, Owned};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Capacity of the control queue between the control thread and the engine
const CONTROL_QUEUE_SIZE: usize = 64;

/// Function fired after every processed buffer; must not block
pub type UpdateFn = Box<dyn Fn() + Send + Sync + 'static>;

/// Update function whose release is deferred to the collector that
/// allocated it, so replacing it never frees memory on the audio thread
pub type UpdateNotifier = Owned<UpdateFn>;

/// Wrap `callback` for hand-off to the engine
pub fn update_notifier<F>(handle: &Handle, callback: F) -> UpdateNotifier
where
    F: Fn() + Send + Sync + 'static,
{
    let callback: UpdateFn = Box::new(callback);
    Owned::new(handle, callback)
}

/// Delay and gain of the inverted copy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixParams {
    /// Delay in milliseconds (≥ 0)
    pub delay_ms: f32,
    /// Gain applied to the inverted copy (≥ 0)
    pub gain: f32,
}

impl Default for MixParams {
    fn default() -> Self {
        Self {
            delay_ms: 2.0,
            gain: 0.95,
        }
    }
}

impl MixParams {
    /// Delay in whole samples at `sample_rate`, rounded to nearest
    pub fn delay_samples(&self, sample_rate: u32) -> usize {
        (self.delay_ms as f64 * sample_rate as f64 / 1000.0).round() as usize
    }
}

/// Partial parameter change; `None` leaves a field unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParameterUpdate {
    /// New delay in milliseconds
    pub delay_ms: Option<f32>,
    /// New gain
    pub gain: Option<f32>,
    /// New lower cutoff in Hz
    pub low_freq: Option<f32>,
    /// New upper cutoff in Hz
    pub high_freq: Option<f32>,
    /// New filter family
    pub family: Option<FilterFamily>,
}

impl ParameterUpdate {
    /// Empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay
    pub fn delay_ms(mut self, delay_ms: f32) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    /// Set the gain
    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = Some(gain);
        self
    }

    /// Set the lower cutoff
    pub fn low_freq(mut self, low_freq: f32) -> Self {
        self.low_freq = Some(low_freq);
        self
    }

    /// Set the upper cutoff
    pub fn high_freq(mut self, high_freq: f32) -> Self {
        self.high_freq = Some(high_freq);
        self
    }

    /// Set the filter family
    pub fn family(mut self, family: FilterFamily) -> Self {
        self.family = Some(family);
        self
    }

    /// Build from the menu convention where any negative value means unchanged
    ///
    /// `family_code` uses [`FilterFamily::from_code`]; unknown codes are unchanged.
    ///
    /// # Example
    /// ```
    /// use noiseinverter_core::audio::engine::ParameterUpdate;
    ///
    /// let update = ParameterUpdate::from_sentinels(3.0, -1.0, -1.0, 8000.0, -1);
    /// assert_eq!(update.delay_ms, Some(3.0));
    /// assert_eq!(update.gain, None);
    /// assert_eq!(update.high_freq, Some(8000.0));
    /// assert_eq!(update.family, None);
    /// ```
    pub fn from_sentinels(
        delay_ms: f32,
        gain: f32,
        low_freq: f32,
        high_freq: f32,
        family_code: i32,
    ) -> Self {
        let keep = |v: f32| (v >= 0.0).then_some(v);
        Self {
            delay_ms: keep(delay_ms),
            gain: keep(gain),
            low_freq: keep(low_freq),
            high_freq: keep(high_freq),
            family: FilterFamily::from_code(family_code),
        }
    }

    /// Whether any filter field is set
    pub fn touches_filter(&self) -> bool {
        self.low_freq.is_some() || self.high_freq.is_some() || self.family.is_some()
    }

    /// Whether nothing is set
    pub fn is_empty(&self) -> bool {
        self.delay_ms.is_none() && self.gain.is_none() && !self.touches_filter()
    }

    /// Apply to existing parameters; negative delay or gain is clamped to zero
    ///
    /// Returns `true` when the filter must be recomputed: a cutoff was given,
    /// or the family differs from the current one.
    pub fn apply_to(&self, mix: &mut MixParams, filter: &mut FilterParams) -> bool {
        let family_changed = self.family.is_some_and(|family| family != filter.family);
        if let Some(delay_ms) = self.delay_ms {
            mix.delay_ms = delay_ms.max(0.0);
        }
        if let Some(gain) = self.gain {
            mix.gain = gain.max(0.0);
        }
        if let Some(low_freq) = self.low_freq {
            filter.low_freq = low_freq;
        }
        if let Some(high_freq) = self.high_freq {
            filter.high_freq = high_freq;
        }
        if let Some(family) = self.family {
            filter.family = family;
        }
        self.low_freq.is_some() || self.high_freq.is_some() || family_changed
    }
}

/// Complete parameter set delivered to the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Delay and gain
    pub mix: MixParams,
    /// Filter parameters
    pub filter: FilterParams,
    /// Recompute the filter (and reset its state) even if `filter` is unchanged
    pub reset_filter: bool,
}

/// Message from the control thread to the engine
pub enum ControlMessage {
    /// Replace the current parameters
    Settings(EngineSettings),
    /// Replace or clear the update notifier
    Notifier(Option<UpdateNotifier>),
}

/// Sending half of the control queue, owned by the control thread
pub struct ControlSender {
    producer: HeapProd<ControlMessage>,
}

impl ControlSender {
    /// Queue a message; gives it back if the queue is full
    pub fn send(&mut self, message: ControlMessage) -> std::result::Result<(), ControlMessage> {
        self.producer.try_push(message)
    }
}

/// Create a control queue for one engine
pub fn control_channel() -> (ControlSender, HeapCons<ControlMessage>) {
    let (producer, consumer) = HeapRb::<ControlMessage>::new(CONTROL_QUEUE_SIZE).split();
    (ControlSender { producer }, consumer)
}

/// Counters updated by the real-time path, readable from any thread
#[derive(Debug, Default)]
pub struct EngineCounters {
    buffers: AtomicU64,
    frames: AtomicU64,
}

impl EngineCounters {
    /// Buffers processed so far
    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }

    /// Frames processed so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

/// Filter, delay line and mixer driven once per audio buffer
pub struct ProcessingEngine {
    sample_rate: u32,
    mix: MixParams,
    filter: FilterStage,
    delay: DelayLine,
    snapshot: Arc<VisualizationSnapshot>,
    controls: Option<HeapCons<ControlMessage>>,
    notifier: Option<UpdateNotifier>,
    counters: Arc<EngineCounters>,
}

impl ProcessingEngine {
    /// Create an engine with a delay line sized for 50 ms at the configured rate
    ///
    /// # Example
    /// ```
    /// use std::sync::Arc;
    /// use noiseinverter_core::audio::engine::{MixParams, ProcessingEngine};
    /// use noiseinverter_core::audio::snapshot::VisualizationSnapshot;
    /// use noiseinverter_core::{FilterParams, StreamConfig};
    ///
    /// let snapshot = Arc::new(VisualizationSnapshot::new(1000));
    /// let mut engine = ProcessingEngine::new(
    ///     &StreamConfig::default(),
    ///     MixParams::default(),
    ///     FilterParams::default(),
    ///     snapshot,
    /// );
    ///
    /// let input = [0.5f32; 16];
    /// let mut output = [0.0f32; 32];
    /// engine.process(&input, &mut output);
    /// assert_eq!(output[0], 0.5);
    /// assert_eq!(output[1], 0.5);
    /// ```
    pub fn new(
        config: &StreamConfig,
        mix: MixParams,
        filter: FilterParams,
        snapshot: Arc<VisualizationSnapshot>,
    ) -> Self {
        Self {
            sample_rate: config.sample_rate,
            mix,
            filter: FilterStage::new(filter, config.sample_rate),
            delay: DelayLine::new(config.delay_capacity()),
            snapshot,
            controls: None,
            notifier: None,
            counters: Arc::new(EngineCounters::default()),
        }
    }

    /// Attach the receiving half of a control queue
    pub fn attach_controls(&mut self, controls: HeapCons<ControlMessage>) {
        self.controls = Some(controls);
    }

    /// Current delay and gain
    pub fn mix_params(&self) -> MixParams {
        self.mix
    }

    /// Current filter parameters
    pub fn filter_params(&self) -> FilterParams {
        self.filter.params()
    }

    /// Filter stage
    pub fn filter(&self) -> &FilterStage {
        &self.filter
    }

    /// Delay line
    pub fn delay_line(&self) -> &DelayLine {
        &self.delay
    }

    /// Delay in samples used for the next buffer, clamped to the delay line
    pub fn delay_samples(&self) -> usize {
        self.mix
            .delay_samples(self.sample_rate)
            .min(self.delay.max_delay())
    }

    /// Visualization snapshot written by this engine
    pub fn snapshot(&self) -> &Arc<VisualizationSnapshot> {
        &self.snapshot
    }

    /// Processing counters
    pub fn counters(&self) -> Arc<EngineCounters> {
        Arc::clone(&self.counters)
    }

    /// Replace the parameters directly (engine not running)
    pub fn apply_settings(&mut self, settings: EngineSettings) {
        self.mix = settings.mix;
        if settings.reset_filter || settings.filter != self.filter.params() {
            self.filter.set_params(settings.filter);
        }
    }

    /// Replace or clear the update notifier directly (engine not running)
    ///
    /// The previous notifier is handed back to its collector.
    pub fn set_notifier(&mut self, notifier: Option<UpdateNotifier>) {
        self.notifier = notifier;
    }

    /// Apply every queued control message
    pub fn drain_controls(&mut self) {
        let Some(controls) = self.controls.as_mut() else {
            return;
        };
        let mut latest: Option<EngineSettings> = None;
        let mut reset_filter = false;
        while let Some(message) = controls.try_pop() {
            match message {
                ControlMessage::Settings(settings) => {
                    reset_filter |= settings.reset_filter;
                    latest = Some(settings);
                }
                ControlMessage::Notifier(notifier) => self.notifier = notifier,
            }
        }
        if let Some(mut settings) = latest {
            settings.reset_filter = reset_filter;
            self.apply_settings(settings);
        }
    }

    /// Process one buffer: mono `input`, interleaved stereo `output`
    ///
    /// Processes `min(input.len(), output.len() / 2)` frames and zeroes any
    /// output beyond them. Never allocates or blocks.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> CallbackStatus {
        self.drain_controls();

        let frames = input.len().min(output.len() / 2);
        let delay_samples = self.delay_samples();
        let gain = self.mix.gain;
        let capacity = self.snapshot.capacity();

        {
            let mut viz = self.snapshot.writer();
            for (i, (&x, out)) in input
                .iter()
                .zip(output.chunks_exact_mut(2))
                .take(frames)
                .enumerate()
            {
                let filtered = self.filter.apply(x);
                let inverted = -filtered * gain;

                self.delay.write(inverted);
                let delayed = self.delay.read_at(delay_samples);
                self.delay.advance();

                let y = (x + delayed).clamp(-1.0, 1.0);
                out[0] = y;
                out[1] = y;

                if i % 2 == 0 {
                    viz.record(x, y, (i / 2) % capacity);
                }
            }
        }

        output[frames * 2..].fill(0.0);

        let previous = self.counters.buffers.fetch_add(1, Ordering::Relaxed);
        self.counters
            .frames
            .fetch_add(frames as u64, Ordering::Relaxed);
        if previous == 0 {
            tracing::info!(
                "Processing started: {} frames per buffer, delay {} samples",
                frames,
                delay_samples
            );
        }

        if let Some(notify) = &self.notifier {
            (**notify)();
        }

        CallbackStatus::Continue
    }
}
