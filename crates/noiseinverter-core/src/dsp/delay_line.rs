//! Fixed-capacity circular delay line
//!
//! Real-time constraints:
//! - Buffer allocated once at construction, never resized
//! - Write, read and advance are O(1) and never allocate

/// Circular buffer used to retrieve a sample written a fixed number of steps earlier
///
/// The write cursor always points at the next slot to be overwritten.
/// A read at offset `d` returns slot `(cursor + C - d) mod C`, so calling
/// [`write`](Self::write) then [`read_at`](Self::read_at) with `d = 0`
/// returns the value just written.
///
/// # Example
/// ```
/// use noiseinverter_core::dsp::delay_line::DelayLine;
///
/// let mut line = DelayLine::new(8);
/// line.write(0.5);
/// line.advance();
/// line.write(0.0);
/// assert_eq!(line.read_at(1), 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    cursor: usize,
}

impl DelayLine {
    /// Create a zero-filled delay line holding `capacity` samples (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(1)],
            cursor: 0,
        }
    }

    /// Create a delay line holding `max_seconds` of audio at `sample_rate`
    ///
    /// The capacity is rounded down, e.g. 50 ms at 96 kHz is 4800 samples.
    pub fn for_duration(sample_rate: u32, max_seconds: f64) -> Self {
        Self::new((sample_rate as f64 * max_seconds) as usize)
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Largest offset that [`read_at`](Self::read_at) honours without clamping
    pub fn max_delay(&self) -> usize {
        self.buffer.len() - 1
    }

    /// Current write cursor
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Overwrite the slot under the cursor
    #[inline]
    pub fn write(&mut self, sample: f32) {
        self.buffer[self.cursor] = sample;
    }

    /// Read the sample written `delay` steps before the cursor
    ///
    /// Offsets beyond [`max_delay`](Self::max_delay) are clamped to it.
    #[inline]
    pub fn read_at(&self, delay: usize) -> f32 {
        let capacity = self.buffer.len();
        let delay = delay.min(capacity - 1);
        self.buffer[(self.cursor + capacity - delay) % capacity]
    }

    /// Move the cursor to the next slot
    #[inline]
    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.buffer.len();
    }

    /// Zero every slot and rewind the cursor
    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.cursor = 0;
    }
}
