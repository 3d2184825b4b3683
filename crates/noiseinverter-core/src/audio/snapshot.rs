//! Lock-free visualization snapshot
//!
//! The real-time path writes decimated input/output pairs into an off-screen
//! bank and publishes it by flipping an index when the buffer is done.
//! Readers copy the published bank without ever blocking the writer.
//!
//! ## Consistency
//!
//! - Each input/output pair is packed into one `AtomicU64`, so a pair is
//!   never torn.
//! - Each bank carries a sequence counter (odd while being written). A reader
//!   retries a bounded number of times until it observes the same even
//!   sequence before and after its copy; [`read_into`](VisualizationSnapshot::read_into)
//!   reports whether that succeeded.
//! - There is exactly one writer: the processing engine.

use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Copy attempts before a reader settles for a possibly mixed copy
const MAX_READ_ATTEMPTS: usize = 8;

#[inline]
fn pack(input: f32, output: f32) -> u64 {
    ((input.to_bits() as u64) << 32) | output.to_bits() as u64
}

#[inline]
fn unpack(pair: u64) -> (f32, f32) {
    (f32::from_bits((pair >> 32) as u32), f32::from_bits(pair as u32))
}

#[derive(Debug)]
struct Bank {
    pairs: Box<[AtomicU64]>,
    seq: AtomicU64,
}

impl Bank {
    fn new(capacity: usize) -> Self {
        let zero = pack(0.0, 0.0);
        Self {
            pairs: (0..capacity).map(|_| AtomicU64::new(zero)).collect(),
            seq: AtomicU64::new(0),
        }
    }
}

/// Double-buffered input/output sequences for external display
///
/// # Example
/// ```
/// use noiseinverter_core::audio::snapshot::VisualizationSnapshot;
///
/// let snapshot = VisualizationSnapshot::new(4);
/// {
///     let mut writer = snapshot.writer();
///     writer.record(0.5, -0.5, 0);
/// } // published on drop
///
/// let (input, output) = snapshot.read();
/// assert_eq!(input, vec![0.5, 0.0, 0.0, 0.0]);
/// assert_eq!(output, vec![-0.5, 0.0, 0.0, 0.0]);
/// ```
#[derive(Debug)]
pub struct VisualizationSnapshot {
    banks: [Bank; 2],
    front: AtomicUsize,
    capacity: usize,
    writer_active: AtomicBool,
    publish_count: AtomicU64,
}

impl VisualizationSnapshot {
    /// Create a zero-filled snapshot holding `capacity` pairs (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            banks: [Bank::new(capacity), Bank::new(capacity)],
            front: AtomicUsize::new(0),
            capacity,
            writer_active: AtomicBool::new(false),
            publish_count: AtomicU64::new(0),
        }
    }

    /// Number of pairs in each sequence
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of banks published so far
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Acquire)
    }

    /// Begin writing the off-screen bank; it is published when the writer drops
    ///
    /// Must only be called from the single producer thread.
    pub fn writer(&self) -> SnapshotWriter<'_> {
        let was_active = self.writer_active.swap(true, Ordering::Acquire);
        debug_assert!(!was_active, "visualization snapshot has a single writer");

        let back = 1 - self.front.load(Ordering::Acquire);
        let bank = &self.banks[back];
        bank.seq.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);

        SnapshotWriter {
            snapshot: self,
            back,
        }
    }

    /// Copy the published bank into `input` and `output`
    ///
    /// Both vectors are resized to [`capacity`](Self::capacity). Returns
    /// `true` when the copy is known to come from a single published buffer.
    pub fn read_into(&self, input: &mut Vec<f32>, output: &mut Vec<f32>) -> bool {
        input.resize(self.capacity, 0.0);
        output.resize(self.capacity, 0.0);

        for _ in 0..MAX_READ_ATTEMPTS {
            let bank = &self.banks[self.front.load(Ordering::Acquire)];
            let before = bank.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            for (i, pair) in bank.pairs.iter().enumerate() {
                let (x, y) = unpack(pair.load(Ordering::Relaxed));
                input[i] = x;
                output[i] = y;
            }

            fence(Ordering::Acquire);
            if bank.seq.load(Ordering::Relaxed) == before {
                return true;
            }
        }

        false
    }

    /// Copy out the published input and output sequences
    pub fn read(&self) -> (Vec<f32>, Vec<f32>) {
        let mut input = Vec::with_capacity(self.capacity);
        let mut output = Vec::with_capacity(self.capacity);
        self.read_into(&mut input, &mut output);
        (input, output)
    }
}

/// Scoped writer for one processing buffer
///
/// Dropping the writer publishes everything recorded through it.
pub struct SnapshotWriter<'a> {
    snapshot: &'a VisualizationSnapshot,
    back: usize,
}

impl SnapshotWriter<'_> {
    /// Record a pair at `position` (wrapped to the snapshot capacity)
    #[inline]
    pub fn record(&mut self, input: f32, output: f32, position: usize) {
        let bank = &self.snapshot.banks[self.back];
        let slot = position % self.snapshot.capacity;
        bank.pairs[slot].store(pack(input, output), Ordering::Relaxed);
    }
}

impl Drop for SnapshotWriter<'_> {
    fn drop(&mut self) {
        let snapshot = self.snapshot;
        snapshot.banks[self.back].seq.fetch_add(1, Ordering::Release);
        snapshot.front.store(self.back, Ordering::Release);
        snapshot.publish_count.fetch_add(1, Ordering::Release);
        snapshot.writer_active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_length_always_matches_capacity() {
        let snapshot = VisualizationSnapshot::new(10);
        for generation in 0..50 {
            let mut writer = snapshot.writer();
            for i in 0..25 {
                writer.record(generation as f32, 0.0, i);
            }
            drop(writer);
            let (input, output) = snapshot.read();
            assert_eq!(input.len(), 10);
            assert_eq!(output.len(), 10);
        }
        assert_eq!(snapshot.publish_count(), 50);
    }

    #[test]
    fn test_unpublished_writes_are_invisible() {
        let snapshot = VisualizationSnapshot::new(2);
        let mut writer = snapshot.writer();
        writer.record(0.9, 0.9, 0);

        let (input, _) = snapshot.read();
        assert_eq!(input, vec![0.0, 0.0]);

        drop(writer);
        let (input, _) = snapshot.read();
        assert_eq!(input, vec![0.9, 0.0]);
    }

    #[test]
    fn test_position_wraps() {
        let snapshot = VisualizationSnapshot::new(3);
        snapshot.writer().record(1.0, -1.0, 4);
        let (input, output) = snapshot.read();
        assert_eq!(input, vec![0.0, 1.0, 0.0]);
        assert_eq!(output, vec![0.0, -1.0, 0.0]);
    }

    #[test]
    fn test_zero_capacity_is_promoted() {
        let snapshot = VisualizationSnapshot::new(0);
        assert_eq!(snapshot.capacity(), 1);
    }

    #[test]
    fn test_concurrent_reads_never_see_torn_pairs() {
        let snapshot = Arc::new(VisualizationSnapshot::new(64));
        let writer_snapshot = Arc::clone(&snapshot);

        let writer = std::thread::spawn(move || {
            for generation in 1..=20_000u32 {
                let value = generation as f32;
                let mut writer = writer_snapshot.writer();
                for i in 0..64 {
                    writer.record(value, -value, i);
                }
            }
        });

        let mut input = Vec::new();
        let mut output = Vec::new();
        for _ in 0..2_000 {
            let consistent = snapshot.read_into(&mut input, &mut output);
            for (x, y) in input.iter().zip(output.iter()) {
                assert_eq!(*y, -*x, "pair torn: {} / {}", x, y);
            }
            if consistent {
                assert!(input.iter().all(|&x| x == input[0]));
            }
        }

        writer.join().unwrap();
        let (input, _) = snapshot.read();
        assert!(input.iter().all(|&x| x == 20_000.0));
    }
}
