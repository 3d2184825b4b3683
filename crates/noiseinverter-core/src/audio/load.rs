//! Callback CPU load measurement
//!
//! The audio thread times each processing call against the real-time budget
//! of the buffer it produced. The monitor thread reads the ratio accumulated
//! since its previous query, so each reading covers one polling window.

use crate::audio::device::LoadProbe;
use crate::error::DeviceError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Accumulates callback time against available time
#[derive(Debug)]
pub struct CallbackLoad {
    busy_ns: AtomicU64,
    available_ns: AtomicU64,
    sample_rate: u32,
}

impl CallbackLoad {
    /// Create a meter for streams running at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            busy_ns: AtomicU64::new(0),
            available_ns: AtomicU64::new(0),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Start timing a callback
    #[inline]
    pub fn begin(&self) -> Instant {
        Instant::now()
    }

    /// Finish timing a callback that produced `frames` frames
    #[inline]
    pub fn end(&self, started: Instant, frames: usize) {
        let busy_ns = started.elapsed().as_nanos() as u64;
        let available_ns = frames as u64 * 1_000_000_000 / self.sample_rate as u64;
        self.busy_ns.fetch_add(busy_ns, Ordering::Relaxed);
        self.available_ns.fetch_add(available_ns, Ordering::Relaxed);
    }

    /// Fraction of the available time spent processing since the last call
    ///
    /// Returns 0.0 when nothing was processed. Can exceed 1.0 when overloaded.
    pub fn take_ratio(&self) -> f32 {
        let busy = self.busy_ns.swap(0, Ordering::Relaxed);
        let available = self.available_ns.swap(0, Ordering::Relaxed);
        if available == 0 {
            return 0.0;
        }
        (busy as f64 / available as f64) as f32
    }
}

impl LoadProbe for CallbackLoad {
    fn cpu_load(&self) -> std::result::Result<f32, DeviceError> {
        Ok(self.take_ratio())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_no_callbacks_reads_zero() {
        let load = CallbackLoad::new(48000);
        assert_eq!(load.take_ratio(), 0.0);
    }

    #[test]
    fn test_ratio_resets_after_read() {
        let load = CallbackLoad::new(1000);
        let started = load.begin();
        std::thread::sleep(Duration::from_millis(2));
        // 100 frames at 1 kHz = 100 ms budget
        load.end(started, 100);

        let ratio = load.take_ratio();
        assert!(ratio > 0.0 && ratio < 1.0, "ratio {}", ratio);
        assert_eq!(load.take_ratio(), 0.0);
    }

    #[test]
    fn test_probe_reports_ratio() {
        let load = CallbackLoad::new(1000);
        let started = load.begin();
        load.end(started, 1000);
        let ratio = load.cpu_load().unwrap();
        assert!((0.0..1.0).contains(&ratio));
    }
}
