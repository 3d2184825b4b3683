//! Lock-free stream status shared by the control, callback and monitor threads

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// An `f32` stored as its bit pattern in an `AtomicU32`
#[derive(Debug, Default)]
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    /// Create with an initial value
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    /// Read the value
    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Write the value
    #[inline]
    pub fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }
}

/// Running flag, measured latency and CPU load
#[derive(Debug, Default)]
pub struct StreamStatus {
    running: AtomicBool,
    measured_latency_ms: AtomicF32,
    cpu_load_percent: AtomicF32,
}

impl StreamStatus {
    /// Fresh status: stopped, zero latency, zero load
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the stream is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set the running flag
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Latency measured when the stream was opened, in milliseconds
    pub fn latency_ms(&self) -> f32 {
        self.measured_latency_ms.load()
    }

    /// Record the measured latency
    pub fn set_latency_ms(&self, latency_ms: f32) {
        self.measured_latency_ms.store(latency_ms);
    }

    /// Last sampled CPU load, in percent
    pub fn cpu_load_percent(&self) -> f32 {
        self.cpu_load_percent.load()
    }

    /// Record a CPU load sample
    pub fn set_cpu_load_percent(&self, percent: f32) {
        self.cpu_load_percent.store(percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_atomic_f32_round_trip() {
        let value = AtomicF32::new(1.5);
        assert_eq!(value.load(), 1.5);
        value.store(-0.25);
        assert_eq!(value.load(), -0.25);
    }

    #[test]
    fn test_status_shared_across_threads() {
        let status = Arc::new(StreamStatus::new());
        assert!(!status.is_running());

        let writer = Arc::clone(&status);
        std::thread::spawn(move || {
            writer.set_running(true);
            writer.set_cpu_load_percent(12.5);
            writer.set_latency_ms(4.0);
        })
        .join()
        .unwrap();

        assert!(status.is_running());
        assert_eq!(status.cpu_load_percent(), 12.5);
        assert_eq!(status.latency_ms(), 4.0);
    }
}
