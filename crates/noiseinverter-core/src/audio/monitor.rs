//! Background stream health monitor
//!
//! A dedicated thread wakes once per interval while the stream is running.
//! It samples the callback CPU load, refreshes the measured latency, records
//! both in the [`HealthStore`] and logs a status line. It waits on a channel rather than sleeping so that
//! [`HealthMonitor::stop`] returns as soon as the thread sees the signal.

use crate::audio::device::{LatencyProbe, LoadProbe};
use crate::audio::engine::EngineCounters;
use crate::audio::status::StreamStatus;
use crate::error::{EngineError, Result};
use crate::stats::store::HealthStore;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Minimum spacing between status log lines
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Everything the monitor thread reads or writes
pub struct MonitorContext {
    /// Shared running flag and measurements
    pub status: Arc<StreamStatus>,
    /// CPU load source of the open stream
    pub probe: Arc<dyn LoadProbe>,
    /// Latency source of the open stream
    pub latency: Arc<dyn LatencyProbe>,
    /// History the samples are recorded into
    pub health: Arc<Mutex<HealthStore>>,
    /// Buffer/frame counters of the engine
    pub counters: Arc<EngineCounters>,
}

/// Handle to the running monitor thread
///
/// Dropping the handle stops and joins the thread.
pub struct HealthMonitor {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawn the monitor thread
    ///
    /// # Arguments
    /// * `context` - Shared state to sample and record into
    /// * `interval` - Time between samples
    pub fn spawn(context: MonitorContext, interval: Duration) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("health-monitor".into())
            .spawn(move || {
                tracing::debug!(interval_ms = interval.as_millis() as u64, "Health monitor started");
                let mut last_log = Instant::now();

                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    if !context.status.is_running() {
                        continue;
                    }

                    Self::sample(&context);

                    if last_log.elapsed() >= STATUS_LOG_INTERVAL {
                        tracing::info!(
                            latency_ms = context.status.latency_ms(),
                            buffers = context.counters.buffers(),
                            "Stream status: CPU load {:.1}%",
                            context.status.cpu_load_percent()
                        );
                        last_log = Instant::now();
                    }
                }

                tracing::debug!("Health monitor stopped");
            })
            .map_err(|e| EngineError::Monitor(format!("failed to spawn thread: {}", e)))?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    fn sample(context: &MonitorContext) {
        match context.probe.cpu_load() {
            Ok(load) => context.status.set_cpu_load_percent(load * 100.0),
            Err(e) => {
                let err = EngineError::Monitor(e.to_string());
                tracing::warn!(error = %err, "CPU load query failed");
            }
        }
        context
            .status
            .set_latency_ms(context.latency.stream_info().total_latency_ms());

        let mut health = match context.health.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        health.record(context.status.cpu_load_percent(), context.status.latency_ms());
    }

    /// Whether the thread is still alive
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Health monitor thread panicked");
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::StreamInfo;
    use crate::error::DeviceError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FixedProbe {
        load: f32,
        calls: AtomicUsize,
    }

    impl LoadProbe for FixedProbe {
        fn cpu_load(&self) -> std::result::Result<f32, DeviceError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(self.load)
        }
    }

    struct FailingProbe;

    impl LoadProbe for FailingProbe {
        fn cpu_load(&self) -> std::result::Result<f32, DeviceError> {
            Err(DeviceError::Query("driver gone".into()))
        }
    }

    /// Latency that changes once the first callbacks have run
    struct SettlingLatency {
        settled: AtomicBool,
    }

    impl LatencyProbe for SettlingLatency {
        fn stream_info(&self) -> StreamInfo {
            let secs = if self.settled.load(Ordering::Relaxed) {
                0.006
            } else {
                0.0002
            };
            StreamInfo {
                input_latency_secs: secs,
                output_latency_secs: secs,
            }
        }
    }

    fn context(probe: Arc<dyn LoadProbe>, running: bool) -> MonitorContext {
        let status = Arc::new(StreamStatus::new());
        status.set_running(running);
        MonitorContext {
            status,
            probe,
            latency: Arc::new(StreamInfo {
                input_latency_secs: 0.002,
                output_latency_secs: 0.002,
            }),
            health: Arc::new(Mutex::new(HealthStore::new())),
            counters: Arc::new(EngineCounters::default()),
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_samples_cpu_load_while_running() {
        let probe = Arc::new(FixedProbe {
            load: 0.25,
            calls: AtomicUsize::new(0),
        });
        let ctx = context(probe.clone(), true);
        let status = Arc::clone(&ctx.status);
        let health = Arc::clone(&ctx.health);

        let monitor = HealthMonitor::spawn(ctx, Duration::from_millis(10)).unwrap();
        assert!(wait_for(|| health.lock().unwrap().summary().sample_count >= 2));
        monitor.stop();

        assert_eq!(status.cpu_load_percent(), 25.0);
        let summary = health.lock().unwrap().summary().clone();
        assert_eq!(summary.current_cpu_load, 25.0);
        assert_eq!(summary.latency_ms, 4.0);
    }

    #[test]
    fn test_latency_is_refreshed_each_tick() {
        let latency = Arc::new(SettlingLatency {
            settled: AtomicBool::new(false),
        });
        let mut ctx = context(Arc::new(FailingProbe), true);
        ctx.latency = latency.clone();
        let status = Arc::clone(&ctx.status);

        let monitor = HealthMonitor::spawn(ctx, Duration::from_millis(5)).unwrap();
        assert!(wait_for(|| (status.latency_ms() - 0.4).abs() < 1e-4));

        latency.settled.store(true, Ordering::Relaxed);
        assert!(wait_for(|| (status.latency_ms() - 12.0).abs() < 1e-4));
        monitor.stop();
    }

    #[test]
    fn test_idle_stream_is_not_sampled() {
        let probe = Arc::new(FixedProbe {
            load: 0.5,
            calls: AtomicUsize::new(0),
        });
        let ctx = context(probe.clone(), false);
        let monitor = HealthMonitor::spawn(ctx, Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(50));
        monitor.stop();
        assert_eq!(probe.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_probe_errors_do_not_stop_the_loop() {
        let ctx = context(Arc::new(FailingProbe), true);
        let health = Arc::clone(&ctx.health);
        let monitor = HealthMonitor::spawn(ctx, Duration::from_millis(5)).unwrap();
        assert!(wait_for(|| health.lock().unwrap().summary().sample_count >= 3));
        assert!(monitor.is_active());
        monitor.stop();
    }

    #[test]
    fn test_stop_is_prompt_with_long_interval() {
        let ctx = context(Arc::new(FailingProbe), true);
        let monitor = HealthMonitor::spawn(ctx, Duration::from_secs(60)).unwrap();

        let started = Instant::now();
        monitor.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_drop_joins_thread() {
        let ctx = context(Arc::new(FailingProbe), true);
        let monitor = HealthMonitor::spawn(ctx, Duration::from_secs(60)).unwrap();
        let started = Instant::now();
        drop(monitor);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
