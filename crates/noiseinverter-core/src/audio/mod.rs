//! Audio processing module
//!
//! This module contains all audio-related functionality including:
//! - Per-buffer filter/delay/mix processing ([`engine`])
//! - Stream lifecycle, tuning and calibration ([`controller`])
//! - Device layer contract and descriptors ([`device`])
//! - Background health monitoring ([`monitor`])
//! - Lock-free visualization snapshots ([`snapshot`])
//! - cpal and simulated device layers ([`cpal_backend`], [`simulated`])

pub mod controller;
pub mod cpal_backend;
pub mod device;
pub mod engine;
pub mod load;
pub mod monitor;
pub mod simulated;
pub mod snapshot;
pub mod status;
