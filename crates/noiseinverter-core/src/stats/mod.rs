//! Health statistics storage
//!
//! Stores CPU load and latency samples taken by the health monitor.

pub mod store;
