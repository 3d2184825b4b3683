//! Error types shared across the core
//!
//! Device failures are reported once to the caller and never retried.
//! Monitor failures are logged by the health monitor and never escape it.
//! The real-time path has no error type at all; it reports a
//! [`CallbackStatus`](crate::audio::device::CallbackStatus).

use crate::audio::device::DeviceId;
use thiserror::Error;

/// Failure reported by a [`DeviceLayer`](crate::audio::device::DeviceLayer)
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to enumerate devices: {0}")]
    Enumerate(String),

    #[error("Failed to open stream: {0}")]
    Open(String),

    #[error("Failed to start stream: {0}")]
    Start(String),

    #[error("Failed to stop stream: {0}")]
    Stop(String),

    #[error("Failed to close stream: {0}")]
    Close(String),

    #[error("Stream query failed: {0}")]
    Query(String),
}

/// Errors that can occur during stream controller operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("Health monitor error: {0}")]
    Monitor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the core
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::Direction;

    #[test]
    fn test_device_error_wraps_transparently() {
        let err: EngineError = DeviceError::Open("busy".to_string()).into();
        assert_eq!(err.to_string(), "Failed to open stream: busy");
    }

    #[test]
    fn test_device_not_found_shows_numeric_id() {
        let err = EngineError::DeviceNotFound(DeviceId::new(3, Direction::Output));
        assert_eq!(err.to_string(), "Device not found: 1003");
    }
}
