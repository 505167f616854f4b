//! Device errors

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the scale
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to connect to scale on {port}: {source}")]
    Connection {
        port: String,
        #[source]
        source: Box<DeviceError>,
    },

    #[error("Serial port error: {0}")]
    Open(String),

    #[error("Timed out after {}ms on {port}", .after.as_millis())]
    Timeout { port: String, after: Duration },

    #[error("Scale reading already in progress on {0}")]
    Busy(String),

    #[error("Scale not connected on {0}")]
    NotConnected(String),

    #[error("Failed to close port {port}: {message}")]
    Close { port: String, message: String },
}

impl DeviceError {
    /// Wrap a lower-level failure as a connection error for `port`
    pub fn connection(port: &str, source: DeviceError) -> Self {
        DeviceError::Connection {
            port: port.to_string(),
            source: Box::new(source),
        }
    }

    /// True if this error (or the failure it wraps) is a timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            DeviceError::Timeout { .. } => true,
            DeviceError::Connection { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
