//! Gateway errors

use thiserror::Error;

/// Failures reported by an RPC backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("SOAP fault {code}: {message}")]
    Fault { code: String, message: String },

    #[error("Malformed reply: {0}")]
    Malformed(String),

    #[error("Credentials rejected: {0}")]
    Credentials(String),

    #[error("Unknown operation {0}")]
    UnknownOperation(String),
}

/// Errors raised by [`GatewayClient`](super::GatewayClient)
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Failed to connect to RPC gateway at {endpoint} after {attempts} attempt(s): {source}")]
    Connection {
        endpoint: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("RPC authentication failed for user: {user}")]
    Authentication {
        user: String,
        #[source]
        source: TransportError,
    },

    #[error("RPC call {operation} failed: {message}")]
    Call { operation: String, message: String },

    #[error("RPC gateway not connected")]
    NotConnected,
}

impl GatewayError {
    pub(crate) fn call(operation: &str, message: impl Into<String>) -> Self {
        GatewayError::Call {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// True for failures that retrying cannot fix
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Authentication { .. })
    }
}
