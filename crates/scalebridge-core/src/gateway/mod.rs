//! SAP RPC gateway
//!
//! The gateway is reached through an [`RpcBackend`] chosen once at startup:
//! [`SoapBackend`] talks SOAP over HTTP to the real system, [`FakeBackend`]
//! answers locally for development. [`GatewayClient`] owns the connection
//! state on top of whichever backend it was given.

mod client;
mod error;
pub mod fake;
pub mod rpc;
pub mod soap;
mod types;

pub use client::{GatewayClient, GatewaySettings, GatewayState, GatewayStatus, RetryBudget};
pub use error::{GatewayError, TransportError};
pub use fake::FakeBackend;
pub use rpc::{ClientOptions, Credentials, RpcBackend, RpcClient};
pub use soap::SoapBackend;
pub use types::{response_args, PendingRequest, PollReply};

/// Operation that asks whether a reading is pending
pub const OP_REQUEST: &str = "ZRFC_BALANZA_DIGITAL_REQUEST";

/// Operation that delivers the reading (or error code)
pub const OP_RESPONSE: &str = "ZRFC_BALANZA_DIGITAL_RESPONSE";

/// Default number of connection attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay between connection attempts, in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default HTTP request timeout, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
