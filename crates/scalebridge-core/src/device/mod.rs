//! Scale Communication
//!
//! Owns the single serial connection to the weighing scale: bounded connect,
//! timed single-shot reads, and numeric weight extraction.
//!
//! The port itself sits behind [`SerialTransport`] so the link can run against
//! real hardware ([`TokioSerialTransport`]), the built-in simulator
//! ([`SimulatedScaleTransport`]) or a test double.

mod error;
mod link;
pub mod serial;
pub mod simulated;
pub mod transport;
pub mod weight;

pub use error::DeviceError;
pub use link::{ConnectionState, DeviceLink, DeviceSettings, DeviceStatus};
pub use serial::{list_ports, PortInfo, TokioSerialTransport};
pub use simulated::{ScaleSimulator, SimulatedScaleTransport};
pub use transport::{PortControl, PortEvent, PortHandle, SerialTransport};
pub use weight::{extract_weight, format_weight, WeightReading};

/// Default baud rate for scale communication
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default serial port name
pub const DEFAULT_PORT_NAME: &str = "COM2";

/// Default bound on opening the port, in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Default length of one reading window, in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;
