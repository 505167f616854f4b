//! Response classification
//!
//! Maps the outcome of one poll cycle onto the payload SAP expects: either a
//! fixed-point weight or one of three error codes.

use serde::Serialize;
use std::fmt;

use crate::device::{format_weight, WeightReading};

/// Error codes understood by the SAP side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResponseCode {
    /// Scale unreachable, timed out, busy, or any other failure
    E001,
    /// The scale answered but no weight could be recovered
    E002,
    /// The scale reported exactly zero
    E003,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::E001 => "E001",
            ResponseCode::E002 => "E002",
            ResponseCode::E003 => "E003",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value sent back in the `RESPONSE` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// Weight as `NNN.NNN`
    Weight(String),
    /// Classified failure
    Code(ResponseCode),
}

impl ResponsePayload {
    pub fn as_str(&self) -> &str {
        match self {
            ResponsePayload::Weight(w) => w,
            ResponsePayload::Code(code) => code.as_str(),
        }
    }

    pub fn is_weight(&self) -> bool {
        matches!(self, ResponsePayload::Weight(_))
    }
}

impl fmt::Display for ResponsePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ResponseCode> for ResponsePayload {
    fn from(code: ResponseCode) -> Self {
        ResponsePayload::Code(code)
    }
}

/// What happened in one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The gateway had nothing for this workstation
    NoPendingRequest,
    /// The scale produced a reading
    Success(WeightReading),
    /// The read window closed without any output
    NoReading,
    /// The scale reported exactly zero
    ZeroReading,
    /// The scale could not be reached or read
    DeviceError(String),
    /// The gateway could not be reached or called
    GatewayError(String),
}

impl CycleOutcome {
    /// Outcome of a completed read
    pub fn from_reading(reading: WeightReading) -> Self {
        if reading.is_empty() {
            CycleOutcome::NoReading
        } else if reading.is_zero() {
            CycleOutcome::ZeroReading
        } else {
            CycleOutcome::Success(reading)
        }
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::NoPendingRequest => "no_pending_request",
            CycleOutcome::Success(_) => "success",
            CycleOutcome::NoReading => "no_reading",
            CycleOutcome::ZeroReading => "zero_reading",
            CycleOutcome::DeviceError(_) => "device_error",
            CycleOutcome::GatewayError(_) => "gateway_error",
        }
    }
}

/// Map a cycle outcome to the payload sent back to SAP
///
/// | outcome                          | payload   |
/// |----------------------------------|-----------|
/// | weight present and not zero      | `NNN.NNN` |
/// | weight absent, or no reading     | `E002`    |
/// | weight zero                      | `E003`    |
/// | device error, anything else      | `E001`    |
pub fn classify(outcome: &CycleOutcome) -> ResponsePayload {
    match outcome {
        CycleOutcome::Success(reading) => match reading.numeric_weight {
            Some(w) if w != 0.0 => ResponsePayload::Weight(
                reading
                    .weight_text
                    .clone()
                    .unwrap_or_else(|| format_weight(w)),
            ),
            Some(_) => ResponseCode::E003.into(),
            None => ResponseCode::E002.into(),
        },
        CycleOutcome::NoReading => ResponseCode::E002.into(),
        CycleOutcome::ZeroReading => ResponseCode::E003.into(),
        CycleOutcome::DeviceError(_)
        | CycleOutcome::GatewayError(_)
        | CycleOutcome::NoPendingRequest => ResponseCode::E001.into(),
    }
}
