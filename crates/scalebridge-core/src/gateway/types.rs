//! Request and response records exchanged with the gateway

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::classify::ResponsePayload;

/// A pending "read the scale" request
///
/// `datum` and `uzeit` are kept exactly as received; they are echoed back so
/// SAP can correlate the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub workstation_id: String,
    pub param_id: String,
    pub datum: String,
    pub uzeit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_code: Option<String>,
}

impl PendingRequest {
    /// Request date, if `datum` is `YYYY-MM-DD` or `YYYYMMDD`
    pub fn date(&self) -> Option<NaiveDate> {
        let datum = self.datum.trim();
        NaiveDate::parse_from_str(datum, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(datum, "%Y%m%d"))
            .ok()
    }

    /// Request time, if `uzeit` is `HH:MM:SS` or `HHMMSS`
    pub fn time(&self) -> Option<NaiveTime> {
        let uzeit = self.uzeit.trim();
        NaiveTime::parse_from_str(uzeit, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(uzeit, "%H%M%S"))
            .ok()
    }
}

/// Decoded reply of the request operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReply {
    /// Non-zero SUBRC
    NoRequest { subrc: i64 },
    Request(PendingRequest),
}

/// Field as text, accepting strings and numbers
///
/// Strings are kept verbatim; they are echoed back for correlation.
fn text_field(record: &Map<String, Value>, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_subrc(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl PollReply {
    /// Decode the request operation's reply
    ///
    /// A missing `PARAMID` in the record falls back to `workstation_id`, the
    /// value that was sent.
    pub fn parse(workstation_id: &str, reply: &Value) -> Result<Self, String> {
        let body = match reply {
            Value::Object(body) if !body.is_empty() => body,
            Value::Null => return Err("Empty reply".to_string()),
            Value::Object(_) => return Err("Empty reply".to_string()),
            other => return Err(format!("Unexpected reply: {}", other)),
        };

        let subrc = body
            .get("SUBRC")
            .ok_or_else(|| "Reply has no SUBRC".to_string())
            .and_then(|v| parse_subrc(v).ok_or_else(|| format!("Invalid SUBRC: {}", v)))?;

        if subrc != 0 {
            return Ok(PollReply::NoRequest { subrc });
        }

        let record = match body.get("REQUEST") {
            Some(Value::Object(record)) => record,
            // Single-row tables sometimes arrive wrapped in an array
            Some(Value::Array(rows)) => match rows.first() {
                Some(Value::Object(record)) => record,
                _ => return Err("REQUEST record is empty".to_string()),
            },
            _ => return Err("SUBRC is 0 but the reply has no REQUEST record".to_string()),
        };

        Ok(PollReply::Request(PendingRequest {
            workstation_id: workstation_id.to_string(),
            param_id: text_field(record, "PARAMID").unwrap_or_else(|| workstation_id.to_string()),
            datum: text_field(record, "DATUM").unwrap_or_default(),
            uzeit: text_field(record, "UZEIT").unwrap_or_default(),
            function_code: text_field(record, "FUNCTION"),
        }))
    }
}

/// Arguments of the response operation for `request`
pub fn response_args(request: &PendingRequest, payload: &ResponsePayload) -> Value {
    json!({
        "RESPONSE": {
            "PARAMID": request.param_id,
            "DATUM": request.datum,
            "UZEIT": request.uzeit,
            "RESPONSE": payload.as_str(),
        }
    })
}
