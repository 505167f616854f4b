//! Local stand-in for the SAP gateway
//!
//! Every poll returns a pending request, either read from a JSON file or built
//! on the fly with the current date and time. Responses are acknowledged and
//! logged.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;

use super::rpc::{ClientOptions, Credentials, RpcBackend, RpcClient};
use super::{TransportError, OP_REQUEST, OP_RESPONSE};

/// Development backend, selected in mocks mode
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    request_file: Option<PathBuf>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer polls with the reply stored in `path`
    pub fn with_request_file(path: impl Into<PathBuf>) -> Self {
        Self {
            request_file: Some(path.into()),
        }
    }
}

#[async_trait]
impl RpcBackend for FakeBackend {
    async fn create_client(
        &self,
        descriptor: &str,
        _options: &ClientOptions,
    ) -> Result<Box<dyn RpcClient>, TransportError> {
        tracing::debug!(descriptor, "Creating fake RPC client");
        Ok(Box::new(FakeClient {
            request_file: self.request_file.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

struct FakeClient {
    request_file: Option<PathBuf>,
}

impl FakeClient {
    async fn pending_request(&self, args: &Value) -> Result<Value, TransportError> {
        if let Some(path) = &self.request_file {
            let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                TransportError::Malformed(format!("cannot read {}: {}", path.display(), e))
            })?;
            return serde_json::from_str(&raw).map_err(|e| {
                TransportError::Malformed(format!("invalid JSON in {}: {}", path.display(), e))
            });
        }

        let now = chrono::Local::now();
        Ok(json!({
            "SUBRC": 0,
            "REQUEST": {
                "PARAMID": args.get("PARAMID").cloned().unwrap_or(Value::Null),
                "DATUM": now.format("%Y-%m-%d").to_string(),
                "UZEIT": now.format("%H:%M:%S").to_string(),
            }
        }))
    }
}

#[async_trait]
impl RpcClient for FakeClient {
    fn set_basic_auth(&mut self, _credentials: &Credentials) -> Result<(), TransportError> {
        Ok(())
    }

    async fn invoke(&self, operation: &str, args: Value) -> Result<Value, TransportError> {
        match operation {
            OP_REQUEST => self.pending_request(&args).await,
            OP_RESPONSE => {
                tracing::info!(response = %args, "Fake gateway accepted response");
                Ok(json!({}))
            }
            other => Err(TransportError::UnknownOperation(other.to_string())),
        }
    }
}
