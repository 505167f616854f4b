//! Gateway connection management

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::rpc::{ClientOptions, Credentials, RpcBackend, RpcClient};
use super::types::{response_args, PendingRequest, PollReply};
use super::{
    GatewayError, TransportError, DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_RETRY_DELAY_MS, OP_REQUEST, OP_RESPONSE,
};
use crate::classify::ResponsePayload;

/// Gateway connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayState {
    Disconnected,
    Connecting,
    Connected,
}

/// Gateway client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Service descriptor handed to the backend (the SOAP endpoint URL)
    pub endpoint: String,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    /// Connection attempts before giving up
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Bound on a single call in seconds
    pub request_timeout_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            credentials: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl GatewaySettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn client_options(&self) -> ClientOptions {
        ClientOptions {
            request_timeout: self.request_timeout(),
            ..ClientOptions::default()
        }
    }
}

/// Attempt counter for one connect
///
/// The delay before attempt `n + 1` is `n * base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    attempt: u32,
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryBudget {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempt: 1,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Current attempt, starting at 1
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Delay to wait after the current attempt fails
    pub fn backoff(&self) -> Duration {
        self.base_delay * self.attempt
    }

    pub fn advance(&mut self) {
        self.attempt += 1;
    }
}

/// Snapshot of the client for health reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub state: GatewayState,
    pub backend: String,
    pub endpoint: String,
    pub user: Option<String>,
}

/// Why one connection attempt failed
enum AttemptFailure {
    Transport(TransportError),
    Auth(TransportError),
}

/// Client for the SAP RPC gateway
///
/// Holds at most one live RPC client. Any failed call drops it; the next
/// [`connect`](Self::connect) builds a fresh one.
pub struct GatewayClient {
    settings: GatewaySettings,
    backend: Arc<dyn RpcBackend>,
    state: Mutex<GatewayState>,
    client: tokio::sync::Mutex<Option<Arc<dyn RpcClient>>>,
}

impl GatewayClient {
    pub fn new(settings: GatewaySettings, backend: Arc<dyn RpcBackend>) -> Self {
        Self {
            settings,
            backend,
            state: Mutex::new(GatewayState::Disconnected),
            client: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> GatewayState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: GatewayState) {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    pub fn is_connected(&self) -> bool {
        self.state() == GatewayState::Connected
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            state: self.state(),
            backend: self.backend.name().to_string(),
            endpoint: self.settings.endpoint.clone(),
            user: self.settings.credentials.as_ref().map(|c| c.user.clone()),
        }
    }

    async fn attempt_connect(&self) -> Result<Box<dyn RpcClient>, AttemptFailure> {
        let mut client = self
            .backend
            .create_client(&self.settings.endpoint, &self.settings.client_options())
            .await
            .map_err(AttemptFailure::Transport)?;

        if let Some(credentials) = &self.settings.credentials {
            client
                .set_basic_auth(credentials)
                .map_err(AttemptFailure::Auth)?;
            tracing::debug!(user = %credentials.user, "RPC authentication configured");
        }
        Ok(client)
    }

    /// Connect to the gateway, retrying with linear backoff
    ///
    /// Returns the existing client when already connected. Authentication
    /// failures are not retried.
    pub async fn connect(&self) -> Result<Arc<dyn RpcClient>, GatewayError> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }

        self.set_state(GatewayState::Connecting);
        let mut budget = RetryBudget::new(self.settings.max_attempts, self.settings.retry_delay());

        loop {
            tracing::info!(
                attempt = budget.attempt(),
                max_attempts = budget.max_attempts(),
                backend = self.backend.name(),
                "Attempting RPC gateway connection"
            );

            match self.attempt_connect().await {
                Ok(client) => {
                    let client: Arc<dyn RpcClient> = Arc::from(client);
                    *slot = Some(Arc::clone(&client));
                    self.set_state(GatewayState::Connected);
                    tracing::info!(endpoint = %self.settings.endpoint, "RPC gateway connected");
                    return Ok(client);
                }
                Err(AttemptFailure::Auth(source)) => {
                    self.set_state(GatewayState::Disconnected);
                    let user = self
                        .settings
                        .credentials
                        .as_ref()
                        .map(|c| c.user.clone())
                        .unwrap_or_default();
                    tracing::error!(user = %user, error = %source, "RPC authentication failed");
                    return Err(GatewayError::Authentication { user, source });
                }
                Err(AttemptFailure::Transport(source)) => {
                    tracing::warn!(
                        attempt = budget.attempt(),
                        error = %source,
                        "RPC gateway connection attempt failed"
                    );
                    if budget.is_exhausted() {
                        self.set_state(GatewayState::Disconnected);
                        return Err(GatewayError::Connection {
                            endpoint: self.settings.endpoint.clone(),
                            attempts: budget.attempt(),
                            source,
                        });
                    }
                    tokio::time::sleep(budget.backoff()).await;
                    budget.advance();
                }
            }
        }
    }

    /// Forget `client` if it is still the live one
    async fn drop_client(&self, client: &Arc<dyn RpcClient>) {
        let mut slot = self.client.lock().await;
        if slot.as_ref().is_some_and(|live| Arc::ptr_eq(live, client)) {
            slot.take();
            self.set_state(GatewayState::Disconnected);
            tracing::warn!("RPC gateway connection dropped after failed call");
        }
    }

    async fn call(&self, operation: &str, args: Value) -> Result<Value, GatewayError> {
        let client = self
            .client
            .lock()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(GatewayError::NotConnected)?;

        tracing::debug!(operation, args = %args, "Invoking RPC operation");
        match client.invoke(operation, args).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                self.drop_client(&client).await;
                Err(GatewayError::call(operation, e.to_string()))
            }
        }
    }

    /// Ask the gateway whether a reading is pending for `workstation_id`
    pub async fn poll_request(
        &self,
        workstation_id: &str,
    ) -> Result<Option<PendingRequest>, GatewayError> {
        tracing::debug!(workstation_id, "Requesting scale reading");
        let reply = self
            .call(OP_REQUEST, json!({ "PARAMID": workstation_id }))
            .await?;

        match PollReply::parse(workstation_id, &reply) {
            Ok(PollReply::NoRequest { subrc }) => {
                tracing::info!(subrc, "No scale reading request pending");
                Ok(None)
            }
            Ok(PollReply::Request(request)) => {
                tracing::info!(
                    param_id = %request.param_id,
                    datum = %request.datum,
                    uzeit = %request.uzeit,
                    "Scale reading request received"
                );
                Ok(Some(request))
            }
            Err(message) => {
                let mut slot = self.client.lock().await;
                slot.take();
                self.set_state(GatewayState::Disconnected);
                Err(GatewayError::call(OP_REQUEST, message))
            }
        }
    }

    /// Deliver the classified result for `request`
    pub async fn send_response(
        &self,
        payload: &ResponsePayload,
        request: &PendingRequest,
    ) -> Result<(), GatewayError> {
        let args = response_args(request, payload);
        self.call(OP_RESPONSE, args).await?;
        tracing::info!(
            param_id = %request.param_id,
            response = %payload,
            "Scale response sent"
        );
        Ok(())
    }

    /// Release the client; idempotent
    pub async fn disconnect(&self) -> Result<(), GatewayError> {
        let released = self.client.lock().await.take();
        self.set_state(GatewayState::Disconnected);
        if released.is_some() {
            tracing::info!("RPC gateway disconnected");
        }
        Ok(())
    }
}
