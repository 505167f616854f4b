//! RPC capability boundary
//!
//! Arguments and replies are opaque JSON trees; only the handful of fields the
//! bridge correlates on are ever looked at.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use super::{TransportError, DEFAULT_REQUEST_TIMEOUT_SECS};

/// Basic-auth credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Credentials only when both parts are present and non-empty
    pub fn from_parts(user: Option<String>, password: Option<String>) -> Option<Self> {
        match (user, password) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some(Self::new(user, password))
            }
            _ => None,
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Options applied when a backend builds a client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Upper bound on a single call
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: format!("ScaleBridge/{}", crate::VERSION),
        }
    }
}

/// Factory for RPC clients
#[async_trait]
pub trait RpcBackend: Send + Sync {
    /// Build a client for the service at `descriptor`
    async fn create_client(
        &self,
        descriptor: &str,
        options: &ClientOptions,
    ) -> Result<Box<dyn RpcClient>, TransportError>;

    /// Short name for logs and status
    fn name(&self) -> &'static str;
}

/// A connected RPC client
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Attach basic-auth credentials to every later call
    fn set_basic_auth(&mut self, credentials: &Credentials) -> Result<(), TransportError>;

    /// Invoke a remote operation
    async fn invoke(&self, operation: &str, args: Value) -> Result<Value, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_need_both_parts() {
        assert!(Credentials::from_parts(Some("u".into()), Some("p".into())).is_some());
        assert!(Credentials::from_parts(Some("u".into()), None).is_none());
        assert!(Credentials::from_parts(Some("u".into()), Some(String::new())).is_none());
        assert!(Credentials::from_parts(None, Some("p".into())).is_none());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("RFC_USER", "hunter2");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("RFC_USER"));
        assert!(!shown.contains("hunter2"));
    }
}
