//! Bridge configuration
//!
//! Built from a key lookup (normally the process environment) and validated
//! once at startup. Any [`ConfigError`] is fatal.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::device::DeviceSettings;
use crate::gateway::{Credentials, GatewaySettings};
use crate::scheduler::DEFAULT_POLL_INTERVAL_SECS;

/// Baud rates accepted for the scale port
pub const VALID_BAUD_RATES: [u32; 12] = [
    110, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115200,
];

/// Environment names that are recognised without a warning
const KNOWN_ENVIRONMENTS: [&str; 4] = ["development", "production", "test", "MOCKS"];

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid baud rate: {0}. Valid rates: {rates}", rates = valid_rates_list())]
    InvalidBaudRate(u32),

    #[error("Invalid URL format for {key}: {value}")]
    InvalidUrl { key: String, value: String },
}

fn valid_rates_list() -> String {
    VALID_BAUD_RATES
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Which gateway backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Real SOAP endpoint, credentials required
    Production,
    /// Fake gateway for development
    Mocks,
}

impl RunMode {
    /// Mode selected by an environment name; only `MOCKS` selects mocks
    pub fn from_environment(name: Option<&str>) -> Self {
        match name {
            Some(name) if name.trim().eq_ignore_ascii_case("mocks") => RunMode::Mocks,
            _ => RunMode::Production,
        }
    }

    pub fn is_dev(&self) -> bool {
        *self == RunMode::Mocks
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub poll_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

impl SchedulerSettings {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub workstation_id: String,
    pub mode: RunMode,
    /// Raw environment name, kept for the unknown-environment warning
    pub environment: Option<String>,
    /// Read from the built-in simulator instead of a serial port
    pub simulate_scale: bool,
    /// Log available serial ports at startup
    pub debug_ports: bool,
    /// Reply served by the fake gateway for polls
    pub mock_request_file: Option<PathBuf>,
    pub soap_url: Option<String>,
    pub soap_user: Option<String>,
    pub soap_password: Option<String>,
    pub device: DeviceSettings,
    pub gateway: GatewaySettings,
    pub scheduler: SchedulerSettings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            workstation_id: String::new(),
            mode: RunMode::Production,
            environment: None,
            simulate_scale: false,
            debug_ports: false,
            mock_request_file: None,
            soap_url: None,
            soap_user: None,
            soap_password: None,
            device: DeviceSettings::default(),
            gateway: GatewaySettings::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

/// Redacted view of the configuration for the startup log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub workstation_id: String,
    pub environment: String,
    pub serial_port: String,
    pub baud_rate: u32,
    pub simulated_scale: bool,
    pub soap_url: String,
    pub soap_user: String,
    pub poll_interval_secs: u64,
    pub read_timeout_ms: u64,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_number<T>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_flag(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

fn port_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^COM\d+$|^/dev/(tty|cu)").expect("valid port name pattern")
    })
}

fn ensure_positive(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

impl BridgeConfig {
    /// Build the configuration from a key lookup
    ///
    /// Empty values count as unset. Only parse errors are reported here; call
    /// [`validate`](Self::validate) for the remaining rules.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));
        let defaults = Self::default();

        let environment = get("SCALEBRIDGE_MODE").or_else(|| get("NODE_ENV"));
        let mode = RunMode::from_environment(environment.as_deref());

        let device = DeviceSettings {
            port_name: get("SERIAL_PORT_NAME").unwrap_or(defaults.device.port_name),
            baud_rate: parse_number("BAUD_RATE", get("BAUD_RATE"), defaults.device.baud_rate)?,
            connection_timeout_ms: parse_number(
                "CONNECT_TIMEOUT_MS",
                get("CONNECT_TIMEOUT_MS"),
                defaults.device.connection_timeout_ms,
            )?,
            read_timeout_ms: parse_number(
                "READ_TIMEOUT_MS",
                get("READ_TIMEOUT_MS"),
                defaults.device.read_timeout_ms,
            )?,
        };

        let soap_url = get("SOAP_URL");
        let soap_user = get("SOAP_USER");
        let soap_password = get("SOAP_PASSWORD");

        let gateway = GatewaySettings {
            endpoint: soap_url.clone().unwrap_or_else(|| match mode {
                RunMode::Mocks => "mocks".to_string(),
                RunMode::Production => String::new(),
            }),
            credentials: Credentials::from_parts(soap_user.clone(), soap_password.clone()),
            max_attempts: parse_number(
                "GATEWAY_RETRIES",
                get("GATEWAY_RETRIES"),
                defaults.gateway.max_attempts,
            )?,
            retry_delay_ms: parse_number(
                "GATEWAY_RETRY_DELAY_MS",
                get("GATEWAY_RETRY_DELAY_MS"),
                defaults.gateway.retry_delay_ms,
            )?,
            request_timeout_secs: defaults.gateway.request_timeout_secs,
        };

        let scheduler = SchedulerSettings {
            poll_interval_secs: parse_number(
                "POLL_INTERVAL_SECS",
                get("POLL_INTERVAL_SECS"),
                defaults.scheduler.poll_interval_secs,
            )?,
        };

        Ok(Self {
            workstation_id: get("WORKSTATION_ID").unwrap_or_default(),
            mode,
            environment,
            simulate_scale: parse_flag(get("SCALE_SIMULATED")),
            debug_ports: parse_flag(get("DEBUG_PORTS")),
            mock_request_file: get("MOCK_REQUEST_FILE").map(PathBuf::from),
            soap_url,
            soap_user,
            soap_password,
            device,
            gateway,
            scheduler,
        })
    }

    /// Check every rule; the first violation is returned
    pub fn validate(&self) -> Result<(), ConfigError> {
        tracing::info!("Validating application configuration");

        let mut missing = Vec::new();
        if self.workstation_id.trim().is_empty() {
            missing.push("WORKSTATION_ID".to_string());
        }
        if self.mode == RunMode::Production {
            for (key, value) in [
                ("SOAP_USER", &self.soap_user),
                ("SOAP_PASSWORD", &self.soap_password),
                ("SOAP_URL", &self.soap_url),
            ] {
                if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                    missing.push(key.to_string());
                }
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }

        if let Some(url) = &self.soap_url {
            let valid = reqwest::Url::parse(url)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !valid {
                return Err(ConfigError::InvalidUrl {
                    key: "SOAP_URL".to_string(),
                    value: url.clone(),
                });
            }
        }

        if self.device.port_name.trim().is_empty() {
            return Err(ConfigError::MissingKeys(vec!["SERIAL_PORT_NAME".to_string()]));
        }
        if !port_name_pattern().is_match(&self.device.port_name) {
            tracing::warn!(port = %self.device.port_name, "Serial port name may not be valid");
        }

        if !VALID_BAUD_RATES.contains(&self.device.baud_rate) {
            return Err(ConfigError::InvalidBaudRate(self.device.baud_rate));
        }

        ensure_positive("CONNECT_TIMEOUT_MS", self.device.connection_timeout_ms)?;
        ensure_positive("READ_TIMEOUT_MS", self.device.read_timeout_ms)?;
        ensure_positive("POLL_INTERVAL_SECS", self.scheduler.poll_interval_secs)?;
        ensure_positive("GATEWAY_RETRIES", u64::from(self.gateway.max_attempts))?;

        if let Some(env) = &self.environment {
            if !KNOWN_ENVIRONMENTS.contains(&env.as_str()) {
                tracing::warn!(environment = %env, "Unknown environment");
            }
        }

        tracing::info!("Configuration validation completed successfully");
        Ok(())
    }

    /// Redacted summary for logging
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            workstation_id: self.workstation_id.clone(),
            environment: match self.mode {
                RunMode::Mocks => "development (mocks)".to_string(),
                RunMode::Production => "production".to_string(),
            },
            serial_port: self.device.port_name.clone(),
            baud_rate: self.device.baud_rate,
            simulated_scale: self.simulate_scale,
            soap_url: self
                .soap_url
                .clone()
                .unwrap_or_else(|| "not configured".to_string()),
            soap_user: if self.soap_user.is_some() {
                "***configured***".to_string()
            } else {
                "not configured".to_string()
            },
            poll_interval_secs: self.scheduler.poll_interval_secs,
            read_timeout_ms: self.device.read_timeout_ms,
        }
    }
}
