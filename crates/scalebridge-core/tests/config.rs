use pretty_assertions::assert_eq;
use scalebridge_core::config::{BridgeConfig, ConfigError, RunMode};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

fn load(pairs: &[(&str, &str)]) -> Result<BridgeConfig, ConfigError> {
    let env: HashMap<&str, &str> = pairs.iter().copied().collect();
    BridgeConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()))
}

const PRODUCTION: &[(&str, &str)] = &[
    ("WORKSTATION_ID", "WS01"),
    ("SOAP_USER", "RFC_USER"),
    ("SOAP_PASSWORD", "secret"),
    ("SOAP_URL", "https://sap.example.com/sap/bc/srt/rfc/sap/zbalanza"),
];

fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
    let mut pairs: Vec<_> = PRODUCTION
        .iter()
        .filter(|(k, _)| !extra.iter().any(|(e, _)| e == k))
        .copied()
        .collect();
    pairs.extend_from_slice(extra);
    pairs
}

#[test]
fn complete_production_config_is_valid() {
    let config = load(PRODUCTION).unwrap();
    config.validate().unwrap();

    assert_eq!(config.mode, RunMode::Production);
    assert_eq!(config.gateway.endpoint, PRODUCTION[3].1);
    assert_eq!(
        config.gateway.credentials.as_ref().map(|c| c.user.as_str()),
        Some("RFC_USER")
    );
}

#[test]
fn workstation_id_is_always_required() {
    let config = load(&[("NODE_ENV", "MOCKS")]).unwrap();
    assert_eq!(
        config.validate().unwrap_err(),
        ConfigError::MissingKeys(vec!["WORKSTATION_ID".to_string()])
    );
}

#[test]
fn production_requires_gateway_credentials() {
    let config = load(&[("WORKSTATION_ID", "WS01")]).unwrap();
    assert_eq!(
        config.validate().unwrap_err(),
        ConfigError::MissingKeys(vec![
            "SOAP_USER".to_string(),
            "SOAP_PASSWORD".to_string(),
            "SOAP_URL".to_string(),
        ])
    );
}

#[test]
fn mocks_mode_needs_only_workstation_id() {
    let config = load(&[("WORKSTATION_ID", "WS01"), ("NODE_ENV", "MOCKS")]).unwrap();
    config.validate().unwrap();
    assert!(config.mode.is_dev());
    assert!(config.gateway.credentials.is_none());
}

#[test]
fn bad_baud_rate_is_rejected() {
    let config = load(&with(&[("BAUD_RATE", "9601")])).unwrap();
    let err = config.validate().unwrap_err();
    assert_eq!(err, ConfigError::InvalidBaudRate(9601));
    assert!(err.to_string().contains("115200"));
}

#[test]
fn bad_url_is_rejected() {
    for url in ["sap.example.com", "ftp://sap.example.com/rfc"] {
        let config = load(&with(&[("SOAP_URL", url)])).unwrap();
        assert!(
            matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })),
            "{url}"
        );
    }
}

#[test]
fn zero_durations_are_rejected() {
    for key in ["POLL_INTERVAL_SECS", "READ_TIMEOUT_MS", "CONNECT_TIMEOUT_MS", "GATEWAY_RETRIES"] {
        let config = load(&with(&[(key, "0")])).unwrap();
        assert!(
            matches!(config.validate(), Err(ConfigError::InvalidValue { key: ref k, .. }) if k == key),
            "{key}"
        );
    }
}

#[test]
fn unusual_port_name_only_warns() {
    let config = load(&with(&[("SERIAL_PORT_NAME", "scale-usb")])).unwrap();
    config.validate().unwrap();
}

#[test]
fn overrides_are_applied() {
    let config = load(&with(&[
        ("SERIAL_PORT_NAME", "/dev/ttyUSB0"),
        ("BAUD_RATE", "19200"),
        ("POLL_INTERVAL_SECS", "30"),
        ("READ_TIMEOUT_MS", "2500"),
        ("GATEWAY_RETRY_DELAY_MS", "250"),
        ("SCALE_SIMULATED", "true"),
        ("MOCK_REQUEST_FILE", "/tmp/request.json"),
    ]))
    .unwrap();

    assert_eq!(config.device.port_name, "/dev/ttyUSB0");
    assert_eq!(config.device.baud_rate, 19200);
    assert_eq!(config.scheduler.period(), Duration::from_secs(30));
    assert_eq!(config.device.read_timeout(), Duration::from_millis(2500));
    assert_eq!(config.gateway.retry_delay(), Duration::from_millis(250));
    assert!(config.simulate_scale);
    assert_eq!(config.mock_request_file, Some(PathBuf::from("/tmp/request.json")));
}

#[test]
fn summary_redacts_credentials() {
    let config = load(PRODUCTION).unwrap();
    let json = serde_json::to_string(&config.summary()).unwrap();

    assert!(json.contains("***configured***"));
    assert!(!json.contains("RFC_USER"));
    assert!(!json.contains("secret"));
}
