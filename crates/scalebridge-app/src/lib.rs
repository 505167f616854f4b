//! ScaleBridge service
//!
//! Loads the configuration from the environment, wires the scale link and the
//! gateway client to the backend the configuration selects, and runs the
//! scheduler until SIGINT or SIGTERM.

use anyhow::Context;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use scalebridge_core::config::{BridgeConfig, ConfigError, RunMode};
use scalebridge_core::cycle::PollCycleOrchestrator;
use scalebridge_core::device::{
    list_ports, DeviceLink, SerialTransport, SimulatedScaleTransport, TokioSerialTransport,
};
use scalebridge_core::gateway::{FakeBackend, GatewayClient, GatewayError, RpcBackend, SoapBackend};
use scalebridge_core::health::HealthReport;
use scalebridge_core::scheduler::{Scheduler, ShutdownError};

/// Build identifier stamped by build.rs
pub const BUILD_ID: &str = match option_env!("SCALEBRIDGE_BUILD_ID") {
    Some(id) => id,
    None => "unknown",
};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "scalebridge=info";

/// Install the global tracing subscriber
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Read and validate the configuration from the process environment
pub fn load_config() -> Result<BridgeConfig, ConfigError> {
    let config = BridgeConfig::from_lookup(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Log the serial ports visible to this machine
pub fn log_available_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        tracing::info!("No serial ports detected");
        return;
    }
    let names: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();
    tracing::info!(ports = %names.join(", "), "Available ports");
}

/// Resolves on the first SIGINT (Ctrl+C) or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(signal = "SIGINT", "Received shutdown signal"),
        _ = terminate => tracing::info!(signal = "SIGTERM", "Received shutdown signal"),
    }
}

/// All long-lived components of one running bridge
pub struct Bridge {
    pub config: BridgeConfig,
    pub device: Arc<DeviceLink>,
    pub gateway: Arc<GatewayClient>,
    pub orchestrator: Arc<PollCycleOrchestrator>,
    pub scheduler: Scheduler,
    started_at: DateTime<Utc>,
}

impl Bridge {
    /// Wire the components selected by `config`
    pub fn build(config: BridgeConfig) -> Self {
        let transport: Arc<dyn SerialTransport> = if config.simulate_scale {
            Arc::new(SimulatedScaleTransport)
        } else {
            Arc::new(TokioSerialTransport)
        };

        let backend: Arc<dyn RpcBackend> = match (config.mode, &config.mock_request_file) {
            (RunMode::Mocks, Some(path)) => Arc::new(FakeBackend::with_request_file(path)),
            (RunMode::Mocks, None) => Arc::new(FakeBackend::new()),
            (RunMode::Production, _) => Arc::new(SoapBackend::new()),
        };

        let device = Arc::new(DeviceLink::new(config.device.clone(), transport));
        let gateway = Arc::new(GatewayClient::new(config.gateway.clone(), backend));
        let orchestrator = Arc::new(PollCycleOrchestrator::new(
            config.workstation_id.clone(),
            config.device.read_timeout(),
            Arc::clone(&device),
            Arc::clone(&gateway),
        ));
        let scheduler = Scheduler::new(
            config.scheduler.period(),
            orchestrator.clone(),
            Arc::clone(&device),
            Arc::clone(&gateway),
        );

        Self {
            config,
            device,
            gateway,
            orchestrator,
            scheduler,
            started_at: Utc::now(),
        }
    }

    /// Initial gateway connection
    ///
    /// Only an authentication failure is fatal; anything else is retried by
    /// the first cycles.
    pub async fn start(&self) -> Result<(), GatewayError> {
        match self.gateway.connect().await {
            Ok(_) => {
                tracing::info!("Services initialized successfully");
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "RPC gateway unavailable at startup, will retry on next cycle");
                Ok(())
            }
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::collect(
            &self.config,
            &self.device,
            &self.gateway,
            &self.orchestrator,
            &self.scheduler,
            self.started_at,
        )
    }

    /// Start, then run cycles until `shutdown` resolves
    ///
    /// `shutdown` is polled before the startup connect, so a signal that
    /// arrives while the gateway is still being retried ends the service
    /// without running a cycle.
    pub async fn serve<F: Future>(&self, shutdown: F) -> anyhow::Result<()> {
        tokio::pin!(shutdown);

        tokio::select! {
            biased;

            _ = &mut shutdown => {
                tracing::info!("Shutdown requested during startup");
                self.run(std::future::ready(()))
                    .await
                    .context("Error during shutdown")?;
                return Ok(());
            }
            started = self.start() => started.context("Failed to initialize services")?,
        }

        tracing::info!(
            period_secs = self.scheduler.period().as_secs(),
            "Polling scheduled"
        );
        self.run(shutdown).await.context("Error during shutdown")?;
        Ok(())
    }

    /// Run cycles until `shutdown` resolves
    pub async fn run<F: Future>(&self, shutdown: F) -> Result<(), ShutdownError> {
        let result = self.scheduler.run(shutdown).await;
        match serde_json::to_string(&self.health()) {
            Ok(report) => tracing::info!(status = %report, "Final status"),
            Err(e) => tracing::warn!(error = %e, "Cannot serialize final status"),
        }
        result
    }
}

/// Service entry point
pub async fn run() -> anyhow::Result<()> {
    tracing::info!(
        version = scalebridge_core::VERSION,
        build = BUILD_ID,
        "Starting ScaleBridge"
    );

    let config = load_config().context("Configuration validation failed")?;
    let summary = serde_json::to_string_pretty(&config.summary())?;
    tracing::info!("Configuration summary:\n{}", summary);

    if config.mode.is_dev() || config.debug_ports {
        log_available_ports();
    }

    let bridge = Bridge::build(config);
    bridge.serve(shutdown_signal()).await?;

    tracing::info!("Application shutdown completed");
    Ok(())
}
