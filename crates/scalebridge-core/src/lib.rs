//! # ScaleBridge Core Library
//!
//! Core polling engine for the ScaleBridge SAP/scale gateway.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial scale access with bounded connect and timed reads
//! - SAP RPC client with retrying connect (SOAP or fake backend)
//! - Classification of read outcomes into SAP response codes
//! - The poll cycle orchestrator and its fixed-period scheduler
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scalebridge_core::prelude::*;
//!
//! let config = BridgeConfig::from_lookup(|key| std::env::var(key).ok())?;
//! config.validate()?;
//!
//! let device = Arc::new(DeviceLink::new(config.device.clone(), Arc::new(TokioSerialTransport)));
//! let gateway = Arc::new(GatewayClient::new(config.gateway.clone(), Arc::new(SoapBackend::new())));
//! let orchestrator = Arc::new(PollCycleOrchestrator::new(
//!     config.workstation_id.clone(),
//!     config.device.read_timeout(),
//!     device.clone(),
//!     gateway.clone(),
//! ));
//!
//! let scheduler = Scheduler::new(config.scheduler.period(), orchestrator, device, gateway);
//! scheduler.run(tokio::signal::ctrl_c()).await?;
//! ```

pub mod classify;
pub mod config;
pub mod cycle;
pub mod device;
pub mod gateway;
pub mod health;
pub mod scheduler;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::classify::{classify, CycleOutcome, ResponseCode, ResponsePayload};
    pub use crate::config::{BridgeConfig, ConfigError, ConfigSummary, RunMode};
    pub use crate::cycle::{CyclePhase, CycleReport, CycleTask, PollCycleOrchestrator};
    pub use crate::device::{
        ConnectionState, DeviceError, DeviceLink, DeviceSettings, SerialTransport,
        SimulatedScaleTransport, TokioSerialTransport, WeightReading,
    };
    pub use crate::gateway::{
        FakeBackend, GatewayClient, GatewayError, GatewaySettings, GatewayState, PendingRequest,
        RpcBackend, RpcClient, SoapBackend,
    };
    pub use crate::health::{HealthReport, HealthStatus};
    pub use crate::scheduler::{Scheduler, SchedulerStats, ShutdownError, TickDecision};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
