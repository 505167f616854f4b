//! Poll cycle orchestration
//!
//! One cycle asks the gateway for a pending request, reads the scale when
//! there is one, and always answers a request it has received: with the
//! weight when the read succeeded, with an error code otherwise.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::classify::{classify, CycleOutcome, ResponsePayload};
use crate::device::{DeviceError, DeviceLink, WeightReading};
use crate::gateway::{GatewayClient, PendingRequest};

/// Where a cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    Idle,
    Polling,
    Reading,
    Classifying,
    Responding,
}

/// Summary of one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub request: Option<PendingRequest>,
    pub outcome: CycleOutcome,
    /// Payload handed to the gateway, if a request was received
    pub payload: Option<ResponsePayload>,
    /// True once the gateway acknowledged the response
    pub delivered: bool,
    /// Phase in which the cycle failed, if it did
    pub failed_phase: Option<CyclePhase>,
    pub error: Option<String>,
}

impl CycleReport {
    fn new(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            started_at: Utc::now(),
            request: None,
            outcome: CycleOutcome::NoPendingRequest,
            payload: None,
            delivered: false,
            failed_phase: None,
            error: None,
        }
    }

    fn fail(&mut self, phase: CyclePhase, error: String) {
        self.failed_phase = Some(phase);
        self.error = Some(error);
    }

    /// True if the cycle did everything it set out to do
    pub fn is_clean(&self) -> bool {
        self.failed_phase.is_none()
    }
}

/// A unit of work driven by the scheduler
#[async_trait]
pub trait CycleTask: Send + Sync + 'static {
    /// Run one complete cycle; never fails, problems end up in the report
    async fn run_cycle(&self) -> CycleReport;
}

/// Sequences gateway and scale for each cycle
pub struct PollCycleOrchestrator {
    workstation_id: String,
    read_timeout: Duration,
    device: Arc<DeviceLink>,
    gateway: Arc<GatewayClient>,
    phase: Mutex<CyclePhase>,
    last_report: Mutex<Option<CycleReport>>,
}

impl PollCycleOrchestrator {
    pub fn new(
        workstation_id: impl Into<String>,
        read_timeout: Duration,
        device: Arc<DeviceLink>,
        gateway: Arc<GatewayClient>,
    ) -> Self {
        Self {
            workstation_id: workstation_id.into(),
            read_timeout,
            device,
            gateway,
            phase: Mutex::new(CyclePhase::Idle),
            last_report: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> CyclePhase {
        *self
            .phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, phase: CyclePhase) {
        *self
            .phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = phase;
    }

    /// Report of the most recent finished cycle
    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn read_scale(&self) -> Result<WeightReading, DeviceError> {
        self.device.connect().await?;
        self.device.read_once(self.read_timeout).await
    }

    async fn cycle(&self, cycle_id: Uuid) -> CycleReport {
        let mut report = CycleReport::new(cycle_id);
        self.set_phase(CyclePhase::Polling);

        if !self.gateway.is_connected() {
            if let Err(e) = self.gateway.connect().await {
                tracing::error!(error = %e, "Cannot reach RPC gateway, skipping cycle");
                report.outcome = CycleOutcome::GatewayError(e.to_string());
                report.fail(CyclePhase::Polling, e.to_string());
                return report;
            }
        }

        let request = match self.gateway.poll_request(&self.workstation_id).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::debug!("No pending scale requests");
                return report;
            }
            Err(e) => {
                tracing::error!(error = %e, "Polling for scale requests failed");
                report.outcome = CycleOutcome::GatewayError(e.to_string());
                report.fail(CyclePhase::Polling, e.to_string());
                return report;
            }
        };

        let span = tracing::Span::current();
        span.record("param_id", request.param_id.as_str());
        span.record("datum", request.datum.as_str());
        span.record("uzeit", request.uzeit.as_str());
        if let (Some(date), Some(time)) = (request.date(), request.time()) {
            tracing::debug!(requested_at = %date.and_time(time), "Processing scale request");
        } else {
            tracing::info!("Processing scale request");
        }

        self.set_phase(CyclePhase::Reading);
        let outcome = match self.read_scale().await {
            Ok(reading) => CycleOutcome::from_reading(reading),
            Err(e) => {
                tracing::warn!(error = %e, "Scale read failed");
                report.fail(CyclePhase::Reading, e.to_string());
                CycleOutcome::DeviceError(e.to_string())
            }
        };

        self.set_phase(CyclePhase::Classifying);
        let payload = classify(&outcome);
        match &outcome {
            CycleOutcome::Success(_) if payload.is_weight() => {
                tracing::info!(weight = %payload, "Weight reading obtained")
            }
            CycleOutcome::ZeroReading => tracing::warn!("Scale is empty"),
            CycleOutcome::NoReading => tracing::warn!("No weight data received from scale"),
            _ => tracing::warn!(outcome = outcome.label(), response = %payload, "Answering with error code"),
        }

        self.set_phase(CyclePhase::Responding);
        match self.gateway.send_response(&payload, &request).await {
            Ok(()) => report.delivered = true,
            Err(e) => {
                tracing::error!(error = %e, response = %payload, "Failed to deliver scale response");
                report.fail(CyclePhase::Responding, e.to_string());
            }
        }

        report.request = Some(request);
        report.outcome = outcome;
        report.payload = Some(payload);
        report
    }
}

#[async_trait]
impl CycleTask for PollCycleOrchestrator {
    async fn run_cycle(&self) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "cycle",
            id = %cycle_id,
            workstation = %self.workstation_id,
            param_id = tracing::field::Empty,
            datum = tracing::field::Empty,
            uzeit = tracing::field::Empty,
        );

        let started = tokio::time::Instant::now();
        let report = self.cycle(cycle_id).instrument(span.clone()).await;
        self.set_phase(CyclePhase::Idle);

        span.in_scope(|| {
            tracing::debug!(
                outcome = report.outcome.label(),
                delivered = report.delivered,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Cycle finished"
            )
        });

        *self
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report.clone());
        report
    }
}
