mod common;

use common::{
    device_link, gateway_client, pending_reply, OpenBehavior, ScriptedBackend, ScriptedTransport,
};
use pretty_assertions::assert_eq;
use scalebridge_core::classify::{CycleOutcome, ResponseCode, ResponsePayload};
use scalebridge_core::cycle::{CyclePhase, CycleTask, PollCycleOrchestrator};
use scalebridge_core::gateway::TransportError;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;

const READ: Duration = Duration::from_millis(5000);

struct Harness {
    transport: ScriptedTransport,
    backend: ScriptedBackend,
    orchestrator: PollCycleOrchestrator,
}

fn harness(behaviors: Vec<OpenBehavior>) -> Harness {
    let transport = ScriptedTransport::with(behaviors);
    let backend = ScriptedBackend::new();
    let orchestrator = PollCycleOrchestrator::new(
        "WS01",
        READ,
        device_link(&transport),
        gateway_client(&backend),
    );
    Harness {
        transport,
        backend,
        orchestrator,
    }
}

fn stream(lines: &[&str]) -> OpenBehavior {
    OpenBehavior::Stream(lines.iter().map(|l| l.to_string()).collect())
}

fn response_field(args: &Value) -> &str {
    args["RESPONSE"]["RESPONSE"].as_str().unwrap()
}

#[tokio::test(start_paused = true)]
async fn no_pending_request_leaves_scale_alone() {
    let h = harness(vec![]);

    let report = h.orchestrator.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::NoPendingRequest);
    assert_eq!(report.payload, None);
    assert!(report.is_clean());
    assert_eq!(h.transport.opens(), 0);
    assert!(h.backend.responses().is_empty());
    assert_eq!(h.orchestrator.phase(), CyclePhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn weight_is_delivered_with_correlation_fields() {
    let h = harness(vec![stream(&["ST,GS,+0045.230kg"])]);
    h.backend
        .push_poll(Ok(pending_reply("WS01", "2024-03-07", "14:05:09")));

    let start = Instant::now();
    let report = h.orchestrator.run_cycle().await;

    assert_eq!(start.elapsed(), READ);
    assert!(report.delivered);
    assert_eq!(report.payload, Some(ResponsePayload::Weight("045.230".to_string())));
    assert_eq!(
        h.backend.responses(),
        vec![json!({"RESPONSE": {
            "PARAMID": "WS01",
            "DATUM": "2024-03-07",
            "UZEIT": "14:05:09",
            "RESPONSE": "045.230"
        }})]
    );
}

#[tokio::test(start_paused = true)]
async fn silent_scale_answers_e002() {
    let h = harness(vec![OpenBehavior::Silent]);
    h.backend
        .push_poll(Ok(pending_reply("WS01", "2024-03-07", "14:05:09")));

    let report = h.orchestrator.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::NoReading);
    assert_eq!(response_field(&h.backend.responses()[0]), "E002");
}

#[tokio::test(start_paused = true)]
async fn unparseable_output_answers_e002() {
    let h = harness(vec![stream(&["OVERLOAD"])]);
    h.backend
        .push_poll(Ok(pending_reply("WS01", "2024-03-07", "14:05:09")));

    let report = h.orchestrator.run_cycle().await;

    assert!(matches!(report.outcome, CycleOutcome::Success(_)));
    assert_eq!(report.payload, Some(ResponseCode::E002.into()));
}

#[tokio::test(start_paused = true)]
async fn empty_platform_answers_e003() {
    let h = harness(vec![stream(&["ST,GS,+000.000kg"])]);
    h.backend
        .push_poll(Ok(pending_reply("WS01", "2024-03-07", "14:05:09")));

    let report = h.orchestrator.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::ZeroReading);
    assert_eq!(response_field(&h.backend.responses()[0]), "E003");
}

#[tokio::test(start_paused = true)]
async fn unreachable_scale_answers_e001() {
    let h = harness(vec![OpenBehavior::Hang]);
    h.backend
        .push_poll(Ok(pending_reply("WS01", "2024-03-07", "14:05:09")));

    let start = Instant::now();
    let report = h.orchestrator.run_cycle().await;

    assert_eq!(start.elapsed(), Duration::from_millis(3000));
    assert!(matches!(report.outcome, CycleOutcome::DeviceError(_)));
    assert_eq!(report.failed_phase, Some(CyclePhase::Reading));
    assert!(report.delivered);
    assert_eq!(response_field(&h.backend.responses()[0]), "E001");
}

#[tokio::test(start_paused = true)]
async fn unreachable_gateway_ends_cycle_without_response() {
    let h = harness(vec![]);
    h.backend.fail_connects(3);

    let report = h.orchestrator.run_cycle().await;

    assert!(matches!(report.outcome, CycleOutcome::GatewayError(_)));
    assert_eq!(report.failed_phase, Some(CyclePhase::Polling));
    assert!(h.backend.calls().is_empty());
    assert_eq!(h.transport.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_poll_skips_cycle_and_next_cycle_reconnects() {
    let h = harness(vec![stream(&["ST,GS,+010.000kg"])]);
    h.backend
        .push_poll(Err(TransportError::Http("503 Service Unavailable".to_string())));
    h.backend
        .push_poll(Ok(pending_reply("WS01", "2024-03-07", "14:05:09")));

    let first = h.orchestrator.run_cycle().await;
    assert!(matches!(first.outcome, CycleOutcome::GatewayError(_)));
    assert!(h.backend.responses().is_empty());

    let second = h.orchestrator.run_cycle().await;
    assert!(second.delivered);
    assert_eq!(second.payload, Some(ResponsePayload::Weight("010.000".to_string())));
    assert_eq!(h.backend.connect_attempts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_delivery_is_reported_not_retried() {
    let h = harness(vec![stream(&["ST,GS,+010.000kg"])]);
    h.backend
        .push_poll(Ok(pending_reply("WS01", "2024-03-07", "14:05:09")));
    h.backend.fail_responses(1);

    let report = h.orchestrator.run_cycle().await;

    assert!(!report.delivered);
    assert_eq!(report.failed_phase, Some(CyclePhase::Responding));
    assert_eq!(h.backend.responses().len(), 1);
    assert_eq!(
        h.orchestrator.last_report().map(|r| r.cycle_id),
        Some(report.cycle_id)
    );
}

#[tokio::test(start_paused = true)]
async fn scale_stays_connected_between_cycles() {
    let h = harness(vec![stream(&["ST,GS,+010.000kg"])]);
    for _ in 0..2 {
        h.backend
            .push_poll(Ok(pending_reply("WS01", "2024-03-07", "14:05:09")));
    }

    h.orchestrator.run_cycle().await;
    h.orchestrator.run_cycle().await;

    assert_eq!(h.transport.opens(), 1);
    assert_eq!(h.backend.responses().len(), 2);
    assert_eq!(h.backend.connect_attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn gateway_connection_survives_clean_cycles() {
    let h = harness(vec![]);

    h.orchestrator.run_cycle().await;
    h.orchestrator.run_cycle().await;

    assert_eq!(h.backend.connect_attempts().len(), 1);
    assert_eq!(h.transport.opens(), 0);
}
