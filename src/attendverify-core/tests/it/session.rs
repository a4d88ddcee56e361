//! Session state machine driven through the standard registry.

use std::sync::Arc;
use std::time::Duration;

use attendverify_core::config::ProximityConfig;
use attendverify_core::strategy::ProximityStrategy;
use attendverify_core::types::{EntryType, Severity, TrackingMethod};
use attendverify_core::{
    Acknowledgement, CommitOutcome, SessionController, SessionState, StrategyKind,
    StrategyRegistry, VerificationContext, VerifyError,
};
use attendverify_sensors::{GeoPosition, SensorSuite, SimulatedProximityReader};

use crate::common::{anomaly, ctx, far_fix, near_fix, registry, FixedShift, ScriptedPrecommit};

async fn controller_at(fix: GeoPosition) -> SessionController {
    let sensors = SensorSuite::simulated(fix);
    let mut controller = SessionController::new(registry(&sensors));
    let prepared = controller
        .select_strategy(StrategyKind::Geofence, &ctx())
        .await
        .unwrap();
    assert!(prepared.success);
    controller
}

fn committed(outcome: CommitOutcome) -> attendverify_core::AugmentedPayload {
    match outcome {
        CommitOutcome::Committed { payload, .. } => payload,
        other => panic!("expected a committed event, got {other:?}"),
    }
}

#[tokio::test]
async fn full_day_cycle() {
    let mut controller = controller_at(near_fix()).await;
    let ctx = ctx();

    let payload = committed(
        controller
            .clock_in(&ctx, Acknowledgement::default())
            .await
            .unwrap(),
    );
    assert_eq!(payload.entry_type, EntryType::ClockIn);
    assert_eq!(payload.tracking_method, TrackingMethod::Gps);
    assert_eq!(controller.state(), SessionState::ClockedIn);

    controller.start_break().unwrap();
    assert_eq!(controller.state(), SessionState::OnBreak);
    controller.end_break().unwrap();

    let payload = committed(
        controller
            .clock_out(&ctx, Acknowledgement::default())
            .await
            .unwrap(),
    );
    assert_eq!(payload.entry_type, EntryType::ClockOut);
    assert_eq!(controller.state(), SessionState::ClockedOut);
    assert!(controller.clock().clocked_out_at.is_some());

    controller.new_day().unwrap();
    assert_eq!(controller.state(), SessionState::Idle);
    controller.end_session().await;
}

#[tokio::test]
async fn start_break_from_idle_is_rejected() {
    let mut controller = controller_at(near_fix()).await;
    let err = controller.start_break().unwrap_err();
    assert!(matches!(err, VerifyError::InvalidTransition { .. }));
    assert_eq!(err.to_string(), "Cannot start a break while idle");
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn clock_in_twice_is_rejected() {
    let mut controller = controller_at(near_fix()).await;
    let ctx = ctx();
    controller
        .clock_in(&ctx, Acknowledgement::default())
        .await
        .unwrap();

    let err = controller
        .clock_in(&ctx, Acknowledgement::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::InvalidTransition { .. }));
    assert_eq!(controller.state(), SessionState::ClockedIn);
    controller.end_session().await;
}

#[tokio::test]
async fn clock_out_from_break_then_clock_in_again() {
    let mut controller = controller_at(near_fix()).await;
    let ctx = ctx();
    controller
        .clock_in(&ctx, Acknowledgement::default())
        .await
        .unwrap();
    controller.start_break().unwrap();

    controller
        .clock_out(&ctx, Acknowledgement::default())
        .await
        .unwrap();
    assert_eq!(controller.state(), SessionState::ClockedOut);

    let outcome = controller
        .clock_in(&ctx, Acknowledgement::default())
        .await
        .unwrap();
    assert!(outcome.payload().is_some());
    assert_eq!(controller.state(), SessionState::ClockedIn);
    assert!(controller.clock().clocked_out_at.is_none());
    controller.end_session().await;
}

#[tokio::test]
async fn switching_strategy_while_clocked_in_is_rejected() {
    let mut controller = controller_at(near_fix()).await;
    let ctx = ctx();
    controller
        .clock_in(&ctx, Acknowledgement::default())
        .await
        .unwrap();

    let err = controller
        .select_strategy(StrategyKind::ManualBadge, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::SwitchWhileClockedIn { .. }));
    assert_eq!(controller.selected(), Some(StrategyKind::Geofence));
    controller.end_session().await;
}

#[tokio::test]
async fn clock_in_without_strategy_or_store_fails() {
    let sensors = SensorSuite::simulated(near_fix());
    let mut controller = SessionController::new(registry(&sensors));

    let err = controller
        .clock_in(&ctx(), Acknowledgement::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::NoStrategySelected));

    let no_store = VerificationContext::new("worker-17", None);
    let err = controller
        .clock_in(&no_store, Acknowledgement::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::StoreRequired));
}

#[tokio::test]
async fn outside_geofence_needs_confirmation() {
    let mut controller = controller_at(far_fix()).await;
    let ctx = ctx();

    let outcome = controller
        .clock_in(&ctx, Acknowledgement::default())
        .await
        .unwrap();
    match &outcome {
        CommitOutcome::ConfirmationRequired { warnings, anomalies } => {
            assert_eq!(warnings.len(), 1);
            assert!(anomalies.is_empty());
        },
        other => panic!("expected confirmation, got {other:?}"),
    }
    assert_eq!(controller.state(), SessionState::Idle);

    let outcome = controller
        .clock_in(&ctx, Acknowledgement::confirmed())
        .await
        .unwrap();
    match outcome {
        CommitOutcome::Committed {
            payload,
            acknowledged,
        } => {
            assert_eq!(acknowledged.len(), 1);
            assert!(payload.notes.unwrap().contains("outside geofence"));
        },
        other => panic!("expected commit, got {other:?}"),
    }
    assert_eq!(controller.state(), SessionState::ClockedIn);
    controller.end_session().await;
}

#[tokio::test]
async fn hard_block_is_an_evidence_error() {
    let mut controller = controller_at(GeoPosition::new(45.4642, 9.19, 500.0)).await;
    let err = controller
        .clock_in(&ctx(), Acknowledgement::confirmed())
        .await
        .unwrap_err();
    assert!(err.is_evidence());
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn critical_precommit_anomaly_blocks() {
    let validator = Arc::new(ScriptedPrecommit::with(vec![anomaly(
        Severity::Critical,
        "Already clocked in at another store",
    )]));
    let mut controller = controller_at(near_fix())
        .await
        .with_precommit(validator.clone());

    let err = controller
        .clock_in(&ctx(), Acknowledgement::confirmed())
        .await
        .unwrap_err();
    assert!(err.is_critical());
    assert_eq!(controller.state(), SessionState::Idle);

    let requests = validator.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].entry_type, EntryType::ClockIn);
    assert_eq!(requests[0].store_id, "store-duomo");
}

#[tokio::test]
async fn minor_precommit_anomaly_needs_confirmation() {
    let validator = Arc::new(ScriptedPrecommit::with(vec![anomaly(
        Severity::Medium,
        "Clock-in 40 minutes before shift start",
    )]));
    let mut controller = controller_at(near_fix()).await.with_precommit(validator);
    let ctx = ctx();

    let outcome = controller
        .clock_in(&ctx, Acknowledgement::default())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        CommitOutcome::ConfirmationRequired { ref anomalies, .. } if anomalies.len() == 1
    ));

    let outcome = controller
        .clock_in(&ctx, Acknowledgement::confirmed())
        .await
        .unwrap();
    assert!(outcome.payload().is_some());
    controller.end_session().await;
}

#[tokio::test]
async fn unreachable_precommit_does_not_block() {
    let validator = Arc::new(ScriptedPrecommit::unreachable());
    let mut controller = controller_at(near_fix()).await.with_precommit(validator);

    let outcome = controller
        .clock_in(&ctx(), Acknowledgement::default())
        .await
        .unwrap();
    assert!(outcome.payload().is_some());
    controller.end_session().await;
}

#[tokio::test]
async fn clock_out_runs_precommit_with_clock_out_entry() {
    let validator = Arc::new(ScriptedPrecommit::clean());
    let mut controller = controller_at(near_fix())
        .await
        .with_precommit(validator.clone());
    let ctx = ctx();
    controller
        .clock_in(&ctx, Acknowledgement::default())
        .await
        .unwrap();
    controller
        .clock_out(&ctx, Acknowledgement::default())
        .await
        .unwrap();

    let requests = validator.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].entry_type, EntryType::ClockOut);
}

#[tokio::test]
async fn store_mismatch_is_reported_not_blocking() {
    let controller = controller_at(near_fix())
        .await
        .with_shift_lookup(Arc::new(FixedShift(Ok(Some("store-navigli".into())))));
    let mismatch = controller
        .check_store_assignment(&ctx())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mismatch.assigned_store_id, "store-navigli");
    assert_eq!(mismatch.selected_store_id, "store-duomo");

    let controller = controller.with_shift_lookup(Arc::new(FixedShift(Err(()))));
    assert!(controller
        .check_store_assignment(&ctx())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn yesterdays_tap_does_not_clock_in_today() {
    let reader = Arc::new(SimulatedProximityReader::new());
    let proximity = Arc::new(ProximityStrategy::new(
        ProximityConfig::default(),
        reader.clone(),
    ));
    let mut registry = StrategyRegistry::new();
    registry.register(proximity.clone());
    let mut controller = SessionController::new(registry);
    let ctx = ctx();

    controller
        .select_strategy(StrategyKind::Proximity, &ctx)
        .await
        .unwrap();
    reader.tap("04A2B9C1");
    proximity
        .wait_for_read(Duration::from_secs(1))
        .await
        .unwrap();
    let payload = committed(
        controller
            .clock_in(&ctx, Acknowledgement::default())
            .await
            .unwrap(),
    );
    assert_eq!(payload.device_info["tagId"], "04A2B9C1");
    controller
        .clock_out(&ctx, Acknowledgement::default())
        .await
        .unwrap();
    controller.new_day().unwrap();
    controller.end_session().await;

    controller
        .select_strategy(StrategyKind::Proximity, &ctx)
        .await
        .unwrap();
    let err = controller
        .clock_in(&ctx, Acknowledgement::confirmed())
        .await
        .unwrap_err();
    assert!(err.is_evidence());
    assert_eq!(controller.state(), SessionState::Idle);
    controller.end_session().await;
}
