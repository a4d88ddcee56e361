//! Auto-detection over simulated sensor suites.

use std::sync::Arc;

use attendverify_core::config::DetectionConfig;
use attendverify_core::strategy::{AutoDetectStrategy, VerificationStrategy};
use attendverify_core::types::{EntryType, TrackingMethod};
use attendverify_core::{ClockPayload, StrategyKind};
use attendverify_sensors::{SensorSuite, SimulatedPositionProvider, SimulatedProximityReader};

use crate::common::{ctx, far_fix, near_fix, registry};

fn auto_over(sensors: &SensorSuite) -> AutoDetectStrategy {
    let registry = registry(sensors);
    let pool: Vec<_> = [
        StrategyKind::Proximity,
        StrategyKind::Geofence,
        StrategyKind::DeviceSignature,
    ]
    .into_iter()
    .map(|kind| registry.get(kind).unwrap())
    .collect();
    AutoDetectStrategy::new(DetectionConfig::default(), &pool)
}

#[tokio::test]
async fn no_proximity_reader_selects_geofence() {
    let mut sensors = SensorSuite::simulated(near_fix());
    sensors.proximity = Arc::new(SimulatedProximityReader::unsupported());
    let auto = auto_over(&sensors);

    let result = auto.detect(&ctx()).await;
    assert_eq!(result.selected_strategy, Some(StrategyKind::Geofence));
    assert_eq!(result.confidence, 85);
    assert_eq!(result.fallback_order, vec![StrategyKind::DeviceSignature]);
    assert!(result
        .detection_reasons
        .iter()
        .any(|r| r.contains("proximity")));
    auto.cleanup().await;
}

#[tokio::test]
async fn no_positioning_falls_through_to_device_signature() {
    let mut sensors = SensorSuite::simulated(near_fix());
    sensors.proximity = Arc::new(SimulatedProximityReader::unsupported());
    sensors.position = Arc::new(SimulatedPositionProvider::unsupported());
    let auto = auto_over(&sensors);

    let result = auto.detect(&ctx()).await;
    assert_eq!(result.selected_strategy, Some(StrategyKind::DeviceSignature));
    assert!(result.fallback_order.is_empty());
    auto.cleanup().await;
}

#[tokio::test]
async fn warnings_lower_confidence_but_still_select() {
    let mut sensors = SensorSuite::simulated(far_fix());
    sensors.proximity = Arc::new(SimulatedProximityReader::unsupported());
    let auto = auto_over(&sensors);

    let result = auto.detect(&ctx()).await;
    assert_eq!(result.selected_strategy, Some(StrategyKind::Geofence));
    assert_eq!(result.confidence, 70);
    auto.cleanup().await;
}

#[tokio::test]
async fn auto_payload_is_marked_smart() {
    let mut sensors = SensorSuite::simulated(near_fix());
    sensors.proximity = Arc::new(SimulatedProximityReader::unsupported());
    let auto = auto_over(&sensors);
    let ctx = ctx();

    assert!(auto.prepare(&ctx).await.success);
    let outcome = auto.validate(&ctx).await;
    assert!(outcome.is_valid);
    assert_eq!(outcome.metadata["smartDetection"], true);
    assert_eq!(outcome.metadata["selectedStrategy"], "geofence");

    let base = ClockPayload::now(&ctx, EntryType::ClockIn).unwrap();
    let payload = auto.augment_payload(base, &ctx).await.unwrap();
    assert_eq!(payload.tracking_method, TrackingMethod::Smart);
    assert_eq!(payload.device_info["detectedMethod"], "gps");
    assert!(payload.geo_location.is_some());
    auto.cleanup().await;
}

#[tokio::test]
async fn registry_auto_is_available_with_any_candidate() {
    let mut sensors = SensorSuite::simulated(near_fix());
    sensors.proximity = Arc::new(SimulatedProximityReader::unsupported());
    sensors.position = Arc::new(SimulatedPositionProvider::unsupported());
    let registry = registry(&sensors);
    assert!(registry.get(StrategyKind::Auto).unwrap().is_available());
}
