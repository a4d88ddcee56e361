//! Geofence strategy end-to-end over a simulated position provider.

use std::sync::Arc;

use attendverify_core::config::GeofenceConfig;
use attendverify_core::strategy::{haversine_distance, GeofenceStrategy, VerificationStrategy};
use attendverify_core::types::{EntryType, TrackingMethod};
use attendverify_core::{ClockPayload, VerificationContext};
use attendverify_sensors::{GeoPosition, PermissionState, SimulatedPositionProvider};

use crate::common::{ctx, far_fix, near_fix, STORE};

fn strategy(fix: GeoPosition) -> (GeofenceStrategy, Arc<SimulatedPositionProvider>) {
    let provider = Arc::new(SimulatedPositionProvider::new(fix));
    (
        GeofenceStrategy::new(GeofenceConfig::default(), provider.clone()),
        provider,
    )
}

#[tokio::test]
async fn inside_geofence_is_clean() {
    let (strategy, _) = strategy(near_fix());
    let ctx = ctx();
    assert!(strategy.prepare(&ctx).await.success);

    let outcome = strategy.validate(&ctx).await;
    assert!(outcome.is_valid);
    assert!(outcome.warnings.is_empty());
    let distance = outcome.metadata["distance"].as_f64().unwrap();
    assert!(distance < 200.0);
    assert_eq!(outcome.metadata["withinGeofence"], true);

    let expected = haversine_distance(STORE.0, STORE.1, 45.4650, 9.1905);
    assert!((distance - expected).abs() < 1.0);
    strategy.cleanup().await;
}

#[tokio::test]
async fn outside_geofence_requires_override() {
    let (strategy, _) = strategy(far_fix());
    let ctx = ctx();
    strategy.prepare(&ctx).await;

    let outcome = strategy.validate(&ctx).await;
    assert!(outcome.is_soft_violation());
    assert!(outcome.warnings[0].starts_with("Outside geofence"));
    assert!(outcome.warnings[0].contains("Duomo"));
    assert_eq!(outcome.metadata["requiresOverride"], true);
    strategy.cleanup().await;
}

#[tokio::test]
async fn poor_accuracy_blocks() {
    let (strategy, _) = strategy(GeoPosition::new(STORE.0, STORE.1, 120.0));
    let ctx = ctx();
    strategy.prepare(&ctx).await;

    let outcome = strategy.validate(&ctx).await;
    assert!(!outcome.is_valid);
    assert!(outcome.error.unwrap().contains("accuracy"));
    strategy.cleanup().await;
}

#[tokio::test]
async fn denied_permission_fails_prepare() {
    let (strategy, provider) = strategy(near_fix());
    provider.set_permission(PermissionState::Denied);

    let outcome = strategy.prepare(&ctx()).await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("permission"));
}

#[tokio::test]
async fn store_without_coordinates_blocks() {
    let (strategy, _) = strategy(near_fix());
    let mut store = crate::common::store();
    store.coordinates = None;
    let ctx = VerificationContext::new("worker-17", Some(store));
    strategy.prepare(&ctx).await;

    assert!(!strategy.validate(&ctx).await.is_valid);
    strategy.cleanup().await;
}

#[tokio::test]
async fn validate_is_idempotent() {
    let (strategy, _) = strategy(far_fix());
    let ctx = ctx();
    strategy.prepare(&ctx).await;

    let first = strategy.validate(&ctx).await;
    let second = strategy.validate(&ctx).await;
    assert_eq!(first, second);
    strategy.cleanup().await;
}

#[tokio::test]
async fn augment_attaches_location() {
    let (strategy, _) = strategy(near_fix());
    let ctx = ctx();
    strategy.prepare(&ctx).await;
    strategy.validate(&ctx).await;

    let base = ClockPayload::now(&ctx, EntryType::ClockIn).unwrap();
    let payload = strategy.augment_payload(base, &ctx).await.unwrap();
    assert_eq!(payload.tracking_method, TrackingMethod::Gps);
    let location = payload.geo_location.unwrap();
    assert_eq!(location.lat, 45.4650);
    assert_eq!(payload.device_info["withinGeofence"], true);
    strategy.cleanup().await;
}

#[tokio::test]
async fn fix_exactly_on_radius_is_inside() {
    let fix_lat = (200.0f64 / 6_371_000.0).to_degrees();
    let config = GeofenceConfig {
        radius_m: haversine_distance(fix_lat, 0.0, 0.0, 0.0),
        ..GeofenceConfig::default()
    };
    let provider = Arc::new(SimulatedPositionProvider::new(GeoPosition::new(fix_lat, 0.0, 5.0)));
    let strategy = GeofenceStrategy::new(config, provider);

    let mut store = crate::common::store();
    store.coordinates = Some(attendverify_core::types::Coordinates { lat: 0.0, lng: 0.0 });
    let ctx = VerificationContext::new("worker-17", Some(store));
    strategy.prepare(&ctx).await;

    let outcome = strategy.validate(&ctx).await;
    assert!(outcome.is_valid);
    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.metadata["withinGeofence"], true);
    strategy.cleanup().await;
}
