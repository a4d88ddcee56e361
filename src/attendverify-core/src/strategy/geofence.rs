//! Geofence strategy: presence by satellite position near the store.
//!
//! Distance beyond the radius is a soft violation (`requiresOverride`);
//! poor accuracy is a hard block.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use attendverify_sensors::{GeoPosition, PermissionState, PositionProvider};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{bounded, lock, Permission, VerificationStrategy};
use crate::config::GeofenceConfig;
use crate::error::VerifyError;
use crate::types::{
    Availability, AugmentedPayload, ClockPayload, GeoLocation, Metadata, PrepareOutcome,
    StoreInfo, StrategyDescriptor, StrategyKind, ValidationOutcome, VerificationContext,
};

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two points in decimal degrees.
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

#[derive(Debug, Default)]
struct GeofenceState {
    /// Last fix from prepare or validate.
    fix: Option<GeoPosition>,
    /// Fix accepted by the last validation.
    validated: Option<Validated>,
}

#[derive(Debug, Clone, Copy)]
struct Validated {
    fix: GeoPosition,
    distance: f64,
    within: bool,
}

/// Positioning-based verification.
pub struct GeofenceStrategy {
    descriptor: StrategyDescriptor,
    config: GeofenceConfig,
    position: Arc<dyn PositionProvider>,
    state: Mutex<GeofenceState>,
    /// Latest fix from the continuous watch, shared with the watch task.
    watched: Arc<Mutex<Option<GeoPosition>>>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl GeofenceStrategy {
    /// Create the strategy over `position`.
    pub fn new(config: GeofenceConfig, position: Arc<dyn PositionProvider>) -> Self {
        let descriptor = StrategyDescriptor {
            kind: StrategyKind::Geofence,
            display_name: "GPS".into(),
            description: "Verify you are within range of the store".into(),
            priority: 2,
            availability: Availability {
                supported: position.is_supported(),
                requires_permission: true,
                requires_hardware: true,
                requires_network: false,
            },
        };
        Self {
            descriptor,
            config,
            position,
            state: Mutex::new(GeofenceState::default()),
            watched: Arc::new(Mutex::new(None)),
            watch_task: Mutex::new(None),
        }
    }

    /// Start continuous tracking; later validations use the freshest
    /// watched fix instead of re-querying.
    pub async fn start_watching(&self) -> Result<(), VerifyError> {
        self.stop_watching();
        let mut watch = self.position.watch().await?;
        let latest = Arc::clone(&self.watched);
        let task = tokio::spawn(async move {
            while let Some(fix) = watch.next().await {
                *lock(&latest) = Some(fix);
            }
            debug!("Geofence: position watch ended");
        });
        *lock(&self.watch_task) = Some(task);
        info!("Geofence: continuous tracking started");
        Ok(())
    }

    /// Whether a position watch is active.
    pub fn is_watching(&self) -> bool {
        lock(&self.watch_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn stop_watching(&self) {
        if let Some(task) = lock(&self.watch_task).take() {
            task.abort();
            debug!("Geofence: position watch stopped");
        }
        *lock(&self.watched) = None;
    }

    async fn fresh_fix(&self) -> Result<GeoPosition, VerifyError> {
        if self.is_watching() {
            if let Some(fix) = *lock(&self.watched) {
                return Ok(fix);
            }
        }
        let fix = bounded("Position fix", self.config.validate_timeout, async {
            self.position.current_position().await.map_err(VerifyError::from)
        })
        .await?;
        lock(&self.state).fix = Some(fix);
        Ok(fix)
    }

    fn classify(&self, fix: GeoPosition, store: &StoreInfo) -> Result<Validated, String> {
        if fix.accuracy > self.config.max_accuracy_m {
            return Err(format!(
                "Position accuracy too low: {:.0}m (required {:.0}m or better)",
                fix.accuracy, self.config.max_accuracy_m
            ));
        }
        let coords = store
            .coordinates
            .ok_or_else(|| format!("Store {} has no coordinates", store.name))?;
        let distance = haversine_distance(fix.lat, fix.lng, coords.lat, coords.lng);
        Ok(Validated {
            fix,
            distance,
            within: distance <= self.config.radius_m,
        })
    }
}

#[async_trait]
impl VerificationStrategy for GeofenceStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.position.is_supported()
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::Location]
    }

    #[instrument(skip_all, fields(strategy = "geofence"))]
    async fn prepare(&self, _ctx: &VerificationContext) -> PrepareOutcome {
        if !self.position.is_supported() {
            return PrepareOutcome::failed("Geolocation is not supported on this device");
        }
        match self.position.request_permission().await {
            Ok(PermissionState::Granted) => {},
            Ok(_) => return PrepareOutcome::failed("Location permission denied"),
            Err(e) => return PrepareOutcome::failed(VerifyError::from(e).to_string()),
        }

        let initial = bounded("Initial position fix", self.config.prepare_timeout, async {
            self.position.current_position().await.map_err(VerifyError::from)
        })
        .await;

        match initial {
            Ok(fix) => {
                lock(&self.state).fix = Some(fix);
                info!(accuracy = fix.accuracy, "Geofence: initial fix acquired");
                let mut metadata = Metadata::new();
                metadata.insert("accuracy".into(), json!(fix.accuracy));
                PrepareOutcome::ready_with(metadata)
            },
            Err(e) => {
                warn!(error = %e, "Geofence: prepare failed");
                PrepareOutcome::failed(e.to_string())
            },
        }
    }

    #[instrument(skip_all, fields(strategy = "geofence"))]
    async fn validate(&self, ctx: &VerificationContext) -> ValidationOutcome {
        let store = match ctx.require_store() {
            Ok(store) => store,
            Err(e) => return ValidationOutcome::blocked(e.to_string()),
        };
        let fix = match self.fresh_fix().await {
            Ok(fix) => fix,
            Err(e) => {
                lock(&self.state).validated = None;
                return ValidationOutcome::blocked(e.to_string());
            },
        };

        let result = match self.classify(fix, store) {
            Ok(v) => v,
            Err(reason) => {
                lock(&self.state).validated = None;
                warn!(accuracy = fix.accuracy, "Geofence: {}", reason);
                return ValidationOutcome::blocked(reason);
            },
        };
        lock(&self.state).validated = Some(result);

        let distance = result.distance.round();
        if result.within {
            info!(distance, "Geofence: inside radius");
            ValidationOutcome::valid(Metadata::new())
                .with("distance", distance)
                .with("accuracy", fix.accuracy)
                .with("withinGeofence", true)
        } else {
            warn!(distance, radius = self.config.radius_m, "Geofence: outside radius");
            ValidationOutcome::flagged(
                vec![format!("Outside geofence: {distance:.0}m from {}", store.name)],
                Metadata::new(),
            )
            .with("distance", distance)
            .with("accuracy", fix.accuracy)
            .with("withinGeofence", false)
            .with("requiresOverride", true)
        }
    }

    async fn augment_payload(
        &self,
        base: ClockPayload,
        ctx: &VerificationContext,
    ) -> Result<AugmentedPayload, VerifyError> {
        let store = ctx.require_store()?;
        let validated = lock(&self.state)
            .validated
            .ok_or(VerifyError::NoEvidence {
                strategy: StrategyKind::Geofence,
            })?;

        let mut payload = AugmentedPayload::from_base(base, StrategyKind::Geofence.tracking_method());
        payload.geo_location = Some(GeoLocation {
            lat: validated.fix.lat,
            lng: validated.fix.lng,
            accuracy: validated.fix.accuracy,
            address: store.address.clone(),
        });
        let info = &mut payload.device_info;
        info.insert("distanceMeters".into(), json!(validated.distance.round()));
        info.insert("withinGeofence".into(), json!(validated.within));
        info.insert("fixTimestamp".into(), json!(validated.fix.timestamp));
        info.insert("platform".into(), json!(std::env::consts::OS));
        payload.notes = Some(if validated.within {
            format!("GPS verified: {:.0}m from {}", validated.distance, store.name)
        } else {
            format!(
                "GPS override: {:.0}m from {} (outside geofence)",
                validated.distance, store.name
            )
        });
        Ok(payload)
    }

    fn panel_state(&self) -> Value {
        let state = lock(&self.state);
        json!({
            "radius": self.config.radius_m,
            "watching": lock(&self.watch_task).is_some(),
            "fix": state.fix,
            "distance": state.validated.map(|v| v.distance.round()),
        })
    }

    async fn cleanup(&self) {
        self.stop_watching();
    }

    async fn reset(&self) {
        *lock(&self.state) = GeofenceState::default();
    }
}

impl Drop for GeofenceStrategy {
    fn drop(&mut self) {
        self.stop_watching();
    }
}
