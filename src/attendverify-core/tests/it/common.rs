//! Shared fixtures.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use attendverify_core::collaborators::{PrecommitValidator, ShiftLookup};
use attendverify_core::types::{
    Coordinates, PrecommitReport, PrecommitRequest, PrecommitWarning, Severity,
};
use attendverify_core::{
    EngineConfig, LocalTokenIssuer, StoreInfo, StrategyRegistry, VerificationContext, VerifyError,
};
use attendverify_sensors::{GeoPosition, SensorSuite};

/// Piazza del Duomo, Milan.
pub const STORE: (f64, f64) = (45.4642, 9.1900);

pub fn store() -> StoreInfo {
    StoreInfo {
        id: "store-duomo".into(),
        name: "Duomo".into(),
        coordinates: Some(Coordinates {
            lat: STORE.0,
            lng: STORE.1,
        }),
        address: Some("Piazza del Duomo, Milano".into()),
    }
}

pub fn ctx() -> VerificationContext {
    VerificationContext::new("worker-17", Some(store()))
}

/// About 100 m from the store.
pub fn near_fix() -> GeoPosition {
    GeoPosition::new(45.4650, 9.1905, 20.0)
}

/// About 1.5 km from the store.
pub fn far_fix() -> GeoPosition {
    GeoPosition::new(45.4780, 9.1900, 15.0)
}

pub fn registry(sensors: &SensorSuite) -> StrategyRegistry {
    let config = EngineConfig::default();
    let issuer = Arc::new(LocalTokenIssuer::new("ATT", config.token.lifetime));
    StrategyRegistry::standard(&config, sensors, issuer)
}

/// Pre-commit validator returning a fixed answer and recording requests.
pub struct ScriptedPrecommit {
    answer: Result<Vec<PrecommitWarning>, String>,
    pub requests: Mutex<Vec<PrecommitRequest>>,
}

impl ScriptedPrecommit {
    pub fn clean() -> Self {
        Self::with(Vec::new())
    }

    pub fn with(warnings: Vec<PrecommitWarning>) -> Self {
        Self {
            answer: Ok(warnings),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            answer: Err("connection refused".into()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

pub fn anomaly(severity: Severity, message: &str) -> PrecommitWarning {
    PrecommitWarning {
        warning_type: "early_clock_in".into(),
        severity,
        message: message.into(),
        expected_value: None,
        actual_value: None,
    }
}

#[async_trait]
impl PrecommitValidator for ScriptedPrecommit {
    async fn prevalidate(&self, request: &PrecommitRequest) -> Result<PrecommitReport, VerifyError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.answer {
            Ok(warnings) => Ok(PrecommitReport {
                warnings: warnings.clone(),
            }),
            Err(message) => Err(VerifyError::Network {
                message: message.clone(),
            }),
        }
    }
}

/// Shift lookup with a fixed assignment.
pub struct FixedShift(pub Result<Option<String>, ()>);

#[async_trait]
impl ShiftLookup for FixedShift {
    async fn assigned_store(&self, _user_id: &str) -> Result<Option<String>, VerifyError> {
        self.0.clone().map_err(|()| VerifyError::Network {
            message: "shift service down".into(),
        })
    }
}
