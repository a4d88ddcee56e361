//! Strategy registry: maps a strategy identifier to its shared instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use attendverify_sensors::SensorSuite;
use tracing::info;

use crate::collaborators::TokenIssuer;
use crate::config::EngineConfig;
use crate::error::VerifyError;
use crate::strategy::{
    AutoDetectStrategy, DeviceSignatureStrategy, GeofenceStrategy, ManualBadgeStrategy, Permission,
    ProximityStrategy, RotatingTokenStrategy, VerificationStrategy,
};
use crate::types::{StrategyDescriptor, StrategyKind};

/// Registered strategies, one per kind.
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<StrategyKind, Arc<dyn VerificationStrategy>>,
}

impl StrategyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The five concrete strategies over `sensors` plus the auto-detection
    /// composite wired to the same instances.
    pub fn standard(
        config: &EngineConfig,
        sensors: &SensorSuite,
        issuer: Arc<dyn TokenIssuer>,
    ) -> Self {
        let concrete: Vec<Arc<dyn VerificationStrategy>> = vec![
            Arc::new(ProximityStrategy::new(
                config.proximity.clone(),
                Arc::clone(&sensors.proximity),
            )),
            Arc::new(GeofenceStrategy::new(
                config.geofence.clone(),
                Arc::clone(&sensors.position),
            )),
            Arc::new(RotatingTokenStrategy::new(config.token.clone(), issuer)),
            Arc::new(DeviceSignatureStrategy::new(
                config.device.clone(),
                Arc::clone(&sensors.environment),
            )),
            Arc::new(ManualBadgeStrategy::new(
                config.badge.clone(),
                Arc::clone(&sensors.keys),
            )),
        ];
        let auto = AutoDetectStrategy::new(config.detection.clone(), &concrete);

        let mut registry = Self::new();
        registry.register(Arc::new(auto));
        for strategy in concrete {
            registry.register(strategy);
        }
        info!(
            available = ?registry.available().iter().map(|d| d.kind).collect::<Vec<_>>(),
            "StrategyRegistry: standard strategies registered"
        );
        registry
    }

    /// Register `strategy`, returning the one it replaces.
    pub fn register(
        &mut self,
        strategy: Arc<dyn VerificationStrategy>,
    ) -> Option<Arc<dyn VerificationStrategy>> {
        self.strategies.insert(strategy.kind(), strategy)
    }

    /// Strategy for `kind`.
    pub fn get(&self, kind: StrategyKind) -> Result<Arc<dyn VerificationStrategy>, VerifyError> {
        self.strategies
            .get(&kind)
            .cloned()
            .ok_or(VerifyError::StrategyNotFound { kind })
    }

    /// Registered kinds.
    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.keys().copied().collect()
    }

    /// All descriptors, preferred first.
    pub fn descriptors(&self) -> Vec<StrategyDescriptor> {
        let mut descriptors: Vec<StrategyDescriptor> = self
            .strategies
            .values()
            .map(|s| s.descriptor().clone())
            .collect();
        descriptors.sort_by_key(|d| (d.priority, d.kind));
        descriptors
    }

    /// Descriptors of strategies that can be offered on this device.
    pub fn available(&self) -> Vec<StrategyDescriptor> {
        let mut descriptors: Vec<StrategyDescriptor> = self
            .strategies
            .values()
            .filter(|s| s.is_available())
            .map(|s| s.descriptor().clone())
            .collect();
        descriptors.sort_by_key(|d| (d.priority, d.kind));
        descriptors
    }

    /// Permissions `kind` will ask for.
    pub fn required_permissions(&self, kind: StrategyKind) -> Result<Vec<Permission>, VerifyError> {
        Ok(self.get(kind)?.required_permissions())
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use attendverify_sensors::GeoPosition;

    use super::*;
    use crate::collaborators::LocalTokenIssuer;

    fn standard() -> StrategyRegistry {
        let config = EngineConfig::default();
        let sensors = SensorSuite::simulated(GeoPosition::new(45.4642, 9.19, 10.0));
        let issuer = Arc::new(LocalTokenIssuer::new("ATT", config.token.lifetime));
        StrategyRegistry::standard(&config, &sensors, issuer)
    }

    #[tokio::test]
    async fn test_standard_registers_every_kind() {
        let registry = standard();
        for kind in StrategyKind::ALL {
            assert_eq!(registry.get(kind).unwrap().kind(), kind);
        }
    }

    #[tokio::test]
    async fn test_descriptors_sorted_by_priority() {
        let kinds: Vec<_> = standard().descriptors().into_iter().map(|d| d.kind).collect();
        assert_eq!(kinds, StrategyKind::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_unavailable_hardware_is_filtered() {
        let config = EngineConfig::default();
        let mut sensors = SensorSuite::simulated(GeoPosition::new(45.4642, 9.19, 10.0));
        sensors.proximity = Arc::new(attendverify_sensors::SimulatedProximityReader::unsupported());
        let registry = StrategyRegistry::standard(
            &config,
            &sensors,
            Arc::new(LocalTokenIssuer::new("ATT", config.token.lifetime)),
        );
        let kinds: Vec<_> = registry.available().into_iter().map(|d| d.kind).collect();
        assert!(!kinds.contains(&StrategyKind::Proximity));
        assert!(kinds.contains(&StrategyKind::Auto));
    }

    #[test]
    fn test_missing_kind_is_error() {
        let registry = StrategyRegistry::new();
        assert!(matches!(
            registry.get(StrategyKind::Geofence),
            Err(VerifyError::StrategyNotFound { .. })
        ));
        assert!(registry.required_permissions(StrategyKind::Geofence).is_err());
    }

    #[tokio::test]
    async fn test_permissions() {
        let registry = standard();
        assert_eq!(
            registry.required_permissions(StrategyKind::Geofence).unwrap(),
            vec![Permission::Location]
        );
        let auto = registry.required_permissions(StrategyKind::Auto).unwrap();
        assert_eq!(auto, vec![Permission::Location, Permission::Proximity]);
    }
}
