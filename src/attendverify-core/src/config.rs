//! Configuration for the verification engine.
//!
//! Every field has a default; a JSON file only needs to carry overrides.
//! Durations are expressed in milliseconds on the wire.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::VerifyError;
use crate::types::StrategyKind;

/// Serialize a [`Duration`] as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Positioning strategy.
    pub geofence: GeofenceConfig,
    /// Rotating-token strategy.
    pub token: TokenConfig,
    /// Proximity-radio strategy.
    pub proximity: ProximityConfig,
    /// Device-signature strategy.
    pub device: DeviceConfig,
    /// Manual-badge strategy.
    pub badge: BadgeConfig,
    /// Auto-detection composite.
    pub detection: DetectionConfig,
    /// Back-end collaborators.
    pub endpoints: EndpointConfig,
}

impl EngineConfig {
    /// Load overrides from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, VerifyError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| VerifyError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| VerifyError::Config {
            message: format!("Invalid config in {}: {}", path.display(), e),
        })?;
        config.check()?;
        Ok(config)
    }

    /// Reject values no strategy can work with.
    pub fn check(&self) -> Result<(), VerifyError> {
        let fail = |message: &str| {
            Err(VerifyError::Config {
                message: message.to_string(),
            })
        };
        if self.geofence.radius_m <= 0.0 || self.geofence.max_accuracy_m <= 0.0 {
            return fail("geofence radius and accuracy must be positive");
        }
        if self.token.lifetime.is_zero() {
            return fail("token lifetime must be positive");
        }
        if self.proximity.min_id_len > self.proximity.max_id_len {
            return fail("proximity id length bounds are inverted");
        }
        if self.badge.min_len == 0 || self.badge.min_len > self.badge.max_len {
            return fail("badge length bounds are invalid");
        }
        if self.device.medium_threshold > self.device.high_threshold {
            return fail("device medium threshold exceeds high threshold");
        }
        if self.detection.order.contains(&StrategyKind::Auto) {
            return fail("auto detection cannot list itself as a candidate");
        }
        Ok(())
    }
}

/// Positioning strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeofenceConfig {
    /// Allowed distance from the store, in meters.
    pub radius_m: f64,
    /// Worst accepted fix accuracy, in meters.
    pub max_accuracy_m: f64,
    /// Bound on the initial fix during prepare.
    #[serde(with = "millis", rename = "prepare_timeout_ms")]
    pub prepare_timeout: Duration,
    /// Bound on the fresh fix during validate.
    #[serde(with = "millis", rename = "validate_timeout_ms")]
    pub validate_timeout: Duration,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            radius_m: 200.0,
            max_accuracy_m: 50.0,
            prepare_timeout: Duration::from_secs(10),
            validate_timeout: Duration::from_secs(15),
        }
    }
}

/// Rotating-token strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Token lifetime and regeneration interval.
    #[serde(with = "millis", rename = "lifetime_ms")]
    pub lifetime: Duration,
    /// Code prefix.
    pub prefix: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(30),
            prefix: "ATT".into(),
        }
    }
}

/// Proximity-radio strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// How long one scan listens before stopping.
    #[serde(with = "millis", rename = "scan_window_ms")]
    pub scan_window: Duration,
    /// Shortest accepted tag id.
    pub min_id_len: usize,
    /// Longest accepted tag id.
    pub max_id_len: usize,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            scan_window: Duration::from_secs(30),
            min_id_len: 4,
            max_id_len: 32,
        }
    }
}

/// Device-signature strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Minimum interval between session-sanity re-checks.
    #[serde(with = "millis", rename = "sanity_refresh_ms")]
    pub sanity_refresh: Duration,
    /// Score at or above which the level is `high`.
    pub high_threshold: u32,
    /// Score at or above which the level is `medium`.
    pub medium_threshold: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sanity_refresh: Duration::from_secs(5 * 60),
            high_threshold: 80,
            medium_threshold: 50,
        }
    }
}

/// Manual-badge strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadgeConfig {
    /// Shortest accepted badge id.
    pub min_len: usize,
    /// Buffer length that forces a commit.
    pub max_len: usize,
    /// Inactivity after which the buffer is committed.
    #[serde(with = "millis", rename = "debounce_ms")]
    pub debounce: Duration,
    /// Inter-keystroke delay below which input counts as a scanner.
    #[serde(with = "millis", rename = "scanner_threshold_ms")]
    pub scanner_threshold: Duration,
    /// Number of remembered badge ids.
    pub history_cap: usize,
    /// Where the history is persisted. In memory only when unset.
    pub history_path: Option<PathBuf>,
}

impl Default for BadgeConfig {
    fn default() -> Self {
        Self {
            min_len: 4,
            max_len: 32,
            debounce: Duration::from_secs(2),
            scanner_threshold: Duration::from_millis(100),
            history_cap: 10,
            history_path: None,
        }
    }
}

/// Auto-detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Bound on each candidate's prepare.
    #[serde(with = "millis", rename = "prepare_timeout_ms")]
    pub prepare_timeout: Duration,
    /// Bound on each candidate's validate.
    #[serde(with = "millis", rename = "validate_timeout_ms")]
    pub validate_timeout: Duration,
    /// Candidates in priority order.
    pub order: Vec<StrategyKind>,
    /// Starting confidence.
    pub base_score: i32,
    /// Priority bonus per candidate position (first, second, third...).
    pub priority_bonus: Vec<i32>,
    /// Bonus for a validation without warnings.
    pub clean_bonus: i32,
    /// Penalty per validation warning.
    pub warning_penalty: i32,
    /// Bonus when prepare returned metadata.
    pub metadata_bonus: i32,
    /// Confidence lost when a fallback is used.
    pub fallback_penalty: i32,
}

impl DetectionConfig {
    /// Priority bonus for `kind`, zero if it is not a ranked candidate.
    pub fn bonus_for(&self, kind: StrategyKind) -> i32 {
        self.order
            .iter()
            .position(|k| *k == kind)
            .and_then(|i| self.priority_bonus.get(i).copied())
            .unwrap_or(0)
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            prepare_timeout: Duration::from_secs(5),
            validate_timeout: Duration::from_secs(3),
            order: vec![
                StrategyKind::Proximity,
                StrategyKind::Geofence,
                StrategyKind::DeviceSignature,
            ],
            base_score: 50,
            priority_bonus: vec![30, 20, 10],
            clean_bonus: 10,
            warning_penalty: 5,
            metadata_bonus: 5,
            fallback_penalty: 20,
        }
    }
}

/// Back-end endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL of the HR back-end. Offline collaborators are used when unset.
    pub base_url: Option<String>,
    /// Request timeout.
    #[serde(with = "millis", rename = "timeout_ms")]
    pub timeout: Duration,
    /// Token issuance path.
    pub token_path: String,
    /// Pre-commit validation path.
    pub prevalidate_path: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(10),
            token_path: "/v1/attendance/qr-token".into(),
            prevalidate_path: "/v1/attendance/pre-validate".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.geofence.radius_m, 200.0);
        assert_eq!(config.geofence.max_accuracy_m, 50.0);
        assert_eq!(config.token.lifetime, Duration::from_secs(30));
        assert_eq!(config.badge.history_cap, 10);
        assert_eq!(config.detection.bonus_for(StrategyKind::Proximity), 30);
        assert_eq!(config.detection.bonus_for(StrategyKind::DeviceSignature), 10);
        assert_eq!(config.detection.bonus_for(StrategyKind::ManualBadge), 0);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"geofence": {{"radius_m": 150.0}}, "token": {{"lifetime_ms": 10000}}}}"#
        )
        .unwrap();

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.geofence.radius_m, 150.0);
        assert_eq!(config.geofence.max_accuracy_m, 50.0);
        assert_eq!(config.token.lifetime, Duration::from_secs(10));
        assert_eq!(config.token.prefix, "ATT");
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let mut config = EngineConfig::default();
        config.badge.min_len = 40;
        assert!(matches!(config.check(), Err(VerifyError::Config { .. })));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = EngineConfig::from_json_file("/nonexistent/attendverify.json").unwrap_err();
        assert!(matches!(err, VerifyError::Config { .. }));
    }
}
