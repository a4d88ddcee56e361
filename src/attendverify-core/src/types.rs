//! Protocol types shared by strategies, the registry and the session controller.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VerifyError;

/// Free-form evidence metadata attached to outcomes and payloads.
pub type Metadata = serde_json::Map<String, Value>;

/// Identifier of a verification strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Satellite position within a radius of the store.
    Geofence,
    /// Short-lived scannable code.
    RotatingToken,
    /// Proximity radio tap.
    Proximity,
    /// Device/browser signature.
    DeviceSignature,
    /// Badge identifier typed or scanned.
    ManualBadge,
    /// Auto-detecting composite.
    Auto,
}

impl StrategyKind {
    /// Every kind, in registry order.
    pub const ALL: [StrategyKind; 6] = [
        Self::Auto,
        Self::Proximity,
        Self::Geofence,
        Self::RotatingToken,
        Self::DeviceSignature,
        Self::ManualBadge,
    ];

    /// Stable identifier used in logs, metadata and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Geofence => "geofence",
            Self::RotatingToken => "rotating_token",
            Self::Proximity => "proximity",
            Self::DeviceSignature => "device_signature",
            Self::ManualBadge => "manual_badge",
            Self::Auto => "auto",
        }
    }

    /// Value of `trackingMethod` in the clock payload.
    pub fn tracking_method(self) -> TrackingMethod {
        match self {
            Self::Geofence => TrackingMethod::Gps,
            Self::RotatingToken => TrackingMethod::Qr,
            Self::Proximity => TrackingMethod::Nfc,
            Self::DeviceSignature => TrackingMethod::Web,
            Self::ManualBadge => TrackingMethod::Badge,
            Self::Auto => TrackingMethod::Smart,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| VerifyError::Config {
                message: format!("unknown verification method: {s}"),
            })
    }
}

/// Tracking method reported to the HR back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMethod {
    /// Geofence.
    Gps,
    /// Proximity radio.
    Nfc,
    /// Rotating token.
    Qr,
    /// Auto-detected.
    Smart,
    /// Device signature.
    Web,
    /// Badge.
    Badge,
}

/// Static availability flags of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    /// The method can run on this device at all.
    pub supported: bool,
    /// A permission prompt is involved.
    pub requires_permission: bool,
    /// Dedicated hardware is involved.
    pub requires_hardware: bool,
    /// A network round trip is involved.
    pub requires_network: bool,
}

/// Immutable description of a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDescriptor {
    /// Strategy identifier.
    #[serde(rename = "type")]
    pub kind: StrategyKind,
    /// Short name for pickers.
    pub display_name: String,
    /// One-line description.
    pub description: String,
    /// Lower is preferred.
    pub priority: u8,
    /// Availability flags.
    pub availability: Availability,
}

/// Store coordinates in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
}

/// The store a worker is clocking at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    /// Store identifier.
    pub id: String,
    /// Store name.
    pub name: String,
    /// Store location, if surveyed.
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    /// Postal address.
    #[serde(default)]
    pub address: Option<String>,
}

/// Session state. Owned and mutated only by the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing recorded today.
    #[default]
    Idle,
    /// At work.
    ClockedIn,
    /// On a break.
    OnBreak,
    /// Day finished.
    ClockedOut,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::ClockedIn => "clocked in",
            Self::OnBreak => "on break",
            Self::ClockedOut => "clocked out",
        })
    }
}

/// Ambient facts a strategy needs. Supplied fresh on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationContext {
    /// Selected store.
    pub store: Option<StoreInfo>,
    /// Worker identifier.
    pub user_id: String,
    /// Current session state (read-only for strategies).
    pub session_state: SessionState,
}

impl VerificationContext {
    /// Context for `user_id` at `store`.
    pub fn new(user_id: impl Into<String>, store: Option<StoreInfo>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            session_state: SessionState::Idle,
        }
    }

    /// The selected store.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::StoreRequired`] if none is selected.
    pub fn require_store(&self) -> Result<&StoreInfo, VerifyError> {
        self.store.as_ref().ok_or(VerifyError::StoreRequired)
    }
}

/// Result of activating a strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareOutcome {
    /// The strategy can be offered.
    pub success: bool,
    /// Why it cannot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Strategy-specific details (e.g. simulation mode).
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl PrepareOutcome {
    /// Successful activation without details.
    pub fn ready() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Successful activation with details.
    pub fn ready_with(metadata: Metadata) -> Self {
        Self {
            success: true,
            error: None,
            metadata,
        }
    }

    /// Failed activation.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            metadata: Metadata::new(),
        }
    }
}

/// Result of checking evidence right before a commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    /// The event may be committed.
    pub is_valid: bool,
    /// Why it may not (hard block).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Soft violations needing acknowledgement.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Strategy-specific details.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl ValidationOutcome {
    /// Clean pass.
    pub fn valid(metadata: Metadata) -> Self {
        Self {
            is_valid: true,
            error: None,
            warnings: Vec::new(),
            metadata,
        }
    }

    /// Allowed but flagged.
    pub fn flagged(warnings: Vec<String>, metadata: Metadata) -> Self {
        Self {
            is_valid: true,
            error: None,
            warnings,
            metadata,
        }
    }

    /// Hard block.
    pub fn blocked(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
            warnings: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// Attach one metadata entry.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Valid, but with warnings the user has to confirm.
    pub fn is_soft_violation(&self) -> bool {
        self.is_valid && !self.warnings.is_empty()
    }
}

/// Kind of presence event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Start of the working day.
    ClockIn,
    /// End of the working day.
    ClockOut,
    /// Break started.
    BreakStart,
    /// Break ended.
    BreakEnd,
}

/// Base clock-event fields, before strategy evidence is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockPayload {
    /// Store identifier.
    pub store_id: String,
    /// Worker identifier.
    pub user_id: String,
    /// Event kind.
    pub entry_type: EntryType,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

impl ClockPayload {
    /// Base payload for `entry_type` happening now.
    pub fn now(ctx: &VerificationContext, entry_type: EntryType) -> Result<Self, VerifyError> {
        Ok(Self {
            store_id: ctx.require_store()?.id.clone(),
            user_id: ctx.user_id.clone(),
            entry_type,
            timestamp: Utc::now(),
        })
    }
}

/// Position evidence in the clock payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
    /// Accuracy in meters.
    pub accuracy: f64,
    /// Store address, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Final artifact handed to the HR back-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AugmentedPayload {
    /// Store identifier.
    pub store_id: String,
    /// Worker identifier.
    pub user_id: String,
    /// Event kind.
    pub entry_type: EntryType,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// How presence was verified.
    pub tracking_method: TrackingMethod,
    /// Position evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_location: Option<GeoLocation>,
    /// Device and evidence details.
    pub device_info: Metadata,
    /// Human-readable note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl AugmentedPayload {
    /// Start from the base fields with no evidence attached.
    pub fn from_base(base: ClockPayload, tracking_method: TrackingMethod) -> Self {
        Self {
            store_id: base.store_id,
            user_id: base.user_id,
            entry_type: base.entry_type,
            timestamp: base.timestamp,
            tracking_method,
            geo_location: None,
            device_info: Metadata::new(),
            notes: None,
        }
    }
}

/// Outcome of auto-detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    /// Strategy delegated to, if any candidate was ready.
    pub selected_strategy: Option<StrategyKind>,
    /// 0–100 readiness confidence.
    pub confidence: u8,
    /// Candidates reporting themselves available.
    pub available_strategies: Vec<StrategyKind>,
    /// One entry per attempted candidate.
    pub detection_reasons: Vec<String>,
    /// Alternates to try if the selected strategy fails later.
    pub fallback_order: Vec<StrategyKind>,
}

/// Severity of a server-side pre-commit warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Low,
    /// Worth a look.
    Medium,
    /// Needs attention.
    High,
    /// Blocks the commit.
    Critical,
}

/// Request body for the pre-commit validation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecommitRequest {
    /// Worker identifier.
    pub user_id: String,
    /// Store identifier.
    pub store_id: String,
    /// Either `clock_in` or `clock_out`.
    pub entry_type: EntryType,
}

/// One anomaly reported by the pre-commit endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecommitWarning {
    /// Anomaly category (e.g. "early_clock_in").
    #[serde(rename = "type")]
    pub warning_type: String,
    /// Severity.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Expected value, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<Value>,
    /// Observed value, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_value: Option<Value>,
}

/// Response of the pre-commit validation endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecommitReport {
    /// Anomalies found.
    #[serde(default)]
    pub warnings: Vec<PrecommitWarning>,
}

impl PrecommitReport {
    /// First critical anomaly, if any.
    pub fn critical(&self) -> Option<&PrecommitWarning> {
        self.warnings
            .iter()
            .find(|w| w.severity == Severity::Critical)
    }
}
