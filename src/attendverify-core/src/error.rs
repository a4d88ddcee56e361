//! Error types for verification operations.

use thiserror::Error;

use crate::types::{SessionState, StrategyKind};

/// Errors that can occur while verifying or committing a presence event.
///
/// Soft violations (outside the geofence, expired-but-renewable token,
/// weak badge, low device security) are NOT errors; they travel as
/// warnings inside [`crate::types::ValidationOutcome`].
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Hardware, permission or network capability missing for this activation.
    #[error("Capability unavailable: {message}")]
    Capability {
        /// Error message, preserving the original cause.
        message: String,
    },

    /// An externally driven operation did not finish in time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// The bound that was exceeded.
        timeout_ms: u64,
    },

    /// Evidence exists but is not good enough (accuracy, format).
    #[error("Invalid evidence: {reason}")]
    Evidence {
        /// Reason the evidence was rejected.
        reason: String,
    },

    /// A payload was requested but the strategy holds no valid evidence.
    #[error("No valid evidence available from {strategy}")]
    NoEvidence {
        /// Strategy that was asked to augment.
        strategy: StrategyKind,
    },

    /// Server-side pre-commit check reported a critical anomaly.
    #[error("Blocked by critical anomaly: {message}")]
    CriticalAnomaly {
        /// Anomaly description.
        message: String,
    },

    /// A session transition was attempted from the wrong state.
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        /// Current session state.
        state: SessionState,
        /// Attempted action.
        action: &'static str,
    },

    /// The operation needs a selected store.
    #[error("No store selected")]
    StoreRequired,

    /// The operation needs a selected, prepared strategy.
    #[error("No verification method selected")]
    NoStrategySelected,

    /// Strategy switching is only allowed outside an open session.
    #[error("Cannot switch verification method while {state}")]
    SwitchWhileClockedIn {
        /// Current session state.
        state: SessionState,
    },

    /// The registry has no strategy for this kind.
    #[error("Verification method not registered: {kind}")]
    StrategyNotFound {
        /// The missing kind.
        kind: StrategyKind,
    },

    /// Network error talking to a back-end collaborator.
    #[error("Network error: {message}")]
    Network {
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Sensor error.
    #[error("Sensor error: {0}")]
    Sensor(#[from] attendverify_sensors::SensorError),
}

impl VerifyError {
    /// Build a capability error from any displayable cause.
    pub fn capability(cause: impl std::fmt::Display) -> Self {
        Self::Capability {
            message: cause.to_string(),
        }
    }

    /// Build an evidence-quality error.
    pub fn evidence(reason: impl Into<String>) -> Self {
        Self::Evidence {
            reason: reason.into(),
        }
    }

    /// Fatal to the strategy for this activation; switch method to recover.
    #[must_use]
    pub fn is_capability(&self) -> bool {
        match self {
            Self::Capability { .. } | Self::Network { .. } => true,
            Self::Sensor(e) => e.is_capability_failure(),
            _ => false,
        }
    }

    /// Fatal to the call only; retry or fall back.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The user must re-attempt with better evidence.
    #[must_use]
    pub fn is_evidence(&self) -> bool {
        matches!(self, Self::Evidence { .. } | Self::NoEvidence { .. })
    }

    /// Never overridable by the user.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::CriticalAnomaly { .. })
    }
}
