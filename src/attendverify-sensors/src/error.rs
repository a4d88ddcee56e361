//! Error types for sensor operations.

use thiserror::Error;

/// Errors that can occur while acquiring evidence from a capability.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The user (or the platform) refused access to the capability.
    #[error("Permission denied: {capability}")]
    PermissionDenied {
        /// Capability that was refused (e.g. "geolocation").
        capability: String,
    },

    /// The capability is not present on this device.
    #[error("Hardware not available: {reason}")]
    HardwareNotAvailable {
        /// Reason hardware is not available.
        reason: String,
    },

    /// No position fix could be obtained.
    #[error("Position unavailable: {reason}")]
    PositionUnavailable {
        /// Reason no fix was produced.
        reason: String,
    },

    /// A proximity read failed.
    #[error("Proximity read failed: {reason}")]
    ReadFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// The capability was stopped while an operation was pending.
    #[error("Capability stopped")]
    Stopped,

    /// Transport or filesystem error talking to a device daemon.
    #[error("I/O error: {message}")]
    Io {
        /// Error message.
        message: String,
    },

    /// A device daemon sent something we could not interpret.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message.
        message: String,
    },
}

impl SensorError {
    /// Whether the failure means the capability cannot be used at all
    /// for this activation (as opposed to a transient read problem).
    #[must_use]
    pub fn is_capability_failure(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. } | Self::HardwareNotAvailable { .. }
        )
    }
}

impl From<std::io::Error> for SensorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for SensorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol {
            message: e.to_string(),
        }
    }
}
