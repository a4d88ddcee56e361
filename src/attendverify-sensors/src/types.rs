//! Evidence types produced by capabilities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A satellite-derived position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPosition {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
    /// Horizontal accuracy radius in meters.
    pub accuracy: f64,
    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
}

impl GeoPosition {
    /// Create a fix stamped with the current time.
    #[must_use]
    pub fn new(lat: f64, lng: f64, accuracy: f64) -> Self {
        Self {
            lat,
            lng,
            accuracy,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    /// Access granted.
    Granted,
    /// Access refused.
    Denied,
    /// The platform did not answer (treated as denied by callers).
    Prompt,
}

/// A single tag read from a proximity radio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityRead {
    /// Tag identifier as reported by the reader.
    pub id: String,
    /// Raw record payload, if the tag carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// When the tag was read.
    pub read_at: DateTime<Utc>,
}

impl ProximityRead {
    /// Create a read stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: None,
            read_at: Utc::now(),
        }
    }
}

/// A key delivered by a keyboard-wedge stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Key {
    /// A printable character.
    Char(char),
    /// Enter / Return.
    Enter,
    /// Backspace.
    Backspace,
    /// Any other key (modifiers, arrows, function keys).
    Other,
}

/// A timestamped key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    /// The key pressed.
    pub key: Key,
    /// Milliseconds on a monotonic clock of the source's choosing.
    pub at_ms: u64,
}

impl KeyEvent {
    /// Create a key event.
    #[must_use]
    pub fn new(key: Key, at_ms: u64) -> Self {
        Self { key, at_ms }
    }
}

/// Stable and security-relevant attributes of the running environment.
///
/// Used both to derive a device signature and to score how much the
/// environment can be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSnapshot {
    /// Operating system / platform identifier.
    pub platform: String,
    /// CPU architecture.
    pub arch: String,
    /// Preferred locale (e.g. "it_IT.UTF-8").
    pub locale: String,
    /// Timezone name or UTC offset.
    pub timezone: String,
    /// Display characteristics (e.g. "x11", "wayland", "headless").
    pub display: String,
    /// Logical CPU count.
    pub hardware_concurrency: usize,
    /// Whether cookie-like local state can be persisted.
    pub cookies_enabled: bool,
    /// Whether the user asked not to be tracked.
    pub do_not_track: bool,
    /// Whether outbound traffic uses a secure transport.
    pub secure_transport: bool,
    /// Whether the process runs in a secure context.
    pub secure_context: bool,
    /// Whether automation or instrumentation markers were found.
    pub automation_detected: bool,
    /// Whether an OS cryptographic RNG is usable.
    pub crypto_available: bool,
    /// Whether local storage is usable.
    pub storage_available: bool,
}
