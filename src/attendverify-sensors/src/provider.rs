//! Capability traits.
//!
//! Every evidence source a verification strategy can consume is modelled
//! as one trait here. Strategies hold an `Arc<dyn Trait>` and never talk
//! to devices directly, so each strategy can be exercised against the
//! simulated implementations in [`crate::simulated`].
//!
//! Timeouts are NOT applied here. Callers wrap every call in their own
//! bounded timeout so that the policy lives next to the strategy that
//! owns it.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::SensorError;
use crate::types::{EnvironmentSnapshot, GeoPosition, KeyEvent, PermissionState, ProximityRead};

/// A continuous stream of position fixes.
///
/// The producer stops as soon as the watch is stopped or dropped.
#[derive(Debug)]
pub struct PositionWatch {
    updates: mpsc::Receiver<GeoPosition>,
}

impl PositionWatch {
    /// Wrap a receiving end fed by a provider.
    #[must_use]
    pub fn new(updates: mpsc::Receiver<GeoPosition>) -> Self {
        Self { updates }
    }

    /// Wait for the next fix. `None` once the provider has gone away.
    pub async fn next(&mut self) -> Option<GeoPosition> {
        self.updates.recv().await
    }

    /// Stop the watch. Pending fixes are discarded.
    pub fn stop(mut self) {
        self.updates.close();
    }
}

/// Satellite positioning.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    /// Whether positioning hardware exists at all.
    fn is_supported(&self) -> bool;

    /// Ask for permission to read the position.
    async fn request_permission(&self) -> Result<PermissionState, SensorError>;

    /// Obtain a single fresh fix.
    ///
    /// # Errors
    ///
    /// Returns error if no fix can be produced.
    async fn current_position(&self) -> Result<GeoPosition, SensorError>;

    /// Start continuous tracking.
    ///
    /// # Errors
    ///
    /// Returns error if tracking cannot be started.
    async fn watch(&self) -> Result<PositionWatch, SensorError>;
}

/// Proximity radio (tap) reader.
#[async_trait]
pub trait ProximityReader: Send + Sync {
    /// Whether a reader is present.
    fn is_supported(&self) -> bool;

    /// Wait for the next tag.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::Stopped`] if [`ProximityReader::stop`] is
    /// called while waiting.
    async fn read_next(&self) -> Result<ProximityRead, SensorError>;

    /// Release the reader. Safe to call when nothing is pending.
    async fn stop(&self);
}

/// Global keyboard-wedge key stream.
pub trait KeySource: Send + Sync {
    /// Attach a listener. Dropping the receiver detaches it.
    ///
    /// # Errors
    ///
    /// Returns error if no key stream exists on this platform.
    fn subscribe(&self) -> Result<broadcast::Receiver<KeyEvent>, SensorError>;
}

/// Read-only probe of the running environment.
pub trait EnvironmentProbe: Send + Sync {
    /// Capture the current environment attributes.
    fn snapshot(&self) -> EnvironmentSnapshot;
}
