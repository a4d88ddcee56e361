//! Platform detection and sensor factory.
//!
//! Detects which evidence sources the host actually has and builds a
//! [`SensorSuite`]. Falls back gracefully to simulated capabilities when
//! a device is missing, so strategies degrade instead of failing to build.

use std::sync::Arc;

use crate::provider::{EnvironmentProbe, KeySource, PositionProvider, ProximityReader};
use crate::simulated::{ChannelKeySource, SimulatedPositionProvider, SimulatedProximityReader};
use crate::types::GeoPosition;

use super::host_env::HostEnvironment;

/// Environment variable overriding the gpsd address.
pub const GPSD_ADDR_VAR: &str = "ATTENDVERIFY_GPSD";

/// Capabilities detected at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCapabilities {
    /// A positioning daemon appears to be installed.
    pub positioning: bool,
    /// Where to reach it, if known.
    pub gpsd_addr: Option<String>,
    /// A proximity reader driver is available.
    pub proximity: bool,
    /// Key events can be delivered to a listener.
    pub key_stream: bool,
}

/// Detect capabilities of the current platform.
///
/// This only looks for evidence that a device is installed; it does not
/// open it. [`SensorSuite::detect`] performs the actual probe. An explicit
/// `gpsd_addr` takes precedence over [`GPSD_ADDR_VAR`] and socket lookup.
pub fn detect_capabilities(gpsd_addr: Option<&str>) -> PlatformCapabilities {
    let gpsd_addr = gpsd_address(gpsd_addr);

    PlatformCapabilities {
        positioning: gpsd_addr.is_some(),
        gpsd_addr,
        // No proximity driver ships with this crate; hosts run the
        // proximity strategy in simulation mode.
        proximity: false,
        key_stream: true,
    }
}

#[cfg(all(feature = "gpsd", unix))]
fn gpsd_address(explicit: Option<&str>) -> Option<String> {
    use std::path::Path;

    if let Some(addr) = explicit {
        return Some(addr.to_string());
    }
    if let Ok(addr) = std::env::var(GPSD_ADDR_VAR) {
        return Some(addr);
    }
    let socket_present =
        Path::new("/run/gpsd.sock").exists() || Path::new("/var/run/gpsd.sock").exists();
    socket_present.then(|| super::DEFAULT_GPSD_ADDR.to_string())
}

#[cfg(all(feature = "gpsd", not(unix)))]
fn gpsd_address(explicit: Option<&str>) -> Option<String> {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(GPSD_ADDR_VAR).ok())
}

#[cfg(not(feature = "gpsd"))]
fn gpsd_address(_explicit: Option<&str>) -> Option<String> {
    None
}

/// One instance of every capability a strategy may need.
#[derive(Clone)]
pub struct SensorSuite {
    /// Satellite positioning.
    pub position: Arc<dyn PositionProvider>,
    /// Proximity radio.
    pub proximity: Arc<dyn ProximityReader>,
    /// Keyboard-wedge key stream.
    pub keys: Arc<dyn KeySource>,
    /// Environment probe.
    pub environment: Arc<dyn EnvironmentProbe>,
}

impl SensorSuite {
    /// Build the best available suite for this host.
    ///
    /// `secure_transport` tells the environment probe whether back-end
    /// endpoints use TLS. `gpsd_addr` overrides gpsd discovery.
    pub async fn detect(secure_transport: bool, gpsd_addr: Option<&str>) -> Self {
        let caps = detect_capabilities(gpsd_addr);

        tracing::info!(
            positioning = caps.positioning,
            gpsd_addr = ?caps.gpsd_addr,
            proximity = caps.proximity,
            "SensorSuite: detected capabilities"
        );

        let position = Self::detect_position(&caps).await;

        if !caps.proximity {
            tracing::warn!(
                "SensorSuite: no proximity reader, proximity strategy will run in simulation mode"
            );
        }

        Self {
            position,
            proximity: Arc::new(SimulatedProximityReader::unsupported()),
            keys: Arc::new(ChannelKeySource::new()),
            environment: Arc::new(HostEnvironment::new(secure_transport)),
        }
    }

    #[cfg(feature = "gpsd")]
    async fn detect_position(caps: &PlatformCapabilities) -> Arc<dyn PositionProvider> {
        if let Some(addr) = &caps.gpsd_addr {
            let provider = super::GpsdPositionProvider::new(addr.clone());
            if provider.probe().await {
                tracing::info!(addr = %addr, "SensorSuite: using gpsd positioning");
                return Arc::new(provider);
            }
            tracing::warn!(addr = %addr, "SensorSuite: gpsd not answering");
        }
        tracing::warn!("SensorSuite: no positioning available");
        Arc::new(SimulatedPositionProvider::unsupported())
    }

    #[cfg(not(feature = "gpsd"))]
    async fn detect_position(_caps: &PlatformCapabilities) -> Arc<dyn PositionProvider> {
        tracing::warn!("SensorSuite: built without gpsd support, no positioning available");
        Arc::new(SimulatedPositionProvider::unsupported())
    }

    /// A fully simulated suite placed at `fix`, with a proximity reader
    /// present and a trusted environment.
    pub fn simulated(fix: GeoPosition) -> Self {
        Self {
            position: Arc::new(SimulatedPositionProvider::new(fix)),
            proximity: Arc::new(SimulatedProximityReader::new()),
            keys: Arc::new(ChannelKeySource::new()),
            environment: Arc::new(crate::simulated::StaticEnvironment::trusted()),
        }
    }
}

impl std::fmt::Debug for SensorSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSuite")
            .field("position_supported", &self.position.is_supported())
            .field("proximity_supported", &self.proximity.is_supported())
            .finish_non_exhaustive()
    }
}
