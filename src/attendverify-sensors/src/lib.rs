//! # attendverify-sensors
//!
//! Evidence capability layer for the attendance verification engine.
//!
//! Every source of presence evidence is abstracted behind a trait so the
//! strategies in `attendverify-core` never touch a device directly:
//!
//! | Capability | Trait | Host backend | Fallback |
//! |------------|-------|--------------|----------|
//! | Satellite position | [`PositionProvider`] | gpsd (TCP JSON) | unsupported |
//! | Proximity radio tap | [`ProximityReader`] | none | simulation mode |
//! | Keyboard-wedge scanner | [`KeySource`] | broadcast channel | same |
//! | Device environment | [`EnvironmentProbe`] | process/OS probe | static snapshot |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use attendverify_sensors::SensorSuite;
//!
//! #[tokio::main]
//! async fn main() {
//!     let sensors = SensorSuite::detect(true, None).await;
//!     if sensors.position.is_supported() {
//!         let fix = sensors.position.current_position().await;
//!         println!("{fix:?}");
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

mod error;
mod provider;
mod types;

/// Host platform backends and capability detection.
pub mod platform;

/// Simulated capabilities for degraded operation and tests.
pub mod simulated;

pub use error::SensorError;
pub use platform::{
    detect_capabilities, HostEnvironment, PlatformCapabilities, SensorSuite, GPSD_ADDR_VAR,
};
#[cfg(feature = "gpsd")]
pub use platform::{GpsdPositionProvider, DEFAULT_GPSD_ADDR};
pub use provider::{EnvironmentProbe, KeySource, PositionProvider, PositionWatch, ProximityReader};
pub use simulated::{
    ChannelKeySource, SimulatedPositionProvider, SimulatedProximityReader, StaticEnvironment,
};
pub use types::{EnvironmentSnapshot, GeoPosition, Key, KeyEvent, PermissionState, ProximityRead};
