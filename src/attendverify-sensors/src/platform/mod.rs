//! Host platform backends and capability detection.

mod factory;
#[cfg(feature = "gpsd")]
mod gpsd;
mod host_env;

pub use factory::{detect_capabilities, PlatformCapabilities, SensorSuite, GPSD_ADDR_VAR};
#[cfg(feature = "gpsd")]
pub use gpsd::{GpsdPositionProvider, DEFAULT_GPSD_ADDR};
pub use host_env::HostEnvironment;
