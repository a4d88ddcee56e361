//! Consolidated integration tests for attendverify-core.
//!
//! One test binary keeps proptest and the tokio runtimes from competing
//! across many parallel test executables.

mod common;
mod detection;
mod geofence;
mod session;
