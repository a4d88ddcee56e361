//! # attendverify-core
//!
//! Attendance verification strategy engine: collects evidence that a worker
//! is physically present at an assigned store before a clock event is
//! committed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SessionController                         │
//! │     (Idle / ClockedIn / OnBreak / ClockedOut, elapsed)       │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              StrategyRegistry                     │      │
//! │  │        kind -> Arc<dyn VerificationStrategy>      │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │          ┌────────────────┼────────────────┐                 │
//! │          ▼                ▼                ▼                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │  Geofence    │  │ RotatingToken│  │  Proximity   │      │
//! │  │ (haversine)  │  │ (30s codes)  │  │ (tag reads)  │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │DeviceSignat. │  │ ManualBadge  │  │  AutoDetect  │      │
//! │  │ (env score)  │  │ (scan/type)  │  │ (composite)  │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │         attendverify-sensors capabilities          │      │
//! │  │   position / proximity / key stream / environment  │      │
//! │  └──────────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Verification model
//!
//! - Every strategy runs **prepare → validate → augment** against a
//!   [`VerificationContext`].
//! - A validation is either a hard block (`is_valid == false`) or a soft
//!   violation (valid with warnings) that the worker must acknowledge.
//! - Auto-detection probes the concrete strategies in order and delegates
//!   to the first one that validates, falling back when evidence goes stale.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::doc_markdown)] // Allow product names without backticks
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::missing_panics_doc)] // Panic documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod badge;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod history;
pub mod https;
pub mod registry;
pub mod session;
pub mod strategy;
pub mod types;

pub use collaborators::{
    IssuedToken, LocalTokenIssuer, PrecommitValidator, ShiftLookup, TokenIssuer,
};
pub use config::EngineConfig;
pub use error::VerifyError;
pub use https::HttpsClient;
pub use registry::StrategyRegistry;
pub use session::{
    Acknowledgement, ClockSnapshot, CommitOutcome, SessionClock, SessionController, StoreMismatch,
};
pub use strategy::{Permission, VerificationStrategy};
pub use types::{
    AugmentedPayload, ClockPayload, DetectionResult, EntryType, PrepareOutcome, SessionState,
    StoreInfo, StrategyDescriptor, StrategyKind, ValidationOutcome, VerificationContext,
};
