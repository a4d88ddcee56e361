//! Verification strategy contract.
//!
//! Every strategy is driven through the same lifecycle:
//!
//! ```text
//! activate ──▶ prepare ──▶ validate (1..n) ──▶ augment_payload ──▶ cleanup / reset
//! ```
//!
//! `prepare` and `validate` never return errors: expected failures travel
//! inside [`PrepareOutcome`] / [`ValidationOutcome`]. `augment_payload`
//! fails loudly when no valid evidence exists.
//!
//! Strategies are shared as `Arc<dyn VerificationStrategy>` between the
//! registry and the auto-detection composite, so mutable evidence lives
//! behind a `std::sync::Mutex` that is never held across an `.await`.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VerifyError;
use crate::types::{
    AugmentedPayload, ClockPayload, PrepareOutcome, StrategyDescriptor, StrategyKind,
    ValidationOutcome, VerificationContext,
};

pub mod auto_detect;
pub mod device_signature;
pub mod geofence;
pub mod manual_badge;
pub mod proximity;
pub mod rotating_token;

pub use auto_detect::AutoDetectStrategy;
pub use device_signature::{DeviceSignatureStrategy, SecurityLevel};
pub use geofence::{haversine_distance, GeofenceStrategy};
pub use manual_badge::ManualBadgeStrategy;
pub use proximity::ProximityStrategy;
pub use rotating_token::{extract_code, RotatingToken, RotatingTokenStrategy};

/// Permission a strategy may need before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Position access.
    Location,
    /// Proximity radio access.
    Proximity,
    /// Network access to the back-end.
    Network,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Location => "location",
            Self::Proximity => "proximity",
            Self::Network => "network",
        })
    }
}

/// A pluggable verification method.
#[async_trait]
pub trait VerificationStrategy: Send + Sync {
    /// Static description.
    fn descriptor(&self) -> &StrategyDescriptor;

    /// Strategy identifier.
    fn kind(&self) -> StrategyKind {
        self.descriptor().kind
    }

    /// Whether the method can be offered on this device, without activating it.
    fn is_available(&self) -> bool;

    /// Permissions the method will ask for.
    fn required_permissions(&self) -> Vec<Permission>;

    /// Acquire whatever the method needs before it can be offered.
    async fn prepare(&self, ctx: &VerificationContext) -> PrepareOutcome;

    /// Re-check evidence immediately before a commit.
    async fn validate(&self, ctx: &VerificationContext) -> ValidationOutcome;

    /// Attach evidence to the outgoing clock record.
    ///
    /// # Errors
    ///
    /// Fails if no valid evidence exists.
    async fn augment_payload(
        &self,
        base: ClockPayload,
        ctx: &VerificationContext,
    ) -> Result<AugmentedPayload, VerifyError>;

    /// Opaque state for the presentation layer's panel.
    fn panel_state(&self) -> Value;

    /// Release acquired resources. Safe without a successful prepare.
    async fn cleanup(&self) {}

    /// Drop cached evidence, keeping hardware handles.
    async fn reset(&self) {}
}

/// Lock a strategy-private mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `fut` bounded by `limit`, mapping expiry to [`VerifyError::Timeout`].
pub(crate) async fn bounded<T, F>(
    operation: &str,
    limit: Duration,
    fut: F,
) -> Result<T, VerifyError>
where
    F: Future<Output = Result<T, VerifyError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(VerifyError::Timeout {
            operation: operation.to_string(),
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
