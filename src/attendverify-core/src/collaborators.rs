//! External collaborators consumed by the engine.
//!
//! The HR back-end is reached only through these traits. [`crate::https`]
//! provides the network implementations; [`LocalTokenIssuer`] issues codes
//! offline in the same format.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::VerifyError;
use crate::types::{PrecommitReport, PrecommitRequest};

/// Length of the random suffix in locally issued codes.
const LOCAL_NONCE_LEN: usize = 8;

/// A freshly signed rotating token as returned by the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    /// URL embedding the signed code.
    pub url: String,
    /// Expiry, epoch milliseconds.
    pub expires_at: i64,
}

/// Issues rotating presence tokens for a store.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Request a new token for `store_id`.
    async fn issue(&self, store_id: &str) -> Result<IssuedToken, VerifyError>;
}

/// Server-side anomaly check run before clock-in/clock-out.
#[async_trait]
pub trait PrecommitValidator: Send + Sync {
    /// Check the pending event.
    async fn prevalidate(&self, request: &PrecommitRequest)
        -> Result<PrecommitReport, VerifyError>;
}

/// Today's shift assignment.
#[async_trait]
pub trait ShiftLookup: Send + Sync {
    /// Store the user is assigned to today, if any.
    async fn assigned_store(&self, user_id: &str) -> Result<Option<String>, VerifyError>;
}

/// Offline issuer producing `PREFIX-<storeId>-<epochMs>-<random>` codes.
#[derive(Debug, Clone)]
pub struct LocalTokenIssuer {
    prefix: String,
    lifetime: Duration,
}

impl LocalTokenIssuer {
    /// Create an issuer for `prefix` codes living `lifetime`.
    pub fn new(prefix: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            lifetime,
        }
    }

    /// Build a code for `store_id` issued at `issued_ms`.
    pub fn code(&self, store_id: &str, issued_ms: i64) -> String {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(LOCAL_NONCE_LEN)
            .map(char::from)
            .collect();
        format!("{}-{}-{}-{}", self.prefix, store_id, issued_ms, nonce)
    }
}

#[async_trait]
impl TokenIssuer for LocalTokenIssuer {
    async fn issue(&self, store_id: &str) -> Result<IssuedToken, VerifyError> {
        let now = Utc::now().timestamp_millis();
        let lifetime_ms = i64::try_from(self.lifetime.as_millis()).unwrap_or(i64::MAX);
        let code = self.code(store_id, now);
        tracing::debug!(store_id, "LocalTokenIssuer: issued offline token");
        Ok(IssuedToken {
            url: format!("attendverify://clock?code={code}"),
            expires_at: now.saturating_add(lifetime_ms),
        })
    }
}
