//! Device-signature strategy: a stable environment fingerprint plus a
//! periodic session-sanity check, scored into a security level.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use attendverify_sensors::{EnvironmentProbe, EnvironmentSnapshot};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::{lock, Permission, VerificationStrategy};
use crate::config::DeviceConfig;
use crate::error::VerifyError;
use crate::types::{
    Availability, AugmentedPayload, ClockPayload, Metadata, PrepareOutcome, StrategyDescriptor,
    StrategyKind, ValidationOutcome, VerificationContext,
};

/// Security level derived from the environment score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Below the medium threshold.
    Low,
    /// Between the thresholds.
    Medium,
    /// At or above the high threshold.
    High,
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// Hex SHA-256 over the stable environment attributes.
pub fn fingerprint(env: &EnvironmentSnapshot) -> String {
    let mut hasher = Sha256::new();
    for part in [
        env.platform.as_str(),
        env.arch.as_str(),
        env.locale.as_str(),
        env.timezone.as_str(),
        env.display.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(env.hardware_concurrency.to_le_bytes());
    hasher.update([u8::from(env.cookies_enabled), u8::from(env.do_not_track)]);
    hex::encode(hasher.finalize())
}

/// Additive security score (0–100).
pub fn security_score(env: &EnvironmentSnapshot) -> u32 {
    let mut score = 0;
    if env.secure_transport {
        score += 30;
    }
    if !env.automation_detected {
        score += 30;
    }
    if env.secure_context {
        score += 20;
    }
    if env.crypto_available {
        score += 20;
    }
    score
}

/// Itemized risk factors present in `env`.
pub fn risk_factors(env: &EnvironmentSnapshot) -> Vec<String> {
    let checks = [
        (!env.cookies_enabled, "cookies disabled"),
        (env.do_not_track, "do-not-track enabled"),
        (!env.secure_transport, "insecure transport"),
        (env.automation_detected, "automation signature detected"),
        (!env.secure_context, "non-secure context"),
    ];
    checks
        .into_iter()
        .filter(|(present, _)| *present)
        .map(|(_, factor)| factor.to_string())
        .collect()
}

/// Capabilities missing for a sane session.
fn sanity_failures(env: &EnvironmentSnapshot) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if !env.crypto_available {
        missing.push("cryptographic random source");
    }
    if !env.storage_available {
        missing.push("local storage");
    }
    missing
}

struct Established {
    fingerprint: String,
    session_id: String,
    snapshot: EnvironmentSnapshot,
    checked_at: Instant,
}

/// Device/browser signature verification.
pub struct DeviceSignatureStrategy {
    descriptor: StrategyDescriptor,
    config: DeviceConfig,
    environment: Arc<dyn EnvironmentProbe>,
    state: Mutex<Option<Established>>,
}

impl DeviceSignatureStrategy {
    /// Create the strategy over `environment`.
    pub fn new(config: DeviceConfig, environment: Arc<dyn EnvironmentProbe>) -> Self {
        Self {
            descriptor: StrategyDescriptor {
                kind: StrategyKind::DeviceSignature,
                display_name: "Device".into(),
                description: "Verify with this device's signature".into(),
                priority: 4,
                availability: Availability {
                    supported: true,
                    requires_permission: false,
                    requires_hardware: false,
                    requires_network: false,
                },
            },
            config,
            environment,
            state: Mutex::new(None),
        }
    }

    /// Level for `score` under the configured thresholds.
    pub fn level_for(&self, score: u32) -> SecurityLevel {
        if score >= self.config.high_threshold {
            SecurityLevel::High
        } else if score >= self.config.medium_threshold {
            SecurityLevel::Medium
        } else {
            SecurityLevel::Low
        }
    }

    /// The established fingerprint, if prepared.
    pub fn fingerprint(&self) -> Option<String> {
        lock(&self.state).as_ref().map(|e| e.fingerprint.clone())
    }

    /// Re-run the sanity check if the refresh interval has elapsed.
    fn refresh(&self) -> Result<EnvironmentSnapshot, String> {
        let mut state = lock(&self.state);
        let established = state
            .as_mut()
            .ok_or_else(|| "Device signature not established".to_string())?;
        if established.checked_at.elapsed() >= self.config.sanity_refresh {
            let snapshot = self.environment.snapshot();
            let missing = sanity_failures(&snapshot);
            if !missing.is_empty() {
                return Err(format!("Session check failed: missing {}", missing.join(", ")));
            }
            debug!("DeviceSignature: session re-checked");
            established.snapshot = snapshot;
            established.checked_at = Instant::now();
        }
        Ok(established.snapshot.clone())
    }
}

#[async_trait]
impl VerificationStrategy for DeviceSignatureStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        true
    }

    fn required_permissions(&self) -> Vec<Permission> {
        Vec::new()
    }

    #[instrument(skip_all, fields(strategy = "device_signature"))]
    async fn prepare(&self, _ctx: &VerificationContext) -> PrepareOutcome {
        let snapshot = self.environment.snapshot();
        let missing = sanity_failures(&snapshot);
        if !missing.is_empty() {
            warn!(?missing, "DeviceSignature: session check failed");
            return PrepareOutcome::failed(format!(
                "Session check failed: missing {}",
                missing.join(", ")
            ));
        }

        let fingerprint = fingerprint(&snapshot);
        let mut session = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut session);
        let session_id = hex::encode(session);

        info!(fingerprint = %&fingerprint[..16], "DeviceSignature: established");
        let mut metadata = Metadata::new();
        metadata.insert("fingerprint".into(), json!(fingerprint));
        metadata.insert("platform".into(), json!(snapshot.platform));

        *lock(&self.state) = Some(Established {
            fingerprint,
            session_id,
            snapshot,
            checked_at: Instant::now(),
        });
        PrepareOutcome::ready_with(metadata)
    }

    async fn validate(&self, _ctx: &VerificationContext) -> ValidationOutcome {
        let snapshot = match self.refresh() {
            Ok(snapshot) => snapshot,
            Err(reason) => return ValidationOutcome::blocked(reason),
        };
        let score = security_score(&snapshot);
        let level = self.level_for(score);
        let risks = risk_factors(&snapshot);

        let outcome = if level == SecurityLevel::Low {
            warn!(score, ?risks, "DeviceSignature: low security level");
            let warnings = if risks.is_empty() {
                vec!["Low device security level".to_string()]
            } else {
                risks
                    .iter()
                    .map(|r| format!("Low device security: {r}"))
                    .collect()
            };
            ValidationOutcome::flagged(warnings, Metadata::new())
        } else {
            ValidationOutcome::valid(Metadata::new())
        };
        outcome
            .with("securityLevel", level.to_string())
            .with("securityScore", score)
            .with("riskFactors", risks)
    }

    async fn augment_payload(
        &self,
        base: ClockPayload,
        _ctx: &VerificationContext,
    ) -> Result<AugmentedPayload, VerifyError> {
        let (fingerprint, session_id, snapshot) = {
            let state = lock(&self.state);
            let established = state.as_ref().ok_or(VerifyError::NoEvidence {
                strategy: StrategyKind::DeviceSignature,
            })?;
            (
                established.fingerprint.clone(),
                established.session_id.clone(),
                established.snapshot.clone(),
            )
        };
        let score = security_score(&snapshot);
        let level = self.level_for(score);

        let mut payload =
            AugmentedPayload::from_base(base, StrategyKind::DeviceSignature.tracking_method());
        let info = &mut payload.device_info;
        info.insert("fingerprint".into(), json!(fingerprint));
        info.insert("sessionId".into(), json!(session_id));
        info.insert("platform".into(), json!(snapshot.platform));
        info.insert("securityLevel".into(), json!(level));
        info.insert("securityScore".into(), json!(score));
        payload.notes = Some(format!("Device signature verified ({level} security)"));
        Ok(payload)
    }

    fn panel_state(&self) -> Value {
        let state = lock(&self.state);
        json!({
            "established": state.is_some(),
            "fingerprint": state.as_ref().map(|e| &e.fingerprint[..16]),
        })
    }

    async fn reset(&self) {
        *lock(&self.state) = None;
    }
}
