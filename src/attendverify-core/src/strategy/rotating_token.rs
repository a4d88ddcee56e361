//! Rotating-token strategy: presence via a short-lived scannable code.
//!
//! A token is issued on prepare and re-issued every lifetime interval by
//! a background timer while the strategy is active. An expired token is a
//! soft condition at validation time and is renewed before it is attached
//! to a payload.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{lock, Permission, VerificationStrategy};
use crate::collaborators::TokenIssuer;
use crate::config::TokenConfig;
use crate::error::VerifyError;
use crate::types::{
    Availability, AugmentedPayload, ClockPayload, Metadata, PrepareOutcome, StrategyDescriptor,
    StrategyKind, ValidationOutcome, VerificationContext,
};

/// The current presence token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatingToken {
    /// Signed code.
    pub code: String,
    /// When it was received.
    pub issued_at: DateTime<Utc>,
    /// When it stops being accepted.
    pub expires_at: DateTime<Utc>,
    /// Number of tokens issued since the last reset.
    pub generation_count: u64,
}

impl RotatingToken {
    /// Whether the token is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the token is past its expiry now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Pull the signed code out of an issued URL: the `code` query parameter,
/// else the last path segment.
pub fn extract_code(url: &str) -> Option<String> {
    if let Some((_, query)) = url.split_once('?') {
        if let Some(code) = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("code="))
            .filter(|c| !c.is_empty())
        {
            return Some(code.to_string());
        }
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|seg| !seg.is_empty() && !seg.contains(':'))
        .map(str::to_string)
}

#[derive(Debug, Default)]
struct TokenState {
    current: Option<RotatingToken>,
    generation: u64,
    store_id: Option<String>,
}

/// State shared with the regeneration timer.
struct TokenInner {
    issuer: Arc<dyn TokenIssuer>,
    config: TokenConfig,
    state: Mutex<TokenState>,
}

impl TokenInner {
    async fn regenerate(&self, store_id: &str) -> Result<RotatingToken, VerifyError> {
        let issued = self.issuer.issue(store_id).await?;
        let code = extract_code(&issued.url).ok_or_else(|| {
            VerifyError::evidence(format!("No code in issued token URL: {}", issued.url))
        })?;
        let expires_at = Utc
            .timestamp_millis_opt(issued.expires_at)
            .single()
            .ok_or_else(|| VerifyError::evidence("Issued token has an invalid expiry"))?;

        let mut state = lock(&self.state);
        state.generation += 1;
        let token = RotatingToken {
            code,
            issued_at: Utc::now(),
            expires_at,
            generation_count: state.generation,
        };
        state.current = Some(token.clone());
        state.store_id = Some(store_id.to_string());
        debug!(generation = token.generation_count, "RotatingToken: regenerated");
        Ok(token)
    }

    /// Whether `code` has the `PREFIX-<storeId>-<timestamp>-<random>` shape.
    fn is_well_formed(&self, code: &str, store_id: &str) -> bool {
        let head = format!("{}-{}-", self.config.prefix, store_id);
        let Some(rest) = code.strip_prefix(&head) else {
            return false;
        };
        let Some((timestamp, random)) = rest.split_once('-') else {
            return false;
        };
        !timestamp.is_empty()
            && timestamp.bytes().all(|b| b.is_ascii_digit())
            && !random.is_empty()
            && random.bytes().all(|b| b.is_ascii_alphanumeric())
    }
}

/// Short-lived code verification.
pub struct RotatingTokenStrategy {
    descriptor: StrategyDescriptor,
    inner: Arc<TokenInner>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RotatingTokenStrategy {
    /// Create the strategy over `issuer`.
    pub fn new(config: TokenConfig, issuer: Arc<dyn TokenIssuer>) -> Self {
        Self {
            descriptor: StrategyDescriptor {
                kind: StrategyKind::RotatingToken,
                display_name: "QR code".into(),
                description: "Scan the rotating code shown at the store".into(),
                priority: 3,
                availability: Availability {
                    supported: true,
                    requires_permission: false,
                    requires_hardware: false,
                    requires_network: true,
                },
            },
            inner: Arc::new(TokenInner {
                issuer,
                config,
                state: Mutex::new(TokenState::default()),
            }),
            timer: Mutex::new(None),
        }
    }

    /// The current token, if any.
    pub fn current_token(&self) -> Option<RotatingToken> {
        lock(&self.inner.state).current.clone()
    }

    /// Tokens issued since the last reset.
    pub fn generation_count(&self) -> u64 {
        lock(&self.inner.state).generation
    }

    /// Whether the regeneration timer is running.
    pub fn is_rotating(&self) -> bool {
        lock(&self.timer)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    fn start_timer(&self, store_id: String) {
        self.stop_timer();
        let inner = Arc::clone(&self.inner);
        let period = inner.config.lifetime;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if let Err(e) = inner.regenerate(&store_id).await {
                    warn!(error = %e, "RotatingToken: scheduled regeneration failed");
                }
            }
        });
        *lock(&self.timer) = Some(task);
    }

    fn stop_timer(&self) {
        if let Some(task) = lock(&self.timer).take() {
            task.abort();
        }
    }

    fn lifetime(&self) -> Duration {
        self.inner.config.lifetime
    }
}

#[async_trait]
impl VerificationStrategy for RotatingTokenStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        true
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::Network]
    }

    #[instrument(skip_all, fields(strategy = "rotating_token"))]
    async fn prepare(&self, ctx: &VerificationContext) -> PrepareOutcome {
        let store_id = match ctx.require_store() {
            Ok(store) => store.id.clone(),
            Err(_) => return PrepareOutcome::failed("Store selection required for QR verification"),
        };
        match self.inner.regenerate(&store_id).await {
            Ok(token) => {
                self.start_timer(store_id);
                info!(
                    generation = token.generation_count,
                    lifetime_ms = self.lifetime().as_millis() as u64,
                    "RotatingToken: issued, rotation started"
                );
                let mut metadata = Metadata::new();
                metadata.insert("expiresAt".into(), json!(token.expires_at));
                metadata.insert("generationCount".into(), json!(token.generation_count));
                PrepareOutcome::ready_with(metadata)
            },
            Err(e) => {
                warn!(error = %e, "RotatingToken: issuance failed");
                PrepareOutcome::failed(VerifyError::capability(e).to_string())
            },
        }
    }

    async fn validate(&self, ctx: &VerificationContext) -> ValidationOutcome {
        let Some(token) = self.current_token() else {
            return ValidationOutcome::blocked("No QR token issued");
        };
        if token.is_expired() {
            warn!(generation = token.generation_count, "RotatingToken: token expired");
            return ValidationOutcome::flagged(
                vec!["QR token expired, a new one is being generated".into()],
                Metadata::new(),
            )
            .with("expired", true)
            .with("willRegenerate", true);
        }
        let store_id = match ctx.require_store() {
            Ok(store) => store.id.as_str(),
            Err(e) => return ValidationOutcome::blocked(e.to_string()),
        };
        if !self.inner.is_well_formed(&token.code, store_id) {
            return ValidationOutcome::blocked("Malformed QR token");
        }
        ValidationOutcome::valid(Metadata::new())
            .with("generationCount", token.generation_count)
            .with("expiresAt", json!(token.expires_at))
    }

    async fn augment_payload(
        &self,
        base: ClockPayload,
        _ctx: &VerificationContext,
    ) -> Result<AugmentedPayload, VerifyError> {
        let mut token = self.current_token().ok_or(VerifyError::NoEvidence {
            strategy: StrategyKind::RotatingToken,
        })?;
        if token.is_expired() {
            info!("RotatingToken: renewing expired token before commit");
            token = self.inner.regenerate(&base.store_id).await?;
        }
        if token.is_expired() {
            return Err(VerifyError::evidence("Issued QR token is already expired"));
        }

        let mut payload =
            AugmentedPayload::from_base(base, StrategyKind::RotatingToken.tracking_method());
        let info = &mut payload.device_info;
        info.insert("tokenCode".into(), json!(token.code));
        info.insert("generationCount".into(), json!(token.generation_count));
        info.insert("issuedAt".into(), json!(token.issued_at));
        info.insert("expiresAt".into(), json!(token.expires_at));
        payload.notes = Some(format!(
            "QR verified (token generation {})",
            token.generation_count
        ));
        Ok(payload)
    }

    fn panel_state(&self) -> Value {
        let state = lock(&self.inner.state);
        json!({
            "token": state.current,
            "storeId": state.store_id,
            "lifetimeMs": self.lifetime().as_millis() as u64,
        })
    }

    async fn cleanup(&self) {
        self.stop_timer();
    }

    async fn reset(&self) {
        self.stop_timer();
        *lock(&self.inner.state) = TokenState::default();
    }
}

impl Drop for RotatingTokenStrategy {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{IssuedToken, LocalTokenIssuer};
    use crate::types::{EntryType, StoreInfo};

    fn ctx() -> VerificationContext {
        VerificationContext::new(
            "u-1",
            Some(StoreInfo {
                id: "mi-01".into(),
                name: "Duomo".into(),
                coordinates: None,
                address: None,
            }),
        )
    }

    /// Issues tokens that expired a second ago.
    struct StaleIssuer;

    #[async_trait]
    impl TokenIssuer for StaleIssuer {
        async fn issue(&self, store_id: &str) -> Result<IssuedToken, VerifyError> {
            let now = Utc::now().timestamp_millis();
            Ok(IssuedToken {
                url: format!("https://hr.example.com/t/ATT-{store_id}-{now}-abc123"),
                expires_at: now - 1_000,
            })
        }
    }

    fn local() -> RotatingTokenStrategy {
        let config = TokenConfig::default();
        let issuer = Arc::new(LocalTokenIssuer::new(&config.prefix, config.lifetime));
        RotatingTokenStrategy::new(config, issuer)
    }

    #[test]
    fn test_extract_code() {
        assert_eq!(
            extract_code("attendverify://clock?code=ATT-1-2-x").as_deref(),
            Some("ATT-1-2-x")
        );
        assert_eq!(
            extract_code("https://hr.example.com/qr/ATT-1-2-x?v=2").as_deref(),
            Some("ATT-1-2-x")
        );
        assert_eq!(extract_code("https://hr.example.com/qr/ATT-1-2-x/").as_deref(), Some("ATT-1-2-x"));
        assert_eq!(extract_code(""), None);
    }

    #[tokio::test]
    async fn test_prepare_requires_store() {
        let strategy = local();
        let outcome = strategy.prepare(&VerificationContext::new("u", None)).await;
        assert!(!outcome.success);
        assert!(!strategy.is_rotating());
    }

    #[tokio::test]
    async fn test_fresh_token_validates() {
        let strategy = local();
        assert!(strategy.prepare(&ctx()).await.success);
        let outcome = strategy.validate(&ctx()).await;
        assert!(outcome.is_valid);
        assert!(outcome.warnings.is_empty());
        assert_eq!(strategy.generation_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_regenerates_each_lifetime() {
        let strategy = local();
        strategy.prepare(&ctx()).await;
        assert!(strategy.is_rotating());

        tokio::time::sleep(Duration::from_millis(30_100)).await;
        assert_eq!(strategy.generation_count(), 2);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(strategy.generation_count(), 3);

        strategy.cleanup().await;
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(strategy.generation_count(), 3);
    }

    #[tokio::test]
    async fn test_expired_token_is_soft_and_renewed_on_augment() {
        let strategy = RotatingTokenStrategy::new(TokenConfig::default(), Arc::new(StaleIssuer));
        assert!(strategy.prepare(&ctx()).await.success);

        let outcome = strategy.validate(&ctx()).await;
        assert!(outcome.is_soft_violation());
        assert_eq!(outcome.metadata["expired"], true);
        assert_eq!(outcome.metadata["willRegenerate"], true);

        // The issuer keeps producing stale tokens, so augment must refuse.
        let base = ClockPayload::now(&ctx(), EntryType::ClockIn).unwrap();
        let err = strategy.augment_payload(base, &ctx()).await.unwrap_err();
        assert!(err.is_evidence());
        assert_eq!(strategy.generation_count(), 2);
        strategy.cleanup().await;
    }

    #[tokio::test]
    async fn test_reset_clears_generation() {
        let strategy = local();
        strategy.prepare(&ctx()).await;
        strategy.prepare(&ctx()).await;
        assert_eq!(strategy.generation_count(), 2);
        strategy.reset().await;
        assert_eq!(strategy.generation_count(), 0);
        assert!(strategy.current_token().is_none());
    }

    #[tokio::test]
    async fn test_token_for_other_store_is_malformed() {
        let strategy = local();
        strategy.prepare(&ctx()).await;
        let mut other = ctx();
        if let Some(store) = other.store.as_mut() {
            store.id = "to-02".into();
        }
        let outcome = strategy.validate(&other).await;
        assert!(!outcome.is_valid);
        strategy.cleanup().await;
    }
}
