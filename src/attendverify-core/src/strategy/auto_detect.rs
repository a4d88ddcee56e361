//! Auto-detection composite.
//!
//! Probes candidates one at a time in priority order and delegates to the
//! first that both prepares and validates. Remaining available candidates
//! form the fallback chain used when the delegate later fails.
//!
//! ```text
//! proximity ──▶ geofence ──▶ device_signature
//!     │             │               │
//!  prepare(5s)   prepare(5s)     prepare(5s)
//!  validate(3s)  validate(3s)    validate(3s)
//!     └────── first valid wins, probing stops ──────┘
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::{bounded, lock, Permission, VerificationStrategy};
use crate::config::DetectionConfig;
use crate::error::VerifyError;
use crate::types::{
    Availability, AugmentedPayload, ClockPayload, DetectionResult, Metadata, PrepareOutcome,
    StrategyDescriptor, StrategyKind, TrackingMethod, ValidationOutcome, VerificationContext,
};

type Candidate = Arc<dyn VerificationStrategy>;

#[derive(Default)]
struct AutoState {
    delegate: Option<Candidate>,
    detection: Option<DetectionResult>,
    fallback_used: bool,
}

/// A candidate that prepared and validated.
struct Ready {
    strategy: Candidate,
    confidence: u8,
}

/// Composite that selects and delegates to the best ready strategy.
pub struct AutoDetectStrategy {
    descriptor: StrategyDescriptor,
    config: DetectionConfig,
    /// Configured candidates in priority order; `None` if not registered.
    candidates: Vec<(StrategyKind, Option<Candidate>)>,
    state: Mutex<AutoState>,
}

impl AutoDetectStrategy {
    /// Build from `pool`, ordered by `config.order`.
    pub fn new(config: DetectionConfig, pool: &[Candidate]) -> Self {
        let candidates = config
            .order
            .iter()
            .map(|kind| (*kind, pool.iter().find(|s| s.kind() == *kind).cloned()))
            .collect();
        Self {
            descriptor: StrategyDescriptor {
                kind: StrategyKind::Auto,
                display_name: "Automatic".into(),
                description: "Pick the best available method automatically".into(),
                priority: 0,
                availability: Availability {
                    supported: true,
                    requires_permission: true,
                    requires_hardware: false,
                    requires_network: false,
                },
            },
            config,
            candidates,
            state: Mutex::new(AutoState::default()),
        }
    }

    /// Result of the last detection.
    pub fn detection(&self) -> Option<DetectionResult> {
        lock(&self.state).detection.clone()
    }

    /// Strategy currently delegated to.
    pub fn delegate_kind(&self) -> Option<StrategyKind> {
        lock(&self.state).delegate.as_ref().map(|d| d.kind())
    }

    fn delegate(&self) -> Option<Candidate> {
        lock(&self.state).delegate.clone()
    }

    fn candidate(&self, kind: StrategyKind) -> Option<Candidate> {
        self.candidates
            .iter()
            .find(|(k, _)| *k == kind)
            .and_then(|(_, s)| s.clone())
    }

    fn available(&self) -> Vec<StrategyKind> {
        self.candidates
            .iter()
            .filter_map(|(kind, s)| s.as_ref().filter(|s| s.is_available()).map(|_| *kind))
            .collect()
    }

    /// Confidence for a ready candidate, clamped to 0–100.
    pub fn confidence(
        &self,
        kind: StrategyKind,
        prepared: &PrepareOutcome,
        validated: &ValidationOutcome,
    ) -> u8 {
        let c = &self.config;
        let mut score = c.base_score + c.bonus_for(kind);
        if validated.warnings.is_empty() {
            score += c.clean_bonus;
        } else {
            let count = i32::try_from(validated.warnings.len()).unwrap_or(i32::MAX);
            score = score.saturating_sub(c.warning_penalty.saturating_mul(count));
        }
        if !prepared.metadata.is_empty() {
            score += c.metadata_bonus;
        }
        u8::try_from(score.clamp(0, 100)).unwrap_or(0)
    }

    /// Prepare and validate one candidate under the detection timeouts.
    async fn probe(
        &self,
        strategy: &Candidate,
        ctx: &VerificationContext,
    ) -> Result<(u8, ValidationOutcome), String> {
        let kind = strategy.kind();
        let prepared = bounded(
            &format!("{kind} prepare"),
            self.config.prepare_timeout,
            async { Ok::<_, VerifyError>(strategy.prepare(ctx).await) },
        )
        .await
        .map_err(|e| format!("{kind}: prepare failed ({e})"))?;
        if !prepared.success {
            return Err(format!(
                "{kind}: prepare failed ({})",
                prepared.error.as_deref().unwrap_or("unknown error")
            ));
        }

        let validated = bounded(
            &format!("{kind} validate"),
            self.config.validate_timeout,
            async { Ok::<_, VerifyError>(strategy.validate(ctx).await) },
        )
        .await
        .map_err(|e| format!("{kind}: validation failed ({e})"))?;
        if !validated.is_valid {
            return Err(format!(
                "{kind}: validation failed ({})",
                validated.error.as_deref().unwrap_or("unknown error")
            ));
        }
        Ok((self.confidence(kind, &prepared, &validated), validated))
    }

    /// Run detection. Candidates are probed serially; probing stops at the
    /// first ready one.
    #[instrument(skip_all)]
    pub async fn detect(&self, ctx: &VerificationContext) -> DetectionResult {
        let available = self.available();
        let mut reasons = Vec::new();
        let mut selected: Option<Ready> = None;

        for (kind, strategy) in &self.candidates {
            let Some(strategy) = strategy else {
                reasons.push(format!("{kind}: not found"));
                continue;
            };
            if !available.contains(kind) {
                reasons.push(format!("{kind}: unavailable"));
                continue;
            }
            debug!(%kind, "Auto: probing candidate");
            match self.probe(strategy, ctx).await {
                Ok((confidence, _)) => {
                    reasons.push(format!("{kind}: ready (confidence {confidence})"));
                    selected = Some(Ready {
                        strategy: Arc::clone(strategy),
                        confidence,
                    });
                    break;
                },
                Err(reason) => {
                    debug!(%kind, %reason, "Auto: candidate rejected");
                    reasons.push(reason);
                    strategy.cleanup().await;
                },
            }
        }

        let selected_kind = selected.as_ref().map(|r| r.strategy.kind());
        let result = DetectionResult {
            selected_strategy: selected_kind,
            confidence: selected.as_ref().map_or(0, |r| r.confidence),
            fallback_order: available
                .iter()
                .copied()
                .filter(|k| Some(*k) != selected_kind)
                .collect(),
            available_strategies: available,
            detection_reasons: reasons,
        };

        match &selected_kind {
            Some(kind) => info!(selected = %kind, confidence = result.confidence, "Auto: strategy selected"),
            None => warn!(reasons = ?result.detection_reasons, "Auto: no strategy ready"),
        }

        let mut state = lock(&self.state);
        state.delegate = selected.map(|r| r.strategy);
        state.detection = Some(result.clone());
        state.fallback_used = false;
        result
    }

    /// Walk the fallback chain; re-point delegation to the first ready one.
    async fn fall_back(&self, ctx: &VerificationContext) -> Option<(Candidate, ValidationOutcome)> {
        let (order, failed) = {
            let state = lock(&self.state);
            (
                state
                    .detection
                    .as_ref()
                    .map(|d| d.fallback_order.clone())
                    .unwrap_or_default(),
                state.delegate.clone(),
            )
        };

        for kind in order {
            let Some(strategy) = self.candidate(kind) else {
                continue;
            };
            if !strategy.is_available() {
                continue;
            }
            let (confidence, validated) = match self.probe(&strategy, ctx).await {
                Ok(ready) => ready,
                Err(reason) => {
                    strategy.cleanup().await;
                    self.drop_fallback(kind, format!("fallback {reason}"));
                    continue;
                },
            };
            if let Some(old) = &failed {
                old.cleanup().await;
            }

            let lowered = u8::try_from(
                (i32::from(confidence) - self.config.fallback_penalty).clamp(0, 100),
            )
            .unwrap_or(0);
            warn!(fallback = %kind, confidence = lowered, "Auto: switched to fallback strategy");

            let mut state = lock(&self.state);
            if let Some(detection) = state.detection.as_mut() {
                detection.fallback_order.retain(|k| *k != kind);
                if let Some(previous) = detection.selected_strategy {
                    detection.fallback_order.retain(|k| *k != previous);
                }
                detection.selected_strategy = Some(kind);
                detection.confidence = lowered;
                detection
                    .detection_reasons
                    .push(format!("{kind}: fallback ready (confidence {lowered})"));
            }
            state.delegate = Some(Arc::clone(&strategy));
            state.fallback_used = true;
            return Some((strategy, validated));
        }
        None
    }

    fn drop_fallback(&self, kind: StrategyKind, reason: String) {
        let mut state = lock(&self.state);
        if let Some(detection) = state.detection.as_mut() {
            detection.fallback_order.retain(|k| *k != kind);
            detection.detection_reasons.push(reason);
        }
    }

    fn decorate(&self, mut outcome: ValidationOutcome) -> ValidationOutcome {
        let state = lock(&self.state);
        let meta = &mut outcome.metadata;
        meta.insert("smartDetection".into(), json!(true));
        meta.insert("fallbackUsed".into(), json!(state.fallback_used));
        if let Some(d) = &state.detection {
            meta.insert("selectedStrategy".into(), json!(d.selected_strategy));
            meta.insert("confidence".into(), json!(d.confidence));
            meta.insert("detectionReasons".into(), json!(d.detection_reasons));
        }
        outcome
    }

    fn clear(&self) {
        *lock(&self.state) = AutoState::default();
    }
}

#[async_trait]
impl VerificationStrategy for AutoDetectStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.candidates
            .iter()
            .any(|(_, s)| s.as_ref().is_some_and(|s| s.is_available()))
    }

    fn required_permissions(&self) -> Vec<Permission> {
        let mut permissions: Vec<Permission> = self
            .candidates
            .iter()
            .filter_map(|(_, s)| s.as_ref())
            .filter(|s| s.is_available())
            .flat_map(|s| s.required_permissions())
            .collect();
        permissions.sort();
        permissions.dedup();
        permissions
    }

    async fn prepare(&self, ctx: &VerificationContext) -> PrepareOutcome {
        if let Some(previous) = self.delegate() {
            previous.cleanup().await;
        }
        self.clear();

        let result = self.detect(ctx).await;
        let mut metadata = Metadata::new();
        metadata.insert("selectedStrategy".into(), json!(result.selected_strategy));
        metadata.insert("confidence".into(), json!(result.confidence));
        metadata.insert("availableStrategies".into(), json!(result.available_strategies));
        metadata.insert("detectionReasons".into(), json!(result.detection_reasons));
        metadata.insert("fallbackOrder".into(), json!(result.fallback_order));

        if result.selected_strategy.is_some() {
            PrepareOutcome::ready_with(metadata)
        } else {
            PrepareOutcome {
                success: false,
                error: Some(format!(
                    "No verification method available: {}",
                    result.detection_reasons.join("; ")
                )),
                metadata,
            }
        }
    }

    async fn validate(&self, ctx: &VerificationContext) -> ValidationOutcome {
        let Some(delegate) = self.delegate() else {
            return self.decorate(ValidationOutcome::blocked("No verification method detected"));
        };
        let outcome = delegate.validate(ctx).await;
        if outcome.is_valid {
            return self.decorate(outcome);
        }

        warn!(
            delegate = %delegate.kind(),
            error = ?outcome.error,
            "Auto: delegated validation failed, trying fallbacks"
        );
        match self.fall_back(ctx).await {
            Some((_, recovered)) => self.decorate(recovered),
            None => self.decorate(outcome),
        }
    }

    async fn augment_payload(
        &self,
        base: ClockPayload,
        ctx: &VerificationContext,
    ) -> Result<AugmentedPayload, VerifyError> {
        let delegate = self.delegate().ok_or(VerifyError::NoEvidence {
            strategy: StrategyKind::Auto,
        })?;
        let mut payload = match delegate.augment_payload(base.clone(), ctx).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(delegate = %delegate.kind(), error = %e, "Auto: delegated augment failed");
                let (fallback, validated) = self.fall_back(ctx).await.ok_or(e)?;
                let mut payload = fallback.augment_payload(base, ctx).await?;
                // Never acknowledged by the worker, so they travel with the event.
                if !validated.warnings.is_empty() {
                    warn!(
                        fallback = %fallback.kind(),
                        warnings = ?validated.warnings,
                        "Auto: fallback evidence carries warnings"
                    );
                    let summary = validated.warnings.join("; ");
                    payload.notes = Some(match payload.notes.take() {
                        Some(notes) => format!("{notes}; unconfirmed: {summary}"),
                        None => format!("Unconfirmed: {summary}"),
                    });
                    payload
                        .device_info
                        .insert("fallbackWarnings".into(), json!(validated.warnings));
                }
                payload
            },
        };

        let detected = payload.tracking_method;
        payload.tracking_method = TrackingMethod::Smart;
        let state = lock(&self.state);
        let info = &mut payload.device_info;
        info.insert("smartDetection".into(), json!(true));
        info.insert("detectedMethod".into(), json!(detected));
        info.insert("fallbackUsed".into(), json!(state.fallback_used));
        if let Some(d) = &state.detection {
            info.insert("selectedStrategy".into(), json!(d.selected_strategy));
            info.insert("confidence".into(), json!(d.confidence));
        }
        Ok(payload)
    }

    fn panel_state(&self) -> Value {
        let state = lock(&self.state);
        json!({
            "detection": state.detection,
            "fallbackUsed": state.fallback_used,
            "delegate": state.delegate.as_ref().map(|d| d.panel_state()),
        })
    }

    async fn cleanup(&self) {
        if let Some(delegate) = self.delegate() {
            delegate.cleanup().await;
        }
        self.clear();
    }

    async fn reset(&self) {
        if let Some(delegate) = self.delegate() {
            delegate.reset().await;
        }
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted strategy.
    struct Mock {
        descriptor: StrategyDescriptor,
        available: bool,
        prepares: bool,
        validates: Mutex<bool>,
        augments: Mutex<bool>,
        warnings: Vec<String>,
    }

    impl Mock {
        fn new(kind: StrategyKind, available: bool, prepares: bool, validates: bool) -> Arc<Self> {
            Arc::new(Self {
                descriptor: StrategyDescriptor {
                    kind,
                    display_name: kind.to_string(),
                    description: String::new(),
                    priority: 1,
                    availability: Availability {
                        supported: available,
                        requires_permission: false,
                        requires_hardware: false,
                        requires_network: false,
                    },
                },
                available,
                prepares,
                validates: Mutex::new(validates),
                augments: Mutex::new(true),
                warnings: Vec::new(),
            })
        }

        fn flagged(kind: StrategyKind, warning: &str) -> Arc<Self> {
            let mut mock = Arc::into_inner(Self::new(kind, true, true, true)).unwrap();
            mock.warnings.push(warning.to_string());
            Arc::new(mock)
        }
    }

    #[async_trait]
    impl VerificationStrategy for Mock {
        fn descriptor(&self) -> &StrategyDescriptor {
            &self.descriptor
        }
        fn is_available(&self) -> bool {
            self.available
        }
        fn required_permissions(&self) -> Vec<Permission> {
            vec![Permission::Location]
        }
        async fn prepare(&self, _ctx: &VerificationContext) -> PrepareOutcome {
            if self.prepares {
                PrepareOutcome::ready()
            } else {
                PrepareOutcome::failed("no hardware")
            }
        }
        async fn validate(&self, _ctx: &VerificationContext) -> ValidationOutcome {
            if *lock(&self.validates) {
                ValidationOutcome::flagged(self.warnings.clone(), Metadata::new())
            } else {
                ValidationOutcome::blocked("bad evidence")
            }
        }
        async fn augment_payload(
            &self,
            base: ClockPayload,
            _ctx: &VerificationContext,
        ) -> Result<AugmentedPayload, VerifyError> {
            if !*lock(&self.augments) {
                return Err(VerifyError::NoEvidence {
                    strategy: self.kind(),
                });
            }
            Ok(AugmentedPayload::from_base(base, self.kind().tracking_method()))
        }
        fn panel_state(&self) -> Value {
            Value::Null
        }
    }

    fn ctx() -> VerificationContext {
        VerificationContext::new("u-1", None)
    }

    fn auto(pool: Vec<Candidate>) -> AutoDetectStrategy {
        AutoDetectStrategy::new(DetectionConfig::default(), &pool)
    }

    #[tokio::test]
    async fn test_selects_second_priority_when_first_unavailable() {
        let a = auto(vec![
            Mock::new(StrategyKind::Proximity, false, true, true),
            Mock::new(StrategyKind::Geofence, true, true, true),
            Mock::new(StrategyKind::DeviceSignature, true, true, true),
        ]);
        let outcome = a.prepare(&ctx()).await;
        assert!(outcome.success);

        let d = a.detection().unwrap();
        assert_eq!(d.selected_strategy, Some(StrategyKind::Geofence));
        assert_eq!(
            d.available_strategies,
            vec![StrategyKind::Geofence, StrategyKind::DeviceSignature]
        );
        assert_eq!(d.detection_reasons.len(), 2);
        assert!(d.detection_reasons[0].contains("unavailable"));
        assert_eq!(d.fallback_order, vec![StrategyKind::DeviceSignature]);
        // base 50 + geofence bonus 20 + clean 10
        assert_eq!(d.confidence, 80);
    }

    #[tokio::test]
    async fn test_nothing_ready_fails_prepare_with_reasons() {
        let a = auto(vec![
            Mock::new(StrategyKind::Proximity, true, false, true),
            Mock::new(StrategyKind::Geofence, true, true, false),
        ]);
        let outcome = a.prepare(&ctx()).await;
        assert!(!outcome.success);
        let d = a.detection().unwrap();
        assert_eq!(d.selected_strategy, None);
        assert_eq!(d.detection_reasons.len(), 3);
        assert!(d.detection_reasons[2].contains("not found"));
        assert!(outcome.error.unwrap().contains("validation failed (bad evidence)"));
    }

    #[tokio::test]
    async fn test_falls_back_when_delegate_fails_later() {
        let geofence = Mock::new(StrategyKind::Geofence, true, true, true);
        let a = auto(vec![
            geofence.clone(),
            Mock::new(StrategyKind::DeviceSignature, true, true, true),
        ]);
        a.prepare(&ctx()).await;
        assert_eq!(a.delegate_kind(), Some(StrategyKind::Geofence));

        *lock(&geofence.validates) = false;
        let outcome = a.validate(&ctx()).await;
        assert!(outcome.is_valid);
        assert_eq!(outcome.metadata["fallbackUsed"], true);
        assert_eq!(a.delegate_kind(), Some(StrategyKind::DeviceSignature));
        // 50 + 10 + 10 - 20
        assert_eq!(a.detection().unwrap().confidence, 50);

        let base = ClockPayload {
            store_id: "s".into(),
            user_id: "u-1".into(),
            entry_type: crate::types::EntryType::ClockIn,
            timestamp: chrono::Utc::now(),
        };
        let payload = a.augment_payload(base, &ctx()).await.unwrap();
        assert_eq!(payload.tracking_method, TrackingMethod::Smart);
        assert_eq!(payload.device_info["detectedMethod"], "web");
    }

    #[tokio::test]
    async fn test_fallback_warnings_travel_with_payload() {
        let geofence = Mock::new(StrategyKind::Geofence, true, true, true);
        let a = auto(vec![
            geofence.clone(),
            Mock::flagged(StrategyKind::DeviceSignature, "Device security level is low"),
        ]);
        a.prepare(&ctx()).await;
        assert_eq!(a.delegate_kind(), Some(StrategyKind::Geofence));

        *lock(&geofence.augments) = false;
        let base = ClockPayload {
            store_id: "s".into(),
            user_id: "u-1".into(),
            entry_type: crate::types::EntryType::ClockIn,
            timestamp: chrono::Utc::now(),
        };
        let payload = a.augment_payload(base, &ctx()).await.unwrap();
        assert_eq!(a.delegate_kind(), Some(StrategyKind::DeviceSignature));
        assert_eq!(payload.device_info["fallbackUsed"], true);
        assert_eq!(
            payload.device_info["fallbackWarnings"],
            json!(["Device security level is low"])
        );
        assert!(payload
            .notes
            .unwrap()
            .contains("Unconfirmed: Device security level is low"));
    }

    #[tokio::test]
    async fn test_availability_and_permissions_union() {
        let a = auto(vec![
            Mock::new(StrategyKind::Proximity, false, true, true),
            Mock::new(StrategyKind::Geofence, true, true, true),
        ]);
        assert!(a.is_available());
        assert_eq!(a.required_permissions(), vec![Permission::Location]);

        let none = auto(vec![Mock::new(StrategyKind::Geofence, false, true, true)]);
        assert!(!none.is_available());
    }

    #[tokio::test]
    async fn test_cleanup_clears_delegation() {
        let a = auto(vec![Mock::new(StrategyKind::Geofence, true, true, true)]);
        a.prepare(&ctx()).await;
        a.cleanup().await;
        assert!(a.delegate_kind().is_none());
        assert!(a.detection().is_none());
        assert!(!a.validate(&ctx()).await.is_valid);
    }

    #[test]
    fn test_confidence_penalizes_warnings_and_clamps() {
        let a = auto(Vec::new());
        let mut prepared = PrepareOutcome::ready();
        let flagged = ValidationOutcome::flagged(vec!["a".into(), "b".into()], Metadata::new());
        // 50 + 30 - 10
        assert_eq!(a.confidence(StrategyKind::Proximity, &prepared, &flagged), 70);
        prepared.metadata.insert("k".into(), json!(1));
        let clean = ValidationOutcome::valid(Metadata::new());
        // 50 + 30 + 10 + 5 = 95
        assert_eq!(a.confidence(StrategyKind::Proximity, &prepared, &clean), 95);
    }
}
