//! Manual-badge strategy: a badge id typed, scanned through a
//! keyboard-wedge reader, or assigned directly.
//!
//! Weak ids are flagged, never blocked. An unrecognized format is a hard
//! block.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use attendverify_sensors::KeySource;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{lock, Permission, VerificationStrategy};
use crate::badge::{score_badge, validate_format, BadgeCapture, BadgeInputEvent};
use crate::config::BadgeConfig;
use crate::error::VerifyError;
use crate::history::BadgeHistory;
use crate::types::{
    Availability, AugmentedPayload, ClockPayload, Metadata, PrepareOutcome, StrategyDescriptor,
    StrategyKind, ValidationOutcome, VerificationContext,
};

/// Badge id verification.
pub struct ManualBadgeStrategy {
    descriptor: StrategyDescriptor,
    config: BadgeConfig,
    keys: Arc<dyn KeySource>,
    /// Last committed input, published by the listener task.
    input: Arc<watch::Sender<Option<BadgeInputEvent>>>,
    history: Mutex<BadgeHistory>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ManualBadgeStrategy {
    /// Create the strategy over `keys`, loading the badge history.
    pub fn new(config: BadgeConfig, keys: Arc<dyn KeySource>) -> Self {
        let history = BadgeHistory::from_config(config.history_path.as_deref(), config.history_cap);
        let (input, _) = watch::channel(None);
        Self {
            descriptor: StrategyDescriptor {
                kind: StrategyKind::ManualBadge,
                display_name: "Badge".into(),
                description: "Scan or type your badge id".into(),
                priority: 5,
                availability: Availability {
                    supported: true,
                    requires_permission: false,
                    requires_hardware: false,
                    requires_network: false,
                },
            },
            config,
            keys,
            input: Arc::new(input),
            history: Mutex::new(history),
            listener: Mutex::new(None),
        }
    }

    /// Assign a badge id directly.
    pub fn submit(&self, id: &str) {
        self.input.send_replace(Some(BadgeInputEvent::manual(id)));
    }

    /// The last committed input.
    pub fn current_input(&self) -> Option<BadgeInputEvent> {
        self.input.borrow().clone()
    }

    /// Wait up to `limit` for an input to be committed.
    pub async fn wait_for_input(&self, limit: Duration) -> Option<BadgeInputEvent> {
        let mut rx = self.input.subscribe();
        let waited = tokio::time::timeout(limit, rx.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(input)) => input.clone(),
            _ => None,
        }
    }

    /// Recently accepted ids, most recent first.
    pub fn history(&self) -> Vec<String> {
        lock(&self.history).entries().to_vec()
    }

    /// Whether the key listener is attached.
    pub fn is_listening(&self) -> bool {
        lock(&self.listener)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    fn start_listener(&self, mut rx: broadcast::Receiver<attendverify_sensors::KeyEvent>) {
        self.stop_listener();
        let input = Arc::clone(&self.input);
        let debounce = self.config.debounce;
        let threshold_ms = u64::try_from(self.config.scanner_threshold.as_millis()).unwrap_or(u64::MAX);
        let mut capture = BadgeCapture::new(self.config.max_len, threshold_ms);

        let task = tokio::spawn(async move {
            loop {
                let received = if capture.is_empty() {
                    rx.recv().await
                } else {
                    match tokio::time::timeout(debounce, rx.recv()).await {
                        Ok(received) => received,
                        Err(_) => {
                            if let Some(event) = capture.flush() {
                                debug!(source = ?event.source, "ManualBadge: committed after pause");
                                input.send_replace(Some(event));
                            }
                            continue;
                        },
                    }
                };
                match received {
                    Ok(key) => {
                        if let Some(event) = capture.push(key) {
                            debug!(source = ?event.source, "ManualBadge: committed");
                            input.send_replace(Some(event));
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "ManualBadge: key listener lagged, input discarded");
                        capture.flush();
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *lock(&self.listener) = Some(task);
    }

    fn stop_listener(&self) {
        if let Some(task) = lock(&self.listener).take() {
            task.abort();
        }
    }
}

#[async_trait]
impl VerificationStrategy for ManualBadgeStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        true
    }

    fn required_permissions(&self) -> Vec<Permission> {
        Vec::new()
    }

    #[instrument(skip_all, fields(strategy = "manual_badge"))]
    async fn prepare(&self, _ctx: &VerificationContext) -> PrepareOutcome {
        // Input belongs to one activation.
        self.input.send_replace(None);
        let listening = match self.keys.subscribe() {
            Ok(rx) => {
                self.start_listener(rx);
                true
            },
            Err(e) => {
                warn!(error = %e, "ManualBadge: no key stream, manual entry only");
                false
            },
        };
        info!(listening, "ManualBadge: ready");
        let mut metadata = Metadata::new();
        metadata.insert("scannerListening".into(), json!(listening));
        metadata.insert("history".into(), json!(self.history()));
        PrepareOutcome::ready_with(metadata)
    }

    async fn validate(&self, _ctx: &VerificationContext) -> ValidationOutcome {
        let Some(input) = self.current_input() else {
            return ValidationOutcome::blocked("No badge id entered");
        };
        let format = match validate_format(&input.id, self.config.min_len, self.config.max_len) {
            Ok(format) => format,
            Err(reason) => return ValidationOutcome::blocked(reason),
        };
        let strength = score_badge(&input.id);
        let warnings: Vec<String> = strength.warning().into_iter().collect();
        if !warnings.is_empty() {
            warn!(level = ?strength.level, flags = ?strength.flags, "ManualBadge: weak badge id");
        }
        ValidationOutcome::flagged(warnings, Metadata::new())
            .with("inputSource", json!(input.source))
            .with("format", format)
            .with("strength", json!(strength.level))
            .with("score", strength.score)
            .with("flags", strength.flags)
    }

    async fn augment_payload(
        &self,
        base: ClockPayload,
        _ctx: &VerificationContext,
    ) -> Result<AugmentedPayload, VerifyError> {
        let input = self.current_input().ok_or(VerifyError::NoEvidence {
            strategy: StrategyKind::ManualBadge,
        })?;
        let format = validate_format(&input.id, self.config.min_len, self.config.max_len)
            .map_err(VerifyError::evidence)?;
        let strength = score_badge(&input.id);
        lock(&self.history).record(&input.id);

        let mut payload =
            AugmentedPayload::from_base(base, StrategyKind::ManualBadge.tracking_method());
        let info = &mut payload.device_info;
        info.insert("badgeId".into(), json!(input.id));
        info.insert("inputSource".into(), json!(input.source));
        info.insert("format".into(), json!(format));
        info.insert("strength".into(), json!(strength.level));
        payload.notes = Some(format!("Badge {} ({})", input.id, input.source.as_str()));
        Ok(payload)
    }

    fn panel_state(&self) -> Value {
        json!({
            "listening": self.is_listening(),
            "input": self.current_input(),
            "history": self.history(),
        })
    }

    async fn cleanup(&self) {
        self.stop_listener();
        self.input.send_replace(None);
    }

    async fn reset(&self) {
        self.input.send_replace(None);
    }
}

impl Drop for ManualBadgeStrategy {
    fn drop(&mut self) {
        self.stop_listener();
    }
}
