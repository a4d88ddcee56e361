//! Proximity-radio strategy: presence via a tag tap.
//!
//! Without a reader the strategy switches to simulation mode instead of
//! failing; a badge id can then be substituted manually.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use attendverify_sensors::{ProximityRead, ProximityReader, SensorError};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{lock, Permission, VerificationStrategy};
use crate::config::ProximityConfig;
use crate::error::VerifyError;
use crate::types::{
    Availability, AugmentedPayload, ClockPayload, Metadata, PrepareOutcome, StrategyDescriptor,
    StrategyKind, ValidationOutcome, VerificationContext,
};

/// Placeholder id attached in simulation mode when nothing was substituted.
const SIMULATED_TAG: &str = "SIMULATED";

#[derive(Debug, Default)]
struct ProximityState {
    simulation: bool,
    /// Id substituted by hand in simulation mode.
    manual_id: Option<String>,
}

/// Proximity-radio verification.
pub struct ProximityStrategy {
    descriptor: StrategyDescriptor,
    config: ProximityConfig,
    reader: Arc<dyn ProximityReader>,
    state: Mutex<ProximityState>,
    /// Last accepted read, published by the scan task.
    reads: Arc<watch::Sender<Option<ProximityRead>>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProximityStrategy {
    /// Create the strategy over `reader`.
    pub fn new(config: ProximityConfig, reader: Arc<dyn ProximityReader>) -> Self {
        let (reads, _) = watch::channel(None);
        Self {
            descriptor: StrategyDescriptor {
                kind: StrategyKind::Proximity,
                display_name: "NFC".into(),
                description: "Tap your badge on the store reader".into(),
                priority: 1,
                availability: Availability {
                    supported: reader.is_supported(),
                    requires_permission: true,
                    requires_hardware: true,
                    requires_network: false,
                },
            },
            config,
            reader,
            state: Mutex::new(ProximityState::default()),
            reads: Arc::new(reads),
            scan_task: Mutex::new(None),
        }
    }

    /// Whether the strategy degraded to simulation mode.
    pub fn is_simulation(&self) -> bool {
        lock(&self.state).simulation
    }

    /// Whether `id` is an acceptable tag id.
    pub fn is_valid_tag(&self, id: &str) -> bool {
        let len = id.chars().count();
        (self.config.min_id_len..=self.config.max_id_len).contains(&len)
            && id.chars().all(|c| c.is_ascii_alphanumeric())
    }

    /// The last accepted read.
    pub fn last_read(&self) -> Option<ProximityRead> {
        self.reads.borrow().clone()
    }

    /// Wait up to `limit` for a read to arrive.
    pub async fn wait_for_read(&self, limit: Duration) -> Option<ProximityRead> {
        let mut rx = self.reads.subscribe();
        let waited = tokio::time::timeout(limit, rx.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(read)) => read.clone(),
            _ => None,
        }
    }

    /// Substitute a badge id in simulation mode.
    pub fn submit_manual_id(&self, id: &str) -> Result<(), VerifyError> {
        let id = id.trim();
        if !self.is_valid_tag(id) {
            return Err(VerifyError::evidence(format!("Invalid tag id: {id}")));
        }
        lock(&self.state).manual_id = Some(id.to_string());
        Ok(())
    }

    /// Start a single-shot scan window. A read arriving within the window
    /// is published and ends the scan; otherwise the reader is stopped.
    pub fn start_scan(&self) {
        self.abort_scan();
        let reader = Arc::clone(&self.reader);
        let reads = Arc::clone(&self.reads);
        let window = self.config.scan_window;
        let (min, max) = (self.config.min_id_len, self.config.max_id_len);

        let task = tokio::spawn(async move {
            match tokio::time::timeout(window, reader.read_next()).await {
                Ok(Ok(read)) => {
                    let len = read.id.chars().count();
                    if (min..=max).contains(&len) && read.id.chars().all(|c| c.is_ascii_alphanumeric()) {
                        info!(tag = %read.id, "Proximity: tag read");
                    } else {
                        warn!(tag = %read.id, "Proximity: tag id rejected");
                    }
                    reads.send_replace(Some(read));
                },
                Ok(Err(SensorError::Stopped)) => debug!("Proximity: scan stopped"),
                Ok(Err(e)) => warn!(error = %e, "Proximity: read failed"),
                Err(_) => {
                    reader.stop().await;
                    info!(window_ms = window.as_millis() as u64, "Proximity: scan window elapsed");
                },
            }
        });
        *lock(&self.scan_task) = Some(task);
    }

    /// Whether a scan is in progress.
    pub fn is_scanning(&self) -> bool {
        lock(&self.scan_task)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    fn abort_scan(&self) {
        if let Some(task) = lock(&self.scan_task).take() {
            task.abort();
        }
    }

    fn evidence_id(&self) -> Option<(String, bool)> {
        let state = lock(&self.state);
        if state.simulation {
            let id = state
                .manual_id
                .clone()
                .unwrap_or_else(|| SIMULATED_TAG.to_string());
            return Some((id, true));
        }
        drop(state);
        self.last_read()
            .filter(|read| self.is_valid_tag(&read.id))
            .map(|read| (read.id, false))
    }
}

#[async_trait]
impl VerificationStrategy for ProximityStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.reader.is_supported()
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::Proximity]
    }

    #[instrument(skip_all, fields(strategy = "proximity"))]
    async fn prepare(&self, _ctx: &VerificationContext) -> PrepareOutcome {
        // Evidence belongs to one activation.
        self.reads.send_replace(None);
        lock(&self.state).manual_id = None;

        let mut metadata = Metadata::new();
        if !self.reader.is_supported() {
            lock(&self.state).simulation = true;
            warn!("Proximity: no reader, running in simulation mode");
            metadata.insert("simulationMode".into(), json!(true));
            metadata.insert(
                "note".into(),
                json!("Proximity reader unavailable, manual badge entry required"),
            );
            return PrepareOutcome::ready_with(metadata);
        }

        lock(&self.state).simulation = false;
        self.start_scan();
        metadata.insert("simulationMode".into(), json!(false));
        metadata.insert("scanning".into(), json!(self.is_scanning()));
        metadata.insert(
            "scanWindowMs".into(),
            json!(self.config.scan_window.as_millis() as u64),
        );
        PrepareOutcome::ready_with(metadata)
    }

    async fn validate(&self, _ctx: &VerificationContext) -> ValidationOutcome {
        if self.is_simulation() {
            return ValidationOutcome::valid(Metadata::new())
                .with("simulationMode", true)
                .with("requiresManualInput", true)
                .with("note", "Simulated proximity read, confirm with your badge id");
        }
        match self.last_read() {
            Some(read) if self.is_valid_tag(&read.id) => {
                ValidationOutcome::valid(Metadata::new()).with("tagId", read.id)
            },
            Some(read) => ValidationOutcome::blocked(format!("Invalid tag id: {}", read.id)),
            None => ValidationOutcome::blocked("No tag read yet, tap your badge on the reader"),
        }
    }

    async fn augment_payload(
        &self,
        base: ClockPayload,
        _ctx: &VerificationContext,
    ) -> Result<AugmentedPayload, VerifyError> {
        let (id, simulated) = self.evidence_id().ok_or(VerifyError::NoEvidence {
            strategy: StrategyKind::Proximity,
        })?;
        let mut payload = AugmentedPayload::from_base(base, StrategyKind::Proximity.tracking_method());
        payload.device_info.insert("tagId".into(), json!(id));
        payload.device_info.insert("simulationMode".into(), json!(simulated));
        if let Some(read) = self.last_read().filter(|_| !simulated) {
            payload.device_info.insert("readAt".into(), json!(read.read_at));
        }
        payload.notes = Some(if simulated {
            format!("Proximity simulated, badge {id}")
        } else {
            format!("Proximity tap {id}")
        });
        Ok(payload)
    }

    fn panel_state(&self) -> Value {
        json!({
            "simulationMode": self.is_simulation(),
            "scanning": self.is_scanning(),
            "lastRead": self.last_read(),
        })
    }

    async fn cleanup(&self) {
        if self.is_scanning() {
            self.reader.stop().await;
        }
        self.abort_scan();
        self.reads.send_replace(None);
        lock(&self.state).manual_id = None;
    }

    async fn reset(&self) {
        *lock(&self.state) = ProximityState::default();
        self.reads.send_replace(None);
    }
}

impl Drop for ProximityStrategy {
    fn drop(&mut self) {
        self.abort_scan();
    }
}
