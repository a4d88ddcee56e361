//! Simulated capabilities.
//!
//! These are used when the host has no real device for a capability
//! (degraded operation) and by tests. They behave like the real thing
//! from a strategy's point of view: permission can be refused, reads
//! block until something is tapped, fixes can be slow or missing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Notify};

use crate::error::SensorError;
use crate::provider::{EnvironmentProbe, KeySource, PositionProvider, PositionWatch, ProximityReader};
use crate::types::{EnvironmentSnapshot, GeoPosition, Key, KeyEvent, PermissionState, ProximityRead};

#[derive(Debug)]
struct SimulatedPositionState {
    supported: bool,
    permission: PermissionState,
    fix: Option<GeoPosition>,
    failure: Option<String>,
    delay: Option<Duration>,
}

/// Position provider returning a scripted fix.
#[derive(Debug)]
pub struct SimulatedPositionProvider {
    /// Shared with running watch tasks so they follow `set_position`.
    state: Arc<Mutex<SimulatedPositionState>>,
    watch_interval: Duration,
}

impl SimulatedPositionProvider {
    /// Provider that always reports `fix`.
    #[must_use]
    pub fn new(fix: GeoPosition) -> Self {
        Self::with_state(true, Some(fix))
    }

    /// Provider for a device without positioning hardware.
    #[must_use]
    pub fn unsupported() -> Self {
        Self::with_state(false, None)
    }

    fn with_state(supported: bool, fix: Option<GeoPosition>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatedPositionState {
                supported,
                permission: PermissionState::Granted,
                fix,
                failure: None,
                delay: None,
            })),
            watch_interval: Duration::from_secs(1),
        }
    }

    /// Move the simulated device.
    pub fn set_position(&self, fix: GeoPosition) {
        if let Ok(mut state) = self.state.lock() {
            state.fix = Some(fix);
            state.failure = None;
        }
    }

    /// Answer future permission requests with `permission`.
    pub fn set_permission(&self, permission: PermissionState) {
        if let Ok(mut state) = self.state.lock() {
            state.permission = permission;
        }
    }

    /// Make every fix request fail with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.failure = Some(reason.into());
        }
    }

    /// Delay every fix by `delay` (exercises caller timeouts).
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.delay = Some(delay);
        }
    }

    fn read_fix(&self) -> Result<(Option<Duration>, GeoPosition), SensorError> {
        scripted_fix(&self.state)
    }
}

fn scripted_fix(
    state: &Mutex<SimulatedPositionState>,
) -> Result<(Option<Duration>, GeoPosition), SensorError> {
    let state = state.lock().map_err(|_| SensorError::PositionUnavailable {
        reason: "simulator state poisoned".into(),
    })?;
    if !state.supported {
        return Err(SensorError::HardwareNotAvailable {
            reason: "no positioning hardware".into(),
        });
    }
    if let Some(reason) = &state.failure {
        return Err(SensorError::PositionUnavailable {
            reason: reason.clone(),
        });
    }
    let fix = state.fix.ok_or_else(|| SensorError::PositionUnavailable {
        reason: "no fix scripted".into(),
    })?;
    Ok((state.delay, fix))
}

#[async_trait]
impl PositionProvider for SimulatedPositionProvider {
    fn is_supported(&self) -> bool {
        self.state.lock().map(|s| s.supported).unwrap_or(false)
    }

    async fn request_permission(&self) -> Result<PermissionState, SensorError> {
        let state = self.state.lock().map_err(|_| SensorError::PermissionDenied {
            capability: "geolocation".into(),
        })?;
        if !state.supported {
            return Err(SensorError::HardwareNotAvailable {
                reason: "no positioning hardware".into(),
            });
        }
        Ok(state.permission)
    }

    async fn current_position(&self) -> Result<GeoPosition, SensorError> {
        let (delay, fix) = self.read_fix()?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(GeoPosition {
            timestamp: chrono::Utc::now(),
            ..fix
        })
    }

    async fn watch(&self) -> Result<PositionWatch, SensorError> {
        self.read_fix()?;
        let (tx, rx) = mpsc::channel(8);
        let interval = self.watch_interval;
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let fix = match scripted_fix(&state) {
                    Ok((_, fix)) => GeoPosition {
                        timestamp: chrono::Utc::now(),
                        ..fix
                    },
                    Err(e) => {
                        tracing::debug!(error = %e, "SimulatedPositionProvider: no fix this tick");
                        continue;
                    },
                };
                if tx.send(fix).await.is_err() {
                    tracing::debug!("SimulatedPositionProvider: watch receiver dropped");
                    break;
                }
            }
        });

        Ok(PositionWatch::new(rx))
    }
}

/// Proximity reader fed by [`SimulatedProximityReader::tap`].
pub struct SimulatedProximityReader {
    supported: bool,
    queue: Mutex<VecDeque<ProximityRead>>,
    arrived: Notify,
    stopped: Notify,
}

impl SimulatedProximityReader {
    /// A reader that is present and waiting for taps.
    #[must_use]
    pub fn new() -> Self {
        Self {
            supported: true,
            queue: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
            stopped: Notify::new(),
        }
    }

    /// A device without a proximity radio.
    #[must_use]
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Simulate a tag being tapped against the reader.
    pub fn tap(&self, id: impl Into<String>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(ProximityRead::new(id));
        }
        self.arrived.notify_one();
    }

    fn pop(&self) -> Option<ProximityRead> {
        self.queue.lock().ok().and_then(|mut q| q.pop_front())
    }
}

impl Default for SimulatedProximityReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProximityReader for SimulatedProximityReader {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn read_next(&self) -> Result<ProximityRead, SensorError> {
        if !self.supported {
            return Err(SensorError::HardwareNotAvailable {
                reason: "no proximity radio".into(),
            });
        }
        loop {
            if let Some(read) = self.pop() {
                return Ok(read);
            }
            tokio::select! {
                _ = self.arrived.notified() => {},
                _ = self.stopped.notified() => return Err(SensorError::Stopped),
            }
        }
    }

    async fn stop(&self) {
        self.stopped.notify_waiters();
    }
}

/// Key stream backed by a broadcast channel.
#[derive(Debug, Clone)]
pub struct ChannelKeySource {
    sender: broadcast::Sender<KeyEvent>,
}

impl ChannelKeySource {
    /// Create a key source buffering up to 256 undelivered events.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    /// Deliver one key event to every attached listener.
    pub fn send(&self, event: KeyEvent) {
        // No listener attached is not an error: keys are simply lost,
        // exactly like a wedge scanner typing into an unfocused app.
        let _ = self.sender.send(event);
    }

    /// Type `text` followed by Enter, one key every `gap_ms`.
    pub fn type_line(&self, text: &str, start_ms: u64, gap_ms: u64) {
        let mut at = start_ms;
        for c in text.chars() {
            self.send(KeyEvent::new(Key::Char(c), at));
            at += gap_ms;
        }
        self.send(KeyEvent::new(Key::Enter, at));
    }

    /// Number of listeners currently attached.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelKeySource {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySource for ChannelKeySource {
    fn subscribe(&self) -> Result<broadcast::Receiver<KeyEvent>, SensorError> {
        Ok(self.sender.subscribe())
    }
}

/// Environment probe returning a fixed snapshot.
#[derive(Debug, Clone)]
pub struct StaticEnvironment {
    snapshot: EnvironmentSnapshot,
}

impl StaticEnvironment {
    /// Wrap an explicit snapshot.
    #[must_use]
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        Self { snapshot }
    }

    /// A well-configured, non-automated environment.
    #[must_use]
    pub fn trusted() -> Self {
        Self::new(EnvironmentSnapshot {
            platform: "linux".into(),
            arch: "x86_64".into(),
            locale: "en_US.UTF-8".into(),
            timezone: "Europe/Rome".into(),
            display: "wayland".into(),
            hardware_concurrency: 8,
            cookies_enabled: true,
            do_not_track: false,
            secure_transport: true,
            secure_context: true,
            automation_detected: false,
            crypto_available: true,
            storage_available: true,
        })
    }
}

impl EnvironmentProbe for StaticEnvironment {
    fn snapshot(&self) -> EnvironmentSnapshot {
        self.snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_position_reports_scripted_fix() {
        let provider = SimulatedPositionProvider::new(GeoPosition::new(45.0, 9.0, 10.0));
        let fix = provider.current_position().await.unwrap();
        assert_eq!(fix.lat, 45.0);
        assert_eq!(fix.accuracy, 10.0);
    }

    #[tokio::test]
    async fn test_unsupported_position_is_capability_failure() {
        let provider = SimulatedPositionProvider::unsupported();
        assert!(!provider.is_supported());
        let err = provider.current_position().await.unwrap_err();
        assert!(err.is_capability_failure());
    }

    #[tokio::test]
    async fn test_position_failure_injection() {
        let provider = SimulatedPositionProvider::new(GeoPosition::new(45.0, 9.0, 10.0));
        provider.fail_with("no satellites");
        let err = provider.current_position().await.unwrap_err();
        assert!(matches!(err, SensorError::PositionUnavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_streams_fixes_until_stopped() {
        let provider = SimulatedPositionProvider::new(GeoPosition::new(1.0, 2.0, 5.0));
        let mut watch = provider.watch().await.unwrap();
        let first = watch.next().await.unwrap();
        assert_eq!(first.lng, 2.0);

        provider.set_position(GeoPosition::new(1.5, 2.5, 5.0));
        let moved = watch.next().await.unwrap();
        assert_eq!(moved.lat, 1.5);
        assert_eq!(moved.lng, 2.5);
        watch.stop();
    }

    #[tokio::test]
    async fn test_proximity_read_after_tap() {
        let reader = SimulatedProximityReader::new();
        reader.tap("04A224B2C35E80");
        let read = reader.read_next().await.unwrap();
        assert_eq!(read.id, "04A224B2C35E80");
    }

    #[tokio::test]
    async fn test_proximity_stop_interrupts_pending_read() {
        let reader = std::sync::Arc::new(SimulatedProximityReader::new());
        let pending = {
            let reader = reader.clone();
            tokio::spawn(async move { reader.read_next().await })
        };
        tokio::task::yield_now().await;
        reader.stop().await;
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(SensorError::Stopped)));
    }

    #[test]
    fn test_key_source_listener_count() {
        let source = ChannelKeySource::new();
        assert_eq!(source.listener_count(), 0);
        let rx = source.subscribe().unwrap();
        assert_eq!(source.listener_count(), 1);
        drop(rx);
        assert_eq!(source.listener_count(), 0);
    }
}
