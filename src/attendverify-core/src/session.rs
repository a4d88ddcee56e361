//! Session controller: the finite state machine that owns the session
//! state and drives the selected strategy.
//!
//! ```text
//!  Idle ──clock_in──▶ ClockedIn ◀──end_break── OnBreak
//!   ▲                   │    └──start_break──▶   │
//!   │                clock_out                clock_out
//!   │                   ▼                        │
//!   └────new_day──── ClockedOut ◀────────────────┘
//! ```
//!
//! The controller is the only writer of [`SessionState`]; every mutating
//! operation takes `&mut self`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::collaborators::{PrecommitValidator, ShiftLookup};
use crate::error::VerifyError;
use crate::registry::StrategyRegistry;
use crate::strategy::VerificationStrategy;
use crate::types::{
    AugmentedPayload, ClockPayload, EntryType, PrecommitRequest, PrecommitWarning,
    PrepareOutcome, SessionState, StrategyKind, VerificationContext,
};

/// Work and break time accounting.
///
/// Totals are a baseline plus the time since the running anchor.
#[derive(Debug, Clone, Default)]
pub struct SessionClock {
    work_base: Duration,
    break_base: Duration,
    work_anchor: Option<Instant>,
    break_anchor: Option<Instant>,
    clocked_in_at: Option<DateTime<Utc>>,
    clocked_out_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of a [`SessionClock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSnapshot {
    /// Worked time, milliseconds.
    pub work_ms: u64,
    /// Break time, milliseconds.
    pub break_ms: u64,
    /// When the day started.
    pub clocked_in_at: Option<DateTime<Utc>>,
    /// When the day ended.
    pub clocked_out_at: Option<DateTime<Utc>>,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl SessionClock {
    fn start_work(&mut self) {
        let now = Instant::now();
        self.work_anchor = Some(now);
        if self.clocked_in_at.is_none() {
            self.clocked_in_at = Some(Utc::now());
        }
    }

    fn pause_work(&mut self) {
        if let Some(anchor) = self.work_anchor.take() {
            self.work_base += anchor.elapsed();
        }
    }

    fn start_break(&mut self) {
        self.pause_work();
        self.break_anchor = Some(Instant::now());
    }

    fn end_break(&mut self) {
        if let Some(anchor) = self.break_anchor.take() {
            self.break_base += anchor.elapsed();
        }
        self.work_anchor = Some(Instant::now());
    }

    fn stop(&mut self) {
        if let Some(anchor) = self.break_anchor.take() {
            self.break_base += anchor.elapsed();
        }
        self.pause_work();
        self.clocked_out_at = Some(Utc::now());
    }

    /// Worked time so far.
    pub fn work(&self) -> Duration {
        self.work_base + self.work_anchor.map_or(Duration::ZERO, |a| a.elapsed())
    }

    /// Break time so far.
    pub fn breaks(&self) -> Duration {
        self.break_base + self.break_anchor.map_or(Duration::ZERO, |a| a.elapsed())
    }

    /// Current totals.
    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot {
            work_ms: millis(self.work()),
            break_ms: millis(self.breaks()),
            clocked_in_at: self.clocked_in_at,
            clocked_out_at: self.clocked_out_at,
        }
    }
}

/// The user's answer to pending warnings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Proceed despite soft warnings.
    pub acknowledge_warnings: bool,
}

impl Acknowledgement {
    /// Proceed despite soft warnings.
    pub fn confirmed() -> Self {
        Self {
            acknowledge_warnings: true,
        }
    }
}

/// Result of a clock-in or clock-out attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The event was committed and the state changed.
    Committed {
        /// The payload for the HR back-end.
        payload: AugmentedPayload,
        /// Warnings the user acknowledged.
        acknowledged: Vec<String>,
    },
    /// Soft warnings need confirmation; the state is unchanged.
    ConfirmationRequired {
        /// Strategy warnings.
        warnings: Vec<String>,
        /// Server-side anomalies below critical.
        anomalies: Vec<PrecommitWarning>,
    },
}

impl CommitOutcome {
    /// The committed payload, if any.
    pub fn payload(&self) -> Option<&AugmentedPayload> {
        match self {
            Self::Committed { payload, .. } => Some(payload),
            Self::ConfirmationRequired { .. } => None,
        }
    }
}

/// Today's assigned store differs from the selected one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMismatch {
    /// Store from the shift assignment.
    pub assigned_store_id: String,
    /// Store the user selected.
    pub selected_store_id: String,
}

/// Drives the selected strategy through prepare, validate and augment.
pub struct SessionController {
    registry: StrategyRegistry,
    state: SessionState,
    active: Option<Arc<dyn VerificationStrategy>>,
    prepared: bool,
    clock: SessionClock,
    validator: Option<Arc<dyn PrecommitValidator>>,
    shifts: Option<Arc<dyn ShiftLookup>>,
}

impl SessionController {
    /// Controller over `registry` with no back-end collaborators.
    pub fn new(registry: StrategyRegistry) -> Self {
        Self {
            registry,
            state: SessionState::Idle,
            active: None,
            prepared: false,
            clock: SessionClock::default(),
            validator: None,
            shifts: None,
        }
    }

    /// Run `validator` before every clock-in and clock-out.
    #[must_use]
    pub fn with_precommit(mut self, validator: Arc<dyn PrecommitValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Consult `shifts` for store-mismatch detection.
    #[must_use]
    pub fn with_shift_lookup(mut self, shifts: Arc<dyn ShiftLookup>) -> Self {
        self.shifts = Some(shifts);
        self
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Selected strategy.
    pub fn selected(&self) -> Option<StrategyKind> {
        self.active.as_ref().map(|s| s.kind())
    }

    /// Strategy registry.
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Elapsed-time totals.
    pub fn clock(&self) -> ClockSnapshot {
        self.clock.snapshot()
    }

    fn context(&self, ctx: &VerificationContext) -> VerificationContext {
        VerificationContext {
            session_state: self.state,
            ..ctx.clone()
        }
    }

    /// Switch to `kind`: clean up the previous strategy, prepare the new one.
    #[instrument(skip(self, ctx), fields(state = %self.state))]
    pub async fn select_strategy(
        &mut self,
        kind: StrategyKind,
        ctx: &VerificationContext,
    ) -> Result<PrepareOutcome, VerifyError> {
        if matches!(self.state, SessionState::ClockedIn | SessionState::OnBreak) {
            return Err(VerifyError::SwitchWhileClockedIn { state: self.state });
        }
        let strategy = self.registry.get(kind)?;
        if let Some(previous) = self.active.take() {
            previous.cleanup().await;
        }
        self.prepared = false;

        let outcome = strategy.prepare(&self.context(ctx)).await;
        self.prepared = outcome.success;
        self.active = Some(strategy);
        if outcome.success {
            info!(%kind, "Session: strategy selected");
        } else {
            warn!(%kind, error = ?outcome.error, "Session: strategy failed to prepare");
        }
        Ok(outcome)
    }

    /// Compare today's assigned store with the selected one. Never blocks;
    /// lookup failures are logged and ignored.
    pub async fn check_store_assignment(
        &self,
        ctx: &VerificationContext,
    ) -> Result<Option<StoreMismatch>, VerifyError> {
        let store = ctx.require_store()?;
        let Some(shifts) = &self.shifts else {
            return Ok(None);
        };
        match shifts.assigned_store(&ctx.user_id).await {
            Ok(Some(assigned)) if assigned != store.id => {
                warn!(assigned = %assigned, selected = %store.id, "Session: store mismatch");
                Ok(Some(StoreMismatch {
                    assigned_store_id: assigned,
                    selected_store_id: store.id.clone(),
                }))
            },
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(error = %e, "Session: shift lookup failed");
                Ok(None)
            },
        }
    }

    /// Server-side anomaly check. Critical anomalies block; lookup failures
    /// are logged and treated as no anomalies.
    async fn precommit(
        &self,
        ctx: &VerificationContext,
        entry_type: EntryType,
    ) -> Result<Vec<PrecommitWarning>, VerifyError> {
        let Some(validator) = &self.validator else {
            return Ok(Vec::new());
        };
        let request = PrecommitRequest {
            user_id: ctx.user_id.clone(),
            store_id: ctx.require_store()?.id.clone(),
            entry_type,
        };
        let report = match validator.prevalidate(&request).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Session: pre-commit check unavailable");
                return Ok(Vec::new());
            },
        };
        if let Some(critical) = report.critical() {
            error!(
                anomaly = %critical.warning_type,
                message = %critical.message,
                "Session: critical anomaly, commit blocked"
            );
            return Err(VerifyError::CriticalAnomaly {
                message: critical.message.clone(),
            });
        }
        Ok(report.warnings)
    }

    /// Start the working day with the selected strategy.
    #[instrument(skip(self, ctx, ack), fields(state = %self.state))]
    pub async fn clock_in(
        &mut self,
        ctx: &VerificationContext,
        ack: Acknowledgement,
    ) -> Result<CommitOutcome, VerifyError> {
        if matches!(self.state, SessionState::ClockedIn | SessionState::OnBreak) {
            return Err(VerifyError::InvalidTransition {
                state: self.state,
                action: "clock in",
            });
        }
        ctx.require_store()?;
        let strategy = match (&self.active, self.prepared) {
            (Some(strategy), true) => Arc::clone(strategy),
            _ => return Err(VerifyError::NoStrategySelected),
        };
        let ctx = self.context(ctx);

        let anomalies = self.precommit(&ctx, EntryType::ClockIn).await?;
        let validation = strategy.validate(&ctx).await;
        if !validation.is_valid {
            let reason = validation
                .error
                .unwrap_or_else(|| "Verification failed".to_string());
            warn!(strategy = %strategy.kind(), %reason, "Session: clock-in blocked");
            return Err(VerifyError::Evidence { reason });
        }

        let mut acknowledged = validation.warnings.clone();
        acknowledged.extend(anomalies.iter().map(|a| a.message.clone()));
        if !acknowledged.is_empty() && !ack.acknowledge_warnings {
            info!(count = acknowledged.len(), "Session: confirmation required");
            return Ok(CommitOutcome::ConfirmationRequired {
                warnings: validation.warnings,
                anomalies,
            });
        }

        let base = ClockPayload::now(&ctx, EntryType::ClockIn)?;
        let payload = strategy.augment_payload(base, &ctx).await?;

        if self.state == SessionState::ClockedOut {
            self.clock = SessionClock::default();
        }
        self.clock.start_work();
        self.state = SessionState::ClockedIn;
        info!(strategy = %strategy.kind(), "Session: clocked in");
        Ok(CommitOutcome::Committed {
            payload,
            acknowledged,
        })
    }

    /// End the working day. The strategy is not re-validated.
    #[instrument(skip(self, ctx, ack), fields(state = %self.state))]
    pub async fn clock_out(
        &mut self,
        ctx: &VerificationContext,
        ack: Acknowledgement,
    ) -> Result<CommitOutcome, VerifyError> {
        if !matches!(self.state, SessionState::ClockedIn | SessionState::OnBreak) {
            return Err(VerifyError::InvalidTransition {
                state: self.state,
                action: "clock out",
            });
        }
        let ctx = self.context(ctx);
        let anomalies = self.precommit(&ctx, EntryType::ClockOut).await?;
        let acknowledged: Vec<String> = anomalies.iter().map(|a| a.message.clone()).collect();
        if !acknowledged.is_empty() && !ack.acknowledge_warnings {
            return Ok(CommitOutcome::ConfirmationRequired {
                warnings: Vec::new(),
                anomalies,
            });
        }

        let base = ClockPayload::now(&ctx, EntryType::ClockOut)?;
        let payload = match &self.active {
            Some(strategy) => match strategy.augment_payload(base.clone(), &ctx).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Session: no fresh evidence for clock-out");
                    let mut payload =
                        AugmentedPayload::from_base(base, strategy.kind().tracking_method());
                    payload.notes =
                        Some(format!("Clock-out without fresh {} evidence", strategy.kind()));
                    payload
                },
            },
            None => AugmentedPayload::from_base(base, StrategyKind::Auto.tracking_method()),
        };

        self.clock.stop();
        self.state = SessionState::ClockedOut;
        let totals = self.clock.snapshot();
        info!(work_ms = totals.work_ms, break_ms = totals.break_ms, "Session: clocked out");
        Ok(CommitOutcome::Committed {
            payload,
            acknowledged,
        })
    }

    /// Pause work.
    pub fn start_break(&mut self) -> Result<(), VerifyError> {
        if self.state != SessionState::ClockedIn {
            return Err(VerifyError::InvalidTransition {
                state: self.state,
                action: "start a break",
            });
        }
        self.clock.start_break();
        self.state = SessionState::OnBreak;
        info!("Session: break started");
        Ok(())
    }

    /// Resume work.
    pub fn end_break(&mut self) -> Result<(), VerifyError> {
        if self.state != SessionState::OnBreak {
            return Err(VerifyError::InvalidTransition {
                state: self.state,
                action: "end a break",
            });
        }
        self.clock.end_break();
        self.state = SessionState::ClockedIn;
        info!("Session: break ended");
        Ok(())
    }

    /// Return to `Idle` after a finished day.
    pub fn new_day(&mut self) -> Result<(), VerifyError> {
        match self.state {
            SessionState::Idle => Ok(()),
            SessionState::ClockedOut => {
                self.state = SessionState::Idle;
                self.clock = SessionClock::default();
                Ok(())
            },
            state => Err(VerifyError::InvalidTransition {
                state,
                action: "start a new day",
            }),
        }
    }

    /// Release the active strategy.
    pub async fn end_session(&mut self) {
        if let Some(strategy) = self.active.take() {
            strategy.cleanup().await;
        }
        self.prepared = false;
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("selected", &self.selected())
            .field("prepared", &self.prepared)
            .finish_non_exhaustive()
    }
}
