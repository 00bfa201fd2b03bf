//! Reservation state and its transition rules.
//!
//! [`ReservationState`] is the single mutable entity the agent owns. It is
//! only ever changed through [`ReservationState::apply`], which takes one of
//! the [`Transition`] variants and reports what happened (including what the
//! deadline timer should do next) as a [`TransitionOutcome`].
//!
//! Invariants maintained by `apply`:
//! - `Free` / `Inactive` => no `reserved_at`, no `predicted_end_time`.
//! - `reserved_at` present => status is `Reserved`.
//! - a deadline is only ever armed for `Reserved` with a `predicted_end_time`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::status::ReservationStatus;

// ---------------------------------------------------------------------------
// Operators (audit labels)
// ---------------------------------------------------------------------------

pub const OPERATOR_ADMIN: &str = "admin";
pub const OPERATOR_AUTHORITY_COMMAND: &str = "authority-command";
pub const OPERATOR_AUTHORITY_SYNC: &str = "authority-sync";
pub const OPERATOR_DEADLINE: &str = "deadline";
pub const OPERATOR_PROBABILISTIC: &str = "probabilistic";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Reservation details supplied by the authority when it reports `RESERVED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveDetails {
    pub start_time: DateTime<Utc>,
    pub predicted_end_time: DateTime<Utc>,
    /// Who holds the reservation on the authority side, if it says.
    pub reserved_by: Option<String>,
}

/// The only ways the reservation state can change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Administrative override from the control surface.
    ForceStatus(ReservationStatus),
    /// Pending `RESERVE` command picked up from the authority.
    RemoteReserve,
    /// Pending `RELEASE` command picked up from the authority.
    RemoteRelease,
    /// Fold of the authority's canonical status into local state.
    FoldRemote {
        status: ReservationStatus,
        details: Option<ReserveDetails>,
    },
    /// The deadline timer fired (or was armed with a past deadline).
    DeadlineExpired,
    /// The probabilistic release check fired.
    ProbabilisticRelease,
}

impl Transition {
    /// Label recorded in the audit trail for this transition.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::ForceStatus(_) => OPERATOR_ADMIN,
            Self::RemoteReserve | Self::RemoteRelease => OPERATOR_AUTHORITY_COMMAND,
            Self::FoldRemote { .. } => OPERATOR_AUTHORITY_SYNC,
            Self::DeadlineExpired => OPERATOR_DEADLINE,
            Self::ProbabilisticRelease => OPERATOR_PROBABILISTIC,
        }
    }
}

/// Inputs a transition needs besides the state itself.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    pub now: DateTime<Utc>,
    /// Hold duration the agent grants when it owns the deadline
    /// (forced or command-driven reservations).
    pub hold: Duration,
}

/// What the deadline timer should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineAction {
    /// Leave the timer as it is.
    Keep,
    /// Cancel any existing timer and arm a new one against this deadline.
    Arm(DateTime<Utc>),
    /// Cancel any existing timer.
    Disarm,
}

/// Result of [`ReservationState::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    /// `false` when the transition was rejected as a no-op.
    pub applied: bool,
    pub deadline: DeadlineAction,
}

impl TransitionOutcome {
    fn noop(status: ReservationStatus) -> Self {
        Self {
            from: status,
            to: status,
            applied: false,
            deadline: DeadlineAction::Keep,
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.applied
    }
}

/// Local view of one resource's reservation.
///
/// Created `Free` at startup and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationState {
    status: ReservationStatus,
    reserved_at: Option<DateTime<Utc>>,
    predicted_end_time: Option<DateTime<Utc>>,
    reserved_by: Option<String>,
    /// Only read by the debounce guard; never sent to the authority.
    last_reported_at: Option<DateTime<Utc>>,
    /// When the last applied transition happened. Covers the gap between a
    /// local change and the completion of its push.
    #[serde(skip)]
    last_changed_at: Option<DateTime<Utc>>,
    first_connection_done: bool,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

impl ReservationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn reserved_at(&self) -> Option<DateTime<Utc>> {
        self.reserved_at
    }

    pub fn predicted_end_time(&self) -> Option<DateTime<Utc>> {
        self.predicted_end_time
    }

    pub fn reserved_by(&self) -> Option<&str> {
        self.reserved_by.as_deref()
    }

    pub fn last_reported_at(&self) -> Option<DateTime<Utc>> {
        self.last_reported_at
    }

    pub fn first_connection_done(&self) -> bool {
        self.first_connection_done
    }

    /// Apply a transition, returning a no-op outcome when the transition
    /// does not make sense from the current status.
    pub fn apply(&mut self, transition: &Transition, ctx: &TransitionContext) -> TransitionOutcome {
        let from = self.status;

        let deadline = match transition {
            Transition::ForceStatus(target) => {
                if *target == from {
                    return TransitionOutcome::noop(from);
                }
                match target {
                    ReservationStatus::Reserved => self.reserve(ctx.now, ctx.now + ctx.hold, None),
                    other => self.clear(*other),
                }
            }
            Transition::RemoteReserve => {
                if from != ReservationStatus::Free {
                    return TransitionOutcome::noop(from);
                }
                self.reserve(ctx.now, ctx.now + ctx.hold, None)
            }
            Transition::RemoteRelease
            | Transition::DeadlineExpired
            | Transition::ProbabilisticRelease => {
                if from != ReservationStatus::Reserved {
                    return TransitionOutcome::noop(from);
                }
                self.clear(ReservationStatus::Free)
            }
            Transition::FoldRemote { status, details } => {
                if *status == from {
                    return TransitionOutcome::noop(from);
                }
                match (status, details) {
                    (ReservationStatus::Reserved, Some(details)) => self.reserve(
                        details.start_time,
                        details.predicted_end_time,
                        details.reserved_by.clone(),
                    ),
                    (ReservationStatus::Reserved, None) => {
                        // No end time from the authority: reserved, but nothing to arm.
                        self.status = ReservationStatus::Reserved;
                        self.reserved_at = Some(ctx.now);
                        self.predicted_end_time = None;
                        self.reserved_by = None;
                        DeadlineAction::Disarm
                    }
                    (other, _) => self.clear(*other),
                }
            }
        };

        self.last_changed_at = Some(ctx.now);
        TransitionOutcome {
            from,
            to: self.status,
            applied: true,
            deadline,
        }
    }

    /// Record a successful push to the authority.
    pub fn mark_reported(&mut self, at: DateTime<Utc>) {
        self.first_connection_done = true;
        self.last_reported_at = Some(at);
    }

    /// Whether a push, or a local change whose push may still be in flight,
    /// happened less than `window` before `now`.
    ///
    /// A reconcile fold inside this window would most likely re-apply data
    /// the authority has not caught up on yet.
    pub fn within_debounce(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_reported_at
            .max(self.last_changed_at)
            .is_some_and(|at| now.signed_duration_since(at) < window)
    }

    /// How long the current reservation has been held, if reserved.
    pub fn held_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        match (self.status, self.reserved_at) {
            (ReservationStatus::Reserved, Some(at)) => Some(now.signed_duration_since(at)),
            _ => None,
        }
    }

    /// Check the field-level invariants, describing the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.status {
            ReservationStatus::Reserved => {
                if self.reserved_at.is_none() {
                    return Err("RESERVED without reserved_at".into());
                }
            }
            other => {
                if self.reserved_at.is_some() || self.predicted_end_time.is_some() {
                    return Err(format!("{other} carries reservation timestamps"));
                }
            }
        }
        Ok(())
    }

    fn reserve(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reserved_by: Option<String>,
    ) -> DeadlineAction {
        self.status = ReservationStatus::Reserved;
        self.reserved_at = Some(start);
        self.predicted_end_time = Some(end);
        self.reserved_by = reserved_by;
        DeadlineAction::Arm(end)
    }

    fn clear(&mut self, status: ReservationStatus) -> DeadlineAction {
        self.status = status;
        self.reserved_at = None;
        self.predicted_end_time = None;
        self.reserved_by = None;
        DeadlineAction::Disarm
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
