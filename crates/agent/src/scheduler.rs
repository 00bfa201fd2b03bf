//! Deadline scheduler: the single wake-up timer for a reservation.
//!
//! At most one timer is armed at a time. Arming always cancels the previous
//! timer first, and every timer carries the generation it was armed with so
//! one that fires after being replaced or disarmed is recognised as stale
//! and does nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use iotm_core::audit::AuditEntry;
use iotm_core::state::{DeadlineAction, Transition, TransitionContext, OPERATOR_DEADLINE};
use tokio::task::JoinHandle;

use crate::agent::{Agent, AgentCore};

/// Handle to the outstanding deadline timer, if any.
#[derive(Debug, Default)]
pub(crate) struct DeadlineTimer {
    handle: Option<JoinHandle<()>>,
    deadline: Option<DateTime<Utc>>,
    generation: u64,
}

impl DeadlineTimer {
    pub(crate) fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Cancel the outstanding timer. Safe to call when none is armed.
    pub(crate) fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!(generation = self.generation, "Deadline timer cancelled");
        }
        self.deadline = None;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Cancel any existing timer and reserve a generation for the next one.
    fn begin(&mut self) -> u64 {
        self.disarm();
        self.generation
    }

    fn store(&mut self, handle: JoinHandle<()>, deadline: DateTime<Utc>) {
        self.handle = Some(handle);
        self.deadline = Some(deadline);
    }

    /// Claim a firing timer. Returns `false` for a stale timer.
    fn take_fired(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.handle.is_none() {
            return false;
        }
        // The task is the one running this; drop the handle without aborting.
        self.handle = None;
        self.deadline = None;
        true
    }
}

impl Agent {
    /// Carry out a transition's [`DeadlineAction`] on locked state.
    ///
    /// Returns `true` when arming found the deadline already passed and the
    /// reservation was released on the spot.
    pub(crate) fn apply_deadline(
        self: &Arc<Self>,
        core: &mut AgentCore,
        action: DeadlineAction,
        now: DateTime<Utc>,
    ) -> bool {
        match action {
            DeadlineAction::Keep => false,
            DeadlineAction::Disarm => {
                core.deadline.disarm();
                false
            }
            DeadlineAction::Arm(deadline) => self.arm(core, deadline, now),
        }
    }

    fn arm(
        self: &Arc<Self>,
        core: &mut AgentCore,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        let generation = core.deadline.begin();
        let remaining = deadline.signed_duration_since(now);

        let delay = match remaining.to_std() {
            Ok(delay) if !delay.is_zero() => delay,
            // Zero or negative: the deadline has already passed.
            _ => {
                tracing::info!(
                    resource_id = %self.resource_id(),
                    deadline = %deadline.to_rfc3339(),
                    "Deadline already passed, releasing immediately",
                );
                self.expire_locked(core, now);
                return true;
            }
        };

        let agent = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            agent.on_deadline(generation).await;
        });
        core.deadline.store(handle, deadline);

        tracing::info!(
            resource_id = %self.resource_id(),
            deadline = %deadline.to_rfc3339(),
            delay_secs = delay.as_secs(),
            "Deadline timer armed",
        );
        false
    }

    /// Release on locked state without going back through `commit`.
    fn expire_locked(&self, core: &mut AgentCore, now: DateTime<Utc>) {
        let ctx = TransitionContext {
            now,
            hold: self.config().hold_duration,
        };
        let outcome = core.state.apply(&Transition::DeadlineExpired, &ctx);
        core.deadline.disarm();
        if !outcome.is_noop() {
            core.record(
                self.resource_id(),
                AuditEntry::from_outcome(OPERATOR_DEADLINE, &outcome, now),
            );
        }
    }

    /// Timer callback.
    async fn on_deadline(self: Arc<Self>, generation: u64) {
        let committed = {
            let mut core = self.core.lock().await;
            if !core.deadline.take_fired(generation) {
                tracing::debug!(generation, "Ignoring stale deadline timer");
                return;
            }
            tracing::info!(resource_id = %self.resource_id(), "Deadline reached, auto-releasing");
            self.commit(&mut core, Transition::DeadlineExpired, Utc::now())
        };
        self.dispatch(committed.follow_up);
    }
}
