//! The per-resource agent and its state holder.
//!
//! [`Agent`] owns the [`ReservationState`], the single deadline timer and a
//! short audit trail, all behind one mutex. Every periodic activity
//! (reporter, reconciler, deadline timer, probabilistic release) and the
//! control surface go through [`Agent::commit`] while holding that lock, so
//! no two transitions ever interleave. Network calls happen outside the lock.
//!
//! The activities themselves live in sibling modules as further `impl Agent`
//! blocks: [`reporter`](crate::reporter), [`reconciler`](crate::reconciler),
//! [`scheduler`](crate::scheduler) and [`release`](crate::release).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use iotm_core::audit::AuditEntry;
use iotm_core::release::ReleaseReason;
use iotm_core::state::{ReservationState, Transition, TransitionContext, TransitionOutcome};
use iotm_core::status::ReservationStatus;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::authority::Authority;
use crate::config::AgentConfig;
use crate::scheduler::DeadlineTimer;

/// How many audit entries are kept in memory.
const AUDIT_CAPACITY: usize = 100;

/// Network work owed after a transition has been committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FollowUp {
    /// Push the new state to the authority.
    Report,
    /// Notify the authority of an autonomous release, then push.
    AutoRelease(ReleaseReason),
}

/// A committed (or rejected) transition plus its pending follow-up.
pub(crate) struct Committed {
    pub(crate) outcome: TransitionOutcome,
    pub(crate) follow_up: Option<FollowUp>,
}

/// Everything guarded by the agent's lock.
pub(crate) struct AgentCore {
    pub(crate) state: ReservationState,
    pub(crate) deadline: DeadlineTimer,
    audit: VecDeque<AuditEntry>,
}

impl AgentCore {
    fn new() -> Self {
        Self {
            state: ReservationState::new(),
            deadline: DeadlineTimer::default(),
            audit: VecDeque::with_capacity(AUDIT_CAPACITY),
        }
    }

    pub(crate) fn record(&mut self, resource_id: &str, entry: AuditEntry) {
        tracing::info!(
            target: "audit",
            resource_id,
            operator = entry.operator,
            from = %entry.from,
            to = %entry.to,
            at = %entry.at.to_rfc3339(),
            "Status transition",
        );
        if self.audit.len() == AUDIT_CAPACITY {
            self.audit.pop_front();
        }
        self.audit.push_back(entry);
    }
}

/// Consistent read of the agent's state for inspection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    #[serde(flatten)]
    pub state: ReservationState,
    pub deadline_armed: bool,
    pub deadline: Option<DateTime<Utc>>,
}

/// One running reservation agent for one resource.
///
/// Create it with [`Agent::new`], start the periodic activities with
/// [`Agent::start`], and stop them by cancelling the token followed by
/// [`Agent::shutdown`].
pub struct Agent {
    config: AgentConfig,
    pub(crate) authority: Arc<dyn Authority>,
    pub(crate) core: Mutex<AgentCore>,
    started_at: Instant,
}

impl Agent {
    pub fn new(config: AgentConfig, authority: Arc<dyn Authority>) -> Arc<Self> {
        tracing::info!(
            resource_id = %config.resource_id,
            hold_minutes = config.hold_duration.num_minutes(),
            "Agent initialised in FREE state",
        );
        Arc::new(Self {
            config,
            authority,
            core: Mutex::new(AgentCore::new()),
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn resource_id(&self) -> &str {
        &self.config.resource_id
    }

    /// Time since the agent was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub async fn snapshot(&self) -> AgentSnapshot {
        let core = self.core.lock().await;
        AgentSnapshot {
            state: core.state.clone(),
            deadline_armed: core.deadline.is_armed(),
            deadline: core.deadline.deadline(),
        }
    }

    pub async fn status(&self) -> ReservationStatus {
        self.core.lock().await.state.status()
    }

    /// Recorded transitions, oldest first.
    pub async fn audit_log(&self) -> Vec<AuditEntry> {
        self.core.lock().await.audit.iter().cloned().collect()
    }

    /// Apply a transition and schedule its follow-up push.
    ///
    /// Returns as soon as local state has changed; the push runs in the
    /// background.
    pub async fn transition(self: &Arc<Self>, transition: Transition) -> TransitionOutcome {
        let committed = {
            let mut core = self.core.lock().await;
            self.commit(&mut core, transition, Utc::now())
        };
        self.dispatch(committed.follow_up);
        committed.outcome
    }

    /// Administrative override used by the control surface.
    pub async fn force_status(self: &Arc<Self>, status: ReservationStatus) -> TransitionOutcome {
        tracing::info!(resource_id = %self.resource_id(), %status, "Forcing status");
        self.transition(Transition::ForceStatus(status)).await
    }

    /// Start the periodic activities. Each returned task stops when
    /// `cancel` is cancelled.
    pub fn start(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![
            tokio::spawn(Arc::clone(self).run_reporter(cancel.clone())),
            tokio::spawn(Arc::clone(self).run_reconciler(cancel.clone())),
        ];
        if self.config.auto_release.enabled {
            tasks.push(tokio::spawn(
                Arc::clone(self).run_probabilistic_release(cancel.clone()),
            ));
        }
        tracing::info!(
            resource_id = %self.resource_id(),
            strategy = ?self.config.strategy,
            tasks = tasks.len(),
            "Agent started",
        );
        tasks
    }

    /// Disarm the deadline timer. Call after cancelling the periodic tasks.
    pub async fn shutdown(&self) {
        self.core.lock().await.deadline.disarm();
        tracing::info!(resource_id = %self.resource_id(), "Agent stopped");
    }

    // ---- crate-internal ----

    /// Apply `transition` to locked state: audit it, drive the deadline
    /// timer, and work out the follow-up. No-ops are logged and change
    /// nothing.
    pub(crate) fn commit(
        self: &Arc<Self>,
        core: &mut AgentCore,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Committed {
        let ctx = TransitionContext {
            now,
            hold: self.config.hold_duration,
        };
        let outcome = core.state.apply(&transition, &ctx);

        if outcome.is_noop() {
            tracing::info!(
                resource_id = %self.resource_id(),
                operator = transition.operator(),
                status = %outcome.from,
                ?transition,
                "Transition ignored",
            );
            return Committed {
                outcome,
                follow_up: None,
            };
        }

        core.record(
            self.resource_id(),
            AuditEntry::from_outcome(transition.operator(), &outcome, now),
        );

        let expired_now = self.apply_deadline(core, outcome.deadline, now);

        let follow_up = match transition {
            Transition::DeadlineExpired => FollowUp::AutoRelease(ReleaseReason::TimeoutExpired),
            Transition::ProbabilisticRelease => {
                FollowUp::AutoRelease(ReleaseReason::ProbabilisticRelease)
            }
            _ if expired_now => FollowUp::AutoRelease(ReleaseReason::TimeoutExpired),
            _ => FollowUp::Report,
        };

        Committed {
            outcome,
            follow_up: Some(follow_up),
        }
    }

    /// Run a follow-up in the background so the caller never waits on the
    /// authority.
    pub(crate) fn dispatch(self: &Arc<Self>, follow_up: Option<FollowUp>) {
        let Some(follow_up) = follow_up else {
            return;
        };
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            match follow_up {
                FollowUp::Report => {
                    let _ = agent.report().await;
                }
                FollowUp::AutoRelease(reason) => agent.finish_auto_release(reason).await,
            }
        });
    }
}
