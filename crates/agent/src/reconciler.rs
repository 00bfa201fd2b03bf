//! Reconciliation against the authority.
//!
//! Two policies, picked per deployment by
//! [`ReconcileStrategy`](crate::config::ReconcileStrategy):
//!
//! - **status pull** ([`Agent::reconcile`]): read the canonical status and
//!   fold any divergence into local state, adopting the authority's
//!   deadline.
//! - **command pull** ([`Agent::check_commands`]): read the reserve/release
//!   command slots and apply them; the agent owns the deadline.
//!
//! An unreachable authority or an unknown resource never changes local
//! state: absence of information is not the same as `FREE`.

use std::sync::Arc;

use chrono::Utc;
use iotm_core::state::{Transition, TransitionOutcome};
use iotm_core::wire::CommandKind;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::config::ReconcileStrategy;

/// What a status-pull cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The authority could not be reached or answered unexpectedly.
    Unreachable,
    /// The authority does not know this resource.
    NotFound,
    /// Local and remote status already agree.
    InSync,
    /// Statuses differ, but a push happened too recently to trust the read.
    Debounced,
    /// The authority's status was folded into local state.
    Folded(TransitionOutcome),
}

/// What polling one command slot did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommandResult {
    /// No pending command.
    #[default]
    Empty,
    /// The command was applied.
    Accepted,
    /// The command was stale, duplicated or malformed.
    Ignored,
    /// The slot could not be read.
    Failed,
}

/// Result of one command-pull cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandCheck {
    pub reserve: CommandResult,
    pub release: CommandResult,
}

impl Agent {
    /// One status-pull cycle.
    pub async fn reconcile(self: &Arc<Self>) -> ReconcileOutcome {
        let remote = match self.authority.fetch_status(self.resource_id()).await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                tracing::warn!(
                    resource_id = %self.resource_id(),
                    "Resource not found on the authority"
                );
                return ReconcileOutcome::NotFound;
            }
            Err(e) => {
                tracing::warn!(
                    resource_id = %self.resource_id(),
                    error = %e,
                    "Status check failed"
                );
                return ReconcileOutcome::Unreachable;
            }
        };

        let now = Utc::now();
        let committed = {
            let mut core = self.core.lock().await;
            let local = core.state.status();

            if remote.status == local {
                tracing::debug!(status = %local, "Status in sync with the authority");
                return ReconcileOutcome::InSync;
            }

            if core.state.within_debounce(now, self.config().debounce_window) {
                let since_push_ms = core
                    .state
                    .last_reported_at()
                    .map(|at| (now - at).num_milliseconds());
                tracing::info!(
                    local = %local,
                    remote = %remote.status,
                    ?since_push_ms,
                    "Recent push still settling, skipping fold this cycle",
                );
                return ReconcileOutcome::Debounced;
            }

            tracing::info!(from = %local, to = %remote.status, "Folding authority status");
            self.commit(
                &mut core,
                Transition::FoldRemote {
                    status: remote.status,
                    details: remote.details(),
                },
                now,
            )
        };

        self.dispatch(committed.follow_up);
        ReconcileOutcome::Folded(committed.outcome)
    }

    /// One command-pull cycle: the reserve slot, then the release slot.
    pub async fn check_commands(self: &Arc<Self>) -> CommandCheck {
        CommandCheck {
            reserve: self.poll_command(CommandKind::Reserve).await,
            release: self.poll_command(CommandKind::Release).await,
        }
    }

    async fn poll_command(self: &Arc<Self>, kind: CommandKind) -> CommandResult {
        let command = match self.authority.fetch_command(self.resource_id(), kind).await {
            Ok(Some(command)) => command,
            Ok(None) => return CommandResult::Empty,
            Err(e) => {
                tracing::warn!(slot = kind.path_segment(), error = %e, "Command check failed");
                return CommandResult::Failed;
            }
        };

        if command.kind() != Some(kind) {
            tracing::warn!(
                slot = kind.path_segment(),
                command = %command.command,
                "Unexpected command in slot, ignoring",
            );
            return CommandResult::Ignored;
        }

        tracing::info!(command = kind.wire_name(), message = ?command.message, "Command received");
        let transition = match kind {
            CommandKind::Reserve => Transition::RemoteReserve,
            CommandKind::Release => Transition::RemoteRelease,
        };

        if self.transition(transition).await.is_noop() {
            CommandResult::Ignored
        } else {
            CommandResult::Accepted
        }
    }

    /// Reconciler loop. The first check runs one interval after start, once
    /// the reporter has announced the agent.
    pub(crate) async fn run_reconciler(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config().check_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = period.as_secs(),
            strategy = ?self.config().strategy,
            "Reconciliation started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Reconciliation stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.config().strategy {
                        ReconcileStrategy::StatusPull => {
                            self.reconcile().await;
                        }
                        ReconcileStrategy::CommandPull => {
                            self.check_commands().await;
                        }
                    }
                }
            }
        }
    }
}
