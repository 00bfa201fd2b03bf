//! Autonomous release follow-up and the probabilistic release check.

use std::sync::Arc;

use chrono::Utc;
use iotm_core::release::ReleaseReason;
use iotm_core::state::Transition;
use iotm_core::wire::AutoReleaseNotice;
use rand::Rng;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;

impl Agent {
    /// Tell the authority the agent released on its own, then push the new
    /// state whether or not the notification went through.
    pub(crate) async fn finish_auto_release(&self, reason: ReleaseReason) {
        let notice = AutoReleaseNotice {
            timestamp: Utc::now(),
            reason,
        };

        match self
            .authority
            .notify_auto_release(self.resource_id(), &notice)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    resource_id = %self.resource_id(),
                    reason = reason.as_str(),
                    "Auto-release notified"
                );
            }
            Err(e) => {
                tracing::warn!(
                    resource_id = %self.resource_id(),
                    reason = reason.as_str(),
                    error = %e,
                    "Auto-release notification failed"
                );
            }
        }

        let _ = self.report().await;
    }

    /// One probabilistic release check. Returns `true` if it released.
    ///
    /// Only a reservation held for at least the configured minimum is
    /// eligible; it is then released when a fresh uniform draw falls at or
    /// below the configured probability.
    pub async fn check_probabilistic_release(self: &Arc<Self>) -> bool {
        let Some(policy) = self.config().probabilistic_policy() else {
            return false;
        };
        let draw: f64 = rand::rng().random();
        let now = Utc::now();

        let committed = {
            let mut core = self.core.lock().await;
            if !policy.should_release(&core.state, now, draw) {
                tracing::debug!(
                    draw,
                    probability = policy.probability,
                    "Probabilistic release not triggered"
                );
                return false;
            }
            tracing::info!(
                resource_id = %self.resource_id(),
                draw,
                probability = policy.probability,
                "Probabilistic release triggered",
            );
            self.commit(&mut core, Transition::ProbabilisticRelease, now)
        };

        self.dispatch(committed.follow_up);
        true
    }

    /// Probabilistic release loop; only started when enabled.
    pub(crate) async fn run_probabilistic_release(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config().auto_release.check_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = period.as_secs(),
            probability = self.config().auto_release.probability,
            min_hold_minutes = self.config().auto_release.min_hold.num_minutes(),
            "Probabilistic release enabled",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Probabilistic release stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.check_probabilistic_release().await;
                }
            }
        }
    }
}
