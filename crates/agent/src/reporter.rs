//! Status push to the authority.
//!
//! Runs on a fixed interval and once after every applied transition. A
//! failed push is logged and forgotten: the next tick or the next local
//! change resends the current state.

use std::sync::Arc;

use chrono::Utc;
use iotm_core::wire::StatusReport;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::authority::AuthorityError;

impl Agent {
    /// Push the current state to the authority once.
    ///
    /// On success the agent stops announcing a first connection and the
    /// debounce guard starts measuring from now.
    pub async fn report(&self) -> Result<(), AuthorityError> {
        let report = {
            let core = self.core.lock().await;
            StatusReport::from_state(self.resource_id(), &core.state, Utc::now())
        };

        if let Err(e) = self.authority.push_status(&report).await {
            if e.is_connectivity() {
                tracing::warn!(
                    resource_id = %self.resource_id(),
                    error = %e,
                    "Authority unreachable, status not pushed"
                );
            } else {
                tracing::error!(
                    resource_id = %self.resource_id(),
                    error = %e,
                    "Status push rejected"
                );
            }
            return Err(e);
        }

        let mut core = self.core.lock().await;
        if !core.state.first_connection_done() {
            tracing::info!(
                resource_id = %self.resource_id(),
                "First connection acknowledged by the authority"
            );
        }
        core.state.mark_reported(Utc::now());
        tracing::debug!(
            resource_id = %self.resource_id(),
            status = %report.status,
            "Status pushed"
        );
        Ok(())
    }

    /// Reporter loop. The first push happens immediately.
    pub(crate) async fn run_reporter(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config().status_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config().status_interval.as_secs(),
            "Status reporting started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Status reporting stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let _ = self.report().await;
                }
            }
        }
    }
}
