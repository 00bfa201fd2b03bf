//! Audit records for state transitions.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::TransitionOutcome;
use crate::status::ReservationStatus;

/// One applied transition: who did it, what changed, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub operator: &'static str,
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn from_outcome(
        operator: &'static str,
        outcome: &TransitionOutcome,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            operator,
            from: outcome.from,
            to: outcome.to,
            at,
        }
    }
}
