//! Autonomous release: reasons and the probabilistic release policy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::state::ReservationState;

/// Why the agent released a reservation on its own.
///
/// Sent to the authority with the auto-release notification so it can tell
/// timeout-driven releases apart from user-driven ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    TimeoutExpired,
    ProbabilisticRelease,
}

impl ReleaseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TimeoutExpired => "timeout_expired",
            Self::ProbabilisticRelease => "probabilistic_release",
        }
    }
}

/// Simulated "the user walked away" release.
///
/// Advisory only: the draw is not seeded and offers no statistical
/// guarantee, so deployments that need deterministic release rely on the
/// deadline timer instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilisticPolicy {
    /// Chance, in `[0, 1]`, that an eligible check releases.
    pub probability: f64,
    /// How long a reservation must be held before a check is eligible.
    pub min_hold: Duration,
}

impl ProbabilisticPolicy {
    /// Whether the reservation has been held long enough to be considered.
    pub fn is_eligible(&self, state: &ReservationState, now: DateTime<Utc>) -> bool {
        state
            .held_for(now)
            .is_some_and(|held| held >= self.min_hold)
    }

    /// Decide a check given a uniform draw in `[0, 1)`.
    pub fn should_release(&self, state: &ReservationState, now: DateTime<Utc>, draw: f64) -> bool {
        self.is_eligible(state, now) && draw <= self.probability
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ReserveDetails, Transition, TransitionContext};
    use crate::status::ReservationStatus;

    fn reserved_since(start: DateTime<Utc>) -> ReservationState {
        let mut state = ReservationState::new();
        state.apply(
            &Transition::FoldRemote {
                status: ReservationStatus::Reserved,
                details: Some(ReserveDetails {
                    start_time: start,
                    predicted_end_time: start + Duration::hours(2),
                    reserved_by: None,
                }),
            },
            &TransitionContext {
                now: Utc::now(),
                hold: Duration::minutes(30),
            },
        );
        state
    }

    fn policy(probability: f64) -> ProbabilisticPolicy {
        ProbabilisticPolicy {
            probability,
            min_hold: Duration::minutes(5),
        }
    }

    #[test]
    fn certain_probability_releases_after_min_hold() {
        let now = Utc::now();
        let state = reserved_since(now - Duration::minutes(10));
        assert!(policy(1.0).should_release(&state, now, 0.999));
    }

    #[test]
    fn never_releases_before_min_hold() {
        let now = Utc::now();
        let state = reserved_since(now - Duration::minutes(2));
        assert!(!policy(1.0).should_release(&state, now, 0.0));
    }

    #[test]
    fn never_releases_when_not_reserved() {
        let now = Utc::now();
        let free = ReservationState::new();
        assert!(!policy(1.0).should_release(&free, now, 0.0));
    }

    #[test]
    fn draw_above_probability_keeps_reservation() {
        let now = Utc::now();
        let state = reserved_since(now - Duration::minutes(10));
        assert!(!policy(0.05).should_release(&state, now, 0.5));
        assert!(policy(0.05).should_release(&state, now, 0.05));
    }

    #[test]
    fn reasons_use_snake_case_tags() {
        assert_eq!(
            serde_json::to_string(&ReleaseReason::TimeoutExpired).unwrap(),
            "\"timeout_expired\""
        );
        assert_eq!(
            ReleaseReason::ProbabilisticRelease.as_str(),
            "probabilistic_release"
        );
    }
}
