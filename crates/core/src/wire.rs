//! JSON payloads exchanged with the authority.
//!
//! Field names are camelCase on the wire. Timestamps are RFC 3339.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::release::ReleaseReason;
use crate::state::{ReservationState, ReserveDetails};
use crate::status::ReservationStatus;

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/devices/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub resource_id: String,
    pub status: ReservationStatus,
    pub timestamp: DateTime<Utc>,
    /// `true` until the authority has acknowledged a push from this agent.
    pub first_connection: bool,
    pub reserved_at: Option<DateTime<Utc>>,
    pub predicted_end_time: Option<DateTime<Utc>>,
}

impl StatusReport {
    pub fn from_state(resource_id: &str, state: &ReservationState, now: DateTime<Utc>) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            status: state.status(),
            timestamp: now,
            first_connection: !state.first_connection_done(),
            reserved_at: state.reserved_at(),
            predicted_end_time: state.predicted_end_time(),
        }
    }
}

/// Body of `POST /api/v1/devices/{resourceId}/auto-release`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoReleaseNotice {
    pub timestamp: DateTime<Utc>,
    pub reason: ReleaseReason,
}

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

/// Response of `GET /api/v1/devices/{resourceId}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    #[serde(default)]
    pub resource_id: Option<String>,
    pub status: ReservationStatus,
    #[serde(default)]
    pub reserve_details: Option<RemoteReserveDetails>,
}

/// Active reservation as the authority describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteReserveDetails {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub predicted_end_time: Option<DateTime<Utc>>,
}

impl RemoteStatus {
    /// Reservation details usable for a fold, if both timestamps are present.
    pub fn details(&self) -> Option<ReserveDetails> {
        let remote = self.reserve_details.as_ref()?;
        Some(ReserveDetails {
            start_time: remote.start_time?,
            predicted_end_time: remote.predicted_end_time?,
            reserved_by: remote.user_id.clone(),
        })
    }
}

/// The two command slots the authority exposes per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Reserve,
    Release,
}

impl CommandKind {
    /// Last path segment of the slot URL.
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Reserve => "reserve",
            Self::Release => "release",
        }
    }

    /// Value of the `command` field the slot is expected to carry.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Reserve => "RESERVE",
            Self::Release => "RELEASE",
        }
    }
}

/// Response of `GET /api/v1/devices/{resourceId}/commands/{kind}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    #[serde(default)]
    pub resource_id: Option<String>,
    pub command: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl DeviceCommand {
    pub fn kind(&self) -> Option<CommandKind> {
        match self.command.as_str() {
            "RESERVE" => Some(CommandKind::Reserve),
            "RELEASE" => Some(CommandKind::Release),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_report_uses_camel_case_and_null_timestamps() {
        let now = Utc::now();
        let report = StatusReport::from_state("lab-01", &ReservationState::new(), now);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["resourceId"], "lab-01");
        assert_eq!(json["status"], "FREE");
        assert_eq!(json["firstConnection"], true);
        assert!(json["reservedAt"].is_null());
        assert!(json["predictedEndTime"].is_null());
    }

    #[test]
    fn first_connection_clears_after_a_push() {
        let mut state = ReservationState::new();
        state.mark_reported(Utc::now());
        let report = StatusReport::from_state("lab-01", &state, Utc::now());
        assert!(!report.first_connection);
    }

    #[test]
    fn remote_status_parses_reserve_details() {
        let body = r#"{
            "resourceId": "lab-01",
            "status": "RESERVED",
            "reserveDetails": {
                "userId": "alice",
                "startTime": "2026-01-01T10:00:00Z",
                "predictedEndTime": "2026-01-01T11:00:00Z"
            }
        }"#;
        let remote: RemoteStatus = serde_json::from_str(body).unwrap();
        let details = remote.details().unwrap();

        assert_eq!(remote.status, ReservationStatus::Reserved);
        assert_eq!(details.reserved_by.as_deref(), Some("alice"));
        assert_eq!(
            details.predicted_end_time - details.start_time,
            Duration::hours(1)
        );
    }

    #[test]
    fn remote_status_without_end_time_has_no_details() {
        let body = r#"{"status":"RESERVED","reserveDetails":{"startTime":"2026-01-01T10:00:00Z"}}"#;
        let remote: RemoteStatus = serde_json::from_str(body).unwrap();
        assert!(remote.details().is_none());
    }

    #[test]
    fn remote_status_rejects_unknown_status() {
        let parsed = serde_json::from_str::<RemoteStatus>(r#"{"status":"BUSY"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn device_command_kind_is_exact() {
        let cmd: DeviceCommand = serde_json::from_str(
            r#"{"resourceId":"lab-01","command":"RESERVE","message":"Reserve this resource"}"#,
        )
        .unwrap();
        assert_eq!(cmd.kind(), Some(CommandKind::Reserve));

        let odd: DeviceCommand = serde_json::from_str(r#"{"command":"reserve"}"#).unwrap();
        assert_eq!(odd.kind(), None);
    }
}
