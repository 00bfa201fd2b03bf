//! Reservation status values shared by the agent and the authority.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Wire name for [`ReservationStatus::Free`].
pub const STATUS_FREE: &str = "FREE";

/// Wire name for [`ReservationStatus::Reserved`].
pub const STATUS_RESERVED: &str = "RESERVED";

/// Wire name for [`ReservationStatus::Inactive`].
pub const STATUS_INACTIVE: &str = "INACTIVE";

/// Status of a single resource.
///
/// `Inactive` is an administrative "out of service" state and is distinct
/// from `Free`: nothing reserves an inactive resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    #[default]
    Free,
    Reserved,
    Inactive,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => STATUS_FREE,
            Self::Reserved => STATUS_RESERVED,
            Self::Inactive => STATUS_INACTIVE,
        }
    }

    pub fn is_reserved(self) -> bool {
        self == Self::Reserved
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = CoreError;

    /// Parse an exact, upper-case status name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            STATUS_FREE => Ok(Self::Free),
            STATUS_RESERVED => Ok(Self::Reserved),
            STATUS_INACTIVE => Ok(Self::Inactive),
            other => Err(CoreError::Validation(format!(
                "Invalid status '{other}'. Use: FREE, RESERVED, or INACTIVE"
            ))),
        }
    }
}
