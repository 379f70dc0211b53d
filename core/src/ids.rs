//! Strongly-typed identifiers.
//!
//! Every persisted record is keyed by a UUID. Wrapping each in its own newtype keeps a
//! `BayId` from ever being passed where a `BookingId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing `Uuid`
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner `Uuid`
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(
    /// Identifier of a booking
    BookingId
);
define_id!(
    /// Identifier of one payment attempt
    PaymentId
);
define_id!(
    /// Identifier of a physical simulator bay
    BayId
);
define_id!(
    /// Identifier of a venue
    LocationId
);
define_id!(
    /// Identifier of a customer account
    UserId
);
define_id!(
    /// Identifier of a league
    LeagueId
);
define_id!(
    /// Identifier of one scheduled week of a league
    LeagueWeekId
);
define_id!(
    /// Identifier of a league team
    TeamId
);
define_id!(
    /// Identifier of one participant's attendance row for a week
    AttendanceId
);
define_id!(
    /// Identifier of a queued email
    NotificationId
);
define_id!(
    /// Identifier of a league capacity hold
    CapacityHoldId
);

/// Identifier of one live kiosk connection.
pub type ConnectionId = Uuid;

/// Correlates an unlock command with the kiosk's acknowledgment.
pub type CorrelationId = Uuid;
