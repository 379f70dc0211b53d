//! Side effects as values.
//!
//! A lifecycle decision never emails or broadcasts anything itself. It returns a list of
//! [`Effect`]s that the runtime executes after the conditional write has committed. A
//! failed effect is logged and never rolls back the state change.

use crate::ids::{BayId, BookingId, LocationId};
use crate::model::{BookingSummary, NotificationKind, NotificationSubject};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Whether a kiosk should add or drop a booking from its local schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaAction {
    /// Booking became visible (created or paid)
    Add,
    /// Booking went away (expired or cancelled)
    Remove,
}

/// One-way schedule update pushed to a kiosk channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDelta {
    /// Add or remove
    pub action: DeltaAction,
    /// The booking as the kiosk sees it
    pub booking: BookingSummary,
}

/// Follow-up work produced by a state transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Queue an email unless one of this kind already exists for the subject
    QueueNotification {
        /// Record the email is about
        subject: NotificationSubject,
        /// Template
        kind: NotificationKind,
    },

    /// Push a single-booking delta to every kiosk on the bay
    BroadcastBooking {
        /// Venue
        location: LocationId,
        /// Bay
        bay: BayId,
        /// Change
        delta: BookingDelta,
    },

    /// Re-send a bay's bookings for one local date
    RefreshBay {
        /// Venue
        location: LocationId,
        /// Bay
        bay: BayId,
        /// Local date
        date: NaiveDate,
    },

    /// Mint the unlock token and queue the reminder right away
    IssueUnlockReminder {
        /// Booking starting soon
        booking: BookingId,
    },
}

/// Effects returned by one decision; most transitions produce at most four
pub type Effects = SmallVec<[Effect; 4]>;
