//! Closed status enums with one transition table each.
//!
//! Call sites never compare status strings. A write asks the enum whether the transition
//! is listed, and the store applies it only if the row still holds the expected prior
//! status.

use crate::error::BookingError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shared behaviour of every status enum
pub trait StatusMachine: Copy + PartialEq + fmt::Display + 'static {
    /// Name used in conflict messages
    const ENTITY: &'static str;

    /// Every permitted `(from, to)` pair
    const TRANSITIONS: &'static [(Self, Self)];

    /// True when `self → next` is listed in the transition table
    fn can_transition_to(self, next: Self) -> bool {
        Self::TRANSITIONS
            .iter()
            .any(|(from, to)| *from == self && *to == next)
    }

    /// Validates `self → next`, returning the new status
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::StateConflict`] for any unlisted transition.
    fn transition(self, next: Self) -> Result<Self, BookingError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(BookingError::StateConflict(format!(
                "{} cannot move from {self} to {next}",
                Self::ENTITY
            )))
        }
    }
}

// ============================================================================
// Booking
// ============================================================================

/// Lifecycle status of a booking.
///
/// Completion is implicit: a `Confirmed` booking whose end time has passed is finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Held pending payment; carries an expiry
    Reserved,
    /// Paid
    Confirmed,
    /// Hold lapsed without payment
    Expired,
    /// Cancelled by payment cancellation or manual cancellation
    Cancelled,
}

text_enum!(BookingStatus, "booking", {
    Reserved => "reserved",
    Confirmed => "confirmed",
    Expired => "expired",
    Cancelled => "cancelled",
});

impl StatusMachine for BookingStatus {
    const ENTITY: &'static str = "booking";
    const TRANSITIONS: &'static [(Self, Self)] = &[
        (Self::Reserved, Self::Confirmed),
        (Self::Reserved, Self::Expired),
        (Self::Reserved, Self::Cancelled),
        (Self::Confirmed, Self::Cancelled),
    ];
}

impl BookingStatus {
    /// Statuses that occupy the bay
    pub const ACTIVE: [Self; 2] = [Self::Reserved, Self::Confirmed];

    /// True for `Reserved` and `Confirmed`
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Reserved | Self::Confirmed)
    }
}

// ============================================================================
// Payment
// ============================================================================

/// Status of one payment attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Intent created, awaiting the customer
    Pending,
    /// Provider is processing
    Processing,
    /// Money captured (or card saved for zero-amount bookings)
    Succeeded,
    /// Attempt failed
    Failed,
    /// Intent cancelled
    Cancelled,
    /// Refund requested
    Refunding,
    /// Refund settled
    Refunded,
    /// Refund rejected by the provider
    RefundFailed,
}

text_enum!(PaymentStatus, "payment", {
    Pending => "pending",
    Processing => "processing",
    Succeeded => "succeeded",
    Failed => "failed",
    Cancelled => "cancelled",
    Refunding => "refunding",
    Refunded => "refunded",
    RefundFailed => "refund_failed",
});

impl StatusMachine for PaymentStatus {
    const ENTITY: &'static str = "payment";
    const TRANSITIONS: &'static [(Self, Self)] = &[
        (Self::Pending, Self::Processing),
        (Self::Pending, Self::Succeeded),
        (Self::Pending, Self::Failed),
        (Self::Pending, Self::Cancelled),
        (Self::Processing, Self::Succeeded),
        (Self::Processing, Self::Failed),
        (Self::Processing, Self::Cancelled),
        // a declined card can be retried against the same intent
        (Self::Failed, Self::Processing),
        (Self::Failed, Self::Succeeded),
        (Self::Failed, Self::Cancelled),
        (Self::Succeeded, Self::Refunding),
        (Self::Succeeded, Self::Refunded),
        (Self::Refunding, Self::Refunded),
        (Self::Refunding, Self::RefundFailed),
        (Self::RefundFailed, Self::Refunding),
    ];
}

impl PaymentStatus {
    /// Statuses in which the provider intent can still be completed
    pub const OPEN: [Self; 2] = [Self::Pending, Self::Processing];

    /// True for `Pending` and `Processing`
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Every status that may precede `next` in the transition table
    #[must_use]
    pub fn predecessors(next: Self) -> Vec<Self> {
        Self::TRANSITIONS
            .iter()
            .filter(|(_, to)| *to == next)
            .map(|(from, _)| *from)
            .collect()
    }
}

// ============================================================================
// Notification
// ============================================================================

/// Delivery status of a queued email.
///
/// Bounces and complaints are recorded as `Failed` with the provider's reason.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Waiting for the dispatcher
    Pending,
    /// Accepted by the email provider
    Sent,
    /// Send failed, bounced or drew a complaint
    Failed,
    /// Provider confirmed delivery
    Delivered,
}

text_enum!(NotificationStatus, "notification", {
    Pending => "pending",
    Sent => "sent",
    Failed => "failed",
    Delivered => "delivered",
});

impl StatusMachine for NotificationStatus {
    const ENTITY: &'static str = "notification";
    const TRANSITIONS: &'static [(Self, Self)] = &[
        (Self::Pending, Self::Sent),
        (Self::Pending, Self::Failed),
        (Self::Sent, Self::Delivered),
        (Self::Sent, Self::Failed),
    ];
}

// ============================================================================
// League attendance
// ============================================================================

/// A participant's answer for one league week
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// No answer yet
    Pending,
    /// Will attend
    Confirmed,
    /// Will not attend
    Declined,
}

text_enum!(AttendanceStatus, "attendance", {
    Pending => "pending",
    Confirmed => "confirmed",
    Declined => "declined",
});

impl StatusMachine for AttendanceStatus {
    const ENTITY: &'static str = "attendance";
    const TRANSITIONS: &'static [(Self, Self)] = &[
        (Self::Pending, Self::Confirmed),
        (Self::Pending, Self::Declined),
        (Self::Confirmed, Self::Declined),
        (Self::Declined, Self::Confirmed),
    ];
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn booking_table_matches_lifecycle() {
        use BookingStatus::{Cancelled, Confirmed, Expired, Reserved};
        assert!(Reserved.can_transition_to(Confirmed));
        assert!(Reserved.can_transition_to(Expired));
        assert!(Reserved.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Cancelled));

        assert!(!Confirmed.can_transition_to(Expired));
        assert!(!Confirmed.can_transition_to(Reserved));
        for next in [Reserved, Confirmed, Expired, Cancelled] {
            assert!(!Expired.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn unlisted_transition_is_state_conflict() {
        let err = BookingStatus::Expired
            .transition(BookingStatus::Confirmed)
            .unwrap_err();
        assert!(matches!(err, BookingError::StateConflict(_)));
    }

    #[test]
    fn payment_predecessors_of_succeeded() {
        let before = PaymentStatus::predecessors(PaymentStatus::Succeeded);
        assert!(before.contains(&PaymentStatus::Pending));
        assert!(before.contains(&PaymentStatus::Processing));
        assert!(!before.contains(&PaymentStatus::Refunded));
    }

    #[test]
    fn status_text_round_trips_through_storage_form() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::RefundFailed,
            PaymentStatus::Refunding,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>(), Ok(status));
        }
        assert!("paid".parse::<BookingStatus>().is_err());
    }
}
