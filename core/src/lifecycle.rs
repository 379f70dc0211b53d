//! Booking state machine as a pure decision function.
//!
//! `decide` looks at the current booking and a command and returns what to write (a
//! conditional transition naming the expected prior status) and which effects to run once
//! the write reports an affected row. It never performs I/O.
//!
//! Redelivered or stale commands are not errors: a success event for a booking that is
//! already confirmed decides [`Outcome::Duplicate`], and a cancel event arriving after
//! confirmation decides [`Outcome::Stale`]. Both carry no write and no effects.

use crate::effect::{BookingDelta, DeltaAction, Effect, Effects};
use crate::error::{BookingError, Result};
use crate::ids::{BookingId, PaymentId};
use crate::model::{Booking, BookingUpdate, NotificationKind, NotificationSubject};
use crate::money::Money;
use crate::schedule::REMINDER_LEAD_MINUTES;
use crate::status::{BookingStatus, StatusMachine};
use chrono::{DateTime, Duration, Utc};
use smallvec::smallvec;

/// Default reservation hold
pub const DEFAULT_HOLD_MINUTES: i64 = 10;

/// Something that wants to change a booking
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingCommand {
    /// The payment provider reported success
    PaymentSucceeded,
    /// The payment provider cancelled the intent
    PaymentCanceled {
        /// Provider's cancellation reason, if any
        reason: Option<String>,
    },
    /// The hold lapsed
    Expire,
    /// Manual cancellation
    Cancel {
        /// Why
        reason: String,
        /// Who
        actor: String,
    },
}

/// How the command relates to the booking's current state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A transition should be written
    Applied,
    /// The booking is already in the target state; redelivery
    Duplicate,
    /// A newer state wins over this command
    Stale,
    /// Payment arrived after the booking expired or was cancelled; refund it
    LatePayment,
}

/// Conditional write: apply `update` only if the row is still `expected`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Status the row must still have
    pub expected: BookingStatus,
    /// Fields to write
    pub update: BookingUpdate,
}

/// Result of [`decide`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    /// Classification
    pub outcome: Outcome,
    /// Write to perform, if any
    pub transition: Option<Transition>,
    /// Effects to run after the write affects a row
    pub effects: Effects,
    /// A succeeded payment must be refunded after the write
    pub refund_required: bool,
}

impl Decision {
    fn none(outcome: Outcome) -> Self {
        Self {
            outcome,
            transition: None,
            effects: Effects::new(),
            refund_required: false,
        }
    }

    fn apply(from: BookingStatus, update: BookingUpdate, effects: Effects) -> Self {
        Self {
            outcome: Outcome::Applied,
            transition: Some(Transition {
                expected: from,
                update,
            }),
            effects,
            refund_required: false,
        }
    }
}

fn delta(booking: &Booking, status: BookingStatus, action: DeltaAction) -> Effect {
    let mut summary = booking.summary();
    summary.status = status;
    Effect::BroadcastBooking {
        location: booking.location_id,
        bay: booking.bay_id,
        delta: BookingDelta {
            action,
            booking: summary,
        },
    }
}

/// True when the booking starts within the reminder lead time and has not ended
#[must_use]
pub fn starts_soon(booking: &Booking, now: DateTime<Utc>) -> bool {
    booking.start_at - now <= Duration::minutes(REMINDER_LEAD_MINUTES) && now < booking.end_at
}

/// Decides how `command` changes `booking` at `now`.
///
/// # Errors
///
/// - [`BookingError::InvalidBookingState`] when cancelling a booking that already expired
///   or was cancelled
/// - [`BookingError::StateConflict`] if a transition is missing from the status table
pub fn decide(booking: &Booking, command: BookingCommand, now: DateTime<Utc>) -> Result<Decision> {
    let status = booking.status;
    match command {
        BookingCommand::PaymentSucceeded => match status {
            BookingStatus::Reserved => {
                let next = status.transition(BookingStatus::Confirmed)?;
                let update = BookingUpdate {
                    status: Some(next),
                    expires_at: Some(None),
                    ..BookingUpdate::default()
                };
                let mut effects: Effects = smallvec![
                    Effect::QueueNotification {
                        subject: NotificationSubject::Booking(booking.id),
                        kind: NotificationKind::BookingConfirmation,
                    },
                    delta(booking, next, DeltaAction::Add),
                ];
                if starts_soon(booking, now) {
                    effects.push(Effect::IssueUnlockReminder {
                        booking: booking.id,
                    });
                }
                Ok(Decision::apply(status, update, effects))
            },
            BookingStatus::Confirmed => Ok(Decision::none(Outcome::Duplicate)),
            BookingStatus::Expired | BookingStatus::Cancelled => Ok(Decision {
                refund_required: true,
                ..Decision::none(Outcome::LatePayment)
            }),
        },

        BookingCommand::PaymentCanceled { reason } => match status {
            BookingStatus::Reserved => {
                let next = status.transition(BookingStatus::Cancelled)?;
                let update = BookingUpdate {
                    status: Some(next),
                    cancelled_at: Some(now),
                    cancelled_by: Some("payment_provider".to_string()),
                    cancellation_reason: Some(
                        reason.unwrap_or_else(|| "payment cancelled".to_string()),
                    ),
                    ..BookingUpdate::default()
                };
                Ok(Decision::apply(
                    status,
                    update,
                    smallvec![delta(booking, next, DeltaAction::Remove)],
                ))
            },
            BookingStatus::Cancelled => Ok(Decision::none(Outcome::Duplicate)),
            // confirmed always wins over a stale cancel
            BookingStatus::Confirmed | BookingStatus::Expired => Ok(Decision::none(Outcome::Stale)),
        },

        BookingCommand::Expire => match status {
            BookingStatus::Reserved if booking.hold_lapsed(now) => {
                let next = status.transition(BookingStatus::Expired)?;
                let update = BookingUpdate {
                    status: Some(next),
                    ..BookingUpdate::default()
                };
                Ok(Decision::apply(
                    status,
                    update,
                    smallvec![delta(booking, next, DeltaAction::Remove)],
                ))
            },
            BookingStatus::Expired => Ok(Decision::none(Outcome::Duplicate)),
            _ => Ok(Decision::none(Outcome::Stale)),
        },

        BookingCommand::Cancel { reason, actor } => match status {
            BookingStatus::Reserved | BookingStatus::Confirmed => {
                let next = status.transition(BookingStatus::Cancelled)?;
                let update = BookingUpdate {
                    status: Some(next),
                    expires_at: Some(None),
                    cancelled_at: Some(now),
                    cancelled_by: Some(actor),
                    cancellation_reason: Some(reason),
                    ..BookingUpdate::default()
                };
                let effects: Effects = smallvec![
                    Effect::QueueNotification {
                        subject: NotificationSubject::Booking(booking.id),
                        kind: NotificationKind::CancellationNotice,
                    },
                    delta(booking, next, DeltaAction::Remove),
                ];
                let mut decision = Decision::apply(status, update, effects);
                decision.refund_required = status == BookingStatus::Confirmed;
                Ok(decision)
            },
            BookingStatus::Expired | BookingStatus::Cancelled => {
                Err(BookingError::InvalidBookingState {
                    booking_id: booking.id,
                    status,
                    expected: BookingStatus::Confirmed,
                })
            },
        },
    }
}

/// Checks that a booking can start a payment at `now`.
///
/// The comparison is against the stored expiry, never a recomputed one.
///
/// # Errors
///
/// - [`BookingError::InvalidBookingState`] when not `Reserved`
/// - [`BookingError::ReservationExpired`] when the hold has lapsed
pub fn ensure_payable(booking: &Booking, now: DateTime<Utc>) -> Result<()> {
    if booking.status != BookingStatus::Reserved {
        return Err(BookingError::InvalidBookingState {
            booking_id: booking.id,
            status: booking.status,
            expected: BookingStatus::Reserved,
        });
    }
    if booking.hold_lapsed(now) {
        return Err(BookingError::ReservationExpired(booking.id));
    }
    Ok(())
}

/// Provider idempotency key for a payment attempt
#[must_use]
pub fn payment_idempotency_key(booking: BookingId, amount: Money, attempt: u32) -> String {
    format!("booking:{booking}:amount:{}:attempt:{attempt}", amount.cents())
}

/// Provider idempotency key for refunding a payment
#[must_use]
pub fn refund_idempotency_key(payment: PaymentId) -> String {
    format!("refund:{payment}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ids::{BayId, LocationId, UserId};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn reserved(start_in: Duration) -> Booking {
        let start = now() + start_in;
        Booking {
            id: BookingId::new(),
            bay_id: BayId::new(),
            location_id: LocationId::new(),
            user_id: UserId::new(),
            start_at: start,
            end_at: start + Duration::hours(1),
            status: BookingStatus::Reserved,
            expires_at: Some(now() + Duration::minutes(10)),
            total_amount: Money::from_cents(4000),
            discount_amount: Money::ZERO,
            promotion_code: None,
            payment_intent_id: None,
            unlock_token: None,
            unlock_token_expires_at: None,
            created_at: now(),
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
        }
    }

    #[test]
    fn success_confirms_clears_expiry_and_queues_effects() {
        let booking = reserved(Duration::days(1));
        let decision = decide(&booking, BookingCommand::PaymentSucceeded, now()).unwrap();

        assert_eq!(decision.outcome, Outcome::Applied);
        let transition = decision.transition.unwrap();
        assert_eq!(transition.expected, BookingStatus::Reserved);
        assert_eq!(transition.update.status, Some(BookingStatus::Confirmed));
        assert_eq!(transition.update.expires_at, Some(None));
        assert_eq!(decision.effects.len(), 2);
        assert!(!decision
            .effects
            .iter()
            .any(|e| matches!(e, Effect::IssueUnlockReminder { .. })));
    }

    #[test]
    fn success_close_to_start_issues_reminder_immediately() {
        let booking = reserved(Duration::minutes(10));
        let decision = decide(&booking, BookingCommand::PaymentSucceeded, now()).unwrap();
        assert!(decision
            .effects
            .iter()
            .any(|e| matches!(e, Effect::IssueUnlockReminder { .. })));
    }

    #[test]
    fn redelivered_success_is_a_silent_duplicate() {
        let mut booking = reserved(Duration::days(1));
        booking.status = BookingStatus::Confirmed;
        booking.expires_at = None;
        let decision = decide(&booking, BookingCommand::PaymentSucceeded, now()).unwrap();
        assert_eq!(decision.outcome, Outcome::Duplicate);
        assert!(decision.transition.is_none());
        assert!(decision.effects.is_empty());
    }

    #[test]
    fn late_success_on_expired_booking_requires_refund() {
        let mut booking = reserved(Duration::days(1));
        booking.status = BookingStatus::Expired;
        let decision = decide(&booking, BookingCommand::PaymentSucceeded, now()).unwrap();
        assert_eq!(decision.outcome, Outcome::LatePayment);
        assert!(decision.refund_required);
        assert!(decision.transition.is_none());
    }

    #[test]
    fn stale_cancel_never_touches_confirmed_booking() {
        let mut booking = reserved(Duration::days(1));
        booking.status = BookingStatus::Confirmed;
        booking.expires_at = None;
        let decision =
            decide(&booking, BookingCommand::PaymentCanceled { reason: None }, now()).unwrap();
        assert_eq!(decision.outcome, Outcome::Stale);
        assert!(decision.transition.is_none());
    }

    #[test]
    fn expire_only_after_stored_expiry() {
        let booking = reserved(Duration::days(1));
        let early = decide(&booking, BookingCommand::Expire, now()).unwrap();
        assert_eq!(early.outcome, Outcome::Stale);

        let late = decide(&booking, BookingCommand::Expire, now() + Duration::minutes(11)).unwrap();
        assert_eq!(late.outcome, Outcome::Applied);
        assert_eq!(
            late.transition.unwrap().update.status,
            Some(BookingStatus::Expired)
        );
    }

    #[test]
    fn cancelling_confirmed_booking_requires_refund() {
        let mut booking = reserved(Duration::days(1));
        booking.status = BookingStatus::Confirmed;
        booking.expires_at = None;
        let decision = decide(
            &booking,
            BookingCommand::Cancel {
                reason: "customer request".into(),
                actor: "staff".into(),
            },
            now(),
        )
        .unwrap();
        assert!(decision.refund_required);
        let update = decision.transition.unwrap().update;
        assert_eq!(update.cancelled_by.as_deref(), Some("staff"));
        assert_eq!(update.cancelled_at, Some(now()));
    }

    #[test]
    fn cancelling_expired_booking_is_rejected() {
        let mut booking = reserved(Duration::days(1));
        booking.status = BookingStatus::Expired;
        let err = decide(
            &booking,
            BookingCommand::Cancel {
                reason: "x".into(),
                actor: "y".into(),
            },
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, BookingError::InvalidBookingState { .. }));
    }

    #[test]
    fn payable_checks_status_then_stored_expiry() {
        let booking = reserved(Duration::days(1));
        assert!(ensure_payable(&booking, now()).is_ok());
        assert!(matches!(
            ensure_payable(&booking, now() + Duration::minutes(10)),
            Err(BookingError::ReservationExpired(_))
        ));
    }

    #[test]
    fn idempotency_keys_are_deterministic() {
        let id = BookingId::from_uuid(uuid::Uuid::nil());
        assert_eq!(
            payment_idempotency_key(id, Money::from_cents(1500), 2),
            "booking:00000000-0000-0000-0000-000000000000:amount:1500:attempt:2"
        );
    }
}
