//! Door-access policy.
//!
//! A confirmed booking may open its bay from 15 minutes before start until its end. The
//! policy is checked before any kiosk round-trip; a denied request never reaches the
//! kiosk.

use crate::model::Booking;
use crate::status::BookingStatus;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minutes before start when the door may first be opened
pub const EARLY_ACCESS_MINUTES: i64 = 15;

/// Shortest unlock duration sent to a kiosk
pub const MIN_UNLOCK_SECONDS: u64 = 60;

/// Default cap on the unlock duration
pub const DEFAULT_MAX_UNLOCK_SECONDS: u64 = 4 * 60 * 60;

/// Why an unlock was not granted
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum UnlockReason {
    /// Before the access window opens
    TooEarly {
        /// When the window opens
        opens_at: DateTime<Utc>,
        /// Venue timezone the opening time is shown in
        timezone: Tz,
    },
    /// After the booking end
    BookingEnded,
    /// Booking is not confirmed
    NotConfirmed,
    /// No kiosk registered, a failed ack or no ack in time
    KioskUnavailable,
    /// Token failed signature or format checks, or names an unknown booking
    TokenInvalid,
    /// Token is past its expiry
    TokenExpired,
}

impl fmt::Display for UnlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooEarly { opens_at, timezone } => write!(
                f,
                "Too early: the bay can be unlocked from {}",
                opens_at.with_timezone(timezone).format("%H:%M %Z")
            ),
            Self::BookingEnded => f.write_str("This booking has ended"),
            Self::NotConfirmed => f.write_str("This booking is not confirmed"),
            Self::KioskUnavailable => {
                f.write_str("The bay system is offline; please contact staff")
            },
            Self::TokenInvalid => f.write_str("This unlock link is not valid"),
            Self::TokenExpired => f.write_str("This unlock link has expired"),
        }
    }
}

/// First instant the door may be opened for `booking`
#[must_use]
pub fn access_opens_at(booking: &Booking) -> DateTime<Utc> {
    booking.start_at - Duration::minutes(EARLY_ACCESS_MINUTES)
}

/// Applies the access window to a booking at a venue in `timezone`.
///
/// # Errors
///
/// Returns the [`UnlockReason`] the request must be rejected with.
pub fn check_access(booking: &Booking, now: DateTime<Utc>, timezone: Tz) -> Result<(), UnlockReason> {
    if booking.status != BookingStatus::Confirmed {
        return Err(UnlockReason::NotConfirmed);
    }
    let opens_at = access_opens_at(booking);
    if now < opens_at {
        return Err(UnlockReason::TooEarly { opens_at, timezone });
    }
    if now > booking.end_at {
        return Err(UnlockReason::BookingEnded);
    }
    Ok(())
}

/// Seconds the kiosk should keep the door unlocked: time left in the booking, capped at
/// `max_seconds` and never below [`MIN_UNLOCK_SECONDS`]
#[must_use]
pub fn unlock_duration_seconds(booking: &Booking, now: DateTime<Utc>, max_seconds: u64) -> u64 {
    let remaining = u64::try_from((booking.end_at - now).num_seconds()).unwrap_or(0);
    remaining.min(max_seconds).max(MIN_UNLOCK_SECONDS)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ids::{BayId, BookingId, LocationId, UserId};
    use crate::money::Money;
    use chrono::TimeZone;

    fn confirmed() -> Booking {
        let start = Utc.with_ymd_and_hms(2025, 5, 1, 18, 0, 0).unwrap();
        Booking {
            id: BookingId::new(),
            bay_id: BayId::new(),
            location_id: LocationId::new(),
            user_id: UserId::new(),
            start_at: start,
            end_at: start + Duration::hours(2),
            status: BookingStatus::Confirmed,
            expires_at: None,
            total_amount: Money::from_cents(8000),
            discount_amount: Money::ZERO,
            promotion_code: None,
            payment_intent_id: Some("pi_1".into()),
            unlock_token: None,
            unlock_token_expires_at: None,
            created_at: start - Duration::days(2),
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
        }
    }

    #[test]
    fn window_opens_fifteen_minutes_early() {
        let b = confirmed();
        let opens = b.start_at - Duration::minutes(15);
        assert_eq!(
            check_access(&b, opens - Duration::seconds(1), chrono_tz::UTC),
            Err(UnlockReason::TooEarly {
                opens_at: opens,
                timezone: chrono_tz::UTC
            })
        );
        assert_eq!(check_access(&b, opens, chrono_tz::UTC), Ok(()));
        assert_eq!(check_access(&b, b.end_at, chrono_tz::UTC), Ok(()));
        assert_eq!(
            check_access(&b, b.end_at + Duration::seconds(1), chrono_tz::UTC),
            Err(UnlockReason::BookingEnded)
        );
    }

    #[test]
    fn too_early_message_uses_venue_local_time() {
        let b = confirmed();
        // 2025-05-01 17:45 UTC is 13:45 in New York (EDT)
        let reason = check_access(&b, b.start_at - Duration::hours(1), chrono_tz::America::New_York)
            .unwrap_err();
        assert_eq!(
            reason.to_string(),
            "Too early: the bay can be unlocked from 13:45 EDT"
        );
    }

    #[test]
    fn unconfirmed_booking_is_denied_first() {
        let mut b = confirmed();
        b.status = BookingStatus::Reserved;
        assert_eq!(
            check_access(&b, b.start_at, chrono_tz::UTC),
            Err(UnlockReason::NotConfirmed)
        );
    }

    #[test]
    fn duration_is_remaining_time_clamped() {
        let b = confirmed();
        assert_eq!(unlock_duration_seconds(&b, b.start_at, DEFAULT_MAX_UNLOCK_SECONDS), 7200);
        assert_eq!(unlock_duration_seconds(&b, b.start_at, 1800), 1800);
        assert_eq!(
            unlock_duration_seconds(&b, b.end_at - Duration::seconds(10), DEFAULT_MAX_UNLOCK_SECONDS),
            MIN_UNLOCK_SECONDS
        );
    }
}
