//! Persisted records.
//!
//! Timestamps on bookings and payments are absolute (`DateTime<Utc>`). League times are
//! local wall-clock values that only become instants once combined with a date and the
//! location's timezone (see [`crate::schedule`]).

use crate::ids::{
    AttendanceId, BayId, BookingId, CapacityHoldId, LeagueId, LeagueWeekId, LocationId,
    NotificationId, PaymentId, TeamId, UserId,
};
use crate::money::Money;
use crate::status::{AttendanceStatus, BookingStatus, NotificationStatus, PaymentStatus};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Locations, users, bays
// ============================================================================

/// A venue with its own timezone
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Identifier
    pub id: LocationId,
    /// Display name
    pub name: String,
    /// IANA timezone used for every local wall-clock conversion
    pub timezone: Tz,
}

/// A customer account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Identifier
    pub id: UserId,
    /// Contact address for notifications
    pub email: String,
    /// Display name
    pub name: String,
    /// Payment-provider customer handle, reused for off-session charges
    pub payment_customer_id: Option<String>,
}

/// Whether a bay accepts bookings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BayStatus {
    /// Open for bookings
    Available,
    /// Taken out of service
    Closed,
}

text_enum!(BayStatus, "bay status", {
    Available => "available",
    Closed => "closed",
});

/// A physical simulator bay
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bay {
    /// Identifier
    pub id: BayId,
    /// Owning venue
    pub location_id: LocationId,
    /// Display name ("Bay 3")
    pub name: String,
    /// Availability
    pub status: BayStatus,
    /// League mode suspends normal booking availability
    pub league_mode_active: bool,
    /// League owning the bay while league mode is active
    pub league_mode_league_id: Option<LeagueId>,
    /// Last kiosk heartbeat
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Kiosk network address, informational
    pub network_address: Option<String>,
}

impl Bay {
    /// League mode implies an associated league
    #[must_use]
    pub const fn league_mode_consistent(&self) -> bool {
        !self.league_mode_active || self.league_mode_league_id.is_some()
    }
}

// ============================================================================
// Bookings
// ============================================================================

/// A claim on a bay for a time interval
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Identifier
    pub id: BookingId,
    /// Bay being booked
    pub bay_id: BayId,
    /// Venue of the bay
    pub location_id: LocationId,
    /// Customer
    pub user_id: UserId,
    /// Inclusive start
    pub start_at: DateTime<Utc>,
    /// Exclusive end
    pub end_at: DateTime<Utc>,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Hold expiry; set exactly while `Reserved`
    pub expires_at: Option<DateTime<Utc>>,
    /// Amount due after discount
    pub total_amount: Money,
    /// Discount applied by the promotion
    pub discount_amount: Money,
    /// Promotion code, if any
    pub promotion_code: Option<String>,
    /// Provider intent bound by the latest payment attempt
    pub payment_intent_id: Option<String>,
    /// Signed unlock-link token, issued once
    pub unlock_token: Option<String>,
    /// Unlock token expiry (the booking end)
    pub unlock_token_expires_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Cancellation time
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Who cancelled ("webhook", "system" or a staff/user id)
    pub cancelled_by: Option<String>,
    /// Free-form reason for the audit trail
    pub cancellation_reason: Option<String>,
}

impl Booking {
    /// Length of the booked interval
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end_at - self.start_at
    }

    /// True when the stored hold expiry is at or before `now`
    #[must_use]
    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// True when the booking has run its course
    #[must_use]
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_at
    }

    /// Half-open overlap test against another interval
    #[must_use]
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_at < end && start < self.end_at
    }

    /// Exactly one of reserved-with-expiry, confirmed-without-expiry, expired or cancelled
    #[must_use]
    pub const fn status_consistent(&self) -> bool {
        match self.status {
            BookingStatus::Reserved => self.expires_at.is_some(),
            BookingStatus::Confirmed => self.expires_at.is_none(),
            BookingStatus::Expired | BookingStatus::Cancelled => true,
        }
    }

    /// Compact view pushed to kiosks
    #[must_use]
    pub fn summary(&self) -> BookingSummary {
        BookingSummary {
            id: self.id,
            bay_id: self.bay_id,
            user_id: self.user_id,
            start_at: self.start_at,
            end_at: self.end_at,
            status: self.status,
        }
    }
}

/// What a kiosk needs to render its local schedule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSummary {
    /// Booking
    pub id: BookingId,
    /// Bay
    pub bay_id: BayId,
    /// Customer
    pub user_id: UserId,
    /// Start
    pub start_at: DateTime<Utc>,
    /// End
    pub end_at: DateTime<Utc>,
    /// Status
    pub status: BookingStatus,
}

/// Fields written alongside a conditional booking status change
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BookingUpdate {
    /// New status
    pub status: Option<BookingStatus>,
    /// `Some(None)` clears the expiry
    pub expires_at: Option<Option<DateTime<Utc>>>,
    /// Intent bound by the latest attempt
    pub payment_intent_id: Option<String>,
    /// Cancellation time
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Cancelling actor
    pub cancelled_by: Option<String>,
    /// Cancellation reason
    pub cancellation_reason: Option<String>,
}

impl BookingUpdate {
    /// Applies the update to an in-memory copy
    pub fn apply(&self, booking: &mut Booking) {
        if let Some(status) = self.status {
            booking.status = status;
        }
        if let Some(expires_at) = self.expires_at {
            booking.expires_at = expires_at;
        }
        if let Some(intent) = &self.payment_intent_id {
            booking.payment_intent_id = Some(intent.clone());
        }
        if self.cancelled_at.is_some() {
            booking.cancelled_at = self.cancelled_at;
            booking.cancelled_by.clone_from(&self.cancelled_by);
            booking.cancellation_reason.clone_from(&self.cancellation_reason);
        }
    }
}

// ============================================================================
// Payments
// ============================================================================

/// What the provider intent does
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    /// Charges the booking amount
    Charge,
    /// Zero-value intent that saves a card for later off-session charges
    SaveCard,
}

text_enum!(PaymentKind, "payment kind", {
    Charge => "charge",
    SaveCard => "save_card",
});

/// One attempt record per provider intent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Identifier
    pub id: PaymentId,
    /// Owning booking
    pub booking_id: BookingId,
    /// Charge or save-card
    pub kind: PaymentKind,
    /// Provider intent id
    pub provider_intent_id: String,
    /// Handle the client uses to complete the intent
    pub client_secret: Option<String>,
    /// Provider customer the intent is attached to
    pub customer_handle: Option<String>,
    /// Amount requested
    pub amount: Money,
    /// ISO currency code, lowercase
    pub currency: String,
    /// Attempt status
    pub status: PaymentStatus,
    /// Amount refunded so far
    pub refund_amount: Money,
    /// Provider refund id
    pub refund_id: Option<String>,
    /// Gateway's message for the last failure
    pub failure_message: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last write
    pub updated_at: DateTime<Utc>,
}

/// Fields written alongside a conditional payment status change
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentUpdate {
    /// New status
    pub status: PaymentStatus,
    /// Failure message from the gateway
    pub failure_message: Option<String>,
    /// Refund id, when a refund was issued
    pub refund_id: Option<String>,
    /// Refunded amount
    pub refund_amount: Option<Money>,
    /// Write time
    pub updated_at: DateTime<Utc>,
}

impl PaymentUpdate {
    /// Status-only update
    #[must_use]
    pub const fn status(status: PaymentStatus, updated_at: DateTime<Utc>) -> Self {
        Self {
            status,
            failure_message: None,
            refund_id: None,
            refund_amount: None,
            updated_at,
        }
    }

    /// Applies the update to an in-memory copy
    pub fn apply(&self, payment: &mut Payment) {
        payment.status = self.status;
        payment.updated_at = self.updated_at;
        if self.failure_message.is_some() {
            payment.failure_message.clone_from(&self.failure_message);
        }
        if self.refund_id.is_some() {
            payment.refund_id.clone_from(&self.refund_id);
        }
        if let Some(amount) = self.refund_amount {
            payment.refund_amount = amount;
        }
    }
}

// ============================================================================
// Pricing
// ============================================================================

/// Named hourly rate for a local time-of-day window.
///
/// `start_time == end_time` covers the whole day. A window whose end is at or before its
/// start wraps past midnight. `days` lists the weekdays on which the window opens; empty
/// means every day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRule {
    /// Rule name, used to split segments
    pub name: String,
    /// Rate per hour
    pub hourly_rate: Money,
    /// Local start of the window
    pub start_time: NaiveTime,
    /// Local end of the window (exclusive)
    pub end_time: NaiveTime,
    /// Weekdays on which the window opens
    pub days: Vec<Weekday>,
}

// ============================================================================
// Notifications
// ============================================================================

/// The record a notification is about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum NotificationSubject {
    /// A booking
    Booking(BookingId),
    /// A league attendance row
    Attendance(AttendanceId),
}

impl NotificationSubject {
    /// Raw id used in the `(subject, kind)` uniqueness key
    #[must_use]
    pub const fn subject_id(&self) -> Uuid {
        match self {
            Self::Booking(id) => *id.as_uuid(),
            Self::Attendance(id) => *id.as_uuid(),
        }
    }

    /// Text tag stored next to the id
    #[must_use]
    pub const fn subject_type(&self) -> &'static str {
        match self {
            Self::Booking(_) => "booking",
            Self::Attendance(_) => "attendance",
        }
    }
}

/// Email template selector; one notification per kind per subject
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Thank-you after payment
    BookingConfirmation,
    /// Unlock link sent shortly before start
    UnlockReminder,
    /// League attendance confirm/decline request
    AttendanceRequest,
    /// Booking was cancelled
    CancellationNotice,
}

text_enum!(NotificationKind, "notification kind", {
    BookingConfirmation => "booking_confirmation",
    UnlockReminder => "unlock_reminder",
    AttendanceRequest => "attendance_request",
    CancellationNotice => "cancellation_notice",
});

/// A queued outbound email
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Identifier
    pub id: NotificationId,
    /// What it is about
    pub subject: NotificationSubject,
    /// Template
    pub kind: NotificationKind,
    /// Destination address
    pub recipient: String,
    /// Template variables (links, times, bay name)
    pub payload: serde_json::Value,
    /// Earliest send time; `None` means as soon as possible
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Delivery status
    pub status: NotificationStatus,
    /// Send attempts so far
    pub attempts: u32,
    /// Provider message id once sent
    pub provider_message_id: Option<String>,
    /// Last failure reason
    pub last_error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last write
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// A new pending notification
    #[must_use]
    pub fn pending(
        subject: NotificationSubject,
        kind: NotificationKind,
        recipient: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            subject,
            kind,
            recipient: recipient.into(),
            payload,
            scheduled_for: None,
            status: NotificationStatus::Pending,
            attempts: 0,
            provider_message_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pending and past its scheduled time (or unscheduled)
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == NotificationStatus::Pending
            && self.scheduled_for.is_none_or(|at| at <= now)
    }
}

/// Outcome of one send attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendResult {
    /// Accepted by the provider
    Sent {
        /// Provider message id
        provider_message_id: String,
    },
    /// Rejected or errored
    Failed {
        /// Reason
        error: String,
    },
}

// ============================================================================
// Leagues
// ============================================================================

/// League lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeagueStatus {
    /// Being set up
    Draft,
    /// Running
    Active,
    /// Finished
    Completed,
}

text_enum!(LeagueStatus, "league status", {
    Draft => "draft",
    Active => "active",
    Completed => "completed",
});

/// Individual or team play
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeagueFormat {
    /// Players compete individually
    Individual,
    /// Players compete as teams
    Team,
}

text_enum!(LeagueFormat, "league format", {
    Individual => "individual",
    Team => "team",
});

/// A recurring league
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct League {
    /// Identifier
    pub id: LeagueId,
    /// Venue
    pub location_id: LocationId,
    /// Display name
    pub name: String,
    /// Lifecycle
    pub status: LeagueStatus,
    /// Individual or team
    pub format: LeagueFormat,
    /// First session date (local)
    pub start_date: NaiveDate,
    /// Session start, local wall clock
    pub start_time: NaiveTime,
    /// Session end, local wall clock; may be before `start_time` for sessions past midnight
    pub end_time: NaiveTime,
    /// Handicaps are tracked
    pub handicaps_enabled: bool,
    /// Weekly attendance confirmation is required
    pub attendance_required: bool,
    /// Hours before start when attendance locks
    pub attendance_cutoff_hours: Option<u32>,
    /// Hours before start when the attendance request goes out
    pub attendance_reminder_hours: Option<u32>,
    /// Minutes after `end_time` before league mode is switched off
    pub league_mode_buffer_minutes: Option<u32>,
    /// Reconcile capacity holds against confirmed attendance at cutoff
    pub auto_adjust_capacity: bool,
    /// Players per bay used in capacity reconciliation
    pub players_per_bay: Option<u32>,
    /// Minimum confirmed players per team before a team is flagged
    pub min_team_attendance: Option<u32>,
}

impl League {
    /// Default cutoff before start
    pub const DEFAULT_CUTOFF_HOURS: u32 = 8;
    /// Default reminder lead time
    pub const DEFAULT_REMINDER_HOURS: u32 = 24;
    /// Default league-mode buffer
    pub const DEFAULT_BUFFER_MINUTES: u32 = 30;
    /// Default players per bay
    pub const DEFAULT_PLAYERS_PER_BAY: u32 = 4;

    /// Attendance cutoff offset
    #[must_use]
    pub fn cutoff_offset(&self) -> Duration {
        Duration::hours(i64::from(
            self.attendance_cutoff_hours.unwrap_or(Self::DEFAULT_CUTOFF_HOURS),
        ))
    }

    /// Attendance reminder offset
    #[must_use]
    pub fn reminder_offset(&self) -> Duration {
        Duration::hours(i64::from(
            self.attendance_reminder_hours.unwrap_or(Self::DEFAULT_REMINDER_HOURS),
        ))
    }

    /// League-mode buffer after the session ends
    #[must_use]
    pub fn mode_buffer(&self) -> Duration {
        Duration::minutes(i64::from(
            self.league_mode_buffer_minutes.unwrap_or(Self::DEFAULT_BUFFER_MINUTES),
        ))
    }

    /// Players per bay, never zero
    #[must_use]
    pub fn players_per_bay(&self) -> u32 {
        self.players_per_bay
            .unwrap_or(Self::DEFAULT_PLAYERS_PER_BAY)
            .max(1)
    }

    /// Session runs past local midnight
    #[must_use]
    pub fn crosses_midnight(&self) -> bool {
        self.end_time <= self.start_time
    }
}

/// Week lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekStatus {
    /// Upcoming
    Scheduled,
    /// Being played
    Active,
    /// Played
    Completed,
}

text_enum!(WeekStatus, "week status", {
    Scheduled => "scheduled",
    Active => "active",
    Completed => "completed",
});

/// One scheduled week of a league
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueWeek {
    /// Identifier
    pub id: LeagueWeekId,
    /// League
    pub league_id: LeagueId,
    /// 1-based week number
    pub week_number: u32,
    /// Local session date
    pub date: NaiveDate,
    /// Lifecycle
    pub status: WeekStatus,
}

/// Someone playing in a league
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueParticipant {
    /// Player
    pub user_id: UserId,
    /// Contact address
    pub email: String,
    /// Team in team leagues
    pub team_id: Option<TeamId>,
}

/// A participant's attendance answer for one week
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueAttendance {
    /// Identifier
    pub id: AttendanceId,
    /// Week
    pub week_id: LeagueWeekId,
    /// Player
    pub user_id: UserId,
    /// Contact address
    pub email: String,
    /// Team in team leagues
    pub team_id: Option<TeamId>,
    /// Answer
    pub status: AttendanceStatus,
    /// Opaque token carried by the confirm/decline links
    pub response_token: String,
    /// When the request email was queued
    pub reminder_sent_at: Option<DateTime<Utc>>,
    /// No further answers accepted
    pub locked: bool,
}

impl LeagueAttendance {
    /// A fresh pending row for a participant
    #[must_use]
    pub fn pending(week_id: LeagueWeekId, participant: &LeagueParticipant) -> Self {
        Self {
            id: AttendanceId::new(),
            week_id,
            user_id: participant.user_id,
            email: participant.email.clone(),
            team_id: participant.team_id,
            status: AttendanceStatus::Pending,
            response_token: Uuid::new_v4().simple().to_string(),
            reminder_sent_at: None,
            locked: false,
        }
    }
}

/// League-level reservation of bay capacity for one week
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityHold {
    /// Identifier
    pub id: CapacityHoldId,
    /// League
    pub league_id: LeagueId,
    /// Week
    pub week_id: LeagueWeekId,
    /// Bays currently held
    pub bay_count: u32,
    /// Bays originally requested; reconciliation never exceeds it
    pub requested_bay_count: u32,
    /// Staff override that stops attendance emails for the week
    pub suspend_attendance_reminders: bool,
}

impl CapacityHold {
    /// Bays needed for `confirmed` players at `players_per_bay` each.
    ///
    /// At least one bay is always kept and the count never exceeds what was requested.
    #[must_use]
    pub fn reconciled_bay_count(&self, confirmed: u32, players_per_bay: u32) -> u32 {
        let needed = confirmed.div_ceil(players_per_bay.max(1)).max(1);
        needed.min(self.requested_bay_count.max(1))
    }
}

/// Team standing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamStatus {
    /// Playing
    Active,
    /// Removed for unpaid members at the deadline
    Disqualified,
}

text_enum!(TeamStatus, "team status", {
    Active => "active",
    Disqualified => "disqualified",
});

/// A team in a team league
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Identifier
    pub id: TeamId,
    /// League
    pub league_id: LeagueId,
    /// Display name
    pub name: String,
    /// Standing
    pub status: TeamStatus,
}

/// A member of a team and their league-fee payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    /// Team
    pub team_id: TeamId,
    /// Player
    pub user_id: UserId,
    /// League fee paid
    pub paid: bool,
    /// Intent that paid the fee
    pub payment_intent_id: Option<String>,
    /// Fee returned after disqualification
    pub refunded: bool,
}

// ============================================================================
// Access audit
// ============================================================================

/// Who asked for a door unlock
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessActor {
    /// Holder of an unlock link; the fingerprint is a hash prefix, never the token
    Link {
        /// Token fingerprint
        fingerprint: String,
    },
    /// Signed-in customer
    User {
        /// Customer
        user_id: UserId,
    },
    /// Staff override
    Staff {
        /// Staff member
        user_id: UserId,
    },
}

/// Result of an unlock attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessOutcome {
    /// Kiosk acknowledged the unlock
    Granted,
    /// Rejected before contacting the kiosk
    Denied {
        /// Human-readable reason
        reason: String,
    },
    /// No kiosk, a failed ack or no ack in time
    KioskUnavailable,
}

/// Audit record written for every unlock attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// Booking, when one was resolved
    pub booking_id: Option<BookingId>,
    /// Bay, when one was resolved
    pub bay_id: Option<BayId>,
    /// Originating identity
    pub actor: AccessActor,
    /// Result
    pub outcome: AccessOutcome,
    /// Attempt time
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn booking(status: BookingStatus, expires_at: Option<DateTime<Utc>>) -> Booking {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap();
        Booking {
            id: BookingId::new(),
            bay_id: BayId::new(),
            location_id: LocationId::new(),
            user_id: UserId::new(),
            start_at: start,
            end_at: start + Duration::hours(1),
            status,
            expires_at,
            total_amount: Money::from_cents(4000),
            discount_amount: Money::ZERO,
            promotion_code: None,
            payment_intent_id: None,
            unlock_token: None,
            unlock_token_expires_at: None,
            created_at: start - Duration::days(1),
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
        }
    }

    #[test]
    fn status_consistency() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        assert!(booking(BookingStatus::Reserved, Some(at)).status_consistent());
        assert!(!booking(BookingStatus::Reserved, None).status_consistent());
        assert!(booking(BookingStatus::Confirmed, None).status_consistent());
        assert!(!booking(BookingStatus::Confirmed, Some(at)).status_consistent());
    }

    #[test]
    fn overlap_is_half_open() {
        let b = booking(BookingStatus::Confirmed, None);
        assert!(!b.overlaps(b.end_at, b.end_at + Duration::hours(1)));
        assert!(b.overlaps(b.end_at - Duration::minutes(15), b.end_at + Duration::hours(1)));
    }

    #[test]
    fn league_defaults_apply_when_unset() {
        let league = League {
            id: LeagueId::new(),
            location_id: LocationId::new(),
            name: "Tuesday Night".into(),
            status: LeagueStatus::Active,
            format: LeagueFormat::Individual,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 7).unwrap(),
            start_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
            handicaps_enabled: true,
            attendance_required: true,
            attendance_cutoff_hours: None,
            attendance_reminder_hours: Some(48),
            league_mode_buffer_minutes: None,
            auto_adjust_capacity: false,
            players_per_bay: Some(0),
            min_team_attendance: None,
        };
        assert_eq!(league.cutoff_offset(), Duration::hours(8));
        assert_eq!(league.reminder_offset(), Duration::hours(48));
        assert_eq!(league.mode_buffer(), Duration::minutes(30));
        assert_eq!(league.players_per_bay(), 1);
        assert!(league.crosses_midnight());
    }

    #[test]
    fn capacity_reconciliation_rounds_up_and_caps() {
        let hold = CapacityHold {
            id: CapacityHoldId::new(),
            league_id: LeagueId::new(),
            week_id: LeagueWeekId::new(),
            bay_count: 4,
            requested_bay_count: 4,
            suspend_attendance_reminders: false,
        };
        assert_eq!(hold.reconciled_bay_count(9, 4), 3);
        assert_eq!(hold.reconciled_bay_count(0, 4), 1);
        assert_eq!(hold.reconciled_bay_count(40, 4), 4);
    }
}
