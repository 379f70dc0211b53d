//! Persistence traits.
//!
//! The store is a transactional relational service. Every status change is a single
//! conditional write keyed by id plus the expected prior status; implementations report
//! whether a row was affected and never read-modify-write across round trips. Losing a
//! race shows up as `Ok(false)`, not as an error.

use crate::error::StoreError;
use crate::ids::{
    AttendanceId, BayId, BookingId, CapacityHoldId, LeagueId, LeagueWeekId, LocationId,
    NotificationId, PaymentId, TeamId, UserId,
};
use crate::model::{
    AccessLogEntry, Bay, Booking, BookingUpdate, CapacityHold, League, LeagueAttendance,
    LeagueParticipant, LeagueWeek, Location, Notification, NotificationKind, NotificationSubject,
    Payment, PaymentUpdate, PricingRule, SendResult, Team, TeamMember, User,
};
use crate::pricing::Promotion;
use crate::status::{AttendanceStatus, BookingStatus, NotificationStatus, PaymentStatus};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Bookings, locations, pricing rules, users and promotions
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Fetches a booking
    async fn get_booking(&self, id: BookingId) -> StoreResult<Option<Booking>>;

    /// Inserts a new booking.
    ///
    /// Fails with [`StoreError::Conflict`] when an active booking on the same bay overlaps.
    async fn insert_booking(&self, booking: &Booking) -> StoreResult<()>;

    /// Applies `update` only if the booking is still `expected`; true when a row changed
    async fn transition_booking(
        &self,
        id: BookingId,
        expected: BookingStatus,
        update: &BookingUpdate,
    ) -> StoreResult<bool>;

    /// Moves every `Reserved` booking with `expires_at <= now` to `Expired`, returning the
    /// rows that changed
    async fn expire_reserved(&self, now: DateTime<Utc>) -> StoreResult<Vec<Booking>>;

    /// Bookings in `status` whose start lies in `(from, to]`
    async fn bookings_starting_between(
        &self,
        status: BookingStatus,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Booking>>;

    /// Active bookings on a bay overlapping `[from, to)`, ordered by start
    async fn bookings_for_bay_between(
        &self,
        bay: BayId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Booking>>;

    /// Stores the unlock token only if none is set; true when this call set it
    async fn set_unlock_token(
        &self,
        id: BookingId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Fetches a location
    async fn get_location(&self, id: LocationId) -> StoreResult<Option<Location>>;

    /// Pricing rules of a location, in evaluation order
    async fn pricing_rules(&self, location: LocationId) -> StoreResult<Vec<PricingRule>>;

    /// Fetches a user
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    /// Looks up an active promotion code
    async fn promotion(&self, code: &str) -> StoreResult<Option<Promotion>>;
}

/// Payment attempts
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// The `Pending`/`Processing` payment of a booking, if any
    async fn open_payment_for_booking(&self, booking: BookingId) -> StoreResult<Option<Payment>>;

    /// Number of payment rows ever created for a booking
    async fn count_payments_for_booking(&self, booking: BookingId) -> StoreResult<u32>;

    /// Inserts a payment row.
    ///
    /// Fails with [`StoreError::Conflict`] when an open payment already exists.
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()>;

    /// Looks a payment up by provider intent id
    async fn payment_by_intent(&self, intent_id: &str) -> StoreResult<Option<Payment>>;

    /// Looks a payment up by provider refund id
    async fn payment_by_refund(&self, refund_id: &str) -> StoreResult<Option<Payment>>;

    /// The succeeded (or refund-in-progress) payment of a booking
    async fn succeeded_payment_for_booking(
        &self,
        booking: BookingId,
    ) -> StoreResult<Option<Payment>>;

    /// Applies `update` only if the payment's status is one of `expected`
    async fn transition_payment(
        &self,
        id: PaymentId,
        expected: &[PaymentStatus],
        update: &PaymentUpdate,
    ) -> StoreResult<bool>;
}

/// Queued emails
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// True when a notification of `kind` exists for `subject`
    async fn notification_exists(
        &self,
        subject: NotificationSubject,
        kind: NotificationKind,
    ) -> StoreResult<bool>;

    /// Inserts unless `(subject, kind)` already exists; true when inserted
    async fn insert_notification(&self, notification: &Notification) -> StoreResult<bool>;

    /// Oldest pending notifications that are due, at most `limit`
    async fn due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<Notification>>;

    /// Records a send attempt (`Pending → Sent | Failed`), incrementing attempts
    async fn record_send(
        &self,
        id: NotificationId,
        result: &SendResult,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Records a provider delivery event (`Sent → Delivered | Failed`)
    async fn record_delivery(
        &self,
        provider_message_id: &str,
        status: NotificationStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// Bays and kiosk liveness
#[async_trait]
pub trait BayStore: Send + Sync {
    /// Fetches a bay
    async fn get_bay(&self, id: BayId) -> StoreResult<Option<Bay>>;

    /// Updates `last_seen_at`; true when the bay exists
    async fn record_heartbeat(&self, id: BayId, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Bays with league mode switched on
    async fn bays_in_league_mode(&self) -> StoreResult<Vec<Bay>>;

    /// Clears league mode if it is still held by `league`
    async fn deactivate_league_mode(&self, id: BayId, league: LeagueId) -> StoreResult<bool>;
}

/// Leagues, weeks, attendance, capacity holds and teams
#[async_trait]
pub trait LeagueStore: Send + Sync {
    /// Fetches a league
    async fn get_league(&self, id: LeagueId) -> StoreResult<Option<League>>;

    /// Leagues in `Active` status
    async fn active_leagues(&self) -> StoreResult<Vec<League>>;

    /// First week of a league dated on or after `from` that is not completed
    async fn next_week(&self, league: LeagueId, from: NaiveDate) -> StoreResult<Option<LeagueWeek>>;

    /// Weeks that still have unlocked attendance rows
    async fn weeks_with_unlocked_attendance(&self, league: LeagueId) -> StoreResult<Vec<LeagueWeek>>;

    /// Everyone registered in a league
    async fn league_participants(&self, league: LeagueId) -> StoreResult<Vec<LeagueParticipant>>;

    /// Attendance rows of a week
    async fn attendance_for_week(&self, week: LeagueWeekId) -> StoreResult<Vec<LeagueAttendance>>;

    /// Inserts a row unless one exists for `(week, user)`; returns the stored row
    async fn insert_attendance_if_absent(
        &self,
        attendance: &LeagueAttendance,
    ) -> StoreResult<LeagueAttendance>;

    /// Sets `reminder_sent_at` if unset; true when this call set it
    async fn mark_attendance_reminded(
        &self,
        id: AttendanceId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Locks every row of a week, returning how many were unlocked before
    async fn lock_attendance(&self, week: LeagueWeekId) -> StoreResult<u64>;

    /// Looks a row up by its response token
    async fn attendance_by_token(&self, token: &str) -> StoreResult<Option<LeagueAttendance>>;

    /// Records an answer if the row is unlocked and still `expected`
    async fn respond_attendance(
        &self,
        id: AttendanceId,
        expected: AttendanceStatus,
        next: AttendanceStatus,
    ) -> StoreResult<bool>;

    /// Capacity hold of a week
    async fn capacity_hold_for_week(&self, week: LeagueWeekId) -> StoreResult<Option<CapacityHold>>;

    /// Sets a hold's bay count if it still equals `expected`
    async fn update_capacity_hold_bays(
        &self,
        id: CapacityHoldId,
        expected: u32,
        bay_count: u32,
    ) -> StoreResult<bool>;

    /// Active teams with at least one unpaid member
    async fn teams_with_unpaid_members(&self, league: LeagueId) -> StoreResult<Vec<Team>>;

    /// Marks an active team disqualified
    async fn disqualify_team(&self, team: TeamId) -> StoreResult<bool>;

    /// Disqualified teams that still have paid members awaiting a refund
    async fn disqualified_teams_awaiting_refund(&self, league: LeagueId) -> StoreResult<Vec<Team>>;

    /// Members who paid and have not been refunded
    async fn paid_members(&self, team: TeamId) -> StoreResult<Vec<TeamMember>>;

    /// Flags a member's fee as refunded if not already
    async fn mark_member_refunded(&self, team: TeamId, user: UserId) -> StoreResult<bool>;

    /// Recomputes handicaps for a league, returning the number of players updated
    async fn recalculate_handicaps(&self, league: LeagueId) -> StoreResult<u32>;
}

/// Unlock audit trail
#[async_trait]
pub trait AccessLogStore: Send + Sync {
    /// Appends one entry
    async fn append_access_log(&self, entry: &AccessLogEntry) -> StoreResult<()>;
}

/// Everything the runtime needs from persistence
#[async_trait]
pub trait Store:
    BookingStore + PaymentStore + NotificationStore + BayStore + LeagueStore + AccessLogStore
{
    /// Cheap reachability check for health reporting
    async fn ping(&self) -> StoreResult<()>;
}
