//! In-memory store.
//!
//! Mirrors the relational store's guarantees: every status write is conditional on the
//! expected prior status, overlap and open-payment uniqueness are enforced on insert, and
//! `(subject, kind)` is unique for notifications. A single mutex guards all tables and is
//! never held across an await point.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use simbay_core::error::StoreError;
use simbay_core::ids::{
    AttendanceId, BayId, BookingId, CapacityHoldId, LeagueId, LeagueWeekId, LocationId,
    NotificationId, PaymentId, TeamId, UserId,
};
use simbay_core::model::{
    AccessLogEntry, Bay, Booking, BookingUpdate, CapacityHold, League, LeagueAttendance,
    LeagueParticipant, LeagueStatus, LeagueWeek, Location, Notification, NotificationKind,
    NotificationSubject, Payment, PaymentUpdate, PricingRule, SendResult, Team, TeamMember,
    TeamStatus, User, WeekStatus,
};
use simbay_core::pricing::Promotion;
use simbay_core::status::{AttendanceStatus, BookingStatus, NotificationStatus, PaymentStatus};
use simbay_core::store::{
    AccessLogStore, BayStore, BookingStore, LeagueStore, NotificationStore, PaymentStore, Store,
    StoreResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Tables {
    locations: HashMap<LocationId, Location>,
    pricing_rules: HashMap<LocationId, Vec<PricingRule>>,
    users: HashMap<UserId, User>,
    promotions: HashMap<String, Promotion>,
    bays: HashMap<BayId, Bay>,
    bookings: HashMap<BookingId, Booking>,
    payments: Vec<Payment>,
    notifications: Vec<Notification>,
    leagues: HashMap<LeagueId, League>,
    weeks: Vec<LeagueWeek>,
    participants: HashMap<LeagueId, Vec<LeagueParticipant>>,
    attendance: Vec<LeagueAttendance>,
    holds: Vec<CapacityHold>,
    teams: Vec<Team>,
    members: Vec<TeamMember>,
    access_log: Vec<AccessLogEntry>,
    handicap_runs: HashMap<LeagueId, u32>,

    // failure injection
    fail_next_payment_insert: bool,
    concurrent_booking_write: Option<(BookingId, BookingStatus)>,
    fail_handicaps_for: HashSet<LeagueId>,
    fail_ping: bool,
}

/// In-memory implementation of every store trait
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish_non_exhaustive()
    }
}

impl InMemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------------

    /// Adds a location
    pub fn add_location(&self, location: Location) {
        self.tables().locations.insert(location.id, location);
    }

    /// Replaces a location's pricing rules
    pub fn set_pricing_rules(&self, location: LocationId, rules: Vec<PricingRule>) {
        self.tables().pricing_rules.insert(location, rules);
    }

    /// Adds a user
    pub fn add_user(&self, user: User) {
        self.tables().users.insert(user.id, user);
    }

    /// Adds a promotion code
    pub fn add_promotion(&self, code: &str, promotion: Promotion) {
        self.tables().promotions.insert(code.to_string(), promotion);
    }

    /// Adds or replaces a bay
    pub fn put_bay(&self, bay: Bay) {
        self.tables().bays.insert(bay.id, bay);
    }

    /// Writes a booking directly, bypassing overlap checks
    pub fn put_booking(&self, booking: Booking) {
        self.tables().bookings.insert(booking.id, booking);
    }

    /// Writes a payment directly, bypassing uniqueness checks
    pub fn put_payment(&self, payment: Payment) {
        self.tables().payments.push(payment);
    }

    /// Adds a league
    pub fn add_league(&self, league: League) {
        self.tables().leagues.insert(league.id, league);
    }

    /// Adds a league week
    pub fn add_week(&self, week: LeagueWeek) {
        self.tables().weeks.push(week);
    }

    /// Registers a participant in a league
    pub fn add_participant(&self, league: LeagueId, participant: LeagueParticipant) {
        self.tables()
            .participants
            .entry(league)
            .or_default()
            .push(participant);
    }

    /// Adds a capacity hold
    pub fn add_capacity_hold(&self, hold: CapacityHold) {
        self.tables().holds.push(hold);
    }

    /// Adds a team
    pub fn add_team(&self, team: Team) {
        self.tables().teams.push(team);
    }

    /// Adds a team member
    pub fn add_team_member(&self, member: TeamMember) {
        self.tables().members.push(member);
    }

    /// Writes an attendance row directly
    pub fn put_attendance(&self, attendance: LeagueAttendance) {
        self.tables().attendance.push(attendance);
    }

    // ------------------------------------------------------------------------
    // Failure injection
    // ------------------------------------------------------------------------

    /// The next `insert_payment` fails with a database error
    pub fn fail_next_payment_insert(&self) {
        self.tables().fail_next_payment_insert = true;
    }

    /// Another writer moves `booking` to `status` just before the next conditional
    /// booking write is checked, so that write loses the race
    pub fn race_next_booking_write(&self, booking: BookingId, status: BookingStatus) {
        self.tables().concurrent_booking_write = Some((booking, status));
    }

    /// Handicap recalculation fails for `league`
    pub fn fail_handicaps_for(&self, league: LeagueId) {
        self.tables().fail_handicaps_for.insert(league);
    }

    /// `ping` fails until cleared
    pub fn set_ping_failure(&self, failing: bool) {
        self.tables().fail_ping = failing;
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Current copy of a booking
    #[must_use]
    pub fn booking(&self, id: BookingId) -> Option<Booking> {
        self.tables().bookings.get(&id).cloned()
    }

    /// Current copy of a bay
    #[must_use]
    pub fn bay(&self, id: BayId) -> Option<Bay> {
        self.tables().bays.get(&id).cloned()
    }

    /// Every payment row of a booking, oldest first
    #[must_use]
    pub fn payments_for(&self, booking: BookingId) -> Vec<Payment> {
        self.tables()
            .payments
            .iter()
            .filter(|p| p.booking_id == booking)
            .cloned()
            .collect()
    }

    /// Every notification
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.tables().notifications.clone()
    }

    /// Notifications of one kind
    #[must_use]
    pub fn notifications_of(&self, kind: NotificationKind) -> Vec<Notification> {
        self.tables()
            .notifications
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }

    /// Every access log entry
    #[must_use]
    pub fn access_log(&self) -> Vec<AccessLogEntry> {
        self.tables().access_log.clone()
    }

    /// Attendance rows of a week
    #[must_use]
    pub fn attendance(&self, week: LeagueWeekId) -> Vec<LeagueAttendance> {
        self.tables()
            .attendance
            .iter()
            .filter(|a| a.week_id == week)
            .cloned()
            .collect()
    }

    /// Current copy of a capacity hold
    #[must_use]
    pub fn capacity_hold(&self, id: CapacityHoldId) -> Option<CapacityHold> {
        self.tables().holds.iter().find(|h| h.id == id).cloned()
    }

    /// Current copy of a team
    #[must_use]
    pub fn team(&self, id: TeamId) -> Option<Team> {
        self.tables().teams.iter().find(|t| t.id == id).cloned()
    }

    /// Members of a team
    #[must_use]
    pub fn team_members(&self, team: TeamId) -> Vec<TeamMember> {
        self.tables()
            .members
            .iter()
            .filter(|m| m.team_id == team)
            .cloned()
            .collect()
    }

    /// How many times handicaps were recalculated for a league
    #[must_use]
    pub fn handicap_runs(&self, league: LeagueId) -> u32 {
        self.tables()
            .handicap_runs
            .get(&league)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn get_booking(&self, id: BookingId) -> StoreResult<Option<Booking>> {
        Ok(self.tables().bookings.get(&id).cloned())
    }

    async fn insert_booking(&self, booking: &Booking) -> StoreResult<()> {
        let mut tables = self.tables();
        if tables.bookings.contains_key(&booking.id) {
            return Err(StoreError::Conflict(format!("booking {} exists", booking.id)));
        }
        let overlapping = tables.bookings.values().any(|b| {
            b.bay_id == booking.bay_id
                && b.status.is_active()
                && b.overlaps(booking.start_at, booking.end_at)
        });
        if overlapping {
            return Err(StoreError::Conflict(
                "bay already booked for an overlapping interval".to_string(),
            ));
        }
        tables.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn transition_booking(
        &self,
        id: BookingId,
        expected: BookingStatus,
        update: &BookingUpdate,
    ) -> StoreResult<bool> {
        let mut tables = self.tables();
        if let Some((raced, status)) = tables.concurrent_booking_write.take() {
            if let Some(booking) = tables.bookings.get_mut(&raced) {
                booking.status = status;
            }
        }
        match tables.bookings.get_mut(&id) {
            Some(booking) if booking.status == expected => {
                update.apply(booking);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn expire_reserved(&self, now: DateTime<Utc>) -> StoreResult<Vec<Booking>> {
        let mut tables = self.tables();
        let mut expired = Vec::new();
        for booking in tables.bookings.values_mut() {
            if booking.status == BookingStatus::Reserved && booking.hold_lapsed(now) {
                booking.status = BookingStatus::Expired;
                expired.push(booking.clone());
            }
        }
        Ok(expired)
    }

    async fn bookings_starting_between(
        &self,
        status: BookingStatus,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Booking>> {
        let mut found: Vec<Booking> = self
            .tables()
            .bookings
            .values()
            .filter(|b| b.status == status && b.start_at > from && b.start_at <= to)
            .cloned()
            .collect();
        found.sort_by_key(|b| b.start_at);
        Ok(found)
    }

    async fn bookings_for_bay_between(
        &self,
        bay: BayId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Booking>> {
        let mut found: Vec<Booking> = self
            .tables()
            .bookings
            .values()
            .filter(|b| b.bay_id == bay && b.status.is_active() && b.overlaps(from, to))
            .cloned()
            .collect();
        found.sort_by_key(|b| b.start_at);
        Ok(found)
    }

    async fn set_unlock_token(
        &self,
        id: BookingId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables();
        match tables.bookings.get_mut(&id) {
            Some(booking) if booking.unlock_token.is_none() => {
                booking.unlock_token = Some(token.to_string());
                booking.unlock_token_expires_at = Some(expires_at);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn get_location(&self, id: LocationId) -> StoreResult<Option<Location>> {
        Ok(self.tables().locations.get(&id).cloned())
    }

    async fn pricing_rules(&self, location: LocationId) -> StoreResult<Vec<PricingRule>> {
        Ok(self
            .tables()
            .pricing_rules
            .get(&location)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.tables().users.get(&id).cloned())
    }

    async fn promotion(&self, code: &str) -> StoreResult<Option<Promotion>> {
        Ok(self.tables().promotions.get(code).copied())
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn open_payment_for_booking(&self, booking: BookingId) -> StoreResult<Option<Payment>> {
        Ok(self
            .tables()
            .payments
            .iter()
            .find(|p| p.booking_id == booking && p.status.is_open())
            .cloned())
    }

    async fn count_payments_for_booking(&self, booking: BookingId) -> StoreResult<u32> {
        let count = self
            .tables()
            .payments
            .iter()
            .filter(|p| p.booking_id == booking)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut tables = self.tables();
        if std::mem::take(&mut tables.fail_next_payment_insert) {
            return Err(StoreError::Database("injected payment insert failure".to_string()));
        }
        let open_exists = tables
            .payments
            .iter()
            .any(|p| p.booking_id == payment.booking_id && p.status.is_open());
        if payment.status.is_open() && open_exists {
            return Err(StoreError::Conflict(format!(
                "booking {} already has an open payment",
                payment.booking_id
            )));
        }
        tables.payments.push(payment.clone());
        Ok(())
    }

    async fn payment_by_intent(&self, intent_id: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .tables()
            .payments
            .iter()
            .find(|p| p.provider_intent_id == intent_id)
            .cloned())
    }

    async fn payment_by_refund(&self, refund_id: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .tables()
            .payments
            .iter()
            .find(|p| p.refund_id.as_deref() == Some(refund_id))
            .cloned())
    }

    async fn succeeded_payment_for_booking(
        &self,
        booking: BookingId,
    ) -> StoreResult<Option<Payment>> {
        Ok(self
            .tables()
            .payments
            .iter()
            .filter(|p| {
                p.booking_id == booking
                    && matches!(
                        p.status,
                        PaymentStatus::Succeeded
                            | PaymentStatus::Refunding
                            | PaymentStatus::RefundFailed
                    )
            })
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn transition_payment(
        &self,
        id: PaymentId,
        expected: &[PaymentStatus],
        update: &PaymentUpdate,
    ) -> StoreResult<bool> {
        let mut tables = self.tables();
        match tables.payments.iter_mut().find(|p| p.id == id) {
            Some(payment) if expected.contains(&payment.status) => {
                update.apply(payment);
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn notification_exists(
        &self,
        subject: NotificationSubject,
        kind: NotificationKind,
    ) -> StoreResult<bool> {
        Ok(self
            .tables()
            .notifications
            .iter()
            .any(|n| n.subject.subject_id() == subject.subject_id() && n.kind == kind))
    }

    async fn insert_notification(&self, notification: &Notification) -> StoreResult<bool> {
        let mut tables = self.tables();
        let exists = tables.notifications.iter().any(|n| {
            n.subject.subject_id() == notification.subject.subject_id()
                && n.kind == notification.kind
        });
        if exists {
            return Ok(false);
        }
        tables.notifications.push(notification.clone());
        Ok(true)
    }

    async fn due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<Notification>> {
        let mut due: Vec<Notification> = self
            .tables()
            .notifications
            .iter()
            .filter(|n| n.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|n| n.created_at);
        due.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(due)
    }

    async fn record_send(
        &self,
        id: NotificationId,
        result: &SendResult,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables();
        let Some(notification) = tables
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.status == NotificationStatus::Pending)
        else {
            return Ok(false);
        };
        notification.attempts += 1;
        notification.updated_at = now;
        match result {
            SendResult::Sent {
                provider_message_id,
            } => {
                notification.status = NotificationStatus::Sent;
                notification.provider_message_id = Some(provider_message_id.clone());
            },
            SendResult::Failed { error } => {
                notification.status = NotificationStatus::Failed;
                notification.last_error = Some(error.clone());
            },
        }
        Ok(true)
    }

    async fn record_delivery(
        &self,
        provider_message_id: &str,
        status: NotificationStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables();
        let Some(notification) = tables.notifications.iter_mut().find(|n| {
            n.provider_message_id.as_deref() == Some(provider_message_id)
                && n.status == NotificationStatus::Sent
        }) else {
            return Ok(false);
        };
        notification.status = status;
        notification.updated_at = now;
        if let Some(error) = error {
            notification.last_error = Some(error.to_string());
        }
        Ok(true)
    }
}

#[async_trait]
impl BayStore for InMemoryStore {
    async fn get_bay(&self, id: BayId) -> StoreResult<Option<Bay>> {
        Ok(self.tables().bays.get(&id).cloned())
    }

    async fn record_heartbeat(&self, id: BayId, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut tables = self.tables();
        match tables.bays.get_mut(&id) {
            Some(bay) => {
                bay.last_seen_at = Some(now);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn bays_in_league_mode(&self) -> StoreResult<Vec<Bay>> {
        Ok(self
            .tables()
            .bays
            .values()
            .filter(|b| b.league_mode_active)
            .cloned()
            .collect())
    }

    async fn deactivate_league_mode(&self, id: BayId, league: LeagueId) -> StoreResult<bool> {
        let mut tables = self.tables();
        match tables.bays.get_mut(&id) {
            Some(bay) if bay.league_mode_active && bay.league_mode_league_id == Some(league) => {
                bay.league_mode_active = false;
                bay.league_mode_league_id = None;
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl LeagueStore for InMemoryStore {
    async fn get_league(&self, id: LeagueId) -> StoreResult<Option<League>> {
        Ok(self.tables().leagues.get(&id).cloned())
    }

    async fn active_leagues(&self) -> StoreResult<Vec<League>> {
        Ok(self
            .tables()
            .leagues
            .values()
            .filter(|l| l.status == LeagueStatus::Active)
            .cloned()
            .collect())
    }

    async fn next_week(&self, league: LeagueId, from: NaiveDate) -> StoreResult<Option<LeagueWeek>> {
        Ok(self
            .tables()
            .weeks
            .iter()
            .filter(|w| w.league_id == league && w.date >= from && w.status != WeekStatus::Completed)
            .min_by_key(|w| w.date)
            .cloned())
    }

    async fn weeks_with_unlocked_attendance(&self, league: LeagueId) -> StoreResult<Vec<LeagueWeek>> {
        let tables = self.tables();
        Ok(tables
            .weeks
            .iter()
            .filter(|w| {
                w.league_id == league
                    && tables
                        .attendance
                        .iter()
                        .any(|a| a.week_id == w.id && !a.locked)
            })
            .cloned()
            .collect())
    }

    async fn league_participants(&self, league: LeagueId) -> StoreResult<Vec<LeagueParticipant>> {
        Ok(self
            .tables()
            .participants
            .get(&league)
            .cloned()
            .unwrap_or_default())
    }

    async fn attendance_for_week(&self, week: LeagueWeekId) -> StoreResult<Vec<LeagueAttendance>> {
        Ok(self.attendance(week))
    }

    async fn insert_attendance_if_absent(
        &self,
        attendance: &LeagueAttendance,
    ) -> StoreResult<LeagueAttendance> {
        let mut tables = self.tables();
        if let Some(existing) = tables
            .attendance
            .iter()
            .find(|a| a.week_id == attendance.week_id && a.user_id == attendance.user_id)
        {
            return Ok(existing.clone());
        }
        tables.attendance.push(attendance.clone());
        Ok(attendance.clone())
    }

    async fn mark_attendance_reminded(
        &self,
        id: AttendanceId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables();
        match tables.attendance.iter_mut().find(|a| a.id == id) {
            Some(row) if row.reminder_sent_at.is_none() => {
                row.reminder_sent_at = Some(now);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn lock_attendance(&self, week: LeagueWeekId) -> StoreResult<u64> {
        let mut tables = self.tables();
        let mut locked = 0;
        for row in tables
            .attendance
            .iter_mut()
            .filter(|a| a.week_id == week && !a.locked)
        {
            row.locked = true;
            locked += 1;
        }
        Ok(locked)
    }

    async fn attendance_by_token(&self, token: &str) -> StoreResult<Option<LeagueAttendance>> {
        Ok(self
            .tables()
            .attendance
            .iter()
            .find(|a| a.response_token == token)
            .cloned())
    }

    async fn respond_attendance(
        &self,
        id: AttendanceId,
        expected: AttendanceStatus,
        next: AttendanceStatus,
    ) -> StoreResult<bool> {
        let mut tables = self.tables();
        match tables.attendance.iter_mut().find(|a| a.id == id) {
            Some(row) if !row.locked && row.status == expected => {
                row.status = next;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn capacity_hold_for_week(&self, week: LeagueWeekId) -> StoreResult<Option<CapacityHold>> {
        Ok(self
            .tables()
            .holds
            .iter()
            .find(|h| h.week_id == week)
            .cloned())
    }

    async fn update_capacity_hold_bays(
        &self,
        id: CapacityHoldId,
        expected: u32,
        bay_count: u32,
    ) -> StoreResult<bool> {
        let mut tables = self.tables();
        match tables.holds.iter_mut().find(|h| h.id == id) {
            Some(hold) if hold.bay_count == expected => {
                hold.bay_count = bay_count;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn teams_with_unpaid_members(&self, league: LeagueId) -> StoreResult<Vec<Team>> {
        let tables = self.tables();
        Ok(tables
            .teams
            .iter()
            .filter(|t| {
                t.league_id == league
                    && t.status == TeamStatus::Active
                    && tables.members.iter().any(|m| m.team_id == t.id && !m.paid)
            })
            .cloned()
            .collect())
    }

    async fn disqualify_team(&self, team: TeamId) -> StoreResult<bool> {
        let mut tables = self.tables();
        match tables.teams.iter_mut().find(|t| t.id == team) {
            Some(t) if t.status == TeamStatus::Active => {
                t.status = TeamStatus::Disqualified;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn disqualified_teams_awaiting_refund(&self, league: LeagueId) -> StoreResult<Vec<Team>> {
        let tables = self.tables();
        Ok(tables
            .teams
            .iter()
            .filter(|t| {
                t.league_id == league
                    && t.status == TeamStatus::Disqualified
                    && tables
                        .members
                        .iter()
                        .any(|m| m.team_id == t.id && m.paid && !m.refunded)
            })
            .cloned()
            .collect())
    }

    async fn paid_members(&self, team: TeamId) -> StoreResult<Vec<TeamMember>> {
        Ok(self
            .tables()
            .members
            .iter()
            .filter(|m| m.team_id == team && m.paid && !m.refunded)
            .cloned()
            .collect())
    }

    async fn mark_member_refunded(&self, team: TeamId, user: UserId) -> StoreResult<bool> {
        let mut tables = self.tables();
        match tables
            .members
            .iter_mut()
            .find(|m| m.team_id == team && m.user_id == user)
        {
            Some(member) if !member.refunded => {
                member.refunded = true;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn recalculate_handicaps(&self, league: LeagueId) -> StoreResult<u32> {
        let mut tables = self.tables();
        if tables.fail_handicaps_for.contains(&league) {
            return Err(StoreError::Database(format!(
                "handicap recalculation failed for {league}"
            )));
        }
        *tables.handicap_runs.entry(league).or_insert(0) += 1;
        let players = tables.participants.get(&league).map_or(0, Vec::len);
        Ok(u32::try_from(players).unwrap_or(u32::MAX))
    }
}

#[async_trait]
impl AccessLogStore for InMemoryStore {
    async fn append_access_log(&self, entry: &AccessLogEntry) -> StoreResult<()> {
        self.tables().access_log.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        if self.tables().fail_ping {
            return Err(StoreError::Database("store unreachable".to_string()));
        }
        Ok(())
    }
}
