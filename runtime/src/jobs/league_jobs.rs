//! Jobs over leagues: handicaps, team payment deadlines, league mode and weekly attendance.
//!
//! Every deadline is a local wall-clock time at the league's location, converted through
//! the location's timezone before comparing with `now`.

use super::{for_each_isolated, scan_due, JobReport, PeriodicJob};
use crate::effects::EffectExecutor;
use crate::metrics::{self as m, counter};
use crate::reminders::LinkSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;
use simbay_core::effect::Effect;
use simbay_core::error::{BookingError, Result};
use simbay_core::gateway::{PaymentGateway, RefundRequest};
use simbay_core::ids::{LocationId, TeamId, UserId};
use simbay_core::model::{
    Bay, League, LeagueAttendance, LeagueFormat, LeagueWeek, Notification, NotificationKind,
    NotificationSubject, Team,
};
use simbay_core::schedule::{
    attendance_cutoff_at, attendance_reminder_at, is_due, league_mode_ends_at, league_start_at,
    local_date, local_deadline,
};
use simbay_core::status::AttendanceStatus;
use simbay_core::store::{BayStore, BookingStore, LeagueStore, NotificationStore, Store};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

async fn location_tz(store: &dyn Store, location: LocationId) -> Result<Tz> {
    Ok(store
        .get_location(location)
        .await?
        .ok_or_else(|| BookingError::not_found("location", location))?
        .timezone)
}

/// Runs `action` once per league and merges the per-league reports. A league that fails
/// outright counts as one failed item.
async fn for_each_league<F, Fut>(job: &'static str, leagues: Vec<League>, mut action: F) -> JobReport
where
    F: FnMut(League) -> Fut,
    Fut: Future<Output = Result<JobReport>>,
{
    let mut report = JobReport::default();
    for league in leagues {
        let league_id = league.id;
        match action(league).await {
            Ok(partial) => report.merge(partial),
            Err(e) => {
                report.failed += 1;
                counter!(m::JOB_ITEM_FAILURES, "job" => job).increment(1);
                error!(job, %league_id, error = %e, "League scan failed");
            },
        }
    }
    report
}

fn attendance_leagues(leagues: Vec<League>) -> Vec<League> {
    leagues
        .into_iter()
        .filter(|l| l.attendance_required)
        .collect()
}

// ============================================================================
// Handicaps
// ============================================================================

/// Recomputes handicaps for every active league that tracks them
pub struct HandicapRecalculationJob {
    store: Arc<dyn Store>,
    interval: Duration,
}

impl HandicapRecalculationJob {
    /// Creates the job
    #[must_use]
    pub fn new(store: Arc<dyn Store>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait]
impl PeriodicJob for HandicapRecalculationJob {
    fn name(&self) -> &'static str {
        "handicap_recalculation"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<JobReport> {
        let leagues: Vec<League> = self
            .store
            .active_leagues()
            .await?
            .into_iter()
            .filter(|l| l.handicaps_enabled)
            .collect();

        let store = &self.store;
        Ok(for_each_isolated(
            self.name(),
            leagues,
            |league| league.id.to_string(),
            |league| async move {
                let players = store.recalculate_handicaps(league.id).await?;
                debug!(league_id = %league.id, players, "Handicaps recalculated");
                Ok(true)
            },
        )
        .await)
    }
}

// ============================================================================
// Team payment deadline
// ============================================================================

/// Disqualifies teams with unpaid members once their league has started, and refunds the
/// members of disqualified teams who did pay.
///
/// Refunds are driven from the disqualified side, so a refund that fails on one tick is
/// picked up again on the next.
pub struct TeamDeadlineJob {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    interval: Duration,
}

impl TeamDeadlineJob {
    /// Creates the job
    #[must_use]
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, interval: Duration) -> Self {
        Self {
            store,
            gateway,
            interval,
        }
    }

    async fn enforce(&self, league: League, now: DateTime<Utc>) -> Result<JobReport> {
        let tz = location_tz(self.store.as_ref(), league.location_id).await?;
        if !is_due(now, league_start_at(&league, tz)) {
            return Ok(JobReport::default());
        }

        let store = &self.store;
        let unpaid = store.teams_with_unpaid_members(league.id).await?;
        let mut report = for_each_isolated(
            self.name(),
            unpaid,
            |team| team.id.to_string(),
            |team| async move {
                let disqualified = store.disqualify_team(team.id).await?;
                if disqualified {
                    info!(league_id = %team.league_id, team_id = %team.id, team = %team.name, "Team disqualified for unpaid members");
                }
                Ok(disqualified)
            },
        )
        .await;

        let awaiting = store.disqualified_teams_awaiting_refund(league.id).await?;
        report.merge(
            for_each_isolated(
                self.name(),
                awaiting,
                |team| team.id.to_string(),
                |team| async move { self.refund_members(&team).await },
            )
            .await,
        );
        Ok(report)
    }

    async fn refund_members(&self, team: &Team) -> Result<bool> {
        let mut refunded_any = false;
        for member in self.store.paid_members(team.id).await? {
            let Some(intent_id) = member.payment_intent_id.clone() else {
                warn!(team_id = %team.id, user_id = %member.user_id, "Paid member has no payment intent to refund");
                continue;
            };
            let refund = self
                .gateway
                .refund(&RefundRequest {
                    intent_id,
                    amount: None,
                    idempotency_key: team_refund_key(team.id, member.user_id),
                })
                .await?;
            if self
                .store
                .mark_member_refunded(team.id, member.user_id)
                .await?
            {
                counter!(m::REFUNDS, "outcome" => refund.status.as_str()).increment(1);
                info!(team_id = %team.id, user_id = %member.user_id, refund_id = %refund.refund_id, "Team fee refunded");
                refunded_any = true;
            }
        }
        Ok(refunded_any)
    }
}

fn team_refund_key(team: TeamId, user: UserId) -> String {
    format!("refund:team:{team}:member:{user}")
}

#[async_trait]
impl PeriodicJob for TeamDeadlineJob {
    fn name(&self) -> &'static str {
        "team_deadline"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let leagues: Vec<League> = self
            .store
            .active_leagues()
            .await?
            .into_iter()
            .filter(|l| l.format == LeagueFormat::Team)
            .collect();
        Ok(for_each_league(self.name(), leagues, |league| self.enforce(league, now)).await)
    }
}

// ============================================================================
// League mode
// ============================================================================

/// Returns bays to normal bookings once their league session (plus buffer) has ended,
/// then re-sends the bay's schedule to its kiosks
pub struct LeagueModeDeactivationJob {
    store: Arc<dyn Store>,
    effects: Arc<EffectExecutor>,
    interval: Duration,
}

impl LeagueModeDeactivationJob {
    /// Creates the job
    #[must_use]
    pub fn new(store: Arc<dyn Store>, effects: Arc<EffectExecutor>, interval: Duration) -> Self {
        Self {
            store,
            effects,
            interval,
        }
    }

    async fn deactivate_if_over(&self, bay: Bay, now: DateTime<Utc>) -> Result<bool> {
        let Some(league_id) = bay.league_mode_league_id else {
            warn!(bay_id = %bay.id, "Bay in league mode without a league");
            return Ok(false);
        };
        let Some(league) = self.store.get_league(league_id).await? else {
            warn!(bay_id = %bay.id, %league_id, "League mode held by an unknown league");
            return Ok(false);
        };
        let tz = location_tz(self.store.as_ref(), bay.location_id).await?;
        let ends_at = league_mode_ends_at(&league, tz, now);
        if !is_due(now, ends_at) {
            return Ok(false);
        }
        let cleared = self.store.deactivate_league_mode(bay.id, league_id).await?;
        if cleared {
            info!(bay_id = %bay.id, %league_id, %ends_at, "League mode deactivated");
            self.effects
                .execute(&[Effect::RefreshBay {
                    location: bay.location_id,
                    bay: bay.id,
                    date: local_date(now, tz),
                }])
                .await;
        }
        Ok(cleared)
    }
}

#[async_trait]
impl PeriodicJob for LeagueModeDeactivationJob {
    fn name(&self) -> &'static str {
        "league_mode_deactivation"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let bays = self.store.bays_in_league_mode().await?;
        Ok(for_each_isolated(
            self.name(),
            bays,
            |bay| bay.id.to_string(),
            |bay| self.deactivate_if_over(bay, now),
        )
        .await)
    }
}

// ============================================================================
// Attendance
// ============================================================================

/// Sends the weekly "are you playing?" email to every participant of leagues that require
/// attendance confirmation
pub struct AttendanceReminderJob {
    store: Arc<dyn Store>,
    links: LinkSettings,
    interval: Duration,
}

impl AttendanceReminderJob {
    /// Creates the job
    #[must_use]
    pub fn new(store: Arc<dyn Store>, links: LinkSettings, interval: Duration) -> Self {
        Self {
            store,
            links,
            interval,
        }
    }

    async fn remind_league(&self, league: League, now: DateTime<Utc>) -> Result<JobReport> {
        let tz = location_tz(self.store.as_ref(), league.location_id).await?;
        let Some(week) = self.store.next_week(league.id, local_date(now, tz)).await? else {
            return Ok(JobReport::default());
        };
        if !is_due(now, attendance_reminder_at(&league, &week, tz)) {
            return Ok(JobReport::default());
        }
        let starts_at = local_deadline(week.date, league.start_time, tz);
        if now >= starts_at {
            debug!(league_id = %league.id, week = week.week_number, "Week already started; no attendance reminder");
            return Ok(JobReport::default());
        }
        if let Some(hold) = self.store.capacity_hold_for_week(week.id).await? {
            if hold.suspend_attendance_reminders {
                debug!(league_id = %league.id, week = week.week_number, "Attendance reminders suspended for week");
                return Ok(JobReport::default());
            }
        }

        let payload = WeekPayload {
            league: &league,
            week: &week,
            tz,
        };
        let week_id = week.id;
        let participants = self.store.league_participants(league.id).await?;
        Ok(for_each_isolated(
            self.name(),
            participants,
            |p| p.user_id.to_string(),
            |participant| {
                let payload = &payload;
                async move {
                    let row = self
                        .store
                        .insert_attendance_if_absent(&LeagueAttendance::pending(week_id, &participant))
                        .await?;
                    self.remind(&row, payload, now).await
                }
            },
        )
        .await)
    }

    async fn remind(&self, row: &LeagueAttendance, week: &WeekPayload<'_>, now: DateTime<Utc>) -> Result<bool> {
        if row.reminder_sent_at.is_some() || row.locked {
            return Ok(false);
        }
        let mut payload = week.to_json();
        if let Some(object) = payload.as_object_mut() {
            object.insert(
                "confirm_url".into(),
                self.links.attendance_url(&row.response_token, "confirm").into(),
            );
            object.insert(
                "decline_url".into(),
                self.links.attendance_url(&row.response_token, "decline").into(),
            );
        }
        let notification = Notification::pending(
            NotificationSubject::Attendance(row.id),
            NotificationKind::AttendanceRequest,
            row.email.clone(),
            payload,
            now,
        );
        self.store.insert_notification(&notification).await?;
        self.store.mark_attendance_reminded(row.id, now).await?;
        Ok(true)
    }
}

struct WeekPayload<'a> {
    league: &'a League,
    week: &'a LeagueWeek,
    tz: Tz,
}

impl WeekPayload<'_> {
    fn to_json(&self) -> serde_json::Value {
        let fmt = |at: DateTime<Utc>| at.with_timezone(&self.tz).format("%a %-d %b, %H:%M").to_string();
        json!({
            "league_name": self.league.name,
            "week_number": self.week.week_number,
            "week_date": self.week.date.format("%a %-d %b").to_string(),
            "start_local": fmt(local_deadline(self.week.date, self.league.start_time, self.tz)),
            "cutoff_local": fmt(attendance_cutoff_at(self.league, self.week, self.tz)),
        })
    }
}

#[async_trait]
impl PeriodicJob for AttendanceReminderJob {
    fn name(&self) -> &'static str {
        "attendance_reminders"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let leagues = attendance_leagues(self.store.active_leagues().await?);
        Ok(for_each_league(self.name(), leagues, |league| self.remind_league(league, now)).await)
    }
}

/// Locks attendance at the cutoff and reconciles the week's capacity hold
pub struct AttendanceCutoffJob {
    store: Arc<dyn Store>,
    interval: Duration,
}

impl AttendanceCutoffJob {
    /// Creates the job
    #[must_use]
    pub fn new(store: Arc<dyn Store>, interval: Duration) -> Self {
        Self { store, interval }
    }

    async fn cut_off_league(&self, league: League, now: DateTime<Utc>) -> Result<JobReport> {
        let tz = location_tz(self.store.as_ref(), league.location_id).await?;
        let weeks = self.store.weeks_with_unlocked_attendance(league.id).await?;
        let scanned = weeks.len();
        let due = scan_due(weeks, |w| attendance_cutoff_at(&league, w, tz), now);

        let league = &league;
        let mut report = for_each_isolated(
            self.name(),
            due,
            |week| week.id.to_string(),
            |week| async move { self.cut_off_week(league, &week).await },
        )
        .await;
        report.skipped += scanned - report.scanned;
        report.scanned = scanned;
        Ok(report)
    }

    async fn cut_off_week(&self, league: &League, week: &LeagueWeek) -> Result<bool> {
        let locked = self.store.lock_attendance(week.id).await?;
        let rows = self.store.attendance_for_week(week.id).await?;
        let confirmed = rows
            .iter()
            .filter(|r| r.status == AttendanceStatus::Confirmed)
            .count();
        let confirmed = u32::try_from(confirmed).unwrap_or(u32::MAX);
        info!(
            league_id = %league.id,
            week = week.week_number,
            locked,
            confirmed,
            total = rows.len(),
            "Attendance locked"
        );

        self.reconcile_capacity(league, week, confirmed).await?;
        if league.format == LeagueFormat::Team {
            flag_short_teams(league, week, &rows);
        }
        Ok(locked > 0)
    }

    async fn reconcile_capacity(&self, league: &League, week: &LeagueWeek, confirmed: u32) -> Result<()> {
        let Some(hold) = self.store.capacity_hold_for_week(week.id).await? else {
            return Ok(());
        };
        let target = hold.reconciled_bay_count(confirmed, league.players_per_bay());
        if !league.auto_adjust_capacity {
            info!(
                league_id = %league.id,
                week = week.week_number,
                held = hold.bay_count,
                needed = target,
                "Capacity auto-adjust disabled; hold left unchanged"
            );
            return Ok(());
        }
        if target == hold.bay_count {
            return Ok(());
        }
        if self
            .store
            .update_capacity_hold_bays(hold.id, hold.bay_count, target)
            .await?
        {
            info!(
                league_id = %league.id,
                week = week.week_number,
                from = hold.bay_count,
                to = target,
                "Capacity hold reconciled"
            );
        }
        Ok(())
    }
}

/// Logs teams whose confirmed attendance is under the league minimum
fn flag_short_teams(league: &League, week: &LeagueWeek, rows: &[LeagueAttendance]) {
    let Some(minimum) = league.min_team_attendance else {
        return;
    };
    let mut confirmed_by_team: HashMap<TeamId, u32> = HashMap::new();
    for row in rows {
        let Some(team) = row.team_id else { continue };
        let entry = confirmed_by_team.entry(team).or_insert(0);
        if row.status == AttendanceStatus::Confirmed {
            *entry += 1;
        }
    }
    for (team_id, confirmed) in confirmed_by_team {
        if confirmed < minimum {
            info!(league_id = %league.id, week = week.week_number, %team_id, confirmed, minimum, "Team below minimum attendance");
        }
    }
}

#[async_trait]
impl PeriodicJob for AttendanceCutoffJob {
    fn name(&self) -> &'static str {
        "attendance_cutoff"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let leagues = attendance_leagues(self.store.active_leagues().await?);
        Ok(for_each_league(self.name(), leagues, |league| self.cut_off_league(league, now)).await)
    }
}
