//! Row decoding.

use chrono::Weekday;
use chrono_tz::Tz;
use simbay_core::error::{ParseEnumError, StoreError};
use simbay_core::ids::{
    AttendanceId, BayId, BookingId, CapacityHoldId, LeagueId, LeagueWeekId, LocationId,
    NotificationId, PaymentId, TeamId, UserId,
};
use simbay_core::model::{
    Bay, Booking, CapacityHold, League, LeagueAttendance, LeagueParticipant, LeagueWeek,
    Location, Notification, NotificationSubject, Payment, PricingRule, Team, TeamMember, User,
};
use simbay_core::money::Money;
use simbay_core::pricing::Promotion;
use simbay_core::store::StoreResult;
use sqlx::postgres::PgRow;
use sqlx::{Decode, Postgres, Row, Type};
use std::str::FromStr;
use uuid::Uuid;

fn get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Serialization(format!("{column}: {e}")))
}

fn text<T>(row: &PgRow, column: &str) -> StoreResult<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: String = get(row, column)?;
    Ok(raw.parse()?)
}

fn count(row: &PgRow, column: &str) -> StoreResult<u32> {
    let raw: i32 = get(row, column)?;
    u32::try_from(raw).map_err(|_| StoreError::Serialization(format!("{column}: negative value {raw}")))
}

fn optional_count(row: &PgRow, column: &str) -> StoreResult<Option<u32>> {
    let raw: Option<i32> = get(row, column)?;
    raw.map(|value| {
        u32::try_from(value)
            .map_err(|_| StoreError::Serialization(format!("{column}: negative value {value}")))
    })
    .transpose()
}

fn money(row: &PgRow, column: &str) -> StoreResult<Money> {
    Ok(Money::from_cents(get(row, column)?))
}

fn id<T: From<Uuid>>(row: &PgRow, column: &str) -> StoreResult<T> {
    Ok(T::from(get::<Uuid>(row, column)?))
}

fn optional_id<T: From<Uuid>>(row: &PgRow, column: &str) -> StoreResult<Option<T>> {
    Ok(get::<Option<Uuid>>(row, column)?.map(T::from))
}

/// Text form of a `u32` setting for an `INTEGER` column
pub(crate) fn to_i32(value: u32) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::Serialization(format!("value {value} out of range")))
}

/// ISO weekday number (1 = Monday) as stored in `pricing_rules.days`
pub(crate) fn weekday_number(day: Weekday) -> i16 {
    match day {
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
        Weekday::Sun => 7,
    }
}

fn weekday_from_number(n: i16) -> StoreResult<Weekday> {
    Ok(match n {
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        6 => Weekday::Sat,
        7 => Weekday::Sun,
        other => {
            return Err(StoreError::Serialization(format!("invalid weekday number {other}")));
        },
    })
}

pub(crate) fn location(row: &PgRow) -> StoreResult<Location> {
    let timezone: String = get(row, "timezone")?;
    Ok(Location {
        id: id::<LocationId>(row, "id")?,
        name: get(row, "name")?,
        timezone: timezone
            .parse::<Tz>()
            .map_err(|e| StoreError::Serialization(format!("timezone {timezone}: {e}")))?,
    })
}

pub(crate) fn user(row: &PgRow) -> StoreResult<User> {
    Ok(User {
        id: id::<UserId>(row, "id")?,
        email: get(row, "email")?,
        name: get(row, "name")?,
        payment_customer_id: get(row, "payment_customer_id")?,
    })
}

pub(crate) fn bay(row: &PgRow) -> StoreResult<Bay> {
    Ok(Bay {
        id: id::<BayId>(row, "id")?,
        location_id: id::<LocationId>(row, "location_id")?,
        name: get(row, "name")?,
        status: text(row, "status")?,
        league_mode_active: get(row, "league_mode_active")?,
        league_mode_league_id: optional_id::<LeagueId>(row, "league_mode_league_id")?,
        last_seen_at: get(row, "last_seen_at")?,
        network_address: get(row, "network_address")?,
    })
}

pub(crate) fn booking(row: &PgRow) -> StoreResult<Booking> {
    Ok(Booking {
        id: id::<BookingId>(row, "id")?,
        bay_id: id::<BayId>(row, "bay_id")?,
        location_id: id::<LocationId>(row, "location_id")?,
        user_id: id::<UserId>(row, "user_id")?,
        start_at: get(row, "start_at")?,
        end_at: get(row, "end_at")?,
        status: text(row, "status")?,
        expires_at: get(row, "expires_at")?,
        total_amount: money(row, "total_amount_cents")?,
        discount_amount: money(row, "discount_amount_cents")?,
        promotion_code: get(row, "promotion_code")?,
        payment_intent_id: get(row, "payment_intent_id")?,
        unlock_token: get(row, "unlock_token")?,
        unlock_token_expires_at: get(row, "unlock_token_expires_at")?,
        created_at: get(row, "created_at")?,
        cancelled_at: get(row, "cancelled_at")?,
        cancelled_by: get(row, "cancelled_by")?,
        cancellation_reason: get(row, "cancellation_reason")?,
    })
}

pub(crate) fn pricing_rule(row: &PgRow) -> StoreResult<PricingRule> {
    let days: Vec<i16> = get(row, "days")?;
    Ok(PricingRule {
        name: get(row, "name")?,
        hourly_rate: money(row, "hourly_rate_cents")?,
        start_time: get(row, "start_time")?,
        end_time: get(row, "end_time")?,
        days: days
            .into_iter()
            .map(weekday_from_number)
            .collect::<StoreResult<_>>()?,
    })
}

pub(crate) fn promotion(row: &PgRow) -> StoreResult<Promotion> {
    let kind: String = get(row, "kind")?;
    let value: i64 = get(row, "value")?;
    match kind.as_str() {
        "flat" => Ok(Promotion::Flat(Money::from_cents(value))),
        "percent" => u32::try_from(value)
            .map(Promotion::Percent)
            .map_err(|_| StoreError::Serialization(format!("percent promotion out of range: {value}"))),
        other => Err(StoreError::Serialization(format!("unknown promotion kind {other}"))),
    }
}

pub(crate) fn payment(row: &PgRow) -> StoreResult<Payment> {
    Ok(Payment {
        id: id::<PaymentId>(row, "id")?,
        booking_id: id::<BookingId>(row, "booking_id")?,
        kind: text(row, "kind")?,
        provider_intent_id: get(row, "provider_intent_id")?,
        client_secret: get(row, "client_secret")?,
        customer_handle: get(row, "customer_handle")?,
        amount: money(row, "amount_cents")?,
        currency: get(row, "currency")?,
        status: text(row, "status")?,
        refund_amount: money(row, "refund_amount_cents")?,
        refund_id: get(row, "refund_id")?,
        failure_message: get(row, "failure_message")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn notification(row: &PgRow) -> StoreResult<Notification> {
    let subject_type: String = get(row, "subject_type")?;
    let subject_id: Uuid = get(row, "subject_id")?;
    let subject = match subject_type.as_str() {
        "booking" => NotificationSubject::Booking(BookingId::from_uuid(subject_id)),
        "attendance" => NotificationSubject::Attendance(AttendanceId::from_uuid(subject_id)),
        other => {
            return Err(StoreError::Serialization(format!("unknown subject type {other}")));
        },
    };
    Ok(Notification {
        id: id::<NotificationId>(row, "id")?,
        subject,
        kind: text(row, "kind")?,
        recipient: get(row, "recipient")?,
        payload: get(row, "payload")?,
        scheduled_for: get(row, "scheduled_for")?,
        status: text(row, "status")?,
        attempts: count(row, "attempts")?,
        provider_message_id: get(row, "provider_message_id")?,
        last_error: get(row, "last_error")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn league(row: &PgRow) -> StoreResult<League> {
    Ok(League {
        id: id::<LeagueId>(row, "id")?,
        location_id: id::<LocationId>(row, "location_id")?,
        name: get(row, "name")?,
        status: text(row, "status")?,
        format: text(row, "format")?,
        start_date: get(row, "start_date")?,
        start_time: get(row, "start_time")?,
        end_time: get(row, "end_time")?,
        handicaps_enabled: get(row, "handicaps_enabled")?,
        attendance_required: get(row, "attendance_required")?,
        attendance_cutoff_hours: optional_count(row, "attendance_cutoff_hours")?,
        attendance_reminder_hours: optional_count(row, "attendance_reminder_hours")?,
        league_mode_buffer_minutes: optional_count(row, "league_mode_buffer_minutes")?,
        auto_adjust_capacity: get(row, "auto_adjust_capacity")?,
        players_per_bay: optional_count(row, "players_per_bay")?,
        min_team_attendance: optional_count(row, "min_team_attendance")?,
    })
}

pub(crate) fn week(row: &PgRow) -> StoreResult<LeagueWeek> {
    Ok(LeagueWeek {
        id: id::<LeagueWeekId>(row, "id")?,
        league_id: id::<LeagueId>(row, "league_id")?,
        week_number: count(row, "week_number")?,
        date: get(row, "date")?,
        status: text(row, "status")?,
    })
}

pub(crate) fn participant(row: &PgRow) -> StoreResult<LeagueParticipant> {
    Ok(LeagueParticipant {
        user_id: id::<UserId>(row, "user_id")?,
        email: get(row, "email")?,
        team_id: optional_id::<TeamId>(row, "team_id")?,
    })
}

pub(crate) fn attendance(row: &PgRow) -> StoreResult<LeagueAttendance> {
    Ok(LeagueAttendance {
        id: id::<AttendanceId>(row, "id")?,
        week_id: id::<LeagueWeekId>(row, "week_id")?,
        user_id: id::<UserId>(row, "user_id")?,
        email: get(row, "email")?,
        team_id: optional_id::<TeamId>(row, "team_id")?,
        status: text(row, "status")?,
        response_token: get(row, "response_token")?,
        reminder_sent_at: get(row, "reminder_sent_at")?,
        locked: get(row, "locked")?,
    })
}

pub(crate) fn capacity_hold(row: &PgRow) -> StoreResult<CapacityHold> {
    Ok(CapacityHold {
        id: id::<CapacityHoldId>(row, "id")?,
        league_id: id::<LeagueId>(row, "league_id")?,
        week_id: id::<LeagueWeekId>(row, "week_id")?,
        bay_count: count(row, "bay_count")?,
        requested_bay_count: count(row, "requested_bay_count")?,
        suspend_attendance_reminders: get(row, "suspend_attendance_reminders")?,
    })
}

pub(crate) fn team(row: &PgRow) -> StoreResult<Team> {
    Ok(Team {
        id: id::<TeamId>(row, "id")?,
        league_id: id::<LeagueId>(row, "league_id")?,
        name: get(row, "name")?,
        status: text(row, "status")?,
    })
}

pub(crate) fn team_member(row: &PgRow) -> StoreResult<TeamMember> {
    Ok(TeamMember {
        team_id: id::<TeamId>(row, "team_id")?,
        user_id: id::<UserId>(row, "user_id")?,
        paid: get(row, "paid")?,
        payment_intent_id: get(row, "payment_intent_id")?,
        refunded: get(row, "refunded")?,
    })
}

/// Decodes every row with `decode`
pub(crate) fn all<T>(rows: &[PgRow], decode: fn(&PgRow) -> StoreResult<T>) -> StoreResult<Vec<T>> {
    rows.iter().map(decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_numbers_are_iso() {
        for day in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ] {
            let n = weekday_number(day);
            assert_eq!(u32::try_from(n).ok(), Some(day.number_from_monday()));
            assert_eq!(weekday_from_number(n), Ok(day));
        }
        assert!(weekday_from_number(0).is_err());
    }
}
