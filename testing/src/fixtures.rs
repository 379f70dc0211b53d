//! Record builders and seeded scenarios.

use crate::store::InMemoryStore;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use simbay_core::ids::{BayId, BookingId, LeagueId, LeagueWeekId, LocationId, PaymentId, UserId};
use simbay_core::model::{
    Bay, BayStatus, Booking, League, LeagueFormat, LeagueStatus, LeagueWeek, Location, Payment,
    PaymentKind, PricingRule, User, WeekStatus,
};
use simbay_core::money::Money;
use simbay_core::status::{BookingStatus, PaymentStatus};

/// Reference instant used across scenario tests: 2025-03-14 12:00 UTC (a Friday)
#[must_use]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

/// Standard $40/h from 09:00 to 02:00 and Off-Peak $20/h from 02:00 to 09:00
#[must_use]
pub fn day_night_rules() -> Vec<PricingRule> {
    vec![
        PricingRule {
            name: "Standard Rate".to_string(),
            hourly_rate: Money::from_cents(4000),
            start_time: hm(9, 0),
            end_time: hm(2, 0),
            days: vec![],
        },
        PricingRule {
            name: "Off-Peak".to_string(),
            hourly_rate: Money::from_cents(2000),
            start_time: hm(2, 0),
            end_time: hm(9, 0),
            days: vec![],
        },
    ]
}

/// A seeded location with one bay and one customer
#[derive(Clone, Debug)]
pub struct Venue {
    /// Location (UTC timezone)
    pub location: Location,
    /// Its only bay
    pub bay: Bay,
    /// A customer with a saved payment customer handle
    pub user: User,
}

/// Seeds a UTC venue with day/night pricing
pub fn seed_venue(store: &InMemoryStore) -> Venue {
    seed_venue_in(store, chrono_tz::UTC)
}

/// Seeds a venue in `tz` with day/night pricing
pub fn seed_venue_in(store: &InMemoryStore, tz: chrono_tz::Tz) -> Venue {
    let location = Location {
        id: LocationId::new(),
        name: "Downtown".to_string(),
        timezone: tz,
    };
    let bay = Bay {
        id: BayId::new(),
        location_id: location.id,
        name: "Bay 1".to_string(),
        status: BayStatus::Available,
        league_mode_active: false,
        league_mode_league_id: None,
        last_seen_at: None,
        network_address: Some("10.0.0.21".to_string()),
    };
    let user = User {
        id: UserId::new(),
        email: "golfer@example.com".to_string(),
        name: "Pat Golfer".to_string(),
        payment_customer_id: Some("cus_test".to_string()),
    };
    store.add_location(location.clone());
    store.set_pricing_rules(location.id, day_night_rules());
    store.put_bay(bay.clone());
    store.add_user(user.clone());
    Venue {
        location,
        bay,
        user,
    }
}

/// A one-hour `Reserved` booking starting a day after `now`, held for ten minutes
#[must_use]
pub fn reserved_booking(venue: &Venue, now: DateTime<Utc>) -> Booking {
    let start = now + Duration::days(1);
    Booking {
        id: BookingId::new(),
        bay_id: venue.bay.id,
        location_id: venue.location.id,
        user_id: venue.user.id,
        start_at: start,
        end_at: start + Duration::hours(1),
        status: BookingStatus::Reserved,
        expires_at: Some(now + Duration::minutes(10)),
        total_amount: Money::from_cents(4000),
        discount_amount: Money::ZERO,
        promotion_code: None,
        payment_intent_id: None,
        unlock_token: None,
        unlock_token_expires_at: None,
        created_at: now,
        cancelled_at: None,
        cancelled_by: None,
        cancellation_reason: None,
    }
}

/// A `Confirmed` booking on `[start, start + 1h)`
#[must_use]
pub fn confirmed_booking(venue: &Venue, start: DateTime<Utc>) -> Booking {
    Booking {
        status: BookingStatus::Confirmed,
        expires_at: None,
        start_at: start,
        end_at: start + Duration::hours(1),
        payment_intent_id: Some("pi_seeded".to_string()),
        ..reserved_booking(venue, start - Duration::days(1))
    }
}

/// A payment row for `booking` in `status`
#[must_use]
pub fn payment(booking: &Booking, intent_id: &str, status: PaymentStatus) -> Payment {
    Payment {
        id: PaymentId::new(),
        booking_id: booking.id,
        kind: PaymentKind::Charge,
        provider_intent_id: intent_id.to_string(),
        client_secret: Some(format!("{intent_id}_secret")),
        customer_handle: Some("cus_test".to_string()),
        amount: booking.total_amount,
        currency: "usd".to_string(),
        status,
        refund_amount: Money::ZERO,
        refund_id: None,
        failure_message: None,
        created_at: booking.created_at,
        updated_at: booking.created_at,
    }
}

/// An active individual league at `venue`, 18:00-22:00 local, requiring attendance
#[must_use]
pub fn league(venue: &Venue, start_date: NaiveDate) -> League {
    League {
        id: LeagueId::new(),
        location_id: venue.location.id,
        name: "Friday Night League".to_string(),
        status: LeagueStatus::Active,
        format: LeagueFormat::Individual,
        start_date,
        start_time: hm(18, 0),
        end_time: hm(22, 0),
        handicaps_enabled: true,
        attendance_required: true,
        attendance_cutoff_hours: Some(8),
        attendance_reminder_hours: Some(24),
        league_mode_buffer_minutes: Some(30),
        auto_adjust_capacity: true,
        players_per_bay: Some(4),
        min_team_attendance: None,
    }
}

/// A scheduled week of `league` on `date`
#[must_use]
pub fn week(league: &League, number: u32, date: NaiveDate) -> LeagueWeek {
    LeagueWeek {
        id: LeagueWeekId::new(),
        league_id: league.id,
        week_number: number,
        date,
        status: WeekStatus::Scheduled,
    }
}
