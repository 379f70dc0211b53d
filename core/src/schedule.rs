//! Deadline math for the periodic jobs.
//!
//! League dates and times are local wall-clock values. A deadline is formed by combining a
//! local date with a local time-of-day, converting through the location's timezone and
//! subtracting (or adding) an offset. DST gaps resolve forward to the first valid local
//! minute; ambiguous times take the earlier instant.

use crate::model::{League, LeagueWeek};
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// How far ahead of start the unlock reminder goes out
pub const REMINDER_LEAD_MINUTES: i64 = 15;

/// Converts a local date and time-of-day in `tz` to an absolute instant
#[must_use]
pub fn local_deadline(date: NaiveDate, time: NaiveTime, tz: Tz) -> DateTime<Utc> {
    resolve_local(date.and_time(time), tz)
}

fn resolve_local(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(at) => at.with_timezone(&Utc),
        LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
        LocalResult::None => {
            // Gaps are at most a few hours wide; walk forward to the first valid minute
            let mut candidate = local;
            for _ in 0..(24 * 60) {
                candidate += Duration::minutes(1);
                if let Some(at) = tz.from_local_datetime(&candidate).earliest() {
                    return at.with_timezone(&Utc);
                }
            }
            // unreachable for real zones; treat the wall clock as UTC
            Utc.from_utc_datetime(&local)
        },
    }
}

/// `date @ time - offset`, in absolute time
#[must_use]
pub fn deadline_before(date: NaiveDate, time: NaiveTime, tz: Tz, offset: Duration) -> DateTime<Utc> {
    local_deadline(date, time, tz) - offset
}

/// Local calendar date of `now` in `tz`
#[must_use]
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Absolute bounds `[start, end)` of one local calendar day
#[must_use]
pub fn local_day_bounds(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_deadline(date, NaiveTime::MIN, tz);
    let end = local_deadline(date + Duration::days(1), NaiveTime::MIN, tz);
    (start, end)
}

/// Window of booking start times that are due for the unlock reminder at `now`.
///
/// The window is `(now + lead - tick, now + lead]` so consecutive ticks tile the timeline
/// without gaps. With a one-minute tick this is the 14-15 minute window.
#[must_use]
pub fn reminder_window(now: DateTime<Utc>, tick: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
    let upper = now + Duration::minutes(REMINDER_LEAD_MINUTES);
    (upper - tick, upper)
}

/// Instant the league starts (first session)
#[must_use]
pub fn league_start_at(league: &League, tz: Tz) -> DateTime<Utc> {
    local_deadline(league.start_date, league.start_time, tz)
}

/// Instant the weekly attendance request goes out
#[must_use]
pub fn attendance_reminder_at(league: &League, week: &LeagueWeek, tz: Tz) -> DateTime<Utc> {
    deadline_before(week.date, league.start_time, tz, league.reminder_offset())
}

/// Instant attendance locks for the week
#[must_use]
pub fn attendance_cutoff_at(league: &League, week: &LeagueWeek, tz: Tz) -> DateTime<Utc> {
    deadline_before(week.date, league.start_time, tz, league.cutoff_offset())
}

/// Instant a bay in league mode should drop back to normal bookings.
///
/// `end_time + buffer` counted from the date the current session started. When the
/// session or its buffer runs past midnight, a `now` before today's start belongs to
/// yesterday's session.
#[must_use]
pub fn league_mode_ends_at(league: &League, tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let today = local_now.date_naive();
    let buffer = league.mode_buffer();
    let (_, buffer_overflow) = league.end_time.overflowing_add_signed(buffer);
    let runs_past_midnight = league.crosses_midnight() || buffer_overflow != 0;

    let session_date = if runs_past_midnight && local_now.time() < league.start_time {
        today - Duration::days(1)
    } else {
        today
    };
    let end_date = if league.crosses_midnight() {
        session_date + Duration::days(1)
    } else {
        session_date
    };

    local_deadline(end_date, league.end_time, tz) + buffer
}

/// `now` has reached `deadline`
#[must_use]
pub fn is_due(now: DateTime<Utc>, deadline: DateTime<Utc>) -> bool {
    now >= deadline
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ids::{LeagueId, LeagueWeekId, LocationId};
    use crate::model::{LeagueFormat, LeagueStatus, WeekStatus};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn league(start: NaiveTime, end: NaiveTime) -> League {
        League {
            id: LeagueId::new(),
            location_id: LocationId::new(),
            name: "Thursday Scramble".into(),
            status: LeagueStatus::Active,
            format: LeagueFormat::Individual,
            start_date: d(2025, 1, 2),
            start_time: start,
            end_time: end,
            handicaps_enabled: false,
            attendance_required: true,
            attendance_cutoff_hours: Some(8),
            attendance_reminder_hours: None,
            league_mode_buffer_minutes: None,
            auto_adjust_capacity: true,
            players_per_bay: None,
            min_team_attendance: None,
        }
    }

    fn week(date: NaiveDate) -> LeagueWeek {
        LeagueWeek {
            id: LeagueWeekId::new(),
            league_id: LeagueId::new(),
            week_number: 3,
            date,
            status: WeekStatus::Scheduled,
        }
    }

    #[test]
    fn cutoff_is_start_minus_offset_in_local_time() {
        let tz = chrono_tz::America::New_York;
        let l = league(t(18, 0), t(22, 0));
        let w = week(d(2025, 2, 6));

        let cutoff = attendance_cutoff_at(&l, &w, tz);

        let just_before = local_deadline(w.date, t(9, 59), tz);
        let at_ten = local_deadline(w.date, t(10, 0), tz);
        assert!(!is_due(just_before, cutoff));
        assert!(is_due(at_ten, cutoff));
    }

    #[test]
    fn reminder_defaults_to_a_day_ahead() {
        let tz = chrono_tz::UTC;
        let l = league(t(18, 0), t(22, 0));
        let w = week(d(2025, 2, 6));
        assert_eq!(
            attendance_reminder_at(&l, &w, tz),
            local_deadline(d(2025, 2, 5), t(18, 0), tz)
        );
    }

    #[test]
    fn dst_gap_moves_forward() {
        // 2025-03-09 02:30 does not exist in New York
        let tz = chrono_tz::America::New_York;
        let at = local_deadline(d(2025, 3, 9), t(2, 30), tz);
        assert_eq!(at, local_deadline(d(2025, 3, 9), t(3, 0), tz));
    }

    #[test]
    fn dst_overlap_takes_earlier_instant() {
        // 2025-11-02 01:30 happens twice in New York; the first is EDT (UTC-4)
        let tz = chrono_tz::America::New_York;
        let at = local_deadline(d(2025, 11, 2), t(1, 30), tz);
        assert_eq!(at, Utc.with_ymd_and_hms(2025, 11, 2, 5, 30, 0).unwrap());
    }

    #[test]
    fn league_mode_ends_after_buffer_same_day() {
        let tz = chrono_tz::UTC;
        let l = league(t(18, 0), t(22, 0));
        let now = Utc.with_ymd_and_hms(2025, 2, 6, 22, 15, 0).unwrap();
        let ends = league_mode_ends_at(&l, tz, now);
        assert_eq!(ends, Utc.with_ymd_and_hms(2025, 2, 6, 22, 30, 0).unwrap());
        assert!(!is_due(now, ends));
    }

    #[test]
    fn league_mode_session_past_midnight() {
        let tz = chrono_tz::UTC;
        let l = league(t(20, 0), t(1, 0));

        // 00:45 after a session that started yesterday: ends today 01:30
        let after_midnight = Utc.with_ymd_and_hms(2025, 2, 7, 0, 45, 0).unwrap();
        assert_eq!(
            league_mode_ends_at(&l, tz, after_midnight),
            Utc.with_ymd_and_hms(2025, 2, 7, 1, 30, 0).unwrap()
        );

        // 21:00 during tonight's session: ends tomorrow 01:30
        let evening = Utc.with_ymd_and_hms(2025, 2, 7, 21, 0, 0).unwrap();
        assert_eq!(
            league_mode_ends_at(&l, tz, evening),
            Utc.with_ymd_and_hms(2025, 2, 8, 1, 30, 0).unwrap()
        );
    }

    #[test]
    fn league_mode_buffer_past_midnight_keeps_the_session_date() {
        let tz = chrono_tz::UTC;
        let l = League {
            league_mode_buffer_minutes: Some(60),
            ..league(t(19, 0), t(23, 30))
        };

        // 00:15 the next morning: still yesterday's session, ends 00:30
        let after_midnight = Utc.with_ymd_and_hms(2025, 2, 7, 0, 15, 0).unwrap();
        let ends = league_mode_ends_at(&l, tz, after_midnight);
        assert_eq!(ends, Utc.with_ymd_and_hms(2025, 2, 7, 0, 30, 0).unwrap());
        assert!(!is_due(after_midnight, ends));

        let later = Utc.with_ymd_and_hms(2025, 2, 7, 0, 35, 0).unwrap();
        assert!(is_due(later, league_mode_ends_at(&l, tz, later)));

        // during the evening session the deadline is tomorrow 00:30
        let evening = Utc.with_ymd_and_hms(2025, 2, 7, 22, 0, 0).unwrap();
        assert_eq!(
            league_mode_ends_at(&l, tz, evening),
            Utc.with_ymd_and_hms(2025, 2, 8, 0, 30, 0).unwrap()
        );
    }

    #[test]
    fn reminder_windows_tile_without_gaps() {
        let now = Utc.with_ymd_and_hms(2025, 2, 6, 12, 0, 0).unwrap();
        let tick = Duration::minutes(5);
        let (_, first_upper) = reminder_window(now, tick);
        let (second_lower, _) = reminder_window(now + tick, tick);
        assert_eq!(first_upper, second_lower);
    }
}
