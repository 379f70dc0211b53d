//! Segmented pricing engine.
//!
//! An interval is walked in 15-minute steps. Each step is priced by the rule whose local
//! time-of-day window contains the step's start instant, converted through the location's
//! timezone. Consecutive steps under the same rule name form one segment.
//!
//! Costs are integer cents throughout. A full step costs `hourly_rate / 4` rounded half
//! up; a trailing partial step is prorated by the second.

use crate::error::BookingError;
use crate::model::PricingRule;
use crate::money::Money;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of one pricing step
pub const STEP_MINUTES: i64 = 15;

/// Errors raised by the pricing engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    /// No rule covers a local instant; the location's rules leave a gap
    #[error("no pricing rule covers local time {local} ({weekday})")]
    NoPricingRule {
        /// Local wall-clock instant that matched nothing
        local: NaiveDateTime,
        /// Its weekday
        weekday: Weekday,
    },

    /// Start is not before end
    #[error("interval start must be before end")]
    InvalidInterval,
}

impl From<PricingError> for BookingError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::NoPricingRule { .. } => Self::NoPricingRule(err.to_string()),
            PricingError::InvalidInterval => Self::InvalidInterval,
        }
    }
}

/// A contiguous run of steps priced by one rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSegment {
    /// Rule name
    pub rule_name: String,
    /// Segment start
    pub start: DateTime<Utc>,
    /// Segment end (next segment's start)
    pub end: DateTime<Utc>,
    /// Segment cost
    pub cost: Money,
}

/// Total and per-rule breakdown for an interval
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Sum of every segment
    pub total: Money,
    /// Ordered, gap-free segments covering the interval
    pub segments: Vec<PriceSegment>,
}

/// Discount attached to a promotion code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Promotion {
    /// Fixed amount off
    Flat(Money),
    /// Percentage off (0..=100)
    Percent(u32),
}

impl Promotion {
    /// Discount for a given total, never more than the total
    #[must_use]
    pub fn discount_for(&self, total: Money) -> Money {
        let discount = match *self {
            Self::Flat(amount) => amount,
            Self::Percent(percent) => total.percent_of(percent),
        };
        discount.min(total).max(Money::ZERO)
    }
}

fn opens_on(rule: &PricingRule, day: Weekday) -> bool {
    rule.days.is_empty() || rule.days.contains(&day)
}

/// True when `rule` prices the local instant `local`.
///
/// Windows with `end <= start` wrap past midnight; times after midnight belong to the
/// window that opened on the previous day.
#[must_use]
pub fn rule_applies(rule: &PricingRule, local: NaiveDateTime) -> bool {
    let time = local.time();
    let day = local.weekday();
    let (start, end) = (rule.start_time, rule.end_time);

    if start == end {
        opens_on(rule, day)
    } else if start < end {
        start <= time && time < end && opens_on(rule, day)
    } else if time >= start {
        opens_on(rule, day)
    } else if time < end {
        opens_on(rule, day.pred())
    } else {
        false
    }
}

/// First rule, in configured order, that prices `local`
#[must_use]
pub fn select_rule(rules: &[PricingRule], local: NaiveDateTime) -> Option<&PricingRule> {
    rules.iter().find(|rule| rule_applies(rule, local))
}

/// Prices `[start, end)` for a location in `tz`.
///
/// # Errors
///
/// - [`PricingError::InvalidInterval`] when `start >= end`
/// - [`PricingError::NoPricingRule`] when a step's local start matches no rule
pub fn price_interval(
    tz: Tz,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    rules: &[PricingRule],
) -> Result<PriceQuote, PricingError> {
    if start >= end {
        return Err(PricingError::InvalidInterval);
    }

    let step = Duration::minutes(STEP_MINUTES);
    let mut segments: Vec<PriceSegment> = Vec::new();
    let mut cursor = start;

    while cursor < end {
        let step_end = (cursor + step).min(end);
        let local = cursor.with_timezone(&tz).naive_local();
        let rule = select_rule(rules, local).ok_or(PricingError::NoPricingRule {
            local,
            weekday: local.weekday(),
        })?;
        let cost = rule.hourly_rate.prorate_hourly((step_end - cursor).num_seconds());

        match segments.last_mut() {
            Some(last) if last.rule_name == rule.name => {
                last.end = step_end;
                last.cost = Money::from_cents(last.cost.cents() + cost.cents());
            },
            _ => segments.push(PriceSegment {
                rule_name: rule.name.clone(),
                start: cursor,
                end: step_end,
                cost,
            }),
        }
        cursor = step_end;
    }

    let total = segments.iter().map(|s| s.cost).sum();
    Ok(PriceQuote { total, segments })
}

/// Checks that every quarter hour of every weekday matches some rule.
///
/// Run when rules are loaded so a gap surfaces as a configuration error rather than a
/// failed checkout.
///
/// # Errors
///
/// Returns the first uncovered local instant as [`PricingError::NoPricingRule`].
pub fn check_coverage(rules: &[PricingRule]) -> Result<(), PricingError> {
    // 2024-01-01 is a Monday
    let Some(monday) = chrono::NaiveDate::from_ymd_opt(2024, 1, 1) else {
        return Ok(());
    };
    for day in 0..7 {
        let date = monday + Duration::days(day);
        for quarter in 0..96u32 {
            let Some(time) = NaiveTime::from_hms_opt(quarter / 4, (quarter % 4) * 15, 0) else {
                continue;
            };
            let local = date.and_time(time);
            if select_rule(rules, local).is_none() {
                return Err(PricingError::NoPricingRule {
                    local,
                    weekday: local.weekday(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day_night() -> Vec<PricingRule> {
        vec![
            PricingRule {
                name: "Standard Rate".into(),
                hourly_rate: Money::from_cents(4000),
                start_time: time(9, 0),
                end_time: time(2, 0),
                days: vec![],
            },
            PricingRule {
                name: "Off-Peak".into(),
                hourly_rate: Money::from_cents(2000),
                start_time: time(2, 0),
                end_time: time(9, 0),
                days: vec![],
            },
        ]
    }

    fn local(tz: Tz, y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        tz.with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn split_across_rule_boundary() {
        let tz = chrono_tz::America::Chicago;
        let start = local(tz, 2025, 3, 14, 1, 45);
        let end = local(tz, 2025, 3, 14, 2, 15);

        let quote = price_interval(tz, start, end, &day_night()).unwrap();

        assert_eq!(quote.total, Money::from_cents(1500));
        assert_eq!(quote.segments.len(), 2);
        assert_eq!(quote.segments[0].rule_name, "Standard Rate");
        assert_eq!(quote.segments[0].cost, Money::from_cents(1000));
        assert_eq!(quote.segments[1].rule_name, "Off-Peak");
        assert_eq!(quote.segments[1].cost, Money::from_cents(500));
        assert_eq!(quote.segments[0].end, quote.segments[1].start);
    }

    #[test]
    fn rule_selection_uses_location_timezone() {
        // 15:00 UTC is 09:00 in Chicago during CST
        let tz = chrono_tz::America::Chicago;
        let start = Utc.with_ymd_and_hms(2025, 1, 10, 14, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 10, 16, 0, 0).unwrap();

        let quote = price_interval(tz, start, end, &day_night()).unwrap();

        assert_eq!(quote.segments.len(), 2);
        assert_eq!(quote.segments[0].rule_name, "Off-Peak");
        assert_eq!(quote.segments[0].cost, Money::from_cents(2000));
        assert_eq!(quote.segments[1].cost, Money::from_cents(4000));
        assert_eq!(quote.total, Money::from_cents(6000));
    }

    #[test]
    fn trailing_partial_step_is_prorated() {
        let tz = chrono_tz::UTC;
        let start = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let end = start + Duration::minutes(20);

        let quote = price_interval(tz, start, end, &day_night()).unwrap();

        // 15 min = 1000, 5 min of $40/h = 333.33
        assert_eq!(quote.total, Money::from_cents(1333));
    }

    #[test]
    fn empty_or_reversed_interval_is_invalid() {
        let at = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        assert_eq!(
            price_interval(chrono_tz::UTC, at, at, &day_night()),
            Err(PricingError::InvalidInterval)
        );
    }

    #[test]
    fn coverage_gap_is_config_integrity_error() {
        let mut rules = day_night();
        rules.pop();
        assert!(check_coverage(&rules).is_err());
        assert!(check_coverage(&day_night()).is_ok());

        let start = Utc.with_ymd_and_hms(2025, 1, 10, 3, 0, 0).unwrap();
        let err = price_interval(chrono_tz::UTC, start, start + Duration::hours(1), &rules)
            .unwrap_err();
        assert_eq!(
            BookingError::from(err).category(),
            crate::error::ErrorCategory::ConfigIntegrity
        );
    }

    #[test]
    fn weekday_rules_and_wrapping_windows() {
        // Friday-night late rate from 22:00 to 03:00, everything else standard
        let rules = vec![
            PricingRule {
                name: "Late Friday".into(),
                hourly_rate: Money::from_cents(5000),
                start_time: time(22, 0),
                end_time: time(3, 0),
                days: vec![Weekday::Fri],
            },
            PricingRule {
                name: "Standard".into(),
                hourly_rate: Money::from_cents(4000),
                start_time: time(0, 0),
                end_time: time(0, 0),
                days: vec![],
            },
        ];
        // 2025-01-10 is a Friday; 01:00 Saturday still belongs to Friday's window
        let sat_one_am = NaiveDateTime::new(
            chrono::NaiveDate::from_ymd_opt(2025, 1, 11).unwrap(),
            time(1, 0),
        );
        assert_eq!(select_rule(&rules, sat_one_am).unwrap().name, "Late Friday");
        let sun_one_am = NaiveDateTime::new(
            chrono::NaiveDate::from_ymd_opt(2025, 1, 12).unwrap(),
            time(1, 0),
        );
        assert_eq!(select_rule(&rules, sun_one_am).unwrap().name, "Standard");
    }

    #[test]
    fn promotions_never_exceed_total() {
        let total = Money::from_cents(4000);
        assert_eq!(Promotion::Percent(25).discount_for(total), Money::from_cents(1000));
        assert_eq!(Promotion::Flat(Money::from_cents(9000)).discount_for(total), total);
    }

    proptest! {
        #[test]
        fn segments_are_contiguous_and_sum_to_total(
            start_minute in 0i64..(7 * 24 * 60),
            length in 1i64..(12 * 60),
        ) {
            let base = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
            let start = base + Duration::minutes(start_minute);
            let end = start + Duration::minutes(length);

            let quote = price_interval(chrono_tz::Europe::London, start, end, &day_night()).unwrap();

            prop_assert_eq!(quote.segments.first().unwrap().start, start);
            prop_assert_eq!(quote.segments.last().unwrap().end, end);
            for pair in quote.segments.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
                prop_assert_ne!(&pair[0].rule_name, &pair[1].rule_name);
            }
            let sum: Money = quote.segments.iter().map(|s| s.cost).sum();
            prop_assert_eq!(sum, quote.total);
        }

        #[test]
        fn single_rule_total_is_quarter_rate_per_step(
            rate in 1i64..100_000,
            steps in 1i64..96,
            start_quarter in 0i64..96,
        ) {
            let rules = vec![PricingRule {
                name: "Flat".into(),
                hourly_rate: Money::from_cents(rate),
                start_time: time(0, 0),
                end_time: time(0, 0),
                days: vec![],
            }];
            let start = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap()
                + Duration::minutes(start_quarter * STEP_MINUTES);
            let end = start + Duration::minutes(steps * STEP_MINUTES);

            let quote = price_interval(chrono_tz::UTC, start, end, &rules).unwrap();

            let per_step = Money::from_cents(rate).prorate_hourly(STEP_MINUTES * 60);
            prop_assert_eq!(quote.total.cents(), per_step.cents() * steps);
            prop_assert_eq!(quote.segments.len(), 1);
        }
    }
}
