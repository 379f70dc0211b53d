//! Money in integer minor units.
//!
//! All arithmetic is done on cents. Floating-point dollars never appear in a price
//! computation; conversion to a display string is the only place a decimal point exists.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// An amount of money in minor currency units (cents)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates an amount from cents
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Creates an amount from whole dollars, `None` on overflow
    #[must_use]
    pub const fn checked_from_dollars(dollars: i64) -> Option<Self> {
        match dollars.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// True when the amount is exactly zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Subtracts, flooring at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        let cents = self.0.saturating_sub(other.0);
        if cents < 0 { Self(0) } else { Self(cents) }
    }

    /// Prorates an hourly rate over `seconds`, rounding half up to the nearest cent.
    ///
    /// A full quarter hour of a $40.00 rate is exactly 1000 cents; a rate of 4001 cents
    /// per hour gives 1000 cents per quarter (1000.25 rounded).
    #[must_use]
    pub const fn prorate_hourly(self, seconds: i64) -> Self {
        // (rate * seconds + 1800) / 3600 rounds half up for non-negative values
        let numerator = self.0.saturating_mul(seconds).saturating_add(1800);
        Self(numerator / 3600)
    }

    /// Applies a percentage discount (0..=100), rounding the discount down
    #[must_use]
    pub const fn percent_of(self, percent: u32) -> Self {
        let percent = if percent > 100 { 100 } else { percent };
        Self(self.0.saturating_mul(percent as i64) / 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.map(|m| m.0).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_hour_of_round_rates() {
        let forty = Money::from_cents(4000);
        assert_eq!(forty.prorate_hourly(900), Money::from_cents(1000));
        let twenty = Money::from_cents(2000);
        assert_eq!(twenty.prorate_hourly(900), Money::from_cents(500));
    }

    #[test]
    fn quarter_hour_rounds_half_up() {
        // 3998 / 4 = 999.5
        assert_eq!(Money::from_cents(3998).prorate_hourly(900), Money::from_cents(1000));
        // 3997 / 4 = 999.25
        assert_eq!(Money::from_cents(3997).prorate_hourly(900), Money::from_cents(999));
    }

    #[test]
    fn display_formats_dollars() {
        assert_eq!(Money::from_cents(1500).to_string(), "$15.00");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
    }

    #[test]
    fn discount_and_subtraction_floor_at_zero() {
        let price = Money::from_cents(3000);
        assert_eq!(price.percent_of(25), Money::from_cents(750));
        assert_eq!(price.saturating_sub(Money::from_cents(5000)), Money::ZERO);
    }
}
