//! # Simbay Core
//!
//! Domain types and pure logic for the simulator-bay booking backend.
//!
//! Nothing in this crate performs I/O. The runtime crate supplies the imperative shell
//! that reads rows, asks this crate what to do, performs the conditional write and then
//! executes the returned effects.
//!
//! ## Contents
//!
//! - **Records**: bookings, payments, bays, pricing rules, notifications, leagues
//! - **State machines**: closed status enums with one transition table each
//! - **Pricing engine**: segmented 15-minute walk over local-time rate rules
//! - **Schedule math**: local wall-clock deadlines converted through a location's timezone
//! - **Access policy**: the unlock window and the signed unlock-link token
//! - **Collaborator traits**: store, payment gateway, email provider, clock
//!
//! ## Example
//!
//! ```ignore
//! use simbay_core::pricing::price_interval;
//!
//! let quote = price_interval(location.timezone, start, end, &rules)?;
//! assert_eq!(quote.total, quote.segments.iter().map(|s| s.cost).sum());
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Generates `as_str`, `Display` and `FromStr` for a fieldless enum stored as text.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Stable text form used in storage and on the wire
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::error::ParseEnumError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::error::ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod access;
pub mod effect;
pub mod email;
pub mod environment;
pub mod error;
pub mod gateway;
pub mod ids;
pub mod lifecycle;
pub mod model;
pub mod money;
pub mod pricing;
pub mod schedule;
pub mod status;
pub mod store;
pub mod token;

pub use error::{BookingError, ErrorCategory, StoreError};
pub use ids::*;
pub use money::Money;
pub use status::{
    AttendanceStatus, BookingStatus, NotificationStatus, PaymentStatus, StatusMachine,
};
