//! Error taxonomy for booking, payment and access operations.

use crate::ids::BookingId;
use crate::status::BookingStatus;
use thiserror::Error;

/// Result type alias for domain operations.
pub type Result<T> = std::result::Result<T, BookingError>;

/// Coarse grouping of [`BookingError`] used at the HTTP boundary.
///
/// The web layer maps categories, never individual variants, to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or malformed input, no retry
    Validation,
    /// Referenced record does not exist
    NotFound,
    /// Record is in the wrong state for the transition, caller must re-fetch
    StateConflict,
    /// Time-boxed resource lapsed
    Expired,
    /// Payment gateway, email provider or kiosk channel failure
    Upstream,
    /// Misconfiguration that must surface loudly
    ConfigIntegrity,
    /// Persistence failure
    Store,
}

impl ErrorCategory {
    /// Whether repeating the same request later may succeed
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Upstream | Self::Store)
    }
}

/// Errors raised by the booking core and its runtime.
#[derive(Debug, Error)]
pub enum BookingError {
    // ═══════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════
    /// Malformed input
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Interval start is not before its end
    #[error("Invalid interval: start must be before end")]
    InvalidInterval,

    // ═══════════════════════════════════════════════════════════
    // Not found
    // ═══════════════════════════════════════════════════════════
    /// Booking does not exist
    #[error("Booking {0} not found")]
    BookingNotFound(BookingId),

    /// Any other missing record
    #[error("{entity} {id} not found")]
    NotFound {
        /// Record type
        entity: &'static str,
        /// Identifier as text
        id: String,
    },

    // ═══════════════════════════════════════════════════════════
    // State conflicts
    // ═══════════════════════════════════════════════════════════
    /// Booking is not in a status that allows the operation
    #[error("Booking {booking_id} is {status}, expected {expected}")]
    InvalidBookingState {
        /// Booking
        booking_id: BookingId,
        /// Current status
        status: BookingStatus,
        /// Status the operation requires
        expected: BookingStatus,
    },

    /// Generic transition conflict
    #[error("State conflict: {0}")]
    StateConflict(String),

    // ═══════════════════════════════════════════════════════════
    // Expiry
    // ═══════════════════════════════════════════════════════════
    /// Reservation hold lapsed before payment
    #[error("Reservation for booking {0} has expired")]
    ReservationExpired(BookingId),

    /// Any other lapsed credential or window
    #[error("Expired: {0}")]
    Expired(String),

    // ═══════════════════════════════════════════════════════════
    // Upstream
    // ═══════════════════════════════════════════════════════════
    /// Payment gateway failure, carrying the gateway's message
    #[error("Payment provider error: {0}")]
    Gateway(String),

    /// Email provider failure
    #[error("Email provider error: {0}")]
    Email(String),

    /// Kiosk channel failure
    #[error("Kiosk unavailable: {0}")]
    Kiosk(String),

    // ═══════════════════════════════════════════════════════════
    // Configuration integrity
    // ═══════════════════════════════════════════════════════════
    /// A priced instant matched no rule
    #[error("No pricing rule covers {0}")]
    NoPricingRule(String),

    /// Other configuration problem
    #[error("Configuration integrity violation: {0}")]
    ConfigIntegrity(String),

    // ═══════════════════════════════════════════════════════════
    // Persistence
    // ═══════════════════════════════════════════════════════════
    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Returns the category used for HTTP mapping and retry decisions
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::InvalidInterval => ErrorCategory::Validation,
            Self::BookingNotFound(_) | Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::InvalidBookingState { .. } | Self::StateConflict(_) => {
                ErrorCategory::StateConflict
            },
            Self::Store(StoreError::Conflict(_)) => ErrorCategory::StateConflict,
            Self::ReservationExpired(_) | Self::Expired(_) => ErrorCategory::Expired,
            Self::Gateway(_) | Self::Email(_) | Self::Kiosk(_) => ErrorCategory::Upstream,
            Self::NoPricingRule(_) | Self::ConfigIntegrity(_) => ErrorCategory::ConfigIntegrity,
            Self::Store(_) => ErrorCategory::Store,
        }
    }

    /// Shorthand for a missing record other than a booking
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Returned when stored text does not name a known enum variant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    /// Which enum was being parsed
    pub kind: &'static str,
    /// The unrecognised text
    pub value: String,
}

/// Errors raised by store implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness or overlap constraint rejected the write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Connection or query failure
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<ParseEnumError> for StoreError {
    fn from(err: ParseEnumError) -> Self {
        Self::Serialization(err.to_string())
    }
}
