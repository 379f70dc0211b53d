//! Door unlock flow.
//!
//! The access policy is checked before any kiosk round-trip. Every attempt, granted or
//! not, is appended to the access log with the identity that asked.

use crate::kiosk::UnlockCoordinator;
use crate::metrics::{self as m, counter};
use serde::Serialize;
use simbay_core::access::{check_access, unlock_duration_seconds, UnlockReason};
use simbay_core::environment::Clock;
use simbay_core::error::{BookingError, Result};
use simbay_core::ids::{BayId, BookingId};
use simbay_core::model::{AccessActor, AccessLogEntry, AccessOutcome, Booking};
use simbay_core::store::{AccessLogStore, BookingStore, Store};
use simbay_core::token::{fingerprint, TokenError, UnlockTokenSigner};
use std::sync::Arc;

/// Result of an unlock attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnlockOutcome {
    /// Kiosk confirmed the door opened
    pub granted: bool,
    /// Booking the attempt resolved to
    pub booking_id: Option<BookingId>,
    /// Why it was not granted
    pub reason: Option<UnlockReason>,
}

impl UnlockOutcome {
    const fn granted(booking_id: BookingId) -> Self {
        Self {
            granted: true,
            booking_id: Some(booking_id),
            reason: None,
        }
    }

    const fn denied(booking_id: Option<BookingId>, reason: UnlockReason) -> Self {
        Self {
            granted: false,
            booking_id,
            reason: Some(reason),
        }
    }

    /// Human-readable message for the person at the door
    #[must_use]
    pub fn message(&self) -> String {
        self.reason
            .as_ref()
            .map_or_else(|| "Door unlocked. Enjoy your session!".to_string(), ToString::to_string)
    }
}

/// Applies the access policy, asks the kiosk and records the attempt
pub struct UnlockService {
    store: Arc<dyn Store>,
    coordinator: Arc<UnlockCoordinator>,
    signer: Arc<UnlockTokenSigner>,
    clock: Arc<dyn Clock>,
    max_unlock_seconds: u64,
}

impl UnlockService {
    /// Creates a service
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        coordinator: Arc<UnlockCoordinator>,
        signer: Arc<UnlockTokenSigner>,
        clock: Arc<dyn Clock>,
        max_unlock_seconds: u64,
    ) -> Self {
        Self {
            store,
            coordinator,
            signer,
            clock,
            max_unlock_seconds,
        }
    }

    /// Unlocks the bay of the booking an unlock link names.
    ///
    /// The actor is recorded as the token's fingerprint, never the token.
    ///
    /// # Errors
    ///
    /// Store failures, including a failed access-log write.
    pub async fn unlock_with_token(&self, token: &str) -> Result<UnlockOutcome> {
        let now = self.clock.now();
        let actor = AccessActor::Link {
            fingerprint: fingerprint(token),
        };

        let claims = match self.signer.verify(token, now) {
            Ok(claims) => claims,
            Err(e) => {
                let reason = match e {
                    TokenError::Expired => UnlockReason::TokenExpired,
                    TokenError::Malformed | TokenError::BadSignature | TokenError::InvalidKey => {
                        UnlockReason::TokenInvalid
                    },
                };
                tracing::info!(error = %e, "Rejected unlock link");
                return self.finish(None, None, actor, reason).await;
            },
        };

        let booking = self.store.get_booking(claims.booking_id).await?;
        let Some(booking) = booking.filter(|b| b.unlock_token.as_deref() == Some(token)) else {
            tracing::warn!(booking_id = %claims.booking_id, "Unlock link does not match a stored token");
            return self
                .finish(Some(claims.booking_id), None, actor, UnlockReason::TokenInvalid)
                .await;
        };
        self.unlock(&booking, actor).await
    }

    /// Unlocks the bay of a booking for a signed-in customer or staff member.
    ///
    /// # Errors
    ///
    /// - [`BookingError::BookingNotFound`]
    /// - store failures
    pub async fn unlock_booking(&self, booking_id: BookingId, actor: AccessActor) -> Result<UnlockOutcome> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))?;
        self.unlock(&booking, actor).await
    }

    async fn unlock(&self, booking: &Booking, actor: AccessActor) -> Result<UnlockOutcome> {
        let now = self.clock.now();
        let timezone = self
            .store
            .get_location(booking.location_id)
            .await?
            .ok_or_else(|| BookingError::not_found("location", booking.location_id))?
            .timezone;
        if let Err(reason) = check_access(booking, now, timezone) {
            return self
                .finish(Some(booking.id), Some(booking.bay_id), actor, reason)
                .await;
        }

        let duration = unlock_duration_seconds(booking, now, self.max_unlock_seconds);
        let acknowledged = self
            .coordinator
            .request_unlock(booking.location_id, booking.bay_id, duration, booking.id)
            .await;
        if !acknowledged {
            return self
                .finish(
                    Some(booking.id),
                    Some(booking.bay_id),
                    actor,
                    UnlockReason::KioskUnavailable,
                )
                .await;
        }

        self.record(Some(booking.id), Some(booking.bay_id), actor, AccessOutcome::Granted)
            .await?;
        counter!(m::UNLOCK_REQUESTS, "outcome" => "granted").increment(1);
        tracing::info!(booking_id = %booking.id, bay_id = %booking.bay_id, duration, "Bay unlocked");
        Ok(UnlockOutcome::granted(booking.id))
    }

    async fn finish(
        &self,
        booking_id: Option<BookingId>,
        bay_id: Option<BayId>,
        actor: AccessActor,
        reason: UnlockReason,
    ) -> Result<UnlockOutcome> {
        let (outcome, label) = match reason {
            UnlockReason::KioskUnavailable => (AccessOutcome::KioskUnavailable, "kiosk_unavailable"),
            _ => (
                AccessOutcome::Denied {
                    reason: reason.to_string(),
                },
                "denied",
            ),
        };
        self.record(booking_id, bay_id, actor, outcome).await?;
        counter!(m::UNLOCK_REQUESTS, "outcome" => label).increment(1);
        tracing::info!(booking_id = ?booking_id, %reason, "Unlock not granted");
        Ok(UnlockOutcome::denied(booking_id, reason))
    }

    async fn record(
        &self,
        booking_id: Option<BookingId>,
        bay_id: Option<BayId>,
        actor: AccessActor,
        outcome: AccessOutcome,
    ) -> Result<()> {
        let entry = AccessLogEntry {
            booking_id,
            bay_id,
            actor,
            outcome,
            occurred_at: self.clock.now(),
        };
        self.store.append_access_log(&entry).await?;
        Ok(())
    }
}
