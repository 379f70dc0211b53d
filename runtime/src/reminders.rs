//! Unlock-token issuance and the reminder email that carries the link.

use crate::notifications::queue_booking_notification;
use serde_json::json;
use simbay_core::environment::Clock;
use simbay_core::error::{BookingError, Result};
use simbay_core::ids::BookingId;
use simbay_core::model::{Booking, NotificationKind, NotificationSubject};
use simbay_core::status::BookingStatus;
use simbay_core::store::{BookingStore, NotificationStore, Store};
use simbay_core::token::{UnlockClaims, UnlockTokenSigner};
use std::sync::Arc;

/// Where customer-facing links point
#[derive(Clone, Debug)]
pub struct LinkSettings {
    /// Public origin of the web service, without trailing slash
    pub public_base_url: String,
}

impl LinkSettings {
    fn base(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }

    /// Unlock-by-link URL for a token
    #[must_use]
    pub fn unlock_url(&self, token: &str) -> String {
        format!("{}/unlock/{token}", self.base())
    }

    /// Attendance answer URL; `answer` is `confirm` or `decline`
    #[must_use]
    pub fn attendance_url(&self, token: &str, answer: &str) -> String {
        format!("{}/attendance/{token}/{answer}", self.base())
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:8080".to_string(),
        }
    }
}

/// Mints unlock tokens and queues unlock reminders
pub struct ReminderIssuer {
    store: Arc<dyn Store>,
    signer: Arc<UnlockTokenSigner>,
    clock: Arc<dyn Clock>,
    links: LinkSettings,
}

impl ReminderIssuer {
    /// Creates an issuer
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        signer: Arc<UnlockTokenSigner>,
        clock: Arc<dyn Clock>,
        links: LinkSettings,
    ) -> Self {
        Self {
            store,
            signer,
            clock,
            links,
        }
    }

    /// Issues the unlock token for a confirmed booking and queues its reminder.
    ///
    /// Returns `false` when the booking is not confirmed or a reminder already exists.
    /// A token already stored on the booking is reused, never replaced.
    ///
    /// # Errors
    ///
    /// - [`BookingError::BookingNotFound`]
    /// - [`BookingError::ConfigIntegrity`] when the signing key is unusable
    /// - store failures
    pub async fn issue_for(&self, booking_id: BookingId) -> Result<bool> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))?;
        if booking.status != BookingStatus::Confirmed {
            tracing::debug!(%booking_id, status = %booking.status, "Skipping reminder for unconfirmed booking");
            return Ok(false);
        }
        let subject = NotificationSubject::Booking(booking_id);
        if self
            .store
            .notification_exists(subject, NotificationKind::UnlockReminder)
            .await?
        {
            return Ok(false);
        }

        let token = self.ensure_token(&booking).await?;
        let extra = json!({ "unlock_url": self.links.unlock_url(&token) });
        let queued = queue_booking_notification(
            self.store.as_ref(),
            &booking,
            NotificationKind::UnlockReminder,
            Some(extra),
            self.clock.now(),
        )
        .await?;
        if queued {
            tracing::info!(%booking_id, start_at = %booking.start_at, "Unlock reminder queued");
        }
        Ok(queued)
    }

    async fn ensure_token(&self, booking: &Booking) -> Result<String> {
        if let Some(token) = &booking.unlock_token {
            return Ok(token.clone());
        }
        let claims = UnlockClaims::for_booking(booking.id, booking.start_at, booking.end_at);
        let token = self
            .signer
            .issue(&claims)
            .map_err(|e| BookingError::ConfigIntegrity(e.to_string()))?;

        if self
            .store
            .set_unlock_token(booking.id, &token, booking.end_at)
            .await?
        {
            return Ok(token);
        }
        // another writer stored one first
        self.store
            .get_booking(booking.id)
            .await?
            .and_then(|b| b.unlock_token)
            .ok_or_else(|| {
                BookingError::StateConflict(format!("unlock token for booking {} vanished", booking.id))
            })
    }
}
