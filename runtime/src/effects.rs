//! Effect execution.
//!
//! Effects run only after the write that produced them reported an affected row. They are
//! best-effort: a failure is logged and counted but the committed transition stands, and
//! the periodic jobs or the next kiosk refresh catch up.

use crate::kiosk::UnlockCoordinator;
use crate::metrics::{self as m, counter};
use crate::notifications::queue_booking_notification;
use crate::reminders::ReminderIssuer;
use chrono::NaiveDate;
use chrono_tz::Tz;
use simbay_core::effect::Effect;
use simbay_core::environment::Clock;
use simbay_core::error::{BookingError, Result};
use simbay_core::ids::{BayId, ConnectionId, LocationId};
use simbay_core::model::{BookingSummary, NotificationSubject};
use simbay_core::schedule::{local_date, local_day_bounds};
use simbay_core::store::{BookingStore, Store};
use std::sync::Arc;

/// Runs [`Effect`]s against the store, the kiosk hub and the reminder issuer
pub struct EffectExecutor {
    store: Arc<dyn Store>,
    coordinator: Arc<UnlockCoordinator>,
    reminders: Arc<ReminderIssuer>,
    clock: Arc<dyn Clock>,
}

impl EffectExecutor {
    /// Creates an executor
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        coordinator: Arc<UnlockCoordinator>,
        reminders: Arc<ReminderIssuer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            coordinator,
            reminders,
            clock,
        }
    }

    /// Kiosk hub effects are delivered to
    #[must_use]
    pub fn coordinator(&self) -> &Arc<UnlockCoordinator> {
        &self.coordinator
    }

    /// Executes every effect in order, returning how many failed
    pub async fn execute(&self, effects: &[Effect]) -> usize {
        let mut failures = 0;
        for effect in effects {
            if let Err(e) = self.execute_one(effect).await {
                failures += 1;
                counter!(m::EFFECT_FAILURES).increment(1);
                tracing::error!(effect = ?effect, error = %e, "Effect failed after commit");
            }
        }
        failures
    }

    async fn execute_one(&self, effect: &Effect) -> Result<()> {
        match effect {
            Effect::QueueNotification { subject, kind } => {
                let NotificationSubject::Booking(booking_id) = *subject else {
                    return Err(BookingError::Validation(format!(
                        "{kind} for {} cannot be queued as a booking effect",
                        subject.subject_type()
                    )));
                };
                let booking = self
                    .store
                    .get_booking(booking_id)
                    .await?
                    .ok_or(BookingError::BookingNotFound(booking_id))?;
                queue_booking_notification(
                    self.store.as_ref(),
                    &booking,
                    *kind,
                    None,
                    self.clock.now(),
                )
                .await?;
                Ok(())
            },
            Effect::BroadcastBooking {
                location,
                bay,
                delta,
            } => {
                let delivered =
                    self.coordinator
                        .broadcast_booking_change(*location, *bay, delta.clone());
                tracing::debug!(%location, %bay, booking_id = %delta.booking.id, delivered, "Booking delta broadcast");
                Ok(())
            },
            Effect::RefreshBay {
                location,
                bay,
                date,
            } => {
                self.refresh(*location, *bay, *date).await?;
                Ok(())
            },
            Effect::IssueUnlockReminder { booking } => {
                self.reminders.issue_for(*booking).await?;
                Ok(())
            },
        }
    }

    async fn timezone(&self, location: LocationId) -> Result<Tz> {
        Ok(self
            .store
            .get_location(location)
            .await?
            .ok_or_else(|| BookingError::not_found("location", location))?
            .timezone)
    }

    async fn schedule(&self, bay: BayId, date: NaiveDate, tz: Tz) -> Result<Vec<BookingSummary>> {
        let (from, to) = local_day_bounds(date, tz);
        Ok(self
            .store
            .bookings_for_bay_between(bay, from, to)
            .await?
            .iter()
            .map(|b| b.summary())
            .collect())
    }

    /// Sends a bay's bookings for one local date to its kiosks, returning how many
    /// connections received them.
    ///
    /// # Errors
    ///
    /// Store failures or an unknown location.
    pub async fn refresh(&self, location: LocationId, bay: BayId, date: NaiveDate) -> Result<usize> {
        let tz = self.timezone(location).await?;
        let bookings = self.schedule(bay, date, tz).await?;
        Ok(self.coordinator.send_refresh(location, bay, date, bookings))
    }

    /// Sends today's schedule (in the location's timezone) to the one kiosk connection
    /// that asked for it.
    ///
    /// Returns `false` when the connection is gone or its queue is full.
    ///
    /// # Errors
    ///
    /// Store failures or an unknown location.
    pub async fn refresh_today(
        &self,
        location: LocationId,
        bay: BayId,
        connection: ConnectionId,
    ) -> Result<bool> {
        let tz = self.timezone(location).await?;
        let date = local_date(self.clock.now(), tz);
        let bookings = self.schedule(bay, date, tz).await?;
        Ok(self
            .coordinator
            .send_refresh_to(location, bay, connection, date, bookings))
    }
}
