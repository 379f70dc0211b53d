//! Email rendering and dispatch.
//!
//! Notifications are queued as rows (see [`queue_booking_notification`]) and sent later
//! by [`NotificationDispatcher::dispatch_due`], one at a time with a fixed pause between
//! sends to stay under the provider's rate limit. Each row is marked `sent` or `failed`
//! individually; one bad address never blocks the rest of the batch.

use crate::jobs::{for_each_isolated, JobReport};
use crate::metrics::{self as m, counter};
use crate::retry::{retry_with_predicate, RetryPolicy};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};
use simbay_core::email::{EmailError, EmailMessage, EmailProvider};
use simbay_core::environment::Clock;
use simbay_core::error::{BookingError, Result};
use simbay_core::model::{Booking, Notification, NotificationKind, NotificationSubject, SendResult};
use simbay_core::status::NotificationStatus;
use simbay_core::store::{BayStore, BookingStore, NotificationStore, Store};
use std::sync::Arc;
use std::time::Duration;

/// Dispatcher tuning
#[derive(Clone, Debug)]
pub struct DispatcherSettings {
    /// Most notifications sent per run
    pub batch_size: u32,
    /// Pause between consecutive sends
    pub send_delay: Duration,
    /// Retries for transport failures within one send
    pub retry: RetryPolicy,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            send_delay: Duration::from_millis(600),
            retry: RetryPolicy::default(),
        }
    }
}

/// Provider-reported delivery outcome
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// Reached the mailbox
    Delivered,
    /// Hard or soft bounce
    Bounced {
        /// Provider's reason
        reason: Option<String>,
    },
    /// Recipient marked it as spam
    Complained,
}

// ============================================================================
// Payloads and rendering
// ============================================================================

fn local_time(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%a %-d %b %Y, %H:%M").to_string()
}

/// Recipient and template variables for a booking email
async fn booking_context(store: &dyn Store, booking: &Booking) -> Result<(String, Value)> {
    let user = store
        .get_user(booking.user_id)
        .await?
        .ok_or_else(|| BookingError::not_found("user", booking.user_id))?;
    let bay = store
        .get_bay(booking.bay_id)
        .await?
        .ok_or_else(|| BookingError::not_found("bay", booking.bay_id))?;
    let location = store
        .get_location(booking.location_id)
        .await?
        .ok_or_else(|| BookingError::not_found("location", booking.location_id))?;
    let tz = location.timezone;

    let payload = json!({
        "booking_id": booking.id,
        "customer_name": user.name,
        "bay_name": bay.name,
        "location_name": location.name,
        "start_local": local_time(booking.start_at, tz),
        "end_local": local_time(booking.end_at, tz),
        "total": booking.total_amount.to_string(),
    });
    Ok((user.email, payload))
}

/// Queues a booking email unless one of this kind already exists.
///
/// Returns `true` when a row was inserted.
///
/// # Errors
///
/// Store failures and missing user, bay or location rows.
pub async fn queue_booking_notification(
    store: &dyn Store,
    booking: &Booking,
    kind: NotificationKind,
    extra: Option<Value>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let subject = NotificationSubject::Booking(booking.id);
    if store.notification_exists(subject, kind).await? {
        return Ok(false);
    }
    let (recipient, mut payload) = booking_context(store, booking).await?;
    if let (Some(Value::Object(extra)), Some(object)) = (extra, payload.as_object_mut()) {
        object.extend(extra);
    }
    let inserted = store
        .insert_notification(&Notification::pending(subject, kind, recipient, payload, now))
        .await?;
    if inserted {
        tracing::debug!(booking_id = %booking.id, %kind, "Notification queued");
    }
    Ok(inserted)
}

fn field<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Renders a notification into an email
#[must_use]
pub fn render(notification: &Notification) -> EmailMessage {
    let p = &notification.payload;
    let (subject, text_body) = match notification.kind {
        NotificationKind::BookingConfirmation => (
            format!("You're booked: {} at {}", field(p, "bay_name"), field(p, "location_name")),
            format!(
                "Hi {},\n\nThanks for your booking.\n\nBay: {}\nWhen: {} to {}\nTotal: {}\n\n\
                 We'll email your door unlock link 15 minutes before your session starts.",
                field(p, "customer_name"),
                field(p, "bay_name"),
                field(p, "start_local"),
                field(p, "end_local"),
                field(p, "total"),
            ),
        ),
        NotificationKind::UnlockReminder => (
            format!("Your session on {} starts soon", field(p, "bay_name")),
            format!(
                "Hi {},\n\nYour session starts at {}.\n\nOpen the door here: {}\n\n\
                 The link works from 15 minutes before your start time until {}.",
                field(p, "customer_name"),
                field(p, "start_local"),
                field(p, "unlock_url"),
                field(p, "end_local"),
            ),
        ),
        NotificationKind::AttendanceRequest => (
            format!("{}: are you playing on {}?", field(p, "league_name"), field(p, "week_date")),
            format!(
                "Week {} of {} starts at {}.\n\nI'm in: {}\nCan't make it: {}\n\n\
                 Answers close at {}.",
                p.get("week_number").and_then(Value::as_u64).unwrap_or_default(),
                field(p, "league_name"),
                field(p, "start_local"),
                field(p, "confirm_url"),
                field(p, "decline_url"),
                field(p, "cutoff_local"),
            ),
        ),
        NotificationKind::CancellationNotice => (
            format!("Booking cancelled: {}", field(p, "bay_name")),
            format!(
                "Hi {},\n\nYour booking for {} on {} has been cancelled. \
                 Any payment taken will be refunded to the original card.",
                field(p, "customer_name"),
                field(p, "bay_name"),
                field(p, "start_local"),
            ),
        ),
    };

    EmailMessage {
        to: notification.recipient.clone(),
        subject,
        text_body,
        html_body: None,
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Sends due notifications
pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    email: Arc<dyn EmailProvider>,
    clock: Arc<dyn Clock>,
    settings: DispatcherSettings,
}

impl NotificationDispatcher {
    /// Creates a dispatcher
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        email: Arc<dyn EmailProvider>,
        clock: Arc<dyn Clock>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            store,
            email,
            clock,
            settings,
        }
    }

    /// Sends up to `batch_size` oldest due notifications, sequentially.
    ///
    /// # Errors
    ///
    /// Only when the batch itself cannot be loaded; per-row failures are counted in the
    /// report.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let due = self
            .store
            .due_notifications(now, self.settings.batch_size)
            .await?;

        let mut first = true;
        let report = for_each_isolated(
            "notification_dispatch",
            due,
            |n| n.id.to_string(),
            |notification| {
                let pause = !std::mem::take(&mut first);
                async move {
                    if pause {
                        tokio::time::sleep(self.settings.send_delay).await;
                    }
                    self.send_one(&notification).await
                }
            },
        )
        .await;
        Ok(report)
    }

    /// Sends one notification and records the result.
    ///
    /// Returns `true` when the provider accepted it. A provider rejection is recorded as
    /// `failed` and is not an error.
    ///
    /// # Errors
    ///
    /// Store failures while recording.
    pub async fn send_one(&self, notification: &Notification) -> Result<bool> {
        let message = render(notification);
        let sent = retry_with_predicate(
            &self.settings.retry,
            || self.email.send(&message),
            |err| matches!(err, EmailError::Transport(_)),
        )
        .await;

        let result = match sent {
            Ok(provider_message_id) => SendResult::Sent {
                provider_message_id,
            },
            Err(err) => SendResult::Failed {
                error: err.to_string(),
            },
        };
        let recorded = self
            .store
            .record_send(notification.id, &result, self.clock.now())
            .await?;
        if !recorded {
            tracing::debug!(notification_id = %notification.id, "Notification no longer pending");
        }

        match result {
            SendResult::Sent {
                provider_message_id,
            } => {
                counter!(m::NOTIFICATIONS_SENT).increment(1);
                tracing::info!(
                    notification_id = %notification.id,
                    kind = %notification.kind,
                    %provider_message_id,
                    "Notification sent"
                );
                Ok(true)
            },
            SendResult::Failed { error } => {
                counter!(m::NOTIFICATIONS_FAILED).increment(1);
                tracing::warn!(
                    notification_id = %notification.id,
                    kind = %notification.kind,
                    %error,
                    "Notification failed"
                );
                Ok(false)
            },
        }
    }

    /// Applies a provider delivery event to the sent notification.
    ///
    /// Returns `false` when no `sent` notification carries that provider id.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn on_delivery_event(
        &self,
        provider_message_id: &str,
        event: &DeliveryEvent,
    ) -> Result<bool> {
        let (status, error) = match event {
            DeliveryEvent::Delivered => (NotificationStatus::Delivered, None),
            DeliveryEvent::Bounced { reason } => (
                NotificationStatus::Failed,
                Some(format!("bounced: {}", reason.as_deref().unwrap_or("no reason given"))),
            ),
            DeliveryEvent::Complained => {
                (NotificationStatus::Failed, Some("recipient complained".to_string()))
            },
        };
        let updated = self
            .store
            .record_delivery(provider_message_id, status, error.as_deref(), self.clock.now())
            .await?;
        tracing::debug!(%provider_message_id, %status, updated, "Delivery event applied");
        Ok(updated)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use simbay_core::ids::BookingId;
    use simbay_testing::fixtures::{reserved_booking, seed_venue, t0};
    use simbay_testing::{FixedClock, InMemoryStore, MockEmailProvider};
    use simbay_core::store::NotificationStore as _;

    fn dispatcher(store: &Arc<InMemoryStore>, email: &Arc<MockEmailProvider>) -> NotificationDispatcher {
        NotificationDispatcher::new(
            Arc::clone(store) as Arc<dyn Store>,
            Arc::clone(email) as Arc<dyn EmailProvider>,
            Arc::new(FixedClock::new(t0())),
            DispatcherSettings {
                retry: RetryPolicy::none(),
                ..DispatcherSettings::default()
            },
        )
    }

    #[test]
    fn confirmation_renders_booking_details() {
        let notification = Notification::pending(
            NotificationSubject::Booking(BookingId::new()),
            NotificationKind::BookingConfirmation,
            "golfer@example.com",
            json!({"bay_name": "Bay 1", "location_name": "Downtown", "total": "$40.00"}),
            t0(),
        );
        let email = render(&notification);
        assert_eq!(email.to, "golfer@example.com");
        assert_eq!(email.subject, "You're booked: Bay 1 at Downtown");
        assert!(email.text_body.contains("$40.00"));
    }

    #[tokio::test]
    async fn queueing_twice_inserts_once() {
        let store = InMemoryStore::new();
        let venue = seed_venue(&store);
        let booking = reserved_booking(&venue, t0());
        store.put_booking(booking.clone());

        let kind = NotificationKind::BookingConfirmation;
        assert!(queue_booking_notification(&store, &booking, kind, None, t0()).await.unwrap());
        assert!(!queue_booking_notification(&store, &booking, kind, None, t0()).await.unwrap());
        assert_eq!(store.notifications_of(kind).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_address_fails_without_blocking_batch() {
        let store = Arc::new(InMemoryStore::new());
        let email = Arc::new(MockEmailProvider::new());
        let venue = seed_venue(&store);
        let booking = reserved_booking(&venue, t0());
        store.put_booking(booking.clone());
        for kind in [NotificationKind::BookingConfirmation, NotificationKind::CancellationNotice] {
            queue_booking_notification(store.as_ref(), &booking, kind, None, t0())
                .await
                .unwrap();
        }
        let other = Notification::pending(
            NotificationSubject::Booking(BookingId::new()),
            NotificationKind::BookingConfirmation,
            "bounce@example.com",
            json!({}),
            t0(),
        );
        store.insert_notification(&other).await.unwrap();
        email.reject("bounce@example.com");

        let started = tokio::time::Instant::now();
        let report = dispatcher(&store, &email).dispatch_due(t0()).await.unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.acted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(email.sent().len(), 2);
        // two pauses between three sends
        assert!(started.elapsed() >= Duration::from_millis(1200));
        let failed: Vec<_> = store
            .notifications()
            .into_iter()
            .filter(|n| n.status == NotificationStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 1);
    }

    #[tokio::test]
    async fn bounce_marks_sent_notification_failed() {
        let store = Arc::new(InMemoryStore::new());
        let email = Arc::new(MockEmailProvider::new());
        let notification = Notification::pending(
            NotificationSubject::Booking(BookingId::new()),
            NotificationKind::UnlockReminder,
            "golfer@example.com",
            json!({}),
            t0(),
        );
        store.insert_notification(&notification).await.unwrap();
        let dispatcher = dispatcher(&store, &email);
        assert!(dispatcher.send_one(&notification).await.unwrap());

        let updated = dispatcher
            .on_delivery_event("msg_mock_1", &DeliveryEvent::Bounced { reason: None })
            .await
            .unwrap();

        assert!(updated);
        let stored = &store.notifications()[0];
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("bounced: no reason given"));
    }
}
