//! Jobs over bookings and their notifications.

use super::{for_each_isolated, JobReport, PeriodicJob};
use crate::lifecycle::LifecycleManager;
use crate::notifications::NotificationDispatcher;
use crate::reminders::ReminderIssuer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simbay_core::error::{BookingError, Result};
use simbay_core::schedule::reminder_window;
use simbay_core::status::BookingStatus;
use simbay_core::store::{BookingStore, Store};
use std::sync::Arc;
use std::time::Duration;

/// Moves lapsed `Reserved` holds to `Expired` so their bays can be booked again
pub struct ExpiryReclamationJob {
    lifecycle: Arc<LifecycleManager>,
    interval: Duration,
}

impl ExpiryReclamationJob {
    /// Creates the job
    #[must_use]
    pub const fn new(lifecycle: Arc<LifecycleManager>, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
        }
    }
}

#[async_trait]
impl PeriodicJob for ExpiryReclamationJob {
    fn name(&self) -> &'static str {
        "expiry_reclamation"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<JobReport> {
        // the lifecycle manager reads its own clock for the bulk conditional update
        let expired = self.lifecycle.reclaim_expired().await?;
        Ok(JobReport {
            scanned: expired.len(),
            acted: expired.len(),
            ..JobReport::default()
        })
    }
}

/// Sends due emails through the dispatcher
pub struct NotificationDispatchJob {
    dispatcher: Arc<NotificationDispatcher>,
    interval: Duration,
}

impl NotificationDispatchJob {
    /// Creates the job
    #[must_use]
    pub const fn new(dispatcher: Arc<NotificationDispatcher>, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval,
        }
    }
}

#[async_trait]
impl PeriodicJob for NotificationDispatchJob {
    fn name(&self) -> &'static str {
        "notification_dispatch"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport> {
        self.dispatcher.dispatch_due(now).await
    }
}

/// Issues unlock tokens and queues reminder emails for confirmed bookings about to start.
///
/// Each tick covers the start times in `(now + 15m - interval, now + 15m]`, so consecutive
/// ticks tile the timeline. The issuer is idempotent per booking, which makes a repeated
/// window harmless.
pub struct ReminderJob {
    store: Arc<dyn Store>,
    reminders: Arc<ReminderIssuer>,
    interval: Duration,
}

impl ReminderJob {
    /// Creates the job
    #[must_use]
    pub fn new(store: Arc<dyn Store>, reminders: Arc<ReminderIssuer>, interval: Duration) -> Self {
        Self {
            store,
            reminders,
            interval,
        }
    }
}

#[async_trait]
impl PeriodicJob for ReminderJob {
    fn name(&self) -> &'static str {
        "unlock_reminders"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let tick = chrono::Duration::from_std(self.interval)
            .map_err(|e| BookingError::Validation(format!("reminder interval out of range: {e}")))?;
        let (from, to) = reminder_window(now, tick);
        let starting = self
            .store
            .bookings_starting_between(BookingStatus::Confirmed, from, to)
            .await?;

        let reminders = &self.reminders;
        Ok(for_each_isolated(
            self.name(),
            starting,
            |booking| booking.id.to_string(),
            |booking| async move { reminders.issue_for(booking.id).await },
        )
        .await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::reminders::LinkSettings;
    use chrono::Duration as ChronoDuration;
    use simbay_core::environment::Clock;
    use simbay_core::model::NotificationKind;
    use simbay_core::token::UnlockTokenSigner;
    use simbay_testing::fixtures::{confirmed_booking, seed_venue, t0};
    use simbay_testing::{FixedClock, InMemoryStore};

    fn reminder_job(store: &Arc<InMemoryStore>) -> ReminderJob {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(t0()));
        let store_dyn = Arc::clone(store) as Arc<dyn Store>;
        let issuer = ReminderIssuer::new(
            Arc::clone(&store_dyn),
            Arc::new(UnlockTokenSigner::new("test-secret")),
            clock,
            LinkSettings::default(),
        );
        ReminderJob::new(store_dyn, Arc::new(issuer), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn reminds_only_bookings_in_the_window() {
        let store = Arc::new(InMemoryStore::new());
        let venue = seed_venue(&store);
        let due = confirmed_booking(&venue, t0() + ChronoDuration::minutes(15));
        let later = confirmed_booking(&venue, t0() + ChronoDuration::minutes(16));
        let earlier = confirmed_booking(&venue, t0() + ChronoDuration::minutes(14));
        store.put_booking(due.clone());
        store.put_booking(later);
        store.put_booking(earlier);

        let job = reminder_job(&store);
        let report = job.run(t0()).await.unwrap();

        assert_eq!(report.acted, 1);
        let queued = store.notifications_of(NotificationKind::UnlockReminder);
        assert_eq!(queued.len(), 1);
        assert!(store.booking(due.id).unwrap().unlock_token.is_some());

        // a repeated tick over the same window queues nothing new
        let again = job.run(t0()).await.unwrap();
        assert_eq!(again.acted, 0);
        assert_eq!(store.notifications_of(NotificationKind::UnlockReminder).len(), 1);
    }
}
