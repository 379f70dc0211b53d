//! Process wiring.
//!
//! Builds every runtime component from already-constructed adapters, so the same wiring
//! runs against Postgres and the real providers in production and against in-memory
//! doubles in tests.

use crate::config::Config;
use simbay_core::email::EmailProvider;
use simbay_core::environment::Clock;
use simbay_core::gateway::PaymentGateway;
use simbay_core::store::Store;
use simbay_core::token::UnlockTokenSigner;
use simbay_runtime::jobs::booking_jobs::{ExpiryReclamationJob, NotificationDispatchJob, ReminderJob};
use simbay_runtime::jobs::league_jobs::{
    AttendanceCutoffJob, AttendanceReminderJob, HandicapRecalculationJob,
    LeagueModeDeactivationJob, TeamDeadlineJob,
};
use simbay_runtime::{
    EffectExecutor, JobScheduler, LifecycleManager, NotificationDispatcher, ReminderIssuer,
    UnlockCoordinator, UnlockService,
};
use simbay_web::{AppState, WebhookSecrets};
use std::sync::Arc;

/// External adapters the application is built on
pub struct Adapters {
    /// Persistence
    pub store: Arc<dyn Store>,
    /// Payment provider
    pub gateway: Arc<dyn PaymentGateway>,
    /// Email provider
    pub email: Arc<dyn EmailProvider>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// A wired application: HTTP state plus the jobs to run
pub struct Application {
    /// Handler state
    pub state: AppState,
    /// Registered jobs; `None` when jobs are disabled for this process
    pub scheduler: Option<JobScheduler>,
}

/// Wires every component.
#[must_use]
pub fn build(config: &Config, adapters: Adapters) -> Application {
    let Adapters {
        store,
        gateway,
        email,
        clock,
    } = adapters;

    let signer = Arc::new(UnlockTokenSigner::new(config.jobs.unlock_token_secret.clone()));
    let coordinator = Arc::new(UnlockCoordinator::new(config.coordinator()));
    let reminders = Arc::new(ReminderIssuer::new(
        Arc::clone(&store),
        Arc::clone(&signer),
        Arc::clone(&clock),
        config.links(),
    ));
    let effects = Arc::new(EffectExecutor::new(
        Arc::clone(&store),
        Arc::clone(&coordinator),
        Arc::clone(&reminders),
        Arc::clone(&clock),
    ));
    let lifecycle = Arc::new(LifecycleManager::new(
        Arc::clone(&store),
        Arc::clone(&gateway),
        Arc::clone(&effects),
        Arc::clone(&clock),
        config.lifecycle(),
    ));
    let unlock = Arc::new(UnlockService::new(
        Arc::clone(&store),
        Arc::clone(&coordinator),
        signer,
        Arc::clone(&clock),
        config.kiosk.max_unlock_seconds,
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&store),
        email,
        Arc::clone(&clock),
        config.dispatcher(),
    ));

    let settings = config.scheduler();
    let scheduler = settings.enabled.then(|| {
        let intervals = &settings.intervals;
        let mut scheduler = JobScheduler::new(Arc::clone(&clock));
        scheduler.register(Arc::new(ExpiryReclamationJob::new(
            Arc::clone(&lifecycle),
            intervals.expiry,
        )));
        scheduler.register(Arc::new(NotificationDispatchJob::new(
            Arc::clone(&dispatcher),
            intervals.notifications,
        )));
        scheduler.register(Arc::new(ReminderJob::new(
            Arc::clone(&store),
            Arc::clone(&reminders),
            intervals.reminders,
        )));
        scheduler.register(Arc::new(HandicapRecalculationJob::new(
            Arc::clone(&store),
            intervals.handicaps,
        )));
        scheduler.register(Arc::new(TeamDeadlineJob::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            intervals.team_deadline,
        )));
        scheduler.register(Arc::new(LeagueModeDeactivationJob::new(
            Arc::clone(&store),
            Arc::clone(&effects),
            intervals.league_mode,
        )));
        scheduler.register(Arc::new(AttendanceReminderJob::new(
            Arc::clone(&store),
            config.links(),
            intervals.attendance_reminder,
        )));
        scheduler.register(Arc::new(AttendanceCutoffJob::new(
            Arc::clone(&store),
            intervals.attendance_cutoff,
        )));
        scheduler
    });

    let state = AppState {
        store,
        lifecycle,
        unlock,
        coordinator,
        effects,
        dispatcher,
        clock,
        webhooks: WebhookSecrets {
            payment: config.payment.webhook_secret.clone(),
            email: config.email.webhook_secret.clone(),
            tolerance_secs: config.payment.webhook_tolerance_secs,
        },
    };

    Application { state, scheduler }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use simbay_testing::{test_clock, InMemoryStore, MockEmailProvider, MockPaymentGateway};

    fn adapters() -> Adapters {
        Adapters {
            store: Arc::new(InMemoryStore::new()),
            gateway: Arc::new(MockPaymentGateway::new()),
            email: Arc::new(MockEmailProvider::new()),
            clock: Arc::new(test_clock()),
        }
    }

    #[test]
    fn registers_every_job() {
        let config = Config::from_lookup(|_| None);
        let app = build(&config, adapters());
        let names = app.scheduler.unwrap().job_names();
        assert_eq!(names.len(), 8);
        assert_eq!(app.state.webhooks.tolerance_secs, 300);
    }

    #[test]
    fn disabled_jobs_build_no_scheduler() {
        let config = Config::from_lookup(|key| (key == "JOBS_ENABLED").then(|| "false".to_string()));
        assert!(build(&config, adapters()).scheduler.is_none());
    }
}
