//! Fixed registry of independently ticking jobs.
//!
//! Each registered job gets its own tokio task and timer. Jobs never wait on each other;
//! a slow run delays only its own next tick (missed ticks are skipped, not bunched).
//!
//! # Example
//!
//! ```rust,ignore
//! let mut scheduler = JobScheduler::new(clock);
//! scheduler.register(Arc::new(ExpiryReclamationJob::new(lifecycle, intervals.expiry)));
//!
//! let (shutdown_tx, _) = broadcast::channel(1);
//! let handles = scheduler.start(&shutdown_tx);
//! // ...
//! let _ = shutdown_tx.send(());
//! ```

use super::{JobReport, PeriodicJob};
use crate::metrics::{self as m, counter, histogram};
use simbay_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Tick interval of every job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobIntervals {
    /// Expiry reclamation
    pub expiry: Duration,
    /// Notification dispatch
    pub notifications: Duration,
    /// Unlock reminder enqueue
    pub reminders: Duration,
    /// Handicap recalculation sweep
    pub handicaps: Duration,
    /// Team payment deadline enforcement
    pub team_deadline: Duration,
    /// League-mode auto-deactivation
    pub league_mode: Duration,
    /// Attendance reminder emails
    pub attendance_reminder: Duration,
    /// Attendance cutoff and capacity reconciliation
    pub attendance_cutoff: Duration,
}

impl Default for JobIntervals {
    fn default() -> Self {
        Self {
            expiry: Duration::from_secs(2 * 60),
            notifications: Duration::from_secs(60),
            reminders: Duration::from_secs(5 * 60),
            handicaps: Duration::from_secs(24 * 60 * 60),
            team_deadline: Duration::from_secs(5 * 60),
            league_mode: Duration::from_secs(5 * 60),
            attendance_reminder: Duration::from_secs(5 * 60),
            attendance_cutoff: Duration::from_secs(5 * 60),
        }
    }
}

/// Scheduler configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Start the jobs at all; off for web-only replicas
    pub enabled: bool,
    /// Per-job intervals
    pub intervals: JobIntervals,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            intervals: JobIntervals::default(),
        }
    }
}

/// Owns the registered jobs until [`JobScheduler::start`] spawns them
pub struct JobScheduler {
    clock: Arc<dyn Clock>,
    jobs: Vec<Arc<dyn PeriodicJob>>,
}

impl JobScheduler {
    /// Creates an empty scheduler reading time from `clock`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: Vec::new(),
        }
    }

    /// Adds a job
    pub fn register(&mut self, job: Arc<dyn PeriodicJob>) {
        self.jobs.push(job);
    }

    /// Names of the registered jobs, in registration order
    #[must_use]
    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|job| job.name()).collect()
    }

    /// Spawns one task per job. Each task stops when `shutdown` fires.
    #[must_use]
    pub fn start(self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        info!(jobs = self.jobs.len(), "Starting job scheduler");
        self.jobs
            .into_iter()
            .map(|job| {
                let clock = Arc::clone(&self.clock);
                let mut shutdown = shutdown.subscribe();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(job.interval());
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    info!(job = job.name(), interval_secs = job.interval().as_secs(), "Job started");
                    loop {
                        tokio::select! {
                            _ = shutdown.recv() => {
                                info!(job = job.name(), "Job received shutdown signal");
                                break;
                            }
                            _ = ticker.tick() => {
                                run_once(job.as_ref(), clock.as_ref()).await;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

/// Runs a job once, recording its metrics. A failed run is logged and reported empty.
pub async fn run_once(job: &dyn PeriodicJob, clock: &dyn Clock) -> JobReport {
    let name = job.name();
    let started = tokio::time::Instant::now();
    let result = job.run(clock.now()).await;
    let elapsed = started.elapsed();

    counter!(m::JOB_RUNS, "job" => name).increment(1);
    histogram!(m::JOB_RUN_DURATION, "job" => name).record(elapsed.as_secs_f64());

    match result {
        Ok(report) => {
            if report.acted > 0 || report.failed > 0 {
                info!(
                    job = name,
                    scanned = report.scanned,
                    acted = report.acted,
                    skipped = report.skipped,
                    failed = report.failed,
                    elapsed_ms = elapsed.as_millis(),
                    "Job run finished"
                );
            } else {
                debug!(job = name, scanned = report.scanned, "Job run found nothing to do");
            }
            report
        },
        Err(e) => {
            error!(job = name, error = %e, "Job run failed");
            JobReport::default()
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use simbay_core::error::{BookingError, Result};
    use simbay_testing::test_clock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PeriodicJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn run(&self, _now: DateTime<Utc>) -> Result<JobReport> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BookingError::Validation("boom".into()));
            }
            Ok(JobReport {
                scanned: 1,
                acted: 1,
                ..JobReport::default()
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval_until_shutdown() {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            fail: true,
        });
        let mut scheduler = JobScheduler::new(Arc::new(test_clock()));
        scheduler.register(Arc::clone(&job) as Arc<dyn PeriodicJob>);
        assert_eq!(scheduler.job_names(), vec!["counting"]);

        let (shutdown, _) = broadcast::channel(1);
        let handles = scheduler.start(&shutdown);

        // first tick fires immediately, then every 60s; a failing run keeps the timer alive
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);

        shutdown.send(()).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_once_returns_the_job_report() {
        let job = CountingJob {
            runs: AtomicUsize::new(0),
            fail: false,
        };
        let report = run_once(&job, &test_clock()).await;
        assert_eq!(report.acted, 1);
    }
}
