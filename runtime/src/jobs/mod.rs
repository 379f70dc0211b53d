//! Periodic jobs.
//!
//! Each job is a scan over rows whose deadline has passed. A job run never stops at the
//! first bad row: items are processed one by one, failures are logged and counted, and the
//! next tick retries whatever is still due. Every item action is safe to repeat because
//! the writes behind it are conditional.

use crate::metrics::{self as m, counter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simbay_core::error::Result;
use std::future::Future;
use std::time::Duration;

pub mod booking_jobs;
pub mod league_jobs;
pub mod scheduler;

pub use booking_jobs::{ExpiryReclamationJob, NotificationDispatchJob, ReminderJob};
pub use league_jobs::{
    AttendanceCutoffJob, AttendanceReminderJob, HandicapRecalculationJob,
    LeagueModeDeactivationJob, TeamDeadlineJob,
};

/// Counts from one job run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Candidate rows examined
    pub scanned: usize,
    /// Rows the job changed
    pub acted: usize,
    /// Rows that needed nothing (not due, already handled, lost a race)
    pub skipped: usize,
    /// Rows that failed and will be retried on a later tick
    pub failed: usize,
}

impl JobReport {
    /// Adds another report's counts to this one
    pub fn merge(&mut self, other: Self) {
        self.scanned += other.scanned;
        self.acted += other.acted;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// A job the scheduler ticks on a fixed interval
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    /// Stable name used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Time between runs
    fn interval(&self) -> Duration;

    /// Runs one scan at `now`.
    ///
    /// # Errors
    ///
    /// Only when the candidate rows cannot be loaded at all.
    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport>;
}

/// Keeps the items whose deadline has been reached at `now`
pub fn scan_due<T, D>(items: Vec<T>, deadline_of: D, now: DateTime<Utc>) -> Vec<T>
where
    D: Fn(&T) -> DateTime<Utc>,
{
    items
        .into_iter()
        .filter(|item| now >= deadline_of(item))
        .collect()
}

/// Runs `action` for every item, isolating failures.
///
/// `Ok(true)` counts as acted, `Ok(false)` as skipped and `Err` as failed; a failure is
/// logged with the item's key and never stops the loop.
pub async fn for_each_isolated<T, K, F, Fut>(
    job: &'static str,
    items: Vec<T>,
    key: K,
    mut action: F,
) -> JobReport
where
    K: Fn(&T) -> String,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut report = JobReport {
        scanned: items.len(),
        ..JobReport::default()
    };
    for item in items {
        let item_key = key(&item);
        match action(item).await {
            Ok(true) => report.acted += 1,
            Ok(false) => report.skipped += 1,
            Err(e) => {
                report.failed += 1;
                counter!(m::JOB_ITEM_FAILURES, "job" => job).increment(1);
                tracing::error!(job, item = %item_key, error = %e, "Job item failed");
            },
        }
    }
    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use simbay_core::error::BookingError;

    #[tokio::test]
    async fn failing_item_does_not_stop_the_rest() {
        let report = for_each_isolated(
            "test",
            vec![1, 2, 3, 4],
            ToString::to_string,
            |n| async move {
                match n {
                    2 => Err(BookingError::Validation("bad row".into())),
                    3 => Ok(false),
                    _ => Ok(true),
                }
            },
        )
        .await;

        assert_eq!(
            report,
            JobReport {
                scanned: 4,
                acted: 2,
                skipped: 1,
                failed: 1,
            }
        );
    }

    #[test]
    fn scan_due_includes_the_exact_deadline() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap();
        let deadlines = vec![
            now - ChronoDuration::seconds(1),
            now,
            now + ChronoDuration::seconds(1),
        ];
        let due = scan_due(deadlines, |d| *d, now);
        assert_eq!(due.len(), 2);
    }

    #[test]
    fn merge_adds_counts() {
        let mut total = JobReport {
            scanned: 1,
            acted: 1,
            ..JobReport::default()
        };
        total.merge(JobReport {
            scanned: 2,
            skipped: 1,
            failed: 1,
            ..JobReport::default()
        });
        assert_eq!(total.scanned, 3);
        assert_eq!(total.acted, 1);
        assert_eq!(total.skipped, 1);
        assert_eq!(total.failed, 1);
    }
}
