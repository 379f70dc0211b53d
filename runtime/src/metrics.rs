//! Prometheus metrics for observability and monitoring.
//!
//! Components record through the `metrics` facade using the names below; the server
//! installs the Prometheus recorder once at startup and serves the rendered text on its
//! own listener.
//!
//! # Example
//!
//! ```rust,no_run
//! use simbay_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let text = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Reservations created
pub const BOOKINGS_RESERVED: &str = "bookings_reserved_total";
/// Holds reclaimed by the expiry job
pub const BOOKINGS_EXPIRED: &str = "bookings_expired_total";
/// Bookings confirmed by a payment success
pub const BOOKINGS_CONFIRMED: &str = "bookings_confirmed_total";
/// Bookings cancelled, labelled by actor
pub const BOOKINGS_CANCELLED: &str = "bookings_cancelled_total";
/// New provider intents
pub const PAYMENT_INTENTS_CREATED: &str = "payment_intents_created_total";
/// Existing intents handed back on retry
pub const PAYMENT_INTENTS_REUSED: &str = "payment_intents_reused_total";
/// Refunds requested, labelled by outcome
pub const REFUNDS: &str = "refunds_total";
/// Disputes opened by card holders
pub const PAYMENT_DISPUTES: &str = "payment_disputes_total";
/// Unlock attempts, labelled by outcome
pub const UNLOCK_REQUESTS: &str = "unlock_requests_total";
/// Time from unlock command to acknowledgment or timeout
pub const UNLOCK_ACK_DURATION: &str = "unlock_ack_duration_seconds";
/// Emails accepted by the provider
pub const NOTIFICATIONS_SENT: &str = "notifications_sent_total";
/// Emails rejected or errored
pub const NOTIFICATIONS_FAILED: &str = "notifications_failed_total";
/// Effects that failed after their transition committed
pub const EFFECT_FAILURES: &str = "effect_failures_total";
/// Job runs, labelled by job
pub const JOB_RUNS: &str = "job_runs_total";
/// Per-item failures inside a job run, labelled by job
pub const JOB_ITEM_FAILURES: &str = "job_item_failures_total";
/// Job run latency, labelled by job
pub const JOB_RUN_DURATION: &str = "job_run_duration_seconds";
/// Open kiosk connections
pub const KIOSK_CONNECTIONS: &str = "kiosk_connections";
/// Webhook deliveries, labelled by event kind
pub const WEBHOOK_EVENTS: &str = "webhook_events_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address it is served on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server bound (later) to `addr`
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the server binary should serve `/metrics` on
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe every metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or a different recorder is already
    /// installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                register_metrics();
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }

    /// Clonable handle for an HTTP route
    #[must_use]
    pub fn handle(&self) -> Option<PrometheusHandle> {
        self.handle.clone()
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(BOOKINGS_RESERVED, "Reservations created");
    describe_counter!(BOOKINGS_EXPIRED, "Reserved bookings whose hold lapsed");
    describe_counter!(BOOKINGS_CONFIRMED, "Bookings confirmed by payment");
    describe_counter!(BOOKINGS_CANCELLED, "Bookings cancelled");

    describe_counter!(PAYMENT_INTENTS_CREATED, "Payment intents created at the provider");
    describe_counter!(PAYMENT_INTENTS_REUSED, "Payment intents reused on retry");
    describe_counter!(REFUNDS, "Refund requests by outcome");
    describe_counter!(PAYMENT_DISPUTES, "Card disputes received");

    describe_counter!(UNLOCK_REQUESTS, "Door unlock attempts by outcome");
    describe_histogram!(UNLOCK_ACK_DURATION, "Time waiting for kiosk acknowledgment");
    describe_gauge!(KIOSK_CONNECTIONS, "Open kiosk connections");

    describe_counter!(NOTIFICATIONS_SENT, "Emails accepted by the provider");
    describe_counter!(NOTIFICATIONS_FAILED, "Emails that failed to send");
    describe_counter!(EFFECT_FAILURES, "Effects that failed after commit");

    describe_counter!(JOB_RUNS, "Periodic job runs");
    describe_counter!(JOB_ITEM_FAILURES, "Rows a job failed to process");
    describe_histogram!(JOB_RUN_DURATION, "Periodic job run duration");

    describe_counter!(WEBHOOK_EVENTS, "Inbound webhook events by kind");
}
