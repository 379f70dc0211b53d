//! # Simbay Runtime
//!
//! Imperative shell around [`simbay_core`].
//!
//! Every component here follows the same loop: read rows through the store traits, ask
//! the core what to do, perform one conditional write, then run the resulting effects.
//! Collaborators (store, payment gateway, email provider, clock) are injected as trait
//! objects at startup so tests substitute the doubles from `simbay-testing`.
//!
//! ## Core Components
//!
//! - **Lifecycle manager**: reservation, payment and cancellation transitions
//! - **Effect executor**: runs effects after the write that produced them
//! - **Unlock coordinator**: kiosk channel registry with acknowledged unlock commands
//! - **Unlock service**: access policy, kiosk round-trip and audit log
//! - **Notification dispatcher**: rate-limited email sending
//! - **Jobs**: periodic scans driven by wall-clock deadlines, plus their scheduler
//!
//! ## Example
//!
//! ```ignore
//! use simbay_runtime::lifecycle::LifecycleManager;
//!
//! let handle = lifecycle.initiate_payment(booking_id).await?;
//! // hand handle.client_secret to the customer's browser
//! ```

/// Effect execution after committed transitions
pub mod effects;

/// Component health reporting
pub mod health;

/// Periodic jobs and the scheduler that ticks them
pub mod jobs;

/// Kiosk channel registry and unlock acknowledgments
pub mod kiosk;

/// Booking lifecycle manager
pub mod lifecycle;

/// Prometheus metrics for observability
pub mod metrics;

/// Email rendering and dispatch
pub mod notifications;

/// Unlock-token issuance and reminder emails
pub mod reminders;

/// Retry logic with exponential backoff
pub mod retry;

/// Door unlock flow with audit logging
pub mod unlock;

pub use effects::EffectExecutor;
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use jobs::scheduler::{JobScheduler, SchedulerSettings};
pub use jobs::{JobReport, PeriodicJob};
pub use kiosk::{CoordinatorSettings, KioskMessage, ServerMessage, UnlockCoordinator};
pub use lifecycle::{LifecycleManager, LifecycleSettings, PaymentHandle};
pub use notifications::{DispatcherSettings, NotificationDispatcher};
pub use reminders::{LinkSettings, ReminderIssuer};
pub use unlock::{UnlockOutcome, UnlockService};
