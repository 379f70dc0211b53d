//! # Simbay Testing
//!
//! Test doubles shared by every crate's tests.
//!
//! This crate provides:
//! - `FixedClock` and `ManualClock` for deterministic time
//! - `InMemoryStore` with the same conditional-update semantics as the Postgres store
//! - `MockPaymentGateway` and `MockEmailProvider` that record every call
//! - Fixtures that seed a venue, bay, customer and day/night pricing
//!
//! ## Example
//!
//! ```ignore
//! use simbay_testing::{fixtures, InMemoryStore, ManualClock};
//!
//! #[tokio::test]
//! async fn expiry_reclaims_lapsed_hold() {
//!     let store = InMemoryStore::new();
//!     let venue = fixtures::seed_venue(&store);
//!     let clock = ManualClock::new(fixtures::t0());
//!     // ...
//! }
//! ```

pub mod clock;
pub mod email;
pub mod fixtures;
pub mod gateway;
pub mod store;

pub use clock::{FixedClock, ManualClock, test_clock};
pub use email::MockEmailProvider;
pub use gateway::MockPaymentGateway;
pub use store::InMemoryStore;

/// Installs a test tracing subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
