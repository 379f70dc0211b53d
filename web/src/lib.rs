//! HTTP and WebSocket surface of the Simbay bay-booking backend.
//!
//! Handlers are thin: they verify and parse the request, call one runtime service and map
//! the result to a response. All booking and payment rules live in `simbay-core` and
//! `simbay-runtime`.
//!
//! # Routes
//!
//! | Method | Path                          | Purpose                            |
//! |--------|-------------------------------|------------------------------------|
//! | GET    | `/health`                     | liveness                           |
//! | GET    | `/health/ready`               | store and kiosk readiness          |
//! | POST   | `/webhooks/payments`          | signed payment provider events     |
//! | POST   | `/webhooks/email`             | signed email delivery events       |
//! | GET    | `/unlock/:token`              | unlock link from a reminder email  |
//! | GET    | `/attendance/:token/:answer`  | league attendance confirm/decline  |
//! | GET    | `/kiosk/ws`                   | kiosk WebSocket channel            |
//!
//! # Example
//!
//! ```ignore
//! let app = simbay_web::router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod signature;
pub mod state;

pub use error::AppError;
pub use state::{AppState, WebhookSecrets};

use axum::{
    routing::{get, post},
    Router,
};
use handlers::{attendance, health, kiosk, unlock, webhooks};
use tower_http::trace::TraceLayer;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness))
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .route("/webhooks/email", post(webhooks::email_webhook))
        .route("/unlock/:token", get(unlock::unlock_by_link))
        .route("/attendance/:token/:answer", get(attendance::respond))
        .route("/kiosk/ws", get(kiosk::kiosk_socket))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
