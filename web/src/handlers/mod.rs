//! HTTP request handlers, one module per surface.

pub mod attendance;
pub mod health;
pub mod kiosk;
pub mod unlock;
pub mod webhooks;

pub use health::health_check;
