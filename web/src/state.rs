//! Application state shared across all handlers.

use simbay_core::environment::Clock;
use simbay_core::store::Store;
use simbay_runtime::{
    EffectExecutor, LifecycleManager, NotificationDispatcher, UnlockCoordinator, UnlockService,
};
use std::sync::Arc;

/// Shared secrets for inbound webhooks
#[derive(Clone, Debug)]
pub struct WebhookSecrets {
    /// Payment provider signing secret
    pub payment: String,
    /// Email provider signing secret
    pub email: String,
    /// Accepted timestamp drift, in seconds
    pub tolerance_secs: i64,
}

/// Components every handler may reach.
///
/// Cloned per request; everything inside is reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Persistence
    pub store: Arc<dyn Store>,
    /// Booking and payment transitions
    pub lifecycle: Arc<LifecycleManager>,
    /// Door unlock flow
    pub unlock: Arc<UnlockService>,
    /// Kiosk channel registry
    pub coordinator: Arc<UnlockCoordinator>,
    /// Schedule refreshes pushed to kiosks
    pub effects: Arc<EffectExecutor>,
    /// Email delivery events
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Webhook verification
    pub webhooks: WebhookSecrets,
}
