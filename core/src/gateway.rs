//! Payment gateway trait.
//!
//! Only the operations the booking lifecycle needs: create, retrieve and cancel intents,
//! and refund. Provider specifics live in the server crate.

use crate::error::BookingError;
use crate::ids::BookingId;
use crate::model::PaymentKind;
use crate::money::Money;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider-side intent status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Waiting for a card
    RequiresPaymentMethod,
    /// Card attached, waiting for confirmation
    RequiresConfirmation,
    /// 3-D Secure or similar in progress
    RequiresAction,
    /// Provider is processing
    Processing,
    /// Completed
    Succeeded,
    /// Cancelled
    Canceled,
}

text_enum!(IntentStatus, "intent status", {
    RequiresPaymentMethod => "requires_payment_method",
    RequiresConfirmation => "requires_confirmation",
    RequiresAction => "requires_action",
    Processing => "processing",
    Succeeded => "succeeded",
    Canceled => "canceled",
});

impl IntentStatus {
    /// The client can still complete this intent
    #[must_use]
    pub const fn is_reusable(self) -> bool {
        !matches!(self, Self::Succeeded | Self::Canceled)
    }
}

/// Request for a charge intent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateIntent {
    /// Booking the charge is for
    pub booking_id: BookingId,
    /// Amount to charge
    pub amount: Money,
    /// Currency code
    pub currency: String,
    /// Provider customer to attach, so the card can be reused off-session
    pub customer: Option<String>,
    /// Provider-side deduplication key
    pub idempotency_key: String,
}

/// Request for a zero-value save-card intent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateSetupIntent {
    /// Booking the card is saved for
    pub booking_id: BookingId,
    /// Provider customer to attach
    pub customer: Option<String>,
    /// Provider-side deduplication key
    pub idempotency_key: String,
}

/// Intent as returned by the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentHandle {
    /// Provider intent id
    pub intent_id: String,
    /// Secret the client uses to complete the intent
    pub client_secret: Option<String>,
    /// Provider status
    pub status: IntentStatus,
}

/// Refund request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundRequest {
    /// Intent to refund
    pub intent_id: String,
    /// Partial amount; `None` refunds in full
    pub amount: Option<Money>,
    /// Provider-side deduplication key
    pub idempotency_key: String,
}

/// Provider-side refund status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    /// Accepted, not yet settled
    Pending,
    /// Settled
    Succeeded,
    /// Rejected
    Failed,
    /// Cancelled before settling
    Canceled,
}

text_enum!(RefundStatus, "refund status", {
    Pending => "pending",
    Succeeded => "succeeded",
    Failed => "failed",
    Canceled => "canceled",
});

/// Refund as returned by the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundHandle {
    /// Provider refund id
    pub refund_id: String,
    /// Status
    pub status: RefundStatus,
    /// Amount refunded
    pub amount: Money,
}

/// Payment gateway failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Provider answered with an error; the message is safe to show the customer
    #[error("{message}")]
    Api {
        /// Provider message
        message: String,
        /// Provider error code, if any
        code: Option<String>,
    },

    /// Provider could not be reached or answered garbage
    #[error("payment provider unavailable: {0}")]
    Transport(String),
}

impl From<GatewayError> for BookingError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err.to_string())
    }
}

/// Payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a charge intent.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the provider rejects or cannot be reached.
    async fn create_payment_intent(&self, request: &CreateIntent) -> Result<IntentHandle, GatewayError>;

    /// Creates a zero-value intent that only saves a payment method.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the provider rejects or cannot be reached.
    async fn create_setup_intent(
        &self,
        request: &CreateSetupIntent,
    ) -> Result<IntentHandle, GatewayError>;

    /// Fetches an intent's current state.
    ///
    /// `kind` is the kind the intent was created as; charge and save-card intents live
    /// under different provider resources.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the provider rejects or cannot be reached.
    async fn retrieve_intent(
        &self,
        kind: PaymentKind,
        intent_id: &str,
    ) -> Result<IntentHandle, GatewayError>;

    /// Cancels an intent that will not be used.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the provider rejects or cannot be reached.
    async fn cancel_intent(&self, kind: PaymentKind, intent_id: &str) -> Result<(), GatewayError>;

    /// Refunds a succeeded intent.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the provider rejects or cannot be reached.
    async fn refund(&self, request: &RefundRequest) -> Result<RefundHandle, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_intents_are_not_reusable() {
        assert!(IntentStatus::RequiresPaymentMethod.is_reusable());
        assert!(IntentStatus::Processing.is_reusable());
        assert!(!IntentStatus::Succeeded.is_reusable());
        assert!(!IntentStatus::Canceled.is_reusable());
        assert_eq!("requires_action".parse(), Ok(IntentStatus::RequiresAction));
    }
}
