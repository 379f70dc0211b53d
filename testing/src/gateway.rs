//! Mock payment gateway.

use async_trait::async_trait;
use simbay_core::gateway::{
    CreateIntent, CreateSetupIntent, GatewayError, IntentHandle, IntentStatus, PaymentGateway,
    RefundHandle, RefundRequest, RefundStatus,
};
use simbay_core::model::PaymentKind;
use simbay_core::money::Money;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct GatewayState {
    next_id: u32,
    intents: HashMap<String, (PaymentKind, IntentHandle)>,
    amounts: HashMap<String, Money>,
    by_idempotency_key: HashMap<String, String>,
    created: Vec<String>,
    setup_intents: Vec<String>,
    cancelled: Vec<String>,
    refunds: Vec<RefundRequest>,
    fail_create: bool,
    fail_refunds: bool,
    ignore_idempotency_keys: bool,
    create_latency: Option<Duration>,
}

/// Records every gateway call and honours idempotency keys like the real provider
#[derive(Default)]
pub struct MockPaymentGateway {
    state: Mutex<GatewayState>,
}

impl std::fmt::Debug for MockPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPaymentGateway").finish_non_exhaustive()
    }
}

impl MockPaymentGateway {
    /// A gateway that accepts everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Intent creation fails with an API error
    pub fn fail_create(&self, failing: bool) {
        self.state().fail_create = failing;
    }

    /// Refunds fail with an API error
    pub fn fail_refunds(&self, failing: bool) {
        self.state().fail_refunds = failing;
    }

    /// Every create mints a fresh intent, as the provider does once a key has expired
    pub fn ignore_idempotency_keys(&self, ignoring: bool) {
        self.state().ignore_idempotency_keys = ignoring;
    }

    /// Creates wait this long before answering, letting concurrent callers interleave
    pub fn set_create_latency(&self, latency: Duration) {
        self.state().create_latency = Some(latency);
    }

    async fn create_delay(&self) {
        let latency = self.state().create_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Overrides an intent's provider status
    pub fn set_intent_status(&self, intent_id: &str, status: IntentStatus) {
        if let Some((_, intent)) = self.state().intents.get_mut(intent_id) {
            intent.status = status;
        }
    }

    /// Charge intents created, in order
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.state().created.clone()
    }

    /// Save-card intents created, in order
    #[must_use]
    pub fn setup_intents(&self) -> Vec<String> {
        self.state().setup_intents.clone()
    }

    /// Intents cancelled, in order
    #[must_use]
    pub fn cancelled(&self) -> Vec<String> {
        self.state().cancelled.clone()
    }

    /// Refund requests, in order
    #[must_use]
    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.state().refunds.clone()
    }

    fn mint(state: &mut GatewayState, kind: PaymentKind, key: &str, amount: Money) -> IntentHandle {
        if let Some((_, existing)) = state
            .by_idempotency_key
            .get(key)
            .filter(|_| !state.ignore_idempotency_keys)
            .and_then(|id| state.intents.get(id))
        {
            return existing.clone();
        }
        state.next_id += 1;
        let prefix = match kind {
            PaymentKind::Charge => "pi",
            PaymentKind::SaveCard => "seti",
        };
        let intent_id = format!("{prefix}_mock_{}", state.next_id);
        let handle = IntentHandle {
            intent_id: intent_id.clone(),
            client_secret: Some(format!("{intent_id}_secret")),
            status: IntentStatus::RequiresPaymentMethod,
        };
        state.intents.insert(intent_id.clone(), (kind, handle.clone()));
        state.amounts.insert(intent_id.clone(), amount);
        state.by_idempotency_key.insert(key.to_string(), intent_id);
        handle
    }
}

/// The provider's answer for an id looked up under the wrong resource
fn missing(kind: PaymentKind, intent_id: &str) -> GatewayError {
    let resource = match kind {
        PaymentKind::Charge => "payment_intent",
        PaymentKind::SaveCard => "setup_intent",
    };
    GatewayError::Api {
        message: format!("No such {resource}: '{intent_id}'"),
        code: Some("resource_missing".to_string()),
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_payment_intent(&self, request: &CreateIntent) -> Result<IntentHandle, GatewayError> {
        self.create_delay().await;
        let mut state = self.state();
        if state.fail_create {
            return Err(GatewayError::Api {
                message: "Your card was declined.".to_string(),
                code: Some("card_declined".to_string()),
            });
        }
        let handle = Self::mint(&mut state, PaymentKind::Charge, &request.idempotency_key, request.amount);
        if !state.created.contains(&handle.intent_id) {
            state.created.push(handle.intent_id.clone());
        }
        Ok(handle)
    }

    async fn create_setup_intent(
        &self,
        request: &CreateSetupIntent,
    ) -> Result<IntentHandle, GatewayError> {
        self.create_delay().await;
        let mut state = self.state();
        if state.fail_create {
            return Err(GatewayError::Transport("connection reset".to_string()));
        }
        let handle = Self::mint(&mut state, PaymentKind::SaveCard, &request.idempotency_key, Money::ZERO);
        if !state.setup_intents.contains(&handle.intent_id) {
            state.setup_intents.push(handle.intent_id.clone());
        }
        Ok(handle)
    }

    async fn retrieve_intent(
        &self,
        kind: PaymentKind,
        intent_id: &str,
    ) -> Result<IntentHandle, GatewayError> {
        match self.state().intents.get(intent_id) {
            Some((stored, intent)) if *stored == kind => Ok(intent.clone()),
            _ => Err(missing(kind, intent_id)),
        }
    }

    async fn cancel_intent(&self, kind: PaymentKind, intent_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state();
        match state.intents.get_mut(intent_id) {
            Some((stored, intent)) if *stored == kind => intent.status = IntentStatus::Canceled,
            _ => return Err(missing(kind, intent_id)),
        }
        state.cancelled.push(intent_id.to_string());
        Ok(())
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundHandle, GatewayError> {
        let mut state = self.state();
        if state.fail_refunds {
            return Err(GatewayError::Api {
                message: "Charge has already been refunded.".to_string(),
                code: Some("charge_already_refunded".to_string()),
            });
        }
        state.refunds.push(request.clone());
        let amount = request.amount.unwrap_or_else(|| {
            state
                .amounts
                .get(&request.intent_id)
                .copied()
                .unwrap_or(Money::ZERO)
        });
        Ok(RefundHandle {
            refund_id: format!("re_mock_{}", state.refunds.len()),
            status: RefundStatus::Pending,
            amount,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use simbay_core::ids::BookingId;

    #[tokio::test]
    async fn same_idempotency_key_returns_same_intent() {
        let gateway = MockPaymentGateway::new();
        let request = CreateIntent {
            booking_id: BookingId::new(),
            amount: Money::from_cents(1500),
            currency: "usd".into(),
            customer: None,
            idempotency_key: "k1".into(),
        };
        let a = gateway.create_payment_intent(&request).await.unwrap();
        let b = gateway.create_payment_intent(&request).await.unwrap();
        assert_eq!(a.intent_id, b.intent_id);
        assert_eq!(gateway.created().len(), 1);
    }

    #[tokio::test]
    async fn setup_intents_are_only_found_as_save_card() {
        let gateway = MockPaymentGateway::new();
        let request = CreateSetupIntent {
            booking_id: BookingId::new(),
            customer: None,
            idempotency_key: "k2".into(),
        };
        let seti = gateway.create_setup_intent(&request).await.unwrap();

        assert!(gateway.retrieve_intent(PaymentKind::Charge, &seti.intent_id).await.is_err());
        assert!(gateway.cancel_intent(PaymentKind::Charge, &seti.intent_id).await.is_err());
        gateway
            .cancel_intent(PaymentKind::SaveCard, &seti.intent_id)
            .await
            .unwrap();
        let fetched = gateway
            .retrieve_intent(PaymentKind::SaveCard, &seti.intent_id)
            .await
            .unwrap();
        assert_eq!(fetched.status, IntentStatus::Canceled);
        assert_eq!(gateway.cancelled(), vec![seti.intent_id]);
    }
}
