//! Stripe REST payment gateway.
//!
//! Requests are form-encoded and carry an `Idempotency-Key`; the provider returns the
//! same intent or refund for a repeated key. 4xx answers become
//! [`GatewayError::Api`] with the provider's message, which is safe to show to the
//! customer. Network failures, 429 and 5xx become [`GatewayError::Transport`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use simbay_core::gateway::{
    CreateIntent, CreateSetupIntent, GatewayError, IntentHandle, IntentStatus, PaymentGateway,
    RefundHandle, RefundRequest, RefundStatus,
};
use simbay_core::model::PaymentKind;
use simbay_core::money::Money;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Stripe API client
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct IntentBody {
    id: String,
    client_secret: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RefundBody {
    id: String,
    status: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
}

fn intent_handle(body: IntentBody) -> Result<IntentHandle, GatewayError> {
    let status = body
        .status
        .parse::<IntentStatus>()
        .map_err(|e| GatewayError::Transport(format!("unexpected intent status: {e}")))?;
    Ok(IntentHandle {
        intent_id: body.id,
        client_secret: body.client_secret,
        status,
    })
}

/// Charges are payment intents; saved cards are setup intents
const fn intent_resource(kind: PaymentKind) -> &'static str {
    match kind {
        PaymentKind::Charge => "payment_intents",
        PaymentKind::SaveCard => "setup_intents",
    }
}

/// Stripe reports `requires_action` for refunds needing customer input; we treat it as pending.
fn refund_status(raw: &str) -> RefundStatus {
    raw.parse().unwrap_or(RefundStatus::Pending)
}

impl StripeGateway {
    /// Creates a client against `api_base` (e.g. `https://api.stripe.com/v1`)
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the HTTP client cannot be built.
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn post(&self, path: &str, idempotency_key: Option<&str>) -> RequestBuilder {
        let request = self
            .client
            .post(format!("{}/{path}", self.api_base))
            .bearer_auth(&self.secret_key);
        match idempotency_key {
            Some(key) => request.header("Idempotency-Key", key),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Transport(format!("unreadable response: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            tracing::warn!(status = status.as_u16(), "Payment provider unavailable");
            return Err(GatewayError::Transport(format!("status {}", status.as_u16())));
        }
        let (message, code) = serde_json::from_str::<ErrorEnvelope>(&body).map_or_else(
            |_| (format!("payment provider rejected the request ({status})"), None),
            |env| {
                (
                    env.error
                        .message
                        .unwrap_or_else(|| "payment provider rejected the request".to_string()),
                    env.error.code,
                )
            },
        );
        tracing::info!(status = status.as_u16(), code = ?code, "Payment provider rejected request");
        Err(GatewayError::Api { message, code })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment_intent(&self, request: &CreateIntent) -> Result<IntentHandle, GatewayError> {
        let mut form = vec![
            ("amount", request.amount.cents().to_string()),
            ("currency", request.currency.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[booking_id]", request.booking_id.to_string()),
        ];
        if let Some(customer) = &request.customer {
            form.push(("customer", customer.clone()));
            form.push(("setup_future_usage", "off_session".to_string()));
        }
        let body: IntentBody = self
            .send(self.post("payment_intents", Some(&request.idempotency_key)).form(&form))
            .await?;
        intent_handle(body)
    }

    async fn create_setup_intent(&self, request: &CreateSetupIntent) -> Result<IntentHandle, GatewayError> {
        let mut form = vec![
            ("usage", "off_session".to_string()),
            ("metadata[booking_id]", request.booking_id.to_string()),
        ];
        if let Some(customer) = &request.customer {
            form.push(("customer", customer.clone()));
        }
        let body: IntentBody = self
            .send(self.post("setup_intents", Some(&request.idempotency_key)).form(&form))
            .await?;
        intent_handle(body)
    }

    async fn retrieve_intent(&self, kind: PaymentKind, intent_id: &str) -> Result<IntentHandle, GatewayError> {
        let request = self
            .client
            .get(format!("{}/{}/{intent_id}", self.api_base, intent_resource(kind)))
            .bearer_auth(&self.secret_key);
        intent_handle(self.send(request).await?)
    }

    async fn cancel_intent(&self, kind: PaymentKind, intent_id: &str) -> Result<(), GatewayError> {
        let path = format!("{}/{intent_id}/cancel", intent_resource(kind));
        let _: IntentBody = self.send(self.post(&path, None)).await?;
        Ok(())
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundHandle, GatewayError> {
        let mut form = vec![("payment_intent", request.intent_id.clone())];
        if let Some(amount) = request.amount {
            form.push(("amount", amount.cents().to_string()));
        }
        let body: RefundBody = self
            .send(self.post("refunds", Some(&request.idempotency_key)).form(&form))
            .await?;
        Ok(RefundHandle {
            refund_id: body.id,
            status: refund_status(&body.status),
            amount: Money::from_cents(body.amount),
        })
    }
}
