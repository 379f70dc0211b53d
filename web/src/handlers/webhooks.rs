//! Signed provider webhooks.
//!
//! Both endpoints verify the signature over the raw body before parsing anything. A bad
//! signature is answered 400 with no side effects. Once verified:
//!
//! - events that cannot be applied (unknown intent, stale state) are logged and
//!   acknowledged with 200 so the provider stops redelivering
//! - store and upstream failures answer 500 so the provider redelivers
//! - unknown event types are acknowledged and ignored

use crate::error::AppError;
use crate::signature;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use simbay_core::error::{BookingError, ErrorCategory};
use simbay_core::gateway::RefundStatus;
use simbay_runtime::metrics::{self as m, counter};
use simbay_runtime::notifications::DeliveryEvent;

/// Header carrying the payment provider's signature
pub const PAYMENT_SIGNATURE_HEADER: &str = "stripe-signature";

/// Header carrying the email provider's signature
pub const EMAIL_SIGNATURE_HEADER: &str = "x-email-signature";

/// Envelope shared by both providers
#[derive(Debug, Deserialize)]
pub struct ProviderEvent {
    /// Provider event id
    #[serde(default)]
    pub id: Option<String>,
    /// Event type, e.g. `payment_intent.succeeded`
    #[serde(rename = "type")]
    pub kind: String,
    /// Event payload
    #[serde(default)]
    pub data: Value,
}

/// Body returned for every accepted webhook
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookAck {
    /// Always true; the event was verified and handled or ignored
    pub received: bool,
    /// Whether the event changed local state
    pub applied: bool,
}

impl WebhookAck {
    const fn applied(applied: bool) -> Json<Self> {
        Json(Self {
            received: true,
            applied,
        })
    }
}

/// What a payment event asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentAction {
    /// `payment_intent.succeeded` or `setup_intent.succeeded`
    Succeeded {
        /// Provider intent id
        intent_id: String,
    },
    /// `payment_intent.canceled` or `setup_intent.canceled`
    Canceled {
        /// Provider intent id
        intent_id: String,
        /// Provider's cancellation reason
        reason: Option<String>,
    },
    /// `payment_intent.payment_failed` or `setup_intent.setup_failed`
    Failed {
        /// Provider intent id
        intent_id: String,
        /// Gateway message shown to the customer
        message: Option<String>,
    },
    /// `refund.created`, `refund.updated`, `refund.failed`
    Refund {
        /// Provider refund id
        refund_id: String,
        /// Reported refund status
        status: RefundStatus,
    },
    /// `charge.dispute.created`
    Dispute {
        /// Intent of the disputed charge
        intent_id: String,
    },
    /// Anything else
    Ignored,
}

fn text_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |node, key| node.get(key))
        .and_then(Value::as_str)
}

fn required(object: &Value, key: &str, kind: &str) -> Result<String, AppError> {
    text_at(object, &[key])
        .map(ToString::to_string)
        .ok_or_else(|| AppError::bad_request(format!("{kind} event without {key}")))
}

/// Maps a verified payment event to the lifecycle call it requires.
///
/// # Errors
///
/// 400 when a recognised event lacks the fields it needs.
pub fn route_payment_event(event: &ProviderEvent) -> Result<PaymentAction, AppError> {
    let object = event.data.get("object").unwrap_or(&Value::Null);
    let kind = event.kind.as_str();
    let action = match kind {
        "payment_intent.succeeded" | "setup_intent.succeeded" => PaymentAction::Succeeded {
            intent_id: required(object, "id", kind)?,
        },
        "payment_intent.canceled" | "setup_intent.canceled" => PaymentAction::Canceled {
            intent_id: required(object, "id", kind)?,
            reason: text_at(object, &["cancellation_reason"]).map(ToString::to_string),
        },
        "payment_intent.payment_failed" => PaymentAction::Failed {
            intent_id: required(object, "id", kind)?,
            message: text_at(object, &["last_payment_error", "message"]).map(ToString::to_string),
        },
        "setup_intent.setup_failed" => PaymentAction::Failed {
            intent_id: required(object, "id", kind)?,
            message: text_at(object, &["last_setup_error", "message"]).map(ToString::to_string),
        },
        "refund.created" | "refund.updated" | "charge.refund.updated" | "refund.failed" => {
            let status = if kind == "refund.failed" {
                RefundStatus::Failed
            } else {
                required(object, "status", kind)?
                    .parse()
                    .map_err(|e| AppError::bad_request(format!("{e}")))?
            };
            PaymentAction::Refund {
                refund_id: required(object, "id", kind)?,
                status,
            }
        },
        "charge.dispute.created" => PaymentAction::Dispute {
            intent_id: required(object, "payment_intent", kind)?,
        },
        _ => PaymentAction::Ignored,
    };
    Ok(action)
}

fn verify(
    state: &AppState,
    headers: &HeaderMap,
    header_name: &str,
    secret: &str,
    body: &[u8],
) -> Result<(), AppError> {
    let header = headers.get(header_name).and_then(|v| v.to_str().ok());
    signature::verify(header, body, secret, state.clock.now(), state.webhooks.tolerance_secs)
        .map_err(|e| {
            tracing::warn!(error = %e, header = header_name, "Rejected webhook signature");
            AppError::bad_request("Invalid webhook signature")
        })
}

fn parse_event(body: &[u8]) -> Result<ProviderEvent, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::bad_request(format!("Invalid event body: {e}")))
}

/// Turns a lifecycle result into the webhook response policy
fn settle(kind: &str, result: Result<bool, BookingError>) -> Result<Json<WebhookAck>, AppError> {
    match result {
        Ok(applied) => Ok(WebhookAck::applied(applied)),
        Err(err) => match err.category() {
            ErrorCategory::NotFound
            | ErrorCategory::StateConflict
            | ErrorCategory::Expired
            | ErrorCategory::Validation => {
                tracing::warn!(event = kind, error = %err, "Webhook event not applicable");
                Ok(WebhookAck::applied(false))
            },
            ErrorCategory::Upstream | ErrorCategory::Store | ErrorCategory::ConfigIntegrity => {
                Err(AppError::internal("Event could not be processed")
                    .with_source(anyhow::Error::new(err)))
            },
        },
    }
}

/// Payment provider events.
///
/// ```text
/// POST /webhooks/payments
/// ```
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    verify(&state, &headers, PAYMENT_SIGNATURE_HEADER, &state.webhooks.payment, &body)?;
    let event = parse_event(&body)?;
    counter!(m::WEBHOOK_EVENTS, "kind" => event.kind.clone()).increment(1);
    tracing::info!(event_id = event.id.as_deref().unwrap_or("-"), kind = %event.kind, "Payment webhook received");

    let lifecycle = &state.lifecycle;
    let result = match route_payment_event(&event)? {
        PaymentAction::Succeeded { intent_id } => lifecycle
            .on_payment_succeeded(&intent_id)
            .await
            .map(|outcome| {
                tracing::info!(%intent_id, ?outcome, "Payment success handled");
                true
            }),
        PaymentAction::Canceled { intent_id, reason } => lifecycle
            .on_payment_canceled(&intent_id, reason)
            .await
            .map(|outcome| {
                tracing::info!(%intent_id, ?outcome, "Payment cancellation handled");
                true
            }),
        PaymentAction::Failed { intent_id, message } => {
            lifecycle.on_payment_failed(&intent_id, message).await
        },
        PaymentAction::Refund { refund_id, status } => {
            lifecycle.on_refund_updated(&refund_id, status).await
        },
        PaymentAction::Dispute { intent_id } => lifecycle.on_dispute_created(&intent_id).await,
        PaymentAction::Ignored => {
            tracing::debug!(kind = %event.kind, "Ignoring payment event");
            return Ok(WebhookAck::applied(false));
        },
    };
    settle(&event.kind, result)
}

/// Maps a verified email event to a delivery event; `None` for event types we ignore.
///
/// # Errors
///
/// 400 when a delivery event lacks the message id.
pub fn route_email_event(event: &ProviderEvent) -> Result<Option<(String, DeliveryEvent)>, AppError> {
    let delivery = match event.kind.as_str() {
        "email.delivered" => DeliveryEvent::Delivered,
        "email.bounced" => DeliveryEvent::Bounced {
            reason: text_at(&event.data, &["bounce", "message"]).map(ToString::to_string),
        },
        "email.complained" => DeliveryEvent::Complained,
        _ => return Ok(None),
    };
    let message_id = required(&event.data, "email_id", &event.kind)?;
    Ok(Some((message_id, delivery)))
}

/// Email provider delivery events.
///
/// ```text
/// POST /webhooks/email
/// ```
pub async fn email_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>), AppError> {
    verify(&state, &headers, EMAIL_SIGNATURE_HEADER, &state.webhooks.email, &body)?;
    let event = parse_event(&body)?;
    counter!(m::WEBHOOK_EVENTS, "kind" => event.kind.clone()).increment(1);

    let Some((message_id, delivery)) = route_email_event(&event)? else {
        tracing::debug!(kind = %event.kind, "Ignoring email event");
        return Ok((StatusCode::OK, WebhookAck::applied(false)));
    };
    let result = state.dispatcher.on_delivery_event(&message_id, &delivery).await;
    settle(&event.kind, result).map(|ack| (StatusCode::OK, ack))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: &str, data: Value) -> ProviderEvent {
        ProviderEvent {
            id: Some("evt_1".into()),
            kind: kind.into(),
            data,
        }
    }

    #[test]
    fn routes_intent_events() {
        let failed = event(
            "payment_intent.payment_failed",
            json!({ "object": { "id": "pi_1", "last_payment_error": { "message": "Card declined" } } }),
        );
        assert_eq!(
            route_payment_event(&failed).unwrap(),
            PaymentAction::Failed {
                intent_id: "pi_1".into(),
                message: Some("Card declined".into()),
            }
        );

        let canceled = event(
            "payment_intent.canceled",
            json!({ "object": { "id": "pi_2", "cancellation_reason": "abandoned" } }),
        );
        assert_eq!(
            route_payment_event(&canceled).unwrap(),
            PaymentAction::Canceled {
                intent_id: "pi_2".into(),
                reason: Some("abandoned".into()),
            }
        );
    }

    #[test]
    fn setup_intent_events_route_like_payment_intents() {
        let succeeded = event("setup_intent.succeeded", json!({ "object": { "id": "seti_1" } }));
        assert_eq!(
            route_payment_event(&succeeded).unwrap(),
            PaymentAction::Succeeded {
                intent_id: "seti_1".into()
            }
        );

        let canceled = event(
            "setup_intent.canceled",
            json!({ "object": { "id": "seti_2", "cancellation_reason": "abandoned" } }),
        );
        assert_eq!(
            route_payment_event(&canceled).unwrap(),
            PaymentAction::Canceled {
                intent_id: "seti_2".into(),
                reason: Some("abandoned".into()),
            }
        );

        let failed = event(
            "setup_intent.setup_failed",
            json!({ "object": { "id": "seti_3", "last_setup_error": { "message": "Card expired" } } }),
        );
        assert_eq!(
            route_payment_event(&failed).unwrap(),
            PaymentAction::Failed {
                intent_id: "seti_3".into(),
                message: Some("Card expired".into()),
            }
        );
    }

    #[test]
    fn refund_failed_forces_failed_status() {
        let failed = event("refund.failed", json!({ "object": { "id": "re_1", "status": "pending" } }));
        assert_eq!(
            route_payment_event(&failed).unwrap(),
            PaymentAction::Refund {
                refund_id: "re_1".into(),
                status: RefundStatus::Failed,
            }
        );
        let updated = event("refund.updated", json!({ "object": { "id": "re_1", "status": "succeeded" } }));
        assert_eq!(
            route_payment_event(&updated).unwrap(),
            PaymentAction::Refund {
                refund_id: "re_1".into(),
                status: RefundStatus::Succeeded,
            }
        );
    }

    #[test]
    fn unknown_events_are_ignored_and_missing_ids_rejected() {
        let unknown = event("customer.created", json!({ "object": {} }));
        assert_eq!(route_payment_event(&unknown).unwrap(), PaymentAction::Ignored);

        let missing = event("payment_intent.succeeded", json!({ "object": {} }));
        assert_eq!(
            route_payment_event(&missing).unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn email_events() {
        let bounced = event(
            "email.bounced",
            json!({ "email_id": "msg_1", "bounce": { "message": "mailbox full" } }),
        );
        assert_eq!(
            route_email_event(&bounced).unwrap(),
            Some((
                "msg_1".to_string(),
                DeliveryEvent::Bounced {
                    reason: Some("mailbox full".into())
                }
            ))
        );
        assert_eq!(route_email_event(&event("email.opened", json!({}))).unwrap(), None);
    }

    #[test]
    fn not_applicable_errors_are_acknowledged() {
        let ack = settle("x", Err(BookingError::not_found("payment", "pi_x"))).unwrap();
        assert!(!ack.applied);

        let err = settle(
            "x",
            Err(BookingError::Store(simbay_core::error::StoreError::Database("down".into()))),
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
