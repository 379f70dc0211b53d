//! HTTP surface tests: routes driven through the router with in-memory backends.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Duration;
use serde_json::{json, Value};
use simbay_core::email::EmailProvider;
use simbay_core::environment::Clock;
use simbay_core::gateway::PaymentGateway;
use simbay_core::model::{
    AccessOutcome, Booking, LeagueAttendance, LeagueParticipant, Notification, NotificationKind,
    NotificationSubject, PaymentKind,
};
use simbay_core::money::Money;
use simbay_core::status::{AttendanceStatus, BookingStatus, NotificationStatus};
use simbay_core::store::{LeagueStore, NotificationStore, Store};
use simbay_core::token::UnlockTokenSigner;
use simbay_runtime::lifecycle::ReserveRequest;
use simbay_runtime::{
    CoordinatorSettings, DispatcherSettings, EffectExecutor, LifecycleManager, LifecycleSettings,
    LinkSettings, NotificationDispatcher, ReminderIssuer, ServerMessage, UnlockCoordinator,
    UnlockService,
};
use simbay_testing::fixtures::{league, reserved_booking, seed_venue, t0, week, Venue};
use simbay_testing::{FixedClock, InMemoryStore, MockEmailProvider, MockPaymentGateway};
use simbay_web::handlers::kiosk::KioskSession;
use simbay_web::handlers::webhooks::{EMAIL_SIGNATURE_HEADER, PAYMENT_SIGNATURE_HEADER};
use simbay_web::{router, signature, AppState, WebhookSecrets};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

const PAYMENT_SECRET: &str = "whsec_payments";
const EMAIL_SECRET: &str = "whsec_email";

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    store: Arc<InMemoryStore>,
    gateway: Arc<MockPaymentGateway>,
    state: AppState,
    venue: Venue,
}

impl Harness {
    fn new() -> Self {
        simbay_testing::init_tracing();
        let store = Arc::new(InMemoryStore::new());
        let venue = seed_venue(&store);
        let gateway = Arc::new(MockPaymentGateway::new());
        let email = Arc::new(MockEmailProvider::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(t0()));
        let store_dyn = Arc::clone(&store) as Arc<dyn Store>;

        let signer = Arc::new(UnlockTokenSigner::new("web-test-secret"));
        let coordinator = Arc::new(UnlockCoordinator::new(CoordinatorSettings::default()));
        let reminders = Arc::new(ReminderIssuer::new(
            Arc::clone(&store_dyn),
            Arc::clone(&signer),
            Arc::clone(&clock),
            LinkSettings::default(),
        ));
        let effects = Arc::new(EffectExecutor::new(
            Arc::clone(&store_dyn),
            Arc::clone(&coordinator),
            reminders,
            Arc::clone(&clock),
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&store_dyn),
            Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
            Arc::clone(&effects),
            Arc::clone(&clock),
            LifecycleSettings::default(),
        ));
        let unlock = Arc::new(UnlockService::new(
            Arc::clone(&store_dyn),
            Arc::clone(&coordinator),
            signer,
            Arc::clone(&clock),
            900,
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&store_dyn),
            email as Arc<dyn EmailProvider>,
            Arc::clone(&clock),
            DispatcherSettings::default(),
        ));

        let state = AppState {
            store: store_dyn,
            lifecycle,
            unlock,
            coordinator,
            effects,
            dispatcher,
            clock,
            webhooks: WebhookSecrets {
                payment: PAYMENT_SECRET.to_string(),
                email: EMAIL_SECRET.to_string(),
                tolerance_secs: signature::DEFAULT_TOLERANCE_SECS,
            },
        };

        Self {
            store,
            gateway,
            state,
            venue,
        }
    }

    fn app(&self) -> Router {
        router(self.state.clone())
    }

    /// Reserves tomorrow's noon hour and opens a payment intent for it
    async fn reserved_with_intent(&self) -> (Booking, String) {
        let start = t0() + Duration::days(1);
        let booking = self
            .state
            .lifecycle
            .reserve(ReserveRequest {
                bay_id: self.venue.bay.id,
                user_id: self.venue.user.id,
                start_at: start,
                end_at: start + Duration::hours(1),
                promotion_code: None,
            })
            .await
            .unwrap();
        let handle = self.state.lifecycle.initiate_payment(booking.id).await.unwrap();
        (booking, handle.intent_id)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        send(self.app(), request).await
    }

    async fn post_signed(&self, uri: &str, header: &str, secret: &str, body: &Value) -> (StatusCode, Value) {
        let bytes = serde_json::to_vec(body).unwrap();
        let signed = signature::sign(&bytes, secret, t0().timestamp()).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header(header, signed)
            .body(Body::from(bytes))
            .unwrap();
        send(self.app(), request).await
    }

    async fn payment_event(&self, body: &Value) -> (StatusCode, Value) {
        self.post_signed("/webhooks/payments", PAYMENT_SIGNATURE_HEADER, PAYMENT_SECRET, body)
            .await
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn intent_event(kind: &str, intent_id: &str) -> Value {
    json!({
        "id": "evt_test",
        "type": kind,
        "data": { "object": { "id": intent_id } }
    })
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn liveness_is_always_ok() {
    let h = Harness::new();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = h.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn readiness_degrades_without_kiosks_and_fails_without_the_store() {
    let h = Harness::new();
    let (status, body) = h.get("/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");

    h.store.set_ping_failure(true);
    let (status, body) = h.get("/health/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

// ============================================================================
// Payment webhooks
// ============================================================================

#[tokio::test]
async fn signed_success_event_confirms_the_booking() {
    let h = Harness::new();
    let (booking, intent_id) = h.reserved_with_intent().await;

    let (status, body) = h
        .payment_event(&intent_event("payment_intent.succeeded", &intent_id))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(h.store.booking(booking.id).unwrap().status, BookingStatus::Confirmed);
    assert_eq!(
        h.store
            .notifications_of(NotificationKind::BookingConfirmation)
            .len(),
        1
    );
}

#[tokio::test]
async fn setup_intent_success_confirms_a_zero_amount_booking() {
    let h = Harness::new();
    let booking = Booking {
        total_amount: Money::ZERO,
        ..reserved_booking(&h.venue, t0())
    };
    h.store.put_booking(booking.clone());
    let handle = h.state.lifecycle.initiate_payment(booking.id).await.unwrap();
    assert_eq!(handle.kind, PaymentKind::SaveCard);

    let (status, body) = h
        .payment_event(&intent_event("setup_intent.succeeded", &handle.intent_id))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);
    assert_eq!(h.store.booking(booking.id).unwrap().status, BookingStatus::Confirmed);
    assert!(h.gateway.refunds().is_empty());
}

#[tokio::test]
async fn bad_signature_is_rejected_without_side_effects() {
    let h = Harness::new();
    let (booking, intent_id) = h.reserved_with_intent().await;

    let (status, _) = h
        .post_signed(
            "/webhooks/payments",
            PAYMENT_SIGNATURE_HEADER,
            "whsec_wrong",
            &intent_event("payment_intent.succeeded", &intent_id),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.store.booking(booking.id).unwrap().status, BookingStatus::Reserved);
}

#[tokio::test]
async fn unsigned_request_is_rejected() {
    let h = Harness::new();
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .body(Body::from(intent_event("payment_intent.succeeded", "pi_x").to_string()))
        .unwrap();
    let (status, body) = send(h.app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn unknown_event_types_and_intents_are_acknowledged() {
    let h = Harness::new();

    let (status, body) = h.payment_event(&intent_event("customer.created", "cus_1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], false);

    let (status, body) = h
        .payment_event(&intent_event("payment_intent.succeeded", "pi_unknown"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], false);
}

#[tokio::test]
async fn cancel_event_for_the_bound_intent_cancels_the_reservation() {
    let h = Harness::new();
    let (booking, intent_id) = h.reserved_with_intent().await;

    let (status, _) = h
        .payment_event(&intent_event("payment_intent.canceled", &intent_id))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.store.booking(booking.id).unwrap().status, BookingStatus::Cancelled);
    assert!(h.gateway.refunds().is_empty());
}

// ============================================================================
// Email webhooks
// ============================================================================

#[tokio::test]
async fn delivery_events_update_sent_notifications() {
    let h = Harness::new();
    let (booking, _) = h.reserved_with_intent().await;
    let notification = Notification::pending(
        NotificationSubject::Booking(booking.id),
        NotificationKind::BookingConfirmation,
        "golfer@example.com",
        json!({ "bay_name": "Bay 1" }),
        t0(),
    );
    h.store.insert_notification(&notification).await.unwrap();
    assert!(h.state.dispatcher.send_one(&notification).await.unwrap());
    let stored = |h: &Harness| {
        h.store
            .notifications()
            .into_iter()
            .find(|n| n.id == notification.id)
            .unwrap()
    };
    let message_id = stored(&h).provider_message_id.unwrap();

    let (status, body) = h
        .post_signed(
            "/webhooks/email",
            EMAIL_SIGNATURE_HEADER,
            EMAIL_SECRET,
            &json!({ "type": "email.delivered", "data": { "email_id": message_id } }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);
    assert_eq!(stored(&h).status, NotificationStatus::Delivered);
}

// ============================================================================
// Unlock links
// ============================================================================

#[tokio::test]
async fn garbage_unlock_token_is_rejected_and_logged() {
    let h = Harness::new();

    let (status, body) = h.get("/unlock/not-a-token").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["granted"], false);
    assert_eq!(body["reason"]["code"], "token_invalid");
    let log = h.store.access_log();
    assert_eq!(log.len(), 1);
    assert!(matches!(log[0].outcome, AccessOutcome::Denied { .. }));
}

// ============================================================================
// Attendance links
// ============================================================================

fn seed_attendance(h: &Harness) -> LeagueAttendance {
    let start = t0().date_naive();
    let league = league(&h.venue, start);
    let week = week(&league, 1, start + Duration::days(7));
    h.store.add_league(league.clone());
    h.store.add_week(week.clone());
    let participant = LeagueParticipant {
        user_id: h.venue.user.id,
        email: h.venue.user.email.clone(),
        team_id: None,
    };
    h.store.add_participant(league.id, participant.clone());
    let row = LeagueAttendance::pending(week.id, &participant);
    h.store.put_attendance(row.clone());
    row
}

#[tokio::test]
async fn attendance_answers_can_change_until_locked() {
    let h = Harness::new();
    let row = seed_attendance(&h);

    let (status, body) = h
        .get(&format!("/attendance/{}/confirm", row.response_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");

    // same answer again is accepted
    let (status, _) = h
        .get(&format!("/attendance/{}/confirm", row.response_token))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h
        .get(&format!("/attendance/{}/decline", row.response_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.store.attendance(row.week_id)[0].status, AttendanceStatus::Declined);

    assert_eq!(h.store.lock_attendance(row.week_id).await.unwrap(), 1);
    let (status, body) = h
        .get(&format!("/attendance/{}/confirm", row.response_token))
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "EXPIRED");
}

#[tokio::test]
async fn unknown_attendance_token_and_answer() {
    let h = Harness::new();
    let row = seed_attendance(&h);

    let (status, _) = h.get("/attendance/nope/confirm").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h
        .get(&format!("/attendance/{}/maybe", row.response_token))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ============================================================================
// Kiosk sessions
// ============================================================================

#[tokio::test]
async fn registered_kiosk_gets_schedule_and_records_heartbeats() {
    let h = Harness::new();
    let (tx, mut rx) = mpsc::channel(16);
    let mut session = KioskSession::new(h.state.clone(), tx);
    let register = json!({
        "type": "register",
        "location_id": h.venue.location.id,
        "bay_id": h.venue.bay.id,
    });

    session.handle_text(&register.to_string()).await;

    let Some(ServerMessage::Registered { bay_id, .. }) = rx.recv().await else {
        unreachable!("expected a registration reply");
    };
    assert_eq!(bay_id, h.venue.bay.id);
    let Some(ServerMessage::BookingsRefresh { bookings, .. }) = rx.recv().await else {
        unreachable!("expected an initial schedule");
    };
    assert!(bookings.is_empty());
    assert_eq!(h.state.coordinator.channel_size(h.venue.location.id, h.venue.bay.id), 1);

    session.handle_text(r#"{"type":"heartbeat"}"#).await;
    assert_eq!(h.store.bay(h.venue.bay.id).unwrap().last_seen_at, Some(t0()));

    drop(session);
    assert_eq!(h.state.coordinator.connection_count(), 0);
}

#[tokio::test]
async fn requested_refresh_goes_only_to_the_asking_kiosk() {
    let h = Harness::new();
    let register = json!({
        "type": "register",
        "location_id": h.venue.location.id,
        "bay_id": h.venue.bay.id,
    })
    .to_string();
    let (tx_a, mut rx_a) = mpsc::channel(16);
    let (tx_b, mut rx_b) = mpsc::channel(16);
    let mut asking = KioskSession::new(h.state.clone(), tx_a);
    let mut watching = KioskSession::new(h.state.clone(), tx_b);
    asking.handle_text(&register).await;
    watching.handle_text(&register).await;
    // each registration is answered with its own initial schedule only
    for rx in [&mut rx_a, &mut rx_b] {
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Registered { .. })));
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::BookingsRefresh { .. })));
        assert!(rx.try_recv().is_err());
    }

    let refresh = json!({
        "type": "request_refresh",
        "location_id": h.venue.location.id,
        "bay_id": h.venue.bay.id,
    });
    asking.handle_text(&refresh.to_string()).await;

    assert!(matches!(rx_a.try_recv(), Ok(ServerMessage::BookingsRefresh { .. })));
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn kiosk_protocol_errors_are_reported() {
    let h = Harness::new();
    let (tx, mut rx) = mpsc::channel(16);
    let mut session = KioskSession::new(h.state.clone(), tx);

    session.handle_text("not json").await;
    assert!(matches!(rx.recv().await, Some(ServerMessage::Error { .. })));

    session.handle_text(r#"{"type":"heartbeat"}"#).await;
    assert!(matches!(rx.recv().await, Some(ServerMessage::Error { .. })));

    let wrong_location = json!({
        "type": "register",
        "location_id": simbay_core::ids::LocationId::new(),
        "bay_id": h.venue.bay.id,
    });
    session.handle_text(&wrong_location.to_string()).await;
    assert!(matches!(rx.recv().await, Some(ServerMessage::Error { .. })));
    assert_eq!(session.registered_on(), None);
    assert_eq!(h.state.coordinator.connection_count(), 0);
}
