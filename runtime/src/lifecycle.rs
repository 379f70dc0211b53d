//! Booking lifecycle manager.
//!
//! Owns every booking status change. Each operation reads the current row, asks
//! [`simbay_core::lifecycle::decide`] what to do, performs one conditional write keyed on
//! the expected prior status and, only when that write affected a row, hands the decided
//! effects to the [`EffectExecutor`].
//!
//! Payment rows are kept in step with provider events through the same conditional
//! writes, so redelivered webhooks and concurrent job ticks are harmless.

use crate::effects::EffectExecutor;
use crate::metrics::{self as m, counter};
use crate::retry::{retry_with_predicate, RetryPolicy};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use simbay_core::effect::{BookingDelta, DeltaAction, Effect};
use simbay_core::environment::Clock;
use simbay_core::error::{BookingError, Result, StoreError};
use simbay_core::gateway::{
    CreateIntent, CreateSetupIntent, GatewayError, IntentHandle, IntentStatus, PaymentGateway,
    RefundRequest, RefundStatus,
};
use simbay_core::ids::{BayId, BookingId, PaymentId, UserId};
use simbay_core::lifecycle::{
    decide, ensure_payable, payment_idempotency_key, refund_idempotency_key, BookingCommand,
    Decision, Outcome, DEFAULT_HOLD_MINUTES,
};
use simbay_core::model::{Booking, BookingUpdate, BayStatus, Payment, PaymentKind, PaymentUpdate};
use simbay_core::money::Money;
use simbay_core::pricing::{check_coverage, price_interval};
use simbay_core::status::{BookingStatus, PaymentStatus};
use simbay_core::store::{BayStore, BookingStore, PaymentStore, Store};
use std::sync::Arc;

/// How many times a transition is re-decided after losing a race
const MAX_TRANSITION_ATTEMPTS: usize = 2;

/// Lifecycle tuning
#[derive(Clone, Debug)]
pub struct LifecycleSettings {
    /// Reservation hold before an unpaid booking expires
    pub hold: Duration,
    /// Currency code sent to the payment provider
    pub currency: String,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            hold: Duration::minutes(DEFAULT_HOLD_MINUTES),
            currency: "usd".to_string(),
        }
    }
}

/// What the client needs to complete a payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentHandle {
    /// Local payment row
    pub payment_id: PaymentId,
    /// Provider intent id
    pub intent_id: String,
    /// Secret the client confirms the intent with
    pub client_secret: Option<String>,
    /// Charge or save-card
    pub kind: PaymentKind,
    /// Amount to be charged
    pub amount: Money,
    /// An existing intent was handed back
    pub reused: bool,
}

impl PaymentHandle {
    fn from_payment(payment: &Payment, client_secret: Option<String>, reused: bool) -> Self {
        Self {
            payment_id: payment.id,
            intent_id: payment.provider_intent_id.clone(),
            client_secret: client_secret.or_else(|| payment.client_secret.clone()),
            kind: payment.kind,
            amount: payment.amount,
            reused,
        }
    }
}

/// A request to hold a bay
#[derive(Clone, Debug)]
pub struct ReserveRequest {
    /// Bay to hold
    pub bay_id: BayId,
    /// Customer
    pub user_id: UserId,
    /// Session start
    pub start_at: DateTime<Utc>,
    /// Session end (exclusive)
    pub end_at: DateTime<Utc>,
    /// Optional promotion code
    pub promotion_code: Option<String>,
}

/// Drives bookings and their payments through the state machine
pub struct LifecycleManager {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    effects: Arc<EffectExecutor>,
    clock: Arc<dyn Clock>,
    settings: LifecycleSettings,
}

impl LifecycleManager {
    /// Creates a manager
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        effects: Arc<EffectExecutor>,
        clock: Arc<dyn Clock>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            effects,
            clock,
            settings,
        }
    }

    async fn load(&self, id: BookingId) -> Result<Booking> {
        self.store
            .get_booking(id)
            .await?
            .ok_or(BookingError::BookingNotFound(id))
    }

    async fn load_payment(&self, intent_id: &str) -> Result<Payment> {
        self.store
            .payment_by_intent(intent_id)
            .await?
            .ok_or_else(|| BookingError::not_found("payment", intent_id))
    }

    /// Decides and writes `command`, re-reading once if another writer got there first.
    ///
    /// Effects run only when this call's write affected the row.
    async fn apply(
        &self,
        booking: Booking,
        command: BookingCommand,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let booking_id = booking.id;
        let mut current = booking;
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let decision = decide(&current, command.clone(), now)?;
            let Some(transition) = &decision.transition else {
                return Ok(decision);
            };
            if self
                .store
                .transition_booking(current.id, transition.expected, &transition.update)
                .await?
            {
                self.effects.execute(&decision.effects).await;
                return Ok(decision);
            }
            tracing::debug!(%booking_id, expected = %transition.expected, "Lost booking write race, re-reading");
            current = self.load(booking_id).await?;
        }
        Err(BookingError::StateConflict(format!(
            "booking {booking_id} kept changing while applying {command:?}"
        )))
    }

    // ========================================================================
    // Reservation
    // ========================================================================

    /// Holds a bay for an interval and prices it.
    ///
    /// The new booking is `Reserved` until `now + hold`.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidInterval`] when start is not before end
    /// - [`BookingError::Validation`] for a start in the past or an unknown promotion code
    /// - [`BookingError::StateConflict`] when the bay is closed or in league mode
    /// - [`BookingError::NoPricingRule`] when the location's rules leave any part of the
    ///   week unpriced, even outside the requested interval
    /// - a store conflict when an active booking overlaps
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Booking> {
        let now = self.clock.now();
        if request.start_at >= request.end_at {
            return Err(BookingError::InvalidInterval);
        }
        if request.start_at < now {
            return Err(BookingError::Validation(
                "cannot book a session that has already started".to_string(),
            ));
        }

        let bay = self
            .store
            .get_bay(request.bay_id)
            .await?
            .ok_or_else(|| BookingError::not_found("bay", request.bay_id))?;
        if bay.status != BayStatus::Available {
            return Err(BookingError::StateConflict(format!("bay {} is {}", bay.id, bay.status)));
        }
        if bay.league_mode_active {
            return Err(BookingError::StateConflict(format!(
                "bay {} is reserved for league play",
                bay.id
            )));
        }
        self.store
            .get_user(request.user_id)
            .await?
            .ok_or_else(|| BookingError::not_found("user", request.user_id))?;
        let location = self
            .store
            .get_location(bay.location_id)
            .await?
            .ok_or_else(|| BookingError::not_found("location", bay.location_id))?;

        let rules = self.store.pricing_rules(location.id).await?;
        if let Err(gap) = check_coverage(&rules) {
            tracing::error!(location_id = %location.id, error = %gap, "Pricing rules leave part of the week unpriced");
            return Err(gap.into());
        }
        let quote = price_interval(location.timezone, request.start_at, request.end_at, &rules)?;

        let discount = match &request.promotion_code {
            Some(code) => self
                .store
                .promotion(code)
                .await?
                .ok_or_else(|| BookingError::Validation(format!("unknown promotion code {code}")))?
                .discount_for(quote.total),
            None => Money::ZERO,
        };

        let booking = Booking {
            id: BookingId::new(),
            bay_id: bay.id,
            location_id: location.id,
            user_id: request.user_id,
            start_at: request.start_at,
            end_at: request.end_at,
            status: BookingStatus::Reserved,
            expires_at: Some(now + self.settings.hold),
            total_amount: quote.total.saturating_sub(discount),
            discount_amount: discount,
            promotion_code: request.promotion_code,
            payment_intent_id: None,
            unlock_token: None,
            unlock_token_expires_at: None,
            created_at: now,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
        };
        self.store.insert_booking(&booking).await?;

        counter!(m::BOOKINGS_RESERVED).increment(1);
        tracing::info!(
            booking_id = %booking.id,
            bay_id = %bay.id,
            total = %booking.total_amount,
            segments = quote.segments.len(),
            "Booking reserved"
        );
        self.effects
            .execute(&[Effect::BroadcastBooking {
                location: booking.location_id,
                bay: booking.bay_id,
                delta: BookingDelta {
                    action: DeltaAction::Add,
                    booking: booking.summary(),
                },
            }])
            .await;
        Ok(booking)
    }

    // ========================================================================
    // Payment initiation
    // ========================================================================

    /// Starts (or resumes) payment for a reserved booking.
    ///
    /// A still-usable open intent is handed back instead of creating another. A
    /// zero-amount booking gets a save-card intent so a payment method is on file.
    ///
    /// # Errors
    ///
    /// - [`BookingError::BookingNotFound`]
    /// - [`BookingError::InvalidBookingState`] when the booking is not `Reserved`
    /// - [`BookingError::ReservationExpired`] when the stored hold has lapsed; the booking
    ///   is moved to `Expired` on the way out
    /// - [`BookingError::Gateway`] when the provider fails
    pub async fn initiate_payment(&self, booking_id: BookingId) -> Result<PaymentHandle> {
        let now = self.clock.now();
        let booking = self.load(booking_id).await?;

        if let Err(e) = ensure_payable(&booking, now) {
            if matches!(e, BookingError::ReservationExpired(_)) {
                if let Err(expire_err) = self.apply(booking, BookingCommand::Expire, now).await {
                    tracing::warn!(%booking_id, error = %expire_err, "Opportunistic expiry failed");
                }
            }
            return Err(e);
        }

        if let Some(open) = self.store.open_payment_for_booking(booking_id).await? {
            if let Some(handle) = self.reuse_open_payment(&open, now).await? {
                return Ok(handle);
            }
        }

        let attempt = self.store.count_payments_for_booking(booking_id).await? + 1;
        let customer = self
            .store
            .get_user(booking.user_id)
            .await?
            .and_then(|user| user.payment_customer_id);
        let amount = booking.total_amount;
        let idempotency_key = payment_idempotency_key(booking_id, amount, attempt);

        let (kind, intent) = if amount.is_zero() {
            let request = CreateSetupIntent {
                booking_id,
                customer: customer.clone(),
                idempotency_key,
            };
            (PaymentKind::SaveCard, self.gateway.create_setup_intent(&request).await?)
        } else {
            let request = CreateIntent {
                booking_id,
                amount,
                currency: self.settings.currency.clone(),
                customer: customer.clone(),
                idempotency_key,
            };
            (PaymentKind::Charge, self.gateway.create_payment_intent(&request).await?)
        };

        let payment = Payment {
            id: PaymentId::new(),
            booking_id,
            kind,
            provider_intent_id: intent.intent_id.clone(),
            client_secret: intent.client_secret.clone(),
            customer_handle: customer,
            amount,
            currency: self.settings.currency.clone(),
            status: PaymentStatus::Pending,
            refund_amount: Money::ZERO,
            refund_id: None,
            failure_message: None,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_payment(&payment).await {
            Ok(()) => {},
            Err(StoreError::Conflict(_)) => return self.adopt_winner(booking_id, kind, &intent).await,
            Err(e) => {
                self.cancel_orphan(kind, &intent.intent_id).await;
                return Err(e.into());
            },
        }

        let bind = BookingUpdate {
            payment_intent_id: Some(intent.intent_id.clone()),
            ..BookingUpdate::default()
        };
        if !self
            .store
            .transition_booking(booking_id, BookingStatus::Reserved, &bind)
            .await?
        {
            // expired or cancelled between the check and the insert
            self.cancel_orphan(kind, &intent.intent_id).await;
            self.store
                .transition_payment(
                    payment.id,
                    &PaymentStatus::OPEN,
                    &PaymentUpdate::status(PaymentStatus::Cancelled, now),
                )
                .await?;
            let current = self.load(booking_id).await?;
            return Err(BookingError::InvalidBookingState {
                booking_id,
                status: current.status,
                expected: BookingStatus::Reserved,
            });
        }

        counter!(m::PAYMENT_INTENTS_CREATED, "kind" => kind.as_str()).increment(1);
        tracing::info!(
            %booking_id,
            payment_id = %payment.id,
            intent_id = %intent.intent_id,
            %kind,
            %amount,
            attempt,
            "Payment intent created"
        );
        Ok(PaymentHandle::from_payment(&payment, intent.client_secret, false))
    }

    /// Returns a handle for an open payment whose intent can still be completed.
    ///
    /// `None` means the intent was cancelled provider-side and a new one is needed.
    async fn reuse_open_payment(
        &self,
        open: &Payment,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentHandle>> {
        let intent = self
            .gateway
            .retrieve_intent(open.kind, &open.provider_intent_id)
            .await?;
        match intent.status {
            IntentStatus::Succeeded => Err(BookingError::StateConflict(format!(
                "payment for booking {} already completed and is awaiting confirmation",
                open.booking_id
            ))),
            IntentStatus::Canceled => {
                self.store
                    .transition_payment(
                        open.id,
                        &PaymentStatus::OPEN,
                        &PaymentUpdate::status(PaymentStatus::Cancelled, now),
                    )
                    .await?;
                tracing::info!(
                    booking_id = %open.booking_id,
                    intent_id = %open.provider_intent_id,
                    "Open payment's intent was cancelled provider-side"
                );
                Ok(None)
            },
            _ => {
                counter!(m::PAYMENT_INTENTS_REUSED).increment(1);
                tracing::debug!(
                    booking_id = %open.booking_id,
                    intent_id = %open.provider_intent_id,
                    status = %intent.status,
                    "Reusing open payment intent"
                );
                Ok(Some(PaymentHandle::from_payment(open, intent.client_secret, true)))
            },
        }
    }

    /// Another request inserted the open payment first; hand back its row
    async fn adopt_winner(
        &self,
        booking_id: BookingId,
        kind: PaymentKind,
        ours: &IntentHandle,
    ) -> Result<PaymentHandle> {
        let winner = self.store.open_payment_for_booking(booking_id).await?;
        match winner {
            Some(winner) => {
                if winner.provider_intent_id != ours.intent_id {
                    self.cancel_orphan(kind, &ours.intent_id).await;
                }
                Ok(PaymentHandle::from_payment(&winner, None, true))
            },
            None => {
                self.cancel_orphan(kind, &ours.intent_id).await;
                Err(BookingError::StateConflict(format!(
                    "concurrent payment attempt for booking {booking_id} did not settle"
                )))
            },
        }
    }

    /// Cancels a provider intent that no payment row will reference
    async fn cancel_orphan(&self, kind: PaymentKind, intent_id: &str) {
        let cancelled = retry_with_predicate(
            &RetryPolicy::default(),
            || self.gateway.cancel_intent(kind, intent_id),
            |err| matches!(err, GatewayError::Transport(_)),
        )
        .await;
        match cancelled {
            Ok(()) => tracing::info!(%intent_id, "Cancelled orphaned payment intent"),
            Err(e) => tracing::error!(%intent_id, error = %e, "Failed to cancel orphaned payment intent"),
        }
    }

    // ========================================================================
    // Provider events
    // ========================================================================

    /// Applies a payment success reported by the provider.
    ///
    /// A success for a booking that already expired or was cancelled is refunded in
    /// full; the booking stays where it is.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] for an unknown intent
    /// - store and gateway failures
    pub async fn on_payment_succeeded(&self, intent_id: &str) -> Result<Outcome> {
        let now = self.clock.now();
        let payment = self.load_payment(intent_id).await?;
        let marked = self
            .store
            .transition_payment(
                payment.id,
                &PaymentStatus::predecessors(PaymentStatus::Succeeded),
                &PaymentUpdate::status(PaymentStatus::Succeeded, now),
            )
            .await?;

        let booking = self.load(payment.booking_id).await?;
        let booking_id = booking.id;
        let bound_intent = booking.payment_intent_id.clone();
        let decision = self.apply(booking, BookingCommand::PaymentSucceeded, now).await?;

        match decision.outcome {
            Outcome::Applied => {
                counter!(m::BOOKINGS_CONFIRMED).increment(1);
                tracing::info!(%booking_id, %intent_id, "Booking confirmed");
            },
            Outcome::Duplicate if marked && bound_intent.as_deref() != Some(intent_id) => {
                // a second intent succeeded for a booking that is already paid
                tracing::warn!(%booking_id, %intent_id, "Duplicate charge for confirmed booking, refunding");
                self.refund_intent(intent_id).await?;
            },
            Outcome::Duplicate | Outcome::Stale => {
                tracing::debug!(%booking_id, %intent_id, outcome = ?decision.outcome, "Payment success already applied");
            },
            Outcome::LatePayment => {
                tracing::warn!(%booking_id, %intent_id, "Payment succeeded after the booking lapsed, refunding");
                self.refund_intent(intent_id).await?;
            },
        }
        Ok(decision.outcome)
    }

    /// Applies a provider-side intent cancellation.
    ///
    /// The booking is cancelled only while it is `Reserved` and the cancelled intent is
    /// the one bound to it; a confirmed booking always wins.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] for an unknown intent
    /// - store failures
    pub async fn on_payment_canceled(&self, intent_id: &str, reason: Option<String>) -> Result<Outcome> {
        let now = self.clock.now();
        let payment = self.load_payment(intent_id).await?;
        self.store
            .transition_payment(
                payment.id,
                &PaymentStatus::predecessors(PaymentStatus::Cancelled),
                &PaymentUpdate::status(PaymentStatus::Cancelled, now),
            )
            .await?;

        let booking = self.load(payment.booking_id).await?;
        let booking_id = booking.id;
        if booking.payment_intent_id.as_deref() != Some(intent_id) {
            tracing::debug!(%booking_id, %intent_id, "Cancel for a superseded intent, booking untouched");
            return Ok(Outcome::Stale);
        }

        let decision = self
            .apply(booking, BookingCommand::PaymentCanceled { reason }, now)
            .await?;
        if decision.outcome == Outcome::Applied {
            counter!(m::BOOKINGS_CANCELLED, "actor" => "payment_provider").increment(1);
            tracing::info!(%booking_id, %intent_id, "Booking cancelled by payment provider");
        } else {
            tracing::debug!(%booking_id, %intent_id, outcome = ?decision.outcome, "Payment cancel not applied");
        }
        Ok(decision.outcome)
    }

    /// Records a failed payment attempt; the booking stays `Reserved` until it expires.
    ///
    /// Returns `false` when the payment was no longer open.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] for an unknown intent
    /// - store failures
    pub async fn on_payment_failed(&self, intent_id: &str, message: Option<String>) -> Result<bool> {
        let payment = self.load_payment(intent_id).await?;
        let update = PaymentUpdate {
            failure_message: message,
            ..PaymentUpdate::status(PaymentStatus::Failed, self.clock.now())
        };
        let marked = self
            .store
            .transition_payment(
                payment.id,
                &PaymentStatus::predecessors(PaymentStatus::Failed),
                &update,
            )
            .await?;
        tracing::info!(
            booking_id = %payment.booking_id,
            %intent_id,
            marked,
            reason = update.failure_message.as_deref().unwrap_or("unspecified"),
            "Payment failed"
        );
        Ok(marked)
    }

    /// Keeps a payment's refund state in step with the provider.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] when no payment carries `refund_id`
    /// - store failures
    pub async fn on_refund_updated(&self, refund_id: &str, status: RefundStatus) -> Result<bool> {
        let payment = self
            .store
            .payment_by_refund(refund_id)
            .await?
            .ok_or_else(|| BookingError::not_found("refund", refund_id))?;
        let next = match status {
            RefundStatus::Pending => return Ok(false),
            RefundStatus::Succeeded => PaymentStatus::Refunded,
            RefundStatus::Failed | RefundStatus::Canceled => PaymentStatus::RefundFailed,
        };
        let updated = self
            .store
            .transition_payment(
                payment.id,
                &PaymentStatus::predecessors(next),
                &PaymentUpdate::status(next, self.clock.now()),
            )
            .await?;
        if updated && next == PaymentStatus::RefundFailed {
            tracing::error!(payment_id = %payment.id, %refund_id, "Refund failed at the provider");
        } else {
            tracing::info!(payment_id = %payment.id, %refund_id, %status, updated, "Refund updated");
        }
        Ok(updated)
    }

    /// Records a card dispute. Returns `false` for an intent this system does not know.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn on_dispute_created(&self, intent_id: &str) -> Result<bool> {
        counter!(m::PAYMENT_DISPUTES).increment(1);
        match self.store.payment_by_intent(intent_id).await? {
            Some(payment) => {
                tracing::warn!(
                    booking_id = %payment.booking_id,
                    payment_id = %payment.id,
                    %intent_id,
                    amount = %payment.amount,
                    "Card dispute opened"
                );
                Ok(true)
            },
            None => {
                tracing::warn!(%intent_id, "Dispute for unknown payment intent");
                Ok(false)
            },
        }
    }

    // ========================================================================
    // Expiry and cancellation
    // ========================================================================

    /// Expires every reserved booking whose stored hold has lapsed.
    ///
    /// The store only touches rows that are still `Reserved`, so a booking confirmed in
    /// the meantime is never expired.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn reclaim_expired(&self) -> Result<Vec<Booking>> {
        let now = self.clock.now();
        let expired = self.store.expire_reserved(now).await?;
        if expired.is_empty() {
            return Ok(expired);
        }

        let effects: Vec<Effect> = expired
            .iter()
            .map(|booking| Effect::BroadcastBooking {
                location: booking.location_id,
                bay: booking.bay_id,
                delta: BookingDelta {
                    action: DeltaAction::Remove,
                    booking: booking.summary(),
                },
            })
            .collect();
        self.effects.execute(&effects).await;

        counter!(m::BOOKINGS_EXPIRED).increment(expired.len() as u64);
        tracing::info!(count = expired.len(), "Expired lapsed reservations");
        Ok(expired)
    }

    /// Cancels a booking and refunds it when its payment had succeeded.
    ///
    /// Returns `true` when a refund was requested.
    ///
    /// # Errors
    ///
    /// - [`BookingError::BookingNotFound`]
    /// - [`BookingError::InvalidBookingState`] for an expired or cancelled booking
    /// - [`BookingError::Gateway`] when the refund fails; the booking stays cancelled and
    ///   the payment is marked `refund_failed`
    pub async fn cancel_with_refund(
        &self,
        booking_id: BookingId,
        reason: &str,
        actor: &str,
    ) -> Result<bool> {
        let now = self.clock.now();
        let booking = self.load(booking_id).await?;
        let command = BookingCommand::Cancel {
            reason: reason.to_string(),
            actor: actor.to_string(),
        };
        let decision = self.apply(booking, command, now).await?;
        counter!(m::BOOKINGS_CANCELLED, "actor" => actor.to_string()).increment(1);
        tracing::info!(%booking_id, %actor, %reason, refund = decision.refund_required, "Booking cancelled");

        if !decision.refund_required {
            return Ok(false);
        }
        match self.store.succeeded_payment_for_booking(booking_id).await? {
            Some(payment) => self.refund_payment(&payment).await,
            None => {
                tracing::warn!(%booking_id, "Cancelled confirmed booking has no succeeded payment");
                Ok(false)
            },
        }
    }

    async fn refund_intent(&self, intent_id: &str) -> Result<bool> {
        let payment = self.load_payment(intent_id).await?;
        self.refund_payment(&payment).await
    }

    /// Refunds a succeeded payment in full.
    ///
    /// The payment is claimed with a conditional `succeeded | refund_failed → refunding`
    /// write first, so only one caller ever asks the provider.
    async fn refund_payment(&self, payment: &Payment) -> Result<bool> {
        if payment.kind == PaymentKind::SaveCard {
            tracing::debug!(payment_id = %payment.id, "Save-card payment moved no money, nothing to refund");
            return Ok(false);
        }
        let now = self.clock.now();
        let claimed = self
            .store
            .transition_payment(
                payment.id,
                &[PaymentStatus::Succeeded, PaymentStatus::RefundFailed],
                &PaymentUpdate::status(PaymentStatus::Refunding, now),
            )
            .await?;
        if !claimed {
            tracing::debug!(payment_id = %payment.id, "Refund already in progress or payment not refundable");
            return Ok(false);
        }

        let request = RefundRequest {
            intent_id: payment.provider_intent_id.clone(),
            amount: None,
            idempotency_key: refund_idempotency_key(payment.id),
        };
        match self.gateway.refund(&request).await {
            Ok(refund) => {
                let status = match refund.status {
                    RefundStatus::Succeeded => PaymentStatus::Refunded,
                    RefundStatus::Pending => PaymentStatus::Refunding,
                    RefundStatus::Failed | RefundStatus::Canceled => PaymentStatus::RefundFailed,
                };
                let update = PaymentUpdate {
                    refund_id: Some(refund.refund_id.clone()),
                    refund_amount: Some(refund.amount),
                    ..PaymentUpdate::status(status, now)
                };
                self.store
                    .transition_payment(payment.id, &[PaymentStatus::Refunding], &update)
                    .await?;
                counter!(m::REFUNDS, "outcome" => status.as_str()).increment(1);
                tracing::info!(
                    booking_id = %payment.booking_id,
                    payment_id = %payment.id,
                    refund_id = %refund.refund_id,
                    amount = %refund.amount,
                    %status,
                    "Refund requested"
                );
                Ok(true)
            },
            Err(e) => {
                let update = PaymentUpdate {
                    failure_message: Some(e.to_string()),
                    ..PaymentUpdate::status(PaymentStatus::RefundFailed, now)
                };
                self.store
                    .transition_payment(payment.id, &[PaymentStatus::Refunding], &update)
                    .await?;
                counter!(m::REFUNDS, "outcome" => "refund_failed").increment(1);
                tracing::error!(
                    booking_id = %payment.booking_id,
                    payment_id = %payment.id,
                    error = %e,
                    "Refund request failed"
                );
                Err(e.into())
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::kiosk::{CoordinatorSettings, UnlockCoordinator};
    use crate::reminders::{LinkSettings, ReminderIssuer};
    use chrono::TimeZone;
    use simbay_core::pricing::Promotion;
    use simbay_core::token::UnlockTokenSigner;
    use simbay_testing::fixtures::{seed_venue, t0, Venue};
    use simbay_testing::{FixedClock, InMemoryStore, MockPaymentGateway};

    fn manager(store: &Arc<InMemoryStore>, gateway: &Arc<MockPaymentGateway>) -> LifecycleManager {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(t0()));
        let store_dyn = Arc::clone(store) as Arc<dyn Store>;
        let reminders = Arc::new(ReminderIssuer::new(
            Arc::clone(&store_dyn),
            Arc::new(UnlockTokenSigner::new("test-secret")),
            Arc::clone(&clock),
            LinkSettings::default(),
        ));
        let effects = Arc::new(EffectExecutor::new(
            Arc::clone(&store_dyn),
            Arc::new(UnlockCoordinator::new(CoordinatorSettings::default())),
            reminders,
            Arc::clone(&clock),
        ));
        LifecycleManager::new(
            store_dyn,
            Arc::clone(gateway) as Arc<dyn PaymentGateway>,
            effects,
            clock,
            LifecycleSettings::default(),
        )
    }

    fn request(venue: &Venue, start: DateTime<Utc>, hours: i64) -> ReserveRequest {
        ReserveRequest {
            bay_id: venue.bay.id,
            user_id: venue.user.id,
            start_at: start,
            end_at: start + Duration::hours(hours),
            promotion_code: None,
        }
    }

    #[tokio::test]
    async fn reserve_prices_across_rules_and_holds_for_ten_minutes() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(MockPaymentGateway::new());
        let venue = seed_venue(&store);
        // 08:00-10:00 UTC: one hour off-peak at $20, one hour standard at $40
        let start = Utc.with_ymd_and_hms(2025, 3, 15, 8, 0, 0).unwrap();

        let booking = manager(&store, &gateway)
            .reserve(request(&venue, start, 2))
            .await
            .unwrap();

        assert_eq!(booking.status, BookingStatus::Reserved);
        assert_eq!(booking.total_amount, Money::from_cents(6000));
        assert_eq!(booking.expires_at, Some(t0() + Duration::minutes(10)));
        assert!(store.booking(booking.id).is_some());
    }

    #[tokio::test]
    async fn reserve_applies_promotion_and_rejects_unknown_codes() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(MockPaymentGateway::new());
        let venue = seed_venue(&store);
        store.add_promotion("HALF", Promotion::Percent(50));
        let manager = manager(&store, &gateway);
        let start = t0() + Duration::days(1);

        let mut discounted = request(&venue, start, 1);
        discounted.promotion_code = Some("HALF".into());
        let booking = manager.reserve(discounted).await.unwrap();
        assert_eq!(booking.total_amount, Money::from_cents(2000));
        assert_eq!(booking.discount_amount, Money::from_cents(2000));

        let mut unknown = request(&venue, start + Duration::hours(3), 1);
        unknown.promotion_code = Some("NOPE".into());
        let err = manager.reserve(unknown).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn overlapping_reservation_conflicts() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(MockPaymentGateway::new());
        let venue = seed_venue(&store);
        let manager = manager(&store, &gateway);
        let start = t0() + Duration::days(1);

        manager.reserve(request(&venue, start, 1)).await.unwrap();
        let err = manager
            .reserve(request(&venue, start + Duration::minutes(30), 1))
            .await
            .unwrap_err();
        assert_eq!(err.category(), simbay_core::ErrorCategory::StateConflict);
    }

    #[tokio::test]
    async fn pricing_gap_anywhere_in_the_week_refuses_reservations() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(MockPaymentGateway::new());
        let venue = seed_venue(&store);
        let daytime = simbay_core::model::PricingRule {
            name: "Daytime".into(),
            hourly_rate: Money::from_cents(4000),
            start_time: chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            end_time: chrono::NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            days: vec![],
        };
        store.set_pricing_rules(venue.location.id, vec![daytime]);

        // tomorrow noon is priced, but 23:00-24:00 is not
        let err = manager(&store, &gateway)
            .reserve(request(&venue, t0() + Duration::days(1), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NoPricingRule(_)));
        assert_eq!(err.category(), simbay_core::ErrorCategory::ConfigIntegrity);
    }

    #[tokio::test]
    async fn league_mode_bay_cannot_be_reserved() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(MockPaymentGateway::new());
        let mut venue = seed_venue(&store);
        venue.bay.league_mode_active = true;
        venue.bay.league_mode_league_id = Some(simbay_core::ids::LeagueId::new());
        store.put_bay(venue.bay.clone());

        let err = manager(&store, &gateway)
            .reserve(request(&venue, t0() + Duration::days(1), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::StateConflict(_)));
    }
}
