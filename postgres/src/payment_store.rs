use crate::{PostgresStore, db_err, record_conflict, rows};
use async_trait::async_trait;
use simbay_core::error::StoreError;
use simbay_core::ids::{BookingId, PaymentId};
use simbay_core::model::{Payment, PaymentUpdate};
use simbay_core::status::PaymentStatus;
use simbay_core::store::{PaymentStore, StoreResult};
use sqlx::Row;

#[async_trait]
impl PaymentStore for PostgresStore {
    async fn open_payment_for_booking(&self, booking: BookingId) -> StoreResult<Option<Payment>> {
        let row = sqlx::query(
            r"
            SELECT * FROM payments
            WHERE booking_id = $1 AND status IN ('pending', 'processing')
            ",
        )
        .bind(booking.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(rows::payment).transpose()
    }

    async fn count_payments_for_booking(&self, booking: BookingId) -> StoreResult<u32> {
        let row = sqlx::query("SELECT COUNT(*) AS attempts FROM payments WHERE booking_id = $1")
            .bind(booking.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        let attempts: i64 = row
            .try_get("attempts")
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(u32::try_from(attempts).unwrap_or(u32::MAX))
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            INSERT INTO payments (
                id, booking_id, kind, provider_intent_id, client_secret, customer_handle,
                amount_cents, currency, status, refund_amount_cents, refund_id,
                failure_message, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ",
        )
        .bind(payment.id.as_uuid())
        .bind(payment.booking_id.as_uuid())
        .bind(payment.kind.as_str())
        .bind(&payment.provider_intent_id)
        .bind(payment.client_secret.as_deref())
        .bind(payment.customer_handle.as_deref())
        .bind(payment.amount.cents())
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(payment.refund_amount.cents())
        .bind(payment.refund_id.as_deref())
        .bind(payment.failure_message.as_deref())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err);

        if let Err(e) = result {
            record_conflict("payments", &e);
            return Err(e);
        }
        Ok(())
    }

    async fn payment_by_intent(&self, intent_id: &str) -> StoreResult<Option<Payment>> {
        let row = sqlx::query("SELECT * FROM payments WHERE provider_intent_id = $1")
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(rows::payment).transpose()
    }

    async fn payment_by_refund(&self, refund_id: &str) -> StoreResult<Option<Payment>> {
        let row = sqlx::query("SELECT * FROM payments WHERE refund_id = $1")
            .bind(refund_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(rows::payment).transpose()
    }

    async fn succeeded_payment_for_booking(
        &self,
        booking: BookingId,
    ) -> StoreResult<Option<Payment>> {
        let row = sqlx::query(
            r"
            SELECT * FROM payments
            WHERE booking_id = $1 AND status IN ('succeeded', 'refunding', 'refund_failed')
            ORDER BY created_at DESC
            LIMIT 1
            ",
        )
        .bind(booking.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(rows::payment).transpose()
    }

    async fn transition_payment(
        &self,
        id: PaymentId,
        expected: &[PaymentStatus],
        update: &PaymentUpdate,
    ) -> StoreResult<bool> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query(
            r"
            UPDATE payments SET
                status = $3,
                failure_message = COALESCE($4, failure_message),
                refund_id = COALESCE($5, refund_id),
                refund_amount_cents = COALESCE($6, refund_amount_cents),
                updated_at = $7
            WHERE id = $1 AND status = ANY($2)
            ",
        )
        .bind(id.as_uuid())
        .bind(expected)
        .bind(update.status.as_str())
        .bind(update.failure_message.as_deref())
        .bind(update.refund_id.as_deref())
        .bind(update.refund_amount.map(|amount| amount.cents()))
        .bind(update.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }
}
