use crate::{PostgresStore, db_err, record_conflict, rows};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simbay_core::error::StoreError;
use simbay_core::ids::{BayId, BookingId, LocationId, UserId};
use simbay_core::model::{Booking, BookingUpdate, Location, PricingRule, User};
use simbay_core::pricing::Promotion;
use simbay_core::status::BookingStatus;
use simbay_core::store::{BookingStore, StoreResult};

#[async_trait]
impl BookingStore for PostgresStore {
    async fn get_booking(&self, id: BookingId) -> StoreResult<Option<Booking>> {
        let row = sqlx::query("SELECT * FROM bookings WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(rows::booking).transpose()
    }

    async fn insert_booking(&self, booking: &Booking) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // serialize inserts per bay so two overlapping requests cannot both pass the check
        let bay = sqlx::query("SELECT id FROM bays WHERE id = $1 FOR UPDATE")
            .bind(booking.bay_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if bay.is_none() {
            return Err(StoreError::Conflict(format!("bay {} does not exist", booking.bay_id)));
        }

        let result = sqlx::query(
            r"
            INSERT INTO bookings (
                id, bay_id, location_id, user_id, start_at, end_at, status, expires_at,
                total_amount_cents, discount_amount_cents, promotion_code, payment_intent_id,
                unlock_token, unlock_token_expires_at, created_at
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15
            WHERE NOT EXISTS (
                SELECT 1 FROM bookings
                WHERE bay_id = $2
                  AND status IN ('reserved', 'confirmed')
                  AND start_at < $6
                  AND $5 < end_at
            )
            ",
        )
        .bind(booking.id.as_uuid())
        .bind(booking.bay_id.as_uuid())
        .bind(booking.location_id.as_uuid())
        .bind(booking.user_id.as_uuid())
        .bind(booking.start_at)
        .bind(booking.end_at)
        .bind(booking.status.as_str())
        .bind(booking.expires_at)
        .bind(booking.total_amount.cents())
        .bind(booking.discount_amount.cents())
        .bind(booking.promotion_code.as_deref())
        .bind(booking.payment_intent_id.as_deref())
        .bind(booking.unlock_token.as_deref())
        .bind(booking.unlock_token_expires_at)
        .bind(booking.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err);

        let inserted = match result {
            Ok(done) => done.rows_affected(),
            Err(e) => {
                record_conflict("bookings", &e);
                return Err(e);
            },
        };
        if inserted == 0 {
            let err = StoreError::Conflict(
                "bay already booked for an overlapping interval".to_string(),
            );
            record_conflict("bookings", &err);
            return Err(err);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn transition_booking(
        &self,
        id: BookingId,
        expected: BookingStatus,
        update: &BookingUpdate,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE bookings SET
                status = COALESCE($3, status),
                expires_at = CASE WHEN $4 THEN $5 ELSE expires_at END,
                payment_intent_id = COALESCE($6, payment_intent_id),
                cancelled_at = COALESCE($7, cancelled_at),
                cancelled_by = CASE WHEN $7 IS NOT NULL THEN $8 ELSE cancelled_by END,
                cancellation_reason = CASE WHEN $7 IS NOT NULL THEN $9 ELSE cancellation_reason END
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.expires_at.is_some())
        .bind(update.expires_at.flatten())
        .bind(update.payment_intent_id.as_deref())
        .bind(update.cancelled_at)
        .bind(update.cancelled_by.as_deref())
        .bind(update.cancellation_reason.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_reserved(&self, now: DateTime<Utc>) -> StoreResult<Vec<Booking>> {
        let expired = sqlx::query(
            r"
            UPDATE bookings SET status = 'expired'
            WHERE status = 'reserved' AND expires_at <= $1
            RETURNING *
            ",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows::all(&expired, rows::booking)
    }

    async fn bookings_starting_between(
        &self,
        status: BookingStatus,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Booking>> {
        let found = sqlx::query(
            r"
            SELECT * FROM bookings
            WHERE status = $1 AND start_at > $2 AND start_at <= $3
            ORDER BY start_at
            ",
        )
        .bind(status.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows::all(&found, rows::booking)
    }

    async fn bookings_for_bay_between(
        &self,
        bay: BayId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Booking>> {
        let found = sqlx::query(
            r"
            SELECT * FROM bookings
            WHERE bay_id = $1
              AND status IN ('reserved', 'confirmed')
              AND start_at < $3
              AND $2 < end_at
            ORDER BY start_at
            ",
        )
        .bind(bay.as_uuid())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows::all(&found, rows::booking)
    }

    async fn set_unlock_token(
        &self,
        id: BookingId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE bookings SET unlock_token = $2, unlock_token_expires_at = $3
            WHERE id = $1 AND unlock_token IS NULL
            ",
        )
        .bind(id.as_uuid())
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_location(&self, id: LocationId) -> StoreResult<Option<Location>> {
        let row = sqlx::query("SELECT * FROM locations WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(rows::location).transpose()
    }

    async fn pricing_rules(&self, location: LocationId) -> StoreResult<Vec<PricingRule>> {
        let found = sqlx::query(
            "SELECT * FROM pricing_rules WHERE location_id = $1 ORDER BY position, id",
        )
        .bind(location.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows::all(&found, rows::pricing_rule)
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(rows::user).transpose()
    }

    async fn promotion(&self, code: &str) -> StoreResult<Option<Promotion>> {
        let row = sqlx::query("SELECT kind, value FROM promotions WHERE code = $1 AND active")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(rows::promotion).transpose()
    }
}
