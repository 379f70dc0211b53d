use crate::{PostgresStore, db_err, rows};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simbay_core::error::StoreError;
use simbay_core::ids::NotificationId;
use simbay_core::model::{Notification, NotificationKind, NotificationSubject, SendResult};
use simbay_core::status::NotificationStatus;
use simbay_core::store::{NotificationStore, StoreResult};
use sqlx::Row;

#[async_trait]
impl NotificationStore for PostgresStore {
    async fn notification_exists(
        &self,
        subject: NotificationSubject,
        kind: NotificationKind,
    ) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM notifications WHERE subject_id = $1 AND kind = $2) AS found",
        )
        .bind(subject.subject_id())
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        row.try_get("found")
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn insert_notification(&self, notification: &Notification) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO notifications (
                id, subject_type, subject_id, kind, recipient, payload, scheduled_for,
                status, attempts, provider_message_id, last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (subject_id, kind) DO NOTHING
            ",
        )
        .bind(notification.id.as_uuid())
        .bind(notification.subject.subject_type())
        .bind(notification.subject.subject_id())
        .bind(notification.kind.as_str())
        .bind(&notification.recipient)
        .bind(&notification.payload)
        .bind(notification.scheduled_for)
        .bind(notification.status.as_str())
        .bind(i32::try_from(notification.attempts).unwrap_or(i32::MAX))
        .bind(notification.provider_message_id.as_deref())
        .bind(notification.last_error.as_deref())
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<Notification>> {
        let due = sqlx::query(
            r"
            SELECT * FROM notifications
            WHERE status = 'pending' AND (scheduled_for IS NULL OR scheduled_for <= $1)
            ORDER BY created_at
            LIMIT $2
            ",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows::all(&due, rows::notification)
    }

    async fn record_send(
        &self,
        id: NotificationId,
        result: &SendResult,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let (status, message_id, error) = match result {
            SendResult::Sent {
                provider_message_id,
            } => (NotificationStatus::Sent, Some(provider_message_id.as_str()), None),
            SendResult::Failed { error } => (NotificationStatus::Failed, None, Some(error.as_str())),
        };
        let updated = sqlx::query(
            r"
            UPDATE notifications SET
                status = $2,
                provider_message_id = COALESCE($3, provider_message_id),
                last_error = COALESCE($4, last_error),
                attempts = attempts + 1,
                updated_at = $5
            WHERE id = $1 AND status = 'pending'
            ",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(message_id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(updated.rows_affected() == 1)
    }

    async fn record_delivery(
        &self,
        provider_message_id: &str,
        status: NotificationStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let updated = sqlx::query(
            r"
            UPDATE notifications SET
                status = $2,
                last_error = COALESCE($3, last_error),
                updated_at = $4
            WHERE provider_message_id = $1 AND status = 'sent'
            ",
        )
        .bind(provider_message_id)
        .bind(status.as_str())
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(updated.rows_affected() >= 1)
    }
}
