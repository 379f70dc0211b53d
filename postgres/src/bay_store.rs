use crate::{PostgresStore, db_err, rows};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simbay_core::error::StoreError;
use simbay_core::ids::{BayId, LeagueId};
use simbay_core::model::{AccessLogEntry, Bay};
use simbay_core::store::{AccessLogStore, BayStore, StoreResult};

#[async_trait]
impl BayStore for PostgresStore {
    async fn get_bay(&self, id: BayId) -> StoreResult<Option<Bay>> {
        let row = sqlx::query("SELECT * FROM bays WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(rows::bay).transpose()
    }

    async fn record_heartbeat(&self, id: BayId, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE bays SET last_seen_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn bays_in_league_mode(&self) -> StoreResult<Vec<Bay>> {
        let found = sqlx::query("SELECT * FROM bays WHERE league_mode_active ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows::all(&found, rows::bay)
    }

    async fn deactivate_league_mode(&self, id: BayId, league: LeagueId) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE bays SET league_mode_active = FALSE, league_mode_league_id = NULL
            WHERE id = $1 AND league_mode_active AND league_mode_league_id = $2
            ",
        )
        .bind(id.as_uuid())
        .bind(league.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl AccessLogStore for PostgresStore {
    async fn append_access_log(&self, entry: &AccessLogEntry) -> StoreResult<()> {
        let actor = serde_json::to_value(&entry.actor)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let outcome = serde_json::to_value(&entry.outcome)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r"
            INSERT INTO access_logs (booking_id, bay_id, actor, outcome, occurred_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(entry.booking_id.map(|id| *id.as_uuid()))
        .bind(entry.bay_id.map(|id| *id.as_uuid()))
        .bind(actor)
        .bind(outcome)
        .bind(entry.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
