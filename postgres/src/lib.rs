//! `PostgreSQL` store for Simbay.
//!
//! [`PostgresStore`] implements every persistence trait from `simbay_core::store` on top
//! of a sqlx connection pool. Status changes are single conditional `UPDATE` statements
//! keyed by id plus the expected prior status, so a lost race reports `Ok(false)` instead
//! of overwriting a concurrent writer.
//!
//! Two invariants are enforced by the database itself:
//!
//! - overlapping active bookings on one bay are rejected inside the insert statement
//! - a partial unique index allows at most one open payment per booking
//!
//! # Example
//!
//! ```ignore
//! use simbay_postgres::PostgresStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect("postgres://localhost/simbay", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bay_store;
mod booking_store;
mod league_store;
mod notification_store;
mod payment_store;
mod rows;

use async_trait::async_trait;
use simbay_core::error::StoreError;
use simbay_core::store::{Store, StoreResult};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Metric names recorded by the store
pub mod metrics {
    /// Writes rejected by an overlap or uniqueness guard (labels: table)
    pub const STORE_CONFLICTS: &str = "simbay_store_conflicts_total";
}

/// Store backed by a `PostgreSQL` pool
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wraps an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Applies the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Maps a sqlx error, turning unique violations into [`StoreError::Conflict`]
pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Database(e.to_string())
}

/// Counts and logs a rejected write
pub(crate) fn record_conflict(table: &'static str, err: &StoreError) {
    if matches!(err, StoreError::Conflict(_)) {
        ::metrics::counter!(crate::metrics::STORE_CONFLICTS, "table" => table).increment(1);
        tracing::debug!(table, error = %err, "Write rejected by constraint");
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}
