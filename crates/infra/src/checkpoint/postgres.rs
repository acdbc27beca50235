//! Postgres-backed checkpoint store.
//!
//! Expects the `projection_checkpoints` table (see [`PostgresCheckpointStore::ensure_schema`]).
//! The [`CheckpointStore`] impl is synchronous: it drives the async queries on
//! the runtime handle given at construction, so it works from the engine's
//! dispatch threads, the dispatch worker and rebuild threads alike. The handle
//! has to belong to a multi-thread runtime, and the store must not be called
//! from inside an async task.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;

use projector_events::Position;

use super::{Checkpoint, CheckpointError, CheckpointStore};

pub struct PostgresCheckpointStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    fn block_on<F: Future>(&self, query: F) -> Result<F::Output, CheckpointError> {
        if Handle::try_current().is_ok() {
            return Err(CheckpointError::Unavailable(
                "checkpoint store called from an async context; use a blocking thread".to_string(),
            ));
        }
        Ok(self.runtime.block_on(query))
    }

    pub async fn ensure_schema(&self) -> Result<(), CheckpointError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projection_checkpoints (
                projection_name TEXT PRIMARY KEY,
                signature       TEXT NOT NULL,
                position        BIGINT NOT NULL,
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    pub async fn load(&self, projection: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = sqlx::query(
            r#"
            SELECT projection_name, signature, position, updated_at
            FROM projection_checkpoints
            WHERE projection_name = $1
            "#,
        )
        .bind(projection)
        .fetch_optional(&*self.pool)
        .await
        .map_err(unavailable)?;

        row.map(|row| checkpoint_from_row(&row)).transpose()
    }

    pub async fn load_all(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let rows = sqlx::query(
            r#"
            SELECT projection_name, signature, position, updated_at
            FROM projection_checkpoints
            ORDER BY projection_name
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter().map(checkpoint_from_row).collect()
    }

    /// Monotonic upsert: the row is only touched when the stored position is
    /// not ahead of the new one.
    pub async fn store(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let result = sqlx::query(
            r#"
            INSERT INTO projection_checkpoints (projection_name, signature, position, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (projection_name)
            DO UPDATE SET
                signature = EXCLUDED.signature,
                position = EXCLUDED.position,
                updated_at = EXCLUDED.updated_at
            WHERE projection_checkpoints.position <= EXCLUDED.position
            "#,
        )
        .bind(&checkpoint.projection)
        .bind(&checkpoint.signature)
        .bind(position_to_db(checkpoint.current)?)
        .bind(checkpoint.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            let current = self
                .load(&checkpoint.projection)
                .await?
                .map(|c| c.current)
                .unwrap_or(Position::START);
            return Err(CheckpointError::Regression {
                projection: checkpoint.projection.clone(),
                current,
                attempted: checkpoint.current,
            });
        }
        Ok(())
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    fn get(&self, projection: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        self.block_on(self.load(projection))?
    }

    fn set(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.block_on(self.store(checkpoint))?
    }

    fn all(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        self.block_on(self.load_all())?
    }
}

fn unavailable(err: sqlx::Error) -> CheckpointError {
    CheckpointError::Unavailable(err.to_string())
}

fn position_to_db(position: Position) -> Result<i64, CheckpointError> {
    i64::try_from(position.value())
        .map_err(|_| CheckpointError::Unavailable(format!("position {position} out of range")))
}

fn checkpoint_from_row(row: &sqlx::postgres::PgRow) -> Result<Checkpoint, CheckpointError> {
    let position: i64 = row.try_get("position").map_err(unavailable)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(unavailable)?;
    Ok(Checkpoint {
        projection: row.try_get("projection_name").map_err(unavailable)?,
        signature: row.try_get("signature").map_err(unavailable)?,
        current: Position::new(u64::try_from(position).unwrap_or_default()),
        updated_at,
    })
}
