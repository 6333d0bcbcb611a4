use crate::{db_error, from_db_count, from_db_int, to_db_int};
use chrono::{DateTime, Utc};
use progression_core::environment::{Clock, SystemClock};
use progression_core::{
    ProgressStore, ProgressTotals, SimulationOutcome, StageCatalog, StageId, StageProgress,
    StageStatus, StoreError, StoreFuture, Transition, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;

const SELECT_PROGRESS: &str = r"
    SELECT user_id, stage_id, status, attempts, timeouts,
           completed_at, last_result, last_payload, updated_at
    FROM stage_progress
";

/// `PostgreSQL`-backed progress store.
///
/// One row per (user, stage) in `stage_progress`. Writes after provisioning
/// go through [`compare_and_transition`](ProgressStore::compare_and_transition),
/// which locks the row for the duration of the check and update.
#[derive(Clone)]
pub struct PostgresProgressStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresProgressStore {
    /// Create a store over an existing pool, stamping writes with the system clock.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    /// Create a store stamping `updated_at` and `completed_at` with `clock`.
    #[must_use]
    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_progress(row: &PgRow) -> Result<StageProgress, StoreError> {
        let status: String = row.try_get("status").map_err(db_error)?;
        let last_result: Option<String> = row.try_get("last_result").map_err(db_error)?;

        Ok(StageProgress {
            user_id: UserId(row.try_get("user_id").map_err(db_error)?),
            stage_id: StageId(from_db_int(row.try_get("stage_id").map_err(db_error)?, "stage_id")?),
            status: StageStatus::parse(&status)?,
            attempts: from_db_int(row.try_get("attempts").map_err(db_error)?, "attempts")?,
            timeouts: from_db_int(row.try_get("timeouts").map_err(db_error)?, "timeouts")?,
            completed_at: row.try_get("completed_at").map_err(db_error)?,
            last_result: last_result.as_deref().map(SimulationOutcome::parse),
            last_payload: row.try_get("last_payload").map_err(db_error)?,
            updated_at: row.try_get("updated_at").map_err(db_error)?,
        })
    }

    async fn transition_locked(
        &self,
        user_id: UserId,
        stage_id: StageId,
        transition: Transition,
    ) -> Result<StageProgress, StoreError> {
        let stage = to_db_int(stage_id.0, "stage_id")?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to start transaction: {e}")))?;

        // Row lock held until commit; concurrent transitions on the same
        // (user, stage) queue here and re-read the committed state.
        let row = sqlx::query(&format!(
            "{SELECT_PROGRESS} WHERE user_id = $1 AND stage_id = $2 FOR UPDATE"
        ))
        .bind(user_id.0)
        .bind(stage)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to lock progress: {e}")))?;

        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Err(StoreError::NotFound { user_id, stage_id });
        };

        let mut record = Self::row_to_progress(&row)?;
        if let Err(e) = transition.check(&record) {
            let _ = tx.rollback().await;
            return Err(e);
        }
        transition.apply_to(&mut record, self.clock.now());

        sqlx::query(
            r"
            UPDATE stage_progress
            SET status = $3,
                attempts = $4,
                timeouts = $5,
                completed_at = $6,
                last_result = $7,
                last_payload = $8,
                updated_at = $9
            WHERE user_id = $1 AND stage_id = $2
            ",
        )
        .bind(user_id.0)
        .bind(stage)
        .bind(record.status.as_str())
        .bind(to_db_int(record.attempts, "attempts")?)
        .bind(to_db_int(record.timeouts, "timeouts")?)
        .bind(record.completed_at)
        .bind(record.last_result.map(|r| r.as_str()))
        .bind(&record.last_payload)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to update progress: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to commit transaction: {e}")))?;

        Ok(record)
    }
}

impl std::fmt::Debug for PostgresProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresProgressStore")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl ProgressStore for PostgresProgressStore {
    fn get(&self, user_id: UserId, stage_id: StageId) -> StoreFuture<'_, StageProgress> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "{SELECT_PROGRESS} WHERE user_id = $1 AND stage_id = $2"
            ))
            .bind(user_id.0)
            .bind(to_db_int(stage_id.0, "stage_id")?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or(StoreError::NotFound { user_id, stage_id })?;

            Self::row_to_progress(&row)
        })
    }

    fn compare_and_transition(
        &self,
        user_id: UserId,
        stage_id: StageId,
        transition: Transition,
    ) -> StoreFuture<'_, StageProgress> {
        Box::pin(async move {
            let target = transition.target();
            let result = self.transition_locked(user_id, stage_id, transition).await;

            let outcome = match &result {
                Ok(_) => "applied",
                Err(StoreError::InvalidTransition { .. }) => "rejected",
                Err(StoreError::NotFound { .. }) => "not_found",
                Err(StoreError::Database(_)) => "error",
            };
            metrics::counter!(
                "progression.store.transitions",
                "target" => target.as_str(),
                "outcome" => outcome
            )
            .increment(1);

            match &result {
                Ok(record) => tracing::debug!(
                    user_id = %user_id,
                    stage_id = %stage_id,
                    status = %record.status,
                    attempts = record.attempts,
                    "Progress transitioned"
                ),
                Err(StoreError::Database(e)) => tracing::error!(
                    user_id = %user_id,
                    stage_id = %stage_id,
                    error = %e,
                    "Progress transition failed"
                ),
                Err(_) => {}
            }

            result
        })
    }

    fn provision<'a>(
        &'a self,
        user_id: UserId,
        catalog: &'a StageCatalog,
    ) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let now = self.clock.now();
            let first = catalog.first().id;
            let mut tx = self.pool.begin().await.map_err(db_error)?;
            let mut created = 0u64;

            for stage in catalog.stages() {
                let status = if stage.id == first {
                    StageStatus::Available
                } else {
                    StageStatus::Locked
                };
                let result = sqlx::query(
                    r"
                    INSERT INTO stage_progress (user_id, stage_id, status, updated_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (user_id, stage_id) DO NOTHING
                    ",
                )
                .bind(user_id.0)
                .bind(to_db_int(stage.id.0, "stage_id")?)
                .bind(status.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
                created += result.rows_affected();
            }

            tx.commit().await.map_err(db_error)?;

            if created > 0 {
                tracing::info!(user_id = %user_id, created, "User provisioned");
                metrics::counter!("progression.store.provisioned").increment(created);
            }
            Ok(usize::try_from(created).unwrap_or(usize::MAX))
        })
    }

    fn list_for_user(&self, user_id: UserId) -> StoreFuture<'_, Vec<StageProgress>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "{SELECT_PROGRESS} WHERE user_id = $1 ORDER BY stage_id ASC"
            ))
            .bind(user_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(Self::row_to_progress).collect()
        })
    }

    fn list_stale(
        &self,
        status: StageStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<StageProgress>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = sqlx::query(&format!(
                "{SELECT_PROGRESS} WHERE status = $1 AND updated_at < $2 ORDER BY updated_at ASC LIMIT $3"
            ))
            .bind(status.as_str())
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(Self::row_to_progress).collect()
        })
    }

    fn progress_totals(&self) -> StoreFuture<'_, ProgressTotals> {
        Box::pin(async move {
            let (total_users, active_users): (i64, i64) = sqlx::query_as(
                r"
                SELECT COUNT(DISTINCT user_id),
                       COUNT(DISTINCT user_id) FILTER (WHERE attempts > 0)
                FROM stage_progress
                ",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

            let completions: Vec<(i32, i64)> = sqlx::query_as(
                r"
                SELECT stage_id, COUNT(*)
                FROM stage_progress
                WHERE status = 'completed'
                GROUP BY stage_id
                ORDER BY stage_id
                ",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            let mut totals = ProgressTotals {
                total_users: from_db_count(total_users),
                active_users: from_db_count(active_users),
                ..ProgressTotals::default()
            };
            for (stage_id, count) in completions {
                totals
                    .completions_by_stage
                    .insert(StageId(from_db_int(stage_id, "stage_id")?), from_db_count(count));
            }
            Ok(totals)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }
}
