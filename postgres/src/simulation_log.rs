use crate::{db_error, from_db_count, from_db_int, to_db_int};
use progression_core::{
    LogTotals, NewLogEntry, SimulationLog, SimulationLogEntry, SimulationOutcome, StageId,
    StoreError, StoreFuture, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// `PostgreSQL`-backed audit log over the `simulation_logs` table.
///
/// Insert-only; rows are never updated or deleted.
#[derive(Clone, Debug)]
pub struct PostgresSimulationLog {
    pool: PgPool,
}

impl PostgresSimulationLog {
    /// Create a log over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &PgRow) -> Result<SimulationLogEntry, StoreError> {
        let result: String = row.try_get("result").map_err(db_error)?;

        Ok(SimulationLogEntry {
            id: row.try_get("id").map_err(db_error)?,
            user_id: UserId(row.try_get("user_id").map_err(db_error)?),
            stage_id: StageId(from_db_int(row.try_get("stage_id").map_err(db_error)?, "stage_id")?),
            attempt_number: from_db_int(
                row.try_get("attempt_number").map_err(db_error)?,
                "attempt_number",
            )?,
            result: SimulationOutcome::parse(&result),
            message: row.try_get("message").map_err(db_error)?,
            payload: row.try_get("payload").map_err(db_error)?,
            timestamp: row.try_get("reported_at").map_err(db_error)?,
            recorded_at: row.try_get("recorded_at").map_err(db_error)?,
        })
    }
}

impl SimulationLog for PostgresSimulationLog {
    fn append(&self, entry: NewLogEntry) -> StoreFuture<'_, SimulationLogEntry> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                INSERT INTO simulation_logs (
                    user_id, stage_id, attempt_number, result, message, payload, reported_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, user_id, stage_id, attempt_number, result, message, payload,
                          reported_at, recorded_at
                ",
            )
            .bind(entry.user_id.0)
            .bind(to_db_int(entry.stage_id.0, "stage_id")?)
            .bind(to_db_int(entry.attempt_number, "attempt_number")?)
            .bind(entry.result.as_str())
            .bind(&entry.message)
            .bind(&entry.payload)
            .bind(entry.timestamp)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

            metrics::counter!("progression.log.appended", "result" => entry.result.as_str())
                .increment(1);

            Self::row_to_entry(&row)
        })
    }

    fn list_for_user(&self, user_id: UserId) -> StoreFuture<'_, Vec<SimulationLogEntry>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, user_id, stage_id, attempt_number, result, message, payload,
                       reported_at, recorded_at
                FROM simulation_logs
                WHERE user_id = $1
                ORDER BY reported_at ASC, id ASC
                ",
            )
            .bind(user_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(Self::row_to_entry).collect()
        })
    }

    fn log_totals(&self) -> StoreFuture<'_, LogTotals> {
        Box::pin(async move {
            let (total, successes): (i64, i64) = sqlx::query_as(
                r"
                SELECT COUNT(*),
                       COUNT(*) FILTER (WHERE result = 'success')
                FROM simulation_logs
                ",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(LogTotals {
                total: from_db_count(total),
                successes: from_db_count(successes),
            })
        })
    }
}
