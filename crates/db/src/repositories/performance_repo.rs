//! Repository for the `performance` table.

use hazrisk_core::types::DbId;

use crate::models::performance::{NewPerformance, Performance};
use crate::DbPool;

/// Column list for `performance` queries.
const COLUMNS: &str = "id, job_id, operation, task, start_time, duration_ms, memory_peak_kb";

pub struct PerformanceRepo;

impl PerformanceRepo {
    /// Record the timing and memory peak of one successful work unit.
    pub async fn record(
        pool: &DbPool,
        job_id: DbId,
        record: &NewPerformance,
    ) -> Result<Performance, sqlx::Error> {
        let query = format!(
            "INSERT INTO performance \
                (job_id, operation, task, start_time, duration_ms, memory_peak_kb) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Performance>(&query)
            .bind(job_id)
            .bind(&record.operation)
            .bind(&record.task)
            .bind(record.start_time)
            .bind(record.duration_ms)
            .bind(record.memory_peak_kb)
            .fetch_one(pool)
            .await
    }

    pub async fn list_for_job(pool: &DbPool, job_id: DbId) -> Result<Vec<Performance>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM performance WHERE job_id = $1 ORDER BY id");
        sqlx::query_as::<_, Performance>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}
