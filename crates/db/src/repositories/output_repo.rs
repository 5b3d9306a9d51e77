//! Repository for the `outputs` table.
//!
//! Outputs are inserted as work units produce them, but calculation-level
//! listings only show outputs of complete jobs. Per-job listings show
//! everything, including partial outputs of failed jobs.

use chrono::Utc;
use hazrisk_core::status::JobState;
use hazrisk_core::types::DbId;
use sqlx::SqliteExecutor;

use crate::models::output::{NewOutput, Output};
use crate::DbPool;

/// Column list for `outputs` queries.
const COLUMNS: &str = "id, job_id, output_type, display_name, payload, created_at";

/// Same columns, qualified for joins against `jobs j`.
const QUALIFIED_COLUMNS: &str =
    "o.id, o.job_id, o.output_type, o.display_name, o.payload, o.created_at";

pub struct OutputRepo;

impl OutputRepo {
    pub async fn create<'e, E: SqliteExecutor<'e>>(
        executor: E,
        job_id: DbId,
        output: &NewOutput,
    ) -> Result<Output, sqlx::Error> {
        let query = format!(
            "INSERT INTO outputs (job_id, output_type, display_name, payload, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Output>(&query)
            .bind(job_id)
            .bind(&output.output_type)
            .bind(&output.display_name)
            .bind(&output.payload)
            .bind(Utc::now())
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id(pool: &DbPool, id: DbId) -> Result<Option<Output>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM outputs WHERE id = $1");
        sqlx::query_as::<_, Output>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Outputs of a calculation's complete jobs.
    pub async fn list_for_calculation(
        pool: &DbPool,
        calculation_id: DbId,
    ) -> Result<Vec<Output>, sqlx::Error> {
        let query = format!(
            "SELECT {QUALIFIED_COLUMNS} FROM outputs o \
             JOIN jobs j ON j.id = o.job_id \
             WHERE j.calculation_id = $1 AND j.state_id = $2 \
             ORDER BY o.id"
        );
        sqlx::query_as::<_, Output>(&query)
            .bind(calculation_id)
            .bind(JobState::Complete.id())
            .fetch_all(pool)
            .await
    }

    /// Every output a job produced, whatever the job's state.
    pub async fn list_for_job(pool: &DbPool, job_id: DbId) -> Result<Vec<Output>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM outputs WHERE job_id = $1 ORDER BY id");
        sqlx::query_as::<_, Output>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}
