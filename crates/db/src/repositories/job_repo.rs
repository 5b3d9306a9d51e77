//! Repository for the `jobs` and `job_stats` tables.
//!
//! Every state change is a conditional UPDATE keyed on the legal
//! predecessor states, so a stale writer can never move a job backwards.
//! Methods that may run inside a transaction take any SQLite executor.

use chrono::Utc;
use hazrisk_core::execution::LogLevel;
use hazrisk_core::status::{JobState, StatusId};
use hazrisk_core::types::{DbId, Timestamp};
use sqlx::SqliteExecutor;

use crate::models::job::{Dispatch, Job, JobStats};
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, calculation_id, owner, log_level, state_id, is_running, \
    error_message, created_at, last_update";

/// SQL list of the states `next` may be entered from, e.g. `(1, 2)`.
fn predecessor_list(next: JobState) -> String {
    let ids: Vec<String> = JobState::predecessors(next)
        .into_iter()
        .map(|s| StatusId::from(s).to_string())
        .collect();
    format!("({})", ids.join(", "))
}

/// Provides job creation and guarded state transitions.
pub struct JobRepo;

impl JobRepo {
    /// Attach a new `created` job to a calculation.
    pub async fn create(
        pool: &DbPool,
        calculation_id: DbId,
        owner: &str,
        log_level: LogLevel,
    ) -> Result<Job, sqlx::Error> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO jobs (calculation_id, owner, log_level, state_id, is_running, created_at, last_update) \
             VALUES ($1, $2, $3, $4, 0, $5, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(calculation_id)
            .bind(owner)
            .bind(log_level.as_str())
            .bind(JobState::Created.id())
            .bind(now)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &DbPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// The job that determines the calculation's status.
    pub async fn latest_for_calculation(
        pool: &DbPool,
        calculation_id: DbId,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE calculation_id = $1 ORDER BY id DESC LIMIT 1"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(calculation_id)
            .fetch_optional(pool)
            .await
    }

    /// All jobs of a calculation, oldest first.
    pub async fn list_for_calculation(
        pool: &DbPool,
        calculation_id: DbId,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE calculation_id = $1 ORDER BY id");
        sqlx::query_as::<_, Job>(&query)
            .bind(calculation_id)
            .fetch_all(pool)
            .await
    }

    /// The calculation's running job, if any.
    pub async fn running_for_calculation(
        pool: &DbPool,
        calculation_id: DbId,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM jobs WHERE calculation_id = $1 AND is_running = 1");
        sqlx::query_as::<_, Job>(&query)
            .bind(calculation_id)
            .fetch_optional(pool)
            .await
    }

    /// Move a job to `next` if it is currently in a legal predecessor state.
    ///
    /// Entering a terminal state clears `is_running`. Returns `false` if the
    /// job was not in a state `next` may be entered from. Use
    /// [`JobRepo::dispatch`] and [`JobRepo::fail`] for those transitions.
    pub async fn transition<'e, E: SqliteExecutor<'e>>(
        executor: E,
        job_id: DbId,
        next: JobState,
    ) -> Result<bool, sqlx::Error> {
        let clear_running = if next.is_terminal() { ", is_running = 0" } else { "" };
        let query = format!(
            "UPDATE jobs SET state_id = $1, last_update = $2{clear_running} \
             WHERE id = $3 AND state_id IN {}",
            predecessor_list(next)
        );
        let result = sqlx::query(&query)
            .bind(next.id())
            .bind(Utc::now())
            .bind(job_id)
            .execute(executor)
            .await?;
        let moved = result.rows_affected() > 0;
        if moved {
            tracing::debug!(job_id, state = %next, "Job transitioned");
        } else {
            tracing::warn!(job_id, state = %next, "Job transition rejected");
        }
        Ok(moved)
    }

    /// `validated → dispatched`, claiming the calculation's running slot.
    ///
    /// If another job of the same calculation holds the slot, a validated
    /// job is deleted in the same transaction. It never ran, so it owns no
    /// outputs or stats, and left behind it would become the latest job. The
    /// partial unique index on `is_running` backs the `NOT EXISTS` guard
    /// against racing writers.
    pub async fn dispatch(pool: &DbPool, job_id: DbId) -> Result<Dispatch, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE jobs SET state_id = $1, is_running = 1, last_update = $2 \
             WHERE id = $3 AND state_id = $4 \
               AND NOT EXISTS (SELECT 1 FROM jobs other \
                               WHERE other.calculation_id = jobs.calculation_id \
                                 AND other.is_running = 1)",
        )
        .bind(JobState::Dispatched.id())
        .bind(Utc::now())
        .bind(job_id)
        .bind(JobState::Validated.id())
        .execute(&mut *tx)
        .await;
        let claimed = match claimed {
            Ok(done) => done.rows_affected() > 0,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => false,
            Err(e) => return Err(e),
        };
        if claimed {
            tx.commit().await?;
            return Ok(Dispatch::Dispatched);
        }

        let holder: Option<DbId> = sqlx::query_scalar(
            "SELECT other.id FROM jobs other \
             JOIN jobs me ON me.calculation_id = other.calculation_id \
             WHERE me.id = $1 AND other.id <> me.id AND other.is_running = 1",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(running_job_id) = holder else {
            tx.rollback().await?;
            return Ok(Dispatch::NotValidated);
        };

        let withdrawn = sqlx::query(
            "DELETE FROM jobs WHERE id = $1 AND is_running = 0 AND state_id = $2",
        )
        .bind(job_id)
        .bind(JobState::Validated.id())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        tracing::warn!(
            job_id,
            running_job_id,
            withdrawn = withdrawn > 0,
            "Dispatch lost the running slot",
        );
        Ok(Dispatch::Busy { running_job_id })
    }

    /// Fail a job from any non-terminal state, recording the reason.
    pub async fn fail<'e, E: SqliteExecutor<'e>>(
        executor: E,
        job_id: DbId,
        error_message: &str,
    ) -> Result<bool, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET state_id = $1, is_running = 0, error_message = $2, last_update = $3 \
             WHERE id = $4 AND state_id IN {}",
            predecessor_list(JobState::Failed)
        );
        let result = sqlx::query(&query)
            .bind(JobState::Failed.id())
            .bind(error_message)
            .bind(Utc::now())
            .bind(job_id)
            .execute(executor)
            .await?;
        let failed = result.rows_affected() > 0;
        if failed {
            tracing::info!(job_id, error = error_message, "Job failed");
        }
        Ok(failed)
    }

    // -- job_stats ------------------------------------------------------------

    /// Record the planned number of work units and the run start.
    pub async fn record_start(
        pool: &DbPool,
        job_id: DbId,
        num_tasks: i64,
        started_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO job_stats (job_id, num_tasks, started_at) VALUES ($1, $2, $3) \
             ON CONFLICT (job_id) DO UPDATE SET num_tasks = excluded.num_tasks, \
                                                started_at = excluded.started_at",
        )
        .bind(job_id)
        .bind(num_tasks)
        .bind(started_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record the end of a run, whatever its outcome.
    pub async fn record_end<'e, E: SqliteExecutor<'e>>(
        executor: E,
        job_id: DbId,
        completed_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO job_stats (job_id, completed_at) VALUES ($1, $2) \
             ON CONFLICT (job_id) DO UPDATE SET completed_at = excluded.completed_at",
        )
        .bind(job_id)
        .bind(completed_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn stats(pool: &DbPool, job_id: DbId) -> Result<Option<JobStats>, sqlx::Error> {
        sqlx::query_as::<_, JobStats>(
            "SELECT job_id, num_tasks, started_at, completed_at FROM job_stats WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(pool)
        .await
    }
}
