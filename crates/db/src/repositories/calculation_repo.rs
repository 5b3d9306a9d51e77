//! Repository for the `calculations` table.
//!
//! Calculation status is never stored: listings join the latest job (by
//! id) and derive it on every read.

use chrono::Utc;
use hazrisk_core::params::{CalculationDomain, CalculationParams, HazardLink};
use hazrisk_core::status::{CalculationStatus, JobState};
use hazrisk_core::types::DbId;
use hazrisk_core::validation::HazardSource;
use sqlx::types::Json;

use crate::error::{DeleteError, StoreError};
use crate::models::calculation::{Calculation, CalculationSummary};
use crate::DbPool;

/// Column list for `calculations` queries.
const COLUMNS: &str = "\
    id, owner, domain, calculation_mode, description, parameters, \
    hazard_calculation_id, hazard_output_id, export_dir, created_at";

/// Latest job of each calculation, for status derivation.
const LATEST_JOB_JOIN: &str = "\
    LEFT JOIN jobs j ON j.id = (SELECT MAX(id) FROM jobs WHERE calculation_id = c.id)";

/// Provides creation, listing and cascading deletion of calculations.
pub struct CalculationRepo;

impl CalculationRepo {
    /// Persist a calculation.
    ///
    /// A risk calculation's hazard link must point at an existing hazard
    /// calculation or at an output of one; otherwise nothing is written.
    pub async fn create(
        pool: &DbPool,
        owner: &str,
        params: &CalculationParams,
    ) -> Result<Calculation, StoreError> {
        let mut tx = pool.begin().await?;

        if let Some(link) = params.hazard_link() {
            let linked_domain: Option<String> = match link {
                HazardLink::Calculation(id) => {
                    sqlx::query_scalar("SELECT domain FROM calculations WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&mut *tx)
                        .await?
                }
                HazardLink::Output(id) => {
                    sqlx::query_scalar(
                        "SELECT c.domain FROM outputs o \
                         JOIN jobs j ON j.id = o.job_id \
                         JOIN calculations c ON c.id = j.calculation_id \
                         WHERE o.id = $1",
                    )
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?
                }
            };
            let (what, id) = match link {
                HazardLink::Calculation(id) => ("hazard calculation", id),
                HazardLink::Output(id) => ("hazard output", id),
            };
            match linked_domain.as_deref() {
                None => {
                    return Err(StoreError::Parameter(format!("Linked {what} {id} does not exist")));
                }
                Some(domain) if domain != CalculationDomain::Hazard.as_str() => {
                    return Err(StoreError::Parameter(format!(
                        "Linked {what} {id} does not belong to a hazard calculation"
                    )));
                }
                Some(_) => {}
            }
        }

        let query = format!(
            "INSERT INTO calculations \
                (owner, domain, calculation_mode, description, parameters, \
                 hazard_calculation_id, hazard_output_id, export_dir, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        let link = params.hazard_link();
        let calculation = sqlx::query_as::<_, Calculation>(&query)
            .bind(owner)
            .bind(params.domain().as_str())
            .bind(params.calculation_mode())
            .bind(params.description())
            .bind(Json(params))
            .bind(link.and_then(|l| l.calculation_id()))
            .bind(link.and_then(|l| l.output_id()))
            .bind(params.export_dir().map(|p| p.to_string_lossy().into_owned()))
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(
            calculation_id = calculation.id,
            domain = %calculation.domain,
            mode = %calculation.calculation_mode,
            "Calculation created",
        );
        Ok(calculation)
    }

    pub async fn find_by_id(pool: &DbPool, id: DbId) -> Result<Option<Calculation>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM calculations WHERE id = $1");
        sqlx::query_as::<_, Calculation>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// An owner's calculations, newest first, optionally filtered by domain.
    pub async fn list_by_owner(
        pool: &DbPool,
        owner: &str,
        domain: Option<CalculationDomain>,
    ) -> Result<Vec<CalculationSummary>, sqlx::Error> {
        let query = format!(
            "SELECT c.id, c.domain, c.calculation_mode, c.description, c.created_at, \
                    j.id AS latest_job_id, j.is_running AS latest_is_running, \
                    j.state_id AS latest_state_id \
             FROM calculations c {LATEST_JOB_JOIN} \
             WHERE c.owner = $1 AND ($2 IS NULL OR c.domain = $2) \
             ORDER BY c.id DESC"
        );
        sqlx::query_as::<_, CalculationSummary>(&query)
            .bind(owner)
            .bind(domain.map(|d| d.as_str()))
            .fetch_all(pool)
            .await
    }

    /// Derived status of one calculation; `None` if it does not exist.
    pub async fn status(pool: &DbPool, id: DbId) -> Result<Option<CalculationStatus>, sqlx::Error> {
        let query = format!(
            "SELECT c.id, c.domain, c.calculation_mode, c.description, c.created_at, \
                    j.id AS latest_job_id, j.is_running AS latest_is_running, \
                    j.state_id AS latest_state_id \
             FROM calculations c {LATEST_JOB_JOIN} \
             WHERE c.id = $1"
        );
        let summary = sqlx::query_as::<_, CalculationSummary>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(summary.map(|s| s.status()))
    }

    /// Resolve what the validator needs to know about a hazard link.
    ///
    /// Returns `None` if the linked calculation or output no longer exists.
    pub async fn resolve_hazard_source(
        pool: &DbPool,
        link: HazardLink,
    ) -> Result<Option<HazardSource>, sqlx::Error> {
        let hazard = CalculationDomain::Hazard.as_str();
        match link {
            HazardLink::Calculation(id) => {
                let Some(calculation) = Self::find_by_id(pool, id).await? else {
                    return Ok(None);
                };
                let status = Self::status(pool, id)
                    .await?
                    .unwrap_or(CalculationStatus::NoJobs);
                let output_types: Vec<String> = sqlx::query_scalar(
                    "SELECT DISTINCT o.output_type FROM outputs o \
                     WHERE o.job_id = (SELECT MAX(id) FROM jobs \
                                       WHERE calculation_id = $1 AND state_id = $2) \
                     ORDER BY o.output_type",
                )
                .bind(id)
                .bind(JobState::Complete.id())
                .fetch_all(pool)
                .await?;
                Ok(Some(HazardSource::Calculation {
                    is_hazard: calculation.domain == hazard,
                    status,
                    output_types,
                }))
            }
            HazardLink::Output(id) => {
                let row: Option<(String, i16, String)> = sqlx::query_as(
                    "SELECT o.output_type, j.state_id, c.domain FROM outputs o \
                     JOIN jobs j ON j.id = o.job_id \
                     JOIN calculations c ON c.id = j.calculation_id \
                     WHERE o.id = $1",
                )
                .bind(id)
                .fetch_optional(pool)
                .await?;
                Ok(row.map(|(output_type, state_id, domain)| HazardSource::Output {
                    is_hazard: domain == hazard,
                    output_type,
                    job_state: JobState::from_id(state_id).unwrap_or(JobState::Failed),
                }))
            }
        }
    }

    /// Delete a calculation and everything that hangs off it.
    ///
    /// Outputs, performance records, job stats, jobs, input links, inputs no
    /// other calculation links, and finally the calculation row are removed
    /// in one transaction. Any failure rolls everything back. A calculation
    /// with a running job is left alone.
    pub async fn delete(pool: &DbPool, id: DbId) -> Result<(), DeleteError> {
        let mut tx = pool.begin().await?;

        let exists: Option<DbId> = sqlx::query_scalar("SELECT id FROM calculations WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DeleteError::NotFound(id));
        }

        let running: Option<DbId> =
            sqlx::query_scalar("SELECT id FROM jobs WHERE calculation_id = $1 AND is_running = 1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(job_id) = running {
            return Err(DeleteError::Running { id, job_id });
        }

        let referenced_by = find_referencing(&mut *tx, id).await?;
        if !referenced_by.is_empty() {
            return Err(DeleteError::Referenced { id, referenced_by });
        }

        let input_ids: Vec<DbId> =
            sqlx::query_scalar("SELECT input_id FROM calculation_inputs WHERE calculation_id = $1")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        const JOBS_OF: &str = "(SELECT id FROM jobs WHERE calculation_id = $1)";
        for table in ["outputs", "performance", "job_stats"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE job_id IN {JOBS_OF}"))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM jobs WHERE calculation_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM calculation_inputs WHERE calculation_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let mut orphans = 0u64;
        for input_id in &input_ids {
            orphans += sqlx::query(
                "DELETE FROM inputs WHERE id = $1 \
                 AND NOT EXISTS (SELECT 1 FROM calculation_inputs WHERE input_id = $1)",
            )
            .bind(input_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        sqlx::query("DELETE FROM calculations WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(calculation_id = id, orphaned_inputs = orphans, "Calculation deleted");
        Ok(())
    }
}

async fn find_referencing(
    conn: &mut sqlx::SqliteConnection,
    id: DbId,
) -> Result<Vec<DbId>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT id FROM calculations \
         WHERE hazard_calculation_id = $1 \
            OR hazard_output_id IN (SELECT o.id FROM outputs o \
                                    JOIN jobs j ON j.id = o.job_id \
                                    WHERE j.calculation_id = $1) \
         ORDER BY id",
    )
    .bind(id)
    .fetch_all(conn)
    .await
}
