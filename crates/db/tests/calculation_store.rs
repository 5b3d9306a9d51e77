//! Integration tests for calculation creation, linkage and status.

mod common;

use assert_matches::assert_matches;
use common::{create_hazard, finished_job, risk_params, test_pool, OWNER};
use hazrisk_core::execution::LogLevel;
use hazrisk_core::params::{CalculationDomain, HazardLink};
use hazrisk_core::status::{CalculationStatus, JobState};
use hazrisk_core::validation::HazardSource;
use hazrisk_db::repositories::{CalculationRepo, JobRepo};
use hazrisk_db::StoreError;
use serde_json::json;

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hazard_calculation_persists_typed_params() {
    let pool = test_pool().await;
    let calc = create_hazard(&pool).await;

    assert_eq!(calc.domain().unwrap(), CalculationDomain::Hazard);
    assert_eq!(calc.calculation_mode, "classical");
    assert_eq!(calc.hazard_calculation_id, None);
    assert_eq!(calc.hazard_output_id, None);

    let loaded = CalculationRepo::find_by_id(&pool, calc.id).await.unwrap().unwrap();
    assert_eq!(loaded.params(), calc.params());
}

#[tokio::test]
async fn risk_linked_to_hazard_calculation() {
    let pool = test_pool().await;
    let hazard = create_hazard(&pool).await;

    let risk = CalculationRepo::create(
        &pool,
        OWNER,
        &risk_params(json!({"hazard_calculation_id": hazard.id})),
    )
    .await
    .unwrap();

    assert_eq!(risk.hazard_calculation_id, Some(hazard.id));
    assert_eq!(risk.hazard_output_id, None);
}

#[tokio::test]
async fn risk_linked_to_hazard_output() {
    let pool = test_pool().await;
    let hazard = create_hazard(&pool).await;
    let (_, output_id) = finished_job(&pool, hazard.id, "hazard_curve", true).await;

    let risk = CalculationRepo::create(
        &pool,
        OWNER,
        &risk_params(json!({"hazard_output_id": output_id})),
    )
    .await
    .unwrap();
    assert_eq!(risk.hazard_output_id, Some(output_id));
}

#[tokio::test]
async fn risk_linked_to_missing_hazard_is_rejected() {
    let pool = test_pool().await;
    let result = CalculationRepo::create(
        &pool,
        OWNER,
        &risk_params(json!({"hazard_calculation_id": 999})),
    )
    .await;
    assert_matches!(result, Err(StoreError::Parameter(msg)) if msg.contains("does not exist"));
}

#[tokio::test]
async fn risk_linked_to_risk_calculation_is_rejected() {
    let pool = test_pool().await;
    let hazard = create_hazard(&pool).await;
    let risk = CalculationRepo::create(
        &pool,
        OWNER,
        &risk_params(json!({"hazard_calculation_id": hazard.id})),
    )
    .await
    .unwrap();

    let result = CalculationRepo::create(
        &pool,
        OWNER,
        &risk_params(json!({"hazard_calculation_id": risk.id})),
    )
    .await;
    assert_matches!(result, Err(StoreError::Parameter(_)));
}

#[tokio::test]
async fn check_constraint_rejects_risk_with_both_links() {
    let pool = test_pool().await;
    let hazard = create_hazard(&pool).await;
    let (_, output_id) = finished_job(&pool, hazard.id, "hazard_curve", true).await;

    let result = sqlx::query(
        "INSERT INTO calculations (owner, domain, calculation_mode, parameters, \
             hazard_calculation_id, hazard_output_id, created_at) \
         VALUES ('x', 'risk', 'classical', '{}', $1, $2, '2026-01-01T00:00:00Z')",
    )
    .bind(hazard.id)
    .bind(output_id)
    .execute(&pool)
    .await;
    assert!(result.is_err());
}

// ---------------------------------------------------------------------------
// Status derivation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_follows_latest_job() {
    let pool = test_pool().await;
    let calc = create_hazard(&pool).await;
    assert_eq!(
        CalculationRepo::status(&pool, calc.id).await.unwrap(),
        Some(CalculationStatus::NoJobs)
    );

    let job = JobRepo::create(&pool, calc.id, OWNER, LogLevel::Info).await.unwrap();
    // A created job that is not running reads as failed until it runs.
    assert_eq!(
        CalculationRepo::status(&pool, calc.id).await.unwrap(),
        Some(CalculationStatus::Failed)
    );

    JobRepo::transition(&pool, job.id, JobState::Validated).await.unwrap();
    JobRepo::dispatch(&pool, job.id).await.unwrap();
    assert_eq!(
        CalculationRepo::status(&pool, calc.id).await.unwrap(),
        Some(CalculationStatus::Pending)
    );

    JobRepo::transition(&pool, job.id, JobState::Running).await.unwrap();
    JobRepo::transition(&pool, job.id, JobState::Complete).await.unwrap();
    assert_eq!(
        CalculationRepo::status(&pool, calc.id).await.unwrap(),
        Some(CalculationStatus::Successful)
    );

    // A later failed attempt wins.
    finished_job(&pool, calc.id, "hazard_curve", false).await;
    assert_eq!(
        CalculationRepo::status(&pool, calc.id).await.unwrap(),
        Some(CalculationStatus::Failed)
    );
}

#[tokio::test]
async fn status_of_missing_calculation_is_none() {
    let pool = test_pool().await;
    assert_eq!(CalculationRepo::status(&pool, 42).await.unwrap(), None);
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_by_owner_is_newest_first_and_filters_domain() {
    let pool = test_pool().await;
    let first = create_hazard(&pool).await;
    let second = create_hazard(&pool).await;
    finished_job(&pool, second.id, "hazard_curve", true).await;
    let risk = CalculationRepo::create(
        &pool,
        OWNER,
        &risk_params(json!({"hazard_calculation_id": second.id})),
    )
    .await
    .unwrap();

    let all = CalculationRepo::list_by_owner(&pool, OWNER, None).await.unwrap();
    let ids: Vec<_> = all.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![risk.id, second.id, first.id]);

    let hazards = CalculationRepo::list_by_owner(&pool, OWNER, Some(CalculationDomain::Hazard))
        .await
        .unwrap();
    assert_eq!(hazards.len(), 2);
    assert_eq!(hazards[0].status(), CalculationStatus::Successful);
    assert_eq!(hazards[1].status(), CalculationStatus::NoJobs);

    let strangers = CalculationRepo::list_by_owner(&pool, "someone-else", None).await.unwrap();
    assert!(strangers.is_empty());
}

// ---------------------------------------------------------------------------
// Hazard source resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resolves_successful_hazard_calculation() {
    let pool = test_pool().await;
    let hazard = create_hazard(&pool).await;
    finished_job(&pool, hazard.id, "hazard_curve", true).await;

    let source = CalculationRepo::resolve_hazard_source(&pool, HazardLink::Calculation(hazard.id))
        .await
        .unwrap();
    assert_eq!(
        source,
        Some(HazardSource::Calculation {
            is_hazard: true,
            status: CalculationStatus::Successful,
            output_types: vec!["hazard_curve".to_string()],
        })
    );
}

#[tokio::test]
async fn resolves_output_of_failed_job() {
    let pool = test_pool().await;
    let hazard = create_hazard(&pool).await;
    let (_, output_id) = finished_job(&pool, hazard.id, "gmf", false).await;

    let source = CalculationRepo::resolve_hazard_source(&pool, HazardLink::Output(output_id))
        .await
        .unwrap();
    assert_eq!(
        source,
        Some(HazardSource::Output {
            is_hazard: true,
            output_type: "gmf".to_string(),
            job_state: JobState::Failed,
        })
    );
    assert_eq!(
        CalculationRepo::resolve_hazard_source(&pool, HazardLink::Output(999))
            .await
            .unwrap(),
        None
    );
}
