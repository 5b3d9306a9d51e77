//! Shared helpers for repository integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use hazrisk_core::inputs::InputKind;
use hazrisk_core::params::{CalculationDomain, CalculationParams};
use hazrisk_core::status::JobState;
use hazrisk_core::execution::LogLevel;
use hazrisk_core::types::DbId;
use hazrisk_db::models::calculation::Calculation;
use hazrisk_db::models::input::NewInput;
use hazrisk_db::models::job::{Dispatch, Job};
use hazrisk_db::models::output::NewOutput;
use hazrisk_db::repositories::{CalculationRepo, JobRepo, OutputRepo};
use hazrisk_db::DbPool;
use serde_json::{json, Value};

pub const OWNER: &str = "tester";

/// A fresh, migrated in-memory database.
pub async fn test_pool() -> DbPool {
    let pool = hazrisk_db::create_pool("sqlite::memory:", 1)
        .await
        .expect("in-memory pool");
    hazrisk_db::run_migrations(&pool).await.expect("migrations");
    pool
}

pub fn to_map(value: Value) -> BTreeMap<String, Value> {
    value
        .as_object()
        .expect("object")
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub fn hazard_params() -> CalculationParams {
    CalculationParams::parse(
        CalculationDomain::Hazard,
        &to_map(json!({
            "calculation_mode": "classical",
            "description": "test hazard",
            "investigation_time": 50.0,
            "intensity_measure_types": ["PGA"],
        })),
    )
    .expect("hazard params")
}

pub fn risk_params(link: Value) -> CalculationParams {
    let mut map = to_map(json!({"calculation_mode": "classical", "description": "test risk"}));
    map.extend(to_map(link));
    CalculationParams::parse(CalculationDomain::Risk, &map).expect("risk params")
}

pub fn new_input(kind: InputKind, content: &str) -> NewInput {
    NewInput {
        kind,
        path: format!("/jobs/{}.xml", kind.as_str()),
        content: content.as_bytes().to_vec(),
        owner: OWNER.to_string(),
    }
}

pub async fn create_hazard(pool: &DbPool) -> Calculation {
    CalculationRepo::create(pool, OWNER, &hazard_params())
        .await
        .expect("create hazard calculation")
}

/// Drive a fresh job of `calculation_id` to `complete` (or `failed`),
/// producing one output of `output_type`.
pub async fn finished_job(
    pool: &DbPool,
    calculation_id: DbId,
    output_type: &str,
    succeed: bool,
) -> (Job, DbId) {
    let job = JobRepo::create(pool, calculation_id, OWNER, LogLevel::Info)
        .await
        .unwrap();
    assert!(JobRepo::transition(pool, job.id, JobState::Validated).await.unwrap());
    assert_eq!(JobRepo::dispatch(pool, job.id).await.unwrap(), Dispatch::Dispatched);
    assert!(JobRepo::transition(pool, job.id, JobState::Running).await.unwrap());
    let output = OutputRepo::create(
        pool,
        job.id,
        &NewOutput::new(output_type, output_type, json!({"values": [1.0, 0.5]})),
    )
    .await
    .unwrap();
    if succeed {
        assert!(JobRepo::transition(pool, job.id, JobState::Complete).await.unwrap());
    } else {
        assert!(JobRepo::fail(pool, job.id, "boom").await.unwrap());
    }
    let job = JobRepo::find_by_id(pool, job.id).await.unwrap().unwrap();
    (job, output.id)
}
