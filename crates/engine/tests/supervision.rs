//! Failure handling of the execution supervisor, driven by scripted engines.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{
    orchestrator_with, supervisor_config, test_pool, write_classical_hazard, ScriptedEngine, Step,
};
use hazrisk_core::execution::{ExecutionMode, Role};
use hazrisk_core::params::CalculationDomain;
use hazrisk_core::status::JobState;
use hazrisk_db::repositories::{JobRepo, PerformanceRepo};
use hazrisk_db::{DbPool, DeleteError};
use hazrisk_engine::{EngineRegistry, Orchestrator, RunReport, RunRequest, SupervisorConfig};
use hazrisk_events::JobEventKind;

fn scripted(pool: &DbPool, config: SupervisorConfig, engine: ScriptedEngine) -> Orchestrator {
    let mut registry = EngineRegistry::new();
    registry.register(CalculationDomain::Hazard, "classical", Arc::new(engine));
    orchestrator_with(pool, config).with_registry(registry)
}

async fn run_scripted(
    pool: &DbPool,
    mode: ExecutionMode,
    engine: ScriptedEngine,
) -> (Orchestrator, RunReport) {
    let orch = scripted(pool, supervisor_config(mode), engine);
    let report = run_classical(&orch).await;
    (orch, report)
}

async fn run_classical(orch: &Orchestrator) -> RunReport {
    let dir = tempfile::tempdir().unwrap();
    let config = write_classical_hazard(dir.path());
    orch.run(&RunRequest::new(CalculationDomain::Hazard, config), Role::Invoker)
        .await
        .unwrap()
}

// -- debug mode -----------------------------------------------------------

#[tokio::test]
async fn debug_mode_stops_at_first_failing_unit() {
    let pool = test_pool().await;
    let engine = ScriptedEngine::new(vec![Step::Succeed, Step::Fail, Step::Succeed]);

    let (orch, report) = run_scripted(&pool, ExecutionMode::Debug, engine).await;

    assert_eq!(report.state, JobState::Failed);
    assert!(report.error.as_deref().unwrap().contains("unit-1 exploded"));
    // Only the unit before the failure ran; the partial output survives per job.
    assert_eq!(report.outputs.len(), 1);
    assert!(orch.list_outputs(report.calculation_id).await.unwrap().is_empty());
    assert_eq!(orch.list_job_outputs(report.job_id).await.unwrap().len(), 1);

    let job = JobRepo::find_by_id(&pool, report.job_id).await.unwrap().unwrap();
    assert!(!job.is_running);
}

#[tokio::test]
async fn debug_mode_records_performance_for_successful_units_only() {
    let pool = test_pool().await;
    let engine = ScriptedEngine::new(vec![Step::Succeed, Step::Succeed, Step::Fail]);

    let (_, report) = run_scripted(&pool, ExecutionMode::Debug, engine).await;

    assert_eq!(report.state, JobState::Failed);
    let records = PerformanceRepo::list_for_job(&pool, report.job_id).await.unwrap();
    let tasks: Vec<_> = records.iter().map(|r| r.task.as_str()).collect();
    assert_eq!(tasks, ["unit-0", "unit-1"]);
    assert!(records.iter().all(|r| r.operation == "scripted"));
    assert!(records.iter().all(|r| r.memory_peak_kb.is_some_and(|kb| kb > 0)));
}

#[tokio::test]
async fn debug_mode_catches_panics() {
    let pool = test_pool().await;
    let engine = ScriptedEngine::new(vec![Step::Panic]);

    let (_, report) = run_scripted(&pool, ExecutionMode::Debug, engine).await;

    assert_eq!(report.state, JobState::Failed);
    let error = report.error.unwrap();
    assert!(error.contains("panicked"), "{error}");
    assert!(error.contains("bug in unit-0"), "{error}");
}

// -- distributed mode -----------------------------------------------------

#[tokio::test]
async fn distributed_run_completes_and_records_stats() {
    let pool = test_pool().await;
    let engine = ScriptedEngine::new(vec![Step::Succeed; 5]);

    let (orch, report) = run_scripted(&pool, ExecutionMode::Distributed, engine).await;

    assert_eq!(report.state, JobState::Complete, "error: {:?}", report.error);
    // Five unit outputs plus the final one.
    assert_eq!(orch.list_outputs(report.calculation_id).await.unwrap().len(), 6);
    let records = PerformanceRepo::list_for_job(&pool, report.job_id).await.unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.memory_peak_kb.is_some()));

    let stats = JobRepo::stats(&pool, report.job_id).await.unwrap().unwrap();
    assert_eq!(stats.num_tasks, 5);
    assert!(stats.started_at.is_some());
    assert!(stats.completed_at.is_some());
}

#[tokio::test]
async fn distributed_failing_unit_fails_job() {
    let pool = test_pool().await;
    let engine = ScriptedEngine::new(vec![Step::Succeed, Step::Fail]);

    let (orch, report) = run_scripted(&pool, ExecutionMode::Distributed, engine).await;

    assert_eq!(report.state, JobState::Failed);
    assert!(report.error.unwrap().contains("unit-1 exploded"));
    assert!(orch.list_outputs(report.calculation_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn worker_panic_fails_job() {
    let pool = test_pool().await;
    let engine = ScriptedEngine::new(vec![Step::Succeed, Step::Panic]);

    let (_, report) = run_scripted(&pool, ExecutionMode::Distributed, engine).await;

    assert_eq!(report.state, JobState::Failed);
    let error = report.error.unwrap();
    assert!(error.starts_with("Worker crashed"), "{error}");
    let job = JobRepo::find_by_id(&pool, report.job_id).await.unwrap().unwrap();
    assert!(!job.is_running);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn silent_worker_fails_job() {
    let pool = test_pool().await;
    let config = SupervisorConfig {
        mode: ExecutionMode::Distributed,
        concurrency: 2,
        heartbeat_timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(10),
    };
    let engine = ScriptedEngine::new(vec![Step::Block(Duration::from_millis(800))]);
    let orch = scripted(&pool, config, engine);

    let report = run_classical(&orch).await;

    assert_eq!(report.state, JobState::Failed);
    assert!(report.error.unwrap().contains("no heartbeat"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deletion_during_a_run_is_refused() {
    let pool = test_pool().await;
    let engine = ScriptedEngine::new(vec![Step::Block(Duration::from_millis(400)), Step::Succeed]);
    let orch = scripted(&pool, supervisor_config(ExecutionMode::Distributed), engine);

    let (report, deleted) = tokio::join!(run_classical(&orch), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        orch.delete_calculation(1, true).await
    });

    assert_matches!(deleted, Err(DeleteError::Running { id: 1, .. }));
    assert_eq!(report.state, JobState::Complete);
    assert_eq!(report.outputs.len(), 2);
}

// -- plan and finalize ----------------------------------------------------

#[tokio::test]
async fn planning_failure_fails_job() {
    let pool = test_pool().await;
    let mut engine = ScriptedEngine::new(vec![Step::Succeed]);
    engine.fail_plan = true;

    let (_, report) = run_scripted(&pool, ExecutionMode::Distributed, engine).await;

    assert_eq!(report.state, JobState::Failed);
    assert_eq!(report.error.as_deref(), Some("Planning failed: cannot plan"));
    assert!(report.outputs.is_empty());
}

#[tokio::test]
async fn finalize_failure_keeps_unit_outputs_hidden() {
    let pool = test_pool().await;
    let mut engine = ScriptedEngine::new(vec![Step::Succeed, Step::Succeed]);
    engine.fail_finalize = true;

    let (orch, report) = run_scripted(&pool, ExecutionMode::Distributed, engine).await;

    assert_eq!(report.state, JobState::Failed);
    assert_eq!(report.error.as_deref(), Some("Finalize failed: cannot finalize"));
    assert_eq!(report.outputs.len(), 2);
    assert!(orch.list_outputs(report.calculation_id).await.unwrap().is_empty());
}

// -- events ---------------------------------------------------------------

#[tokio::test]
async fn progress_is_published_on_the_event_bus() {
    let pool = test_pool().await;
    let orch = scripted(
        &pool,
        supervisor_config(ExecutionMode::Debug),
        ScriptedEngine::new(vec![Step::Succeed, Step::Succeed]),
    );
    let mut rx = orch.events().subscribe();

    let report = run_classical(&orch).await;
    assert!(report.succeeded());

    let mut states = Vec::new();
    let mut units = 0;
    let mut produced = 0;
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.job_id, report.job_id);
        match event.kind {
            JobEventKind::StateChanged { state } => states.push(state),
            JobEventKind::UnitCompleted { .. } => units += 1,
            JobEventKind::OutputProduced { .. } => produced += 1,
            JobEventKind::UnitFailed { .. } => panic!("no unit should fail"),
        }
    }
    assert_eq!(
        states,
        [
            JobState::Created,
            JobState::Validated,
            JobState::Dispatched,
            JobState::Running,
            JobState::Complete,
        ]
    );
    assert_eq!(units, 2);
    assert_eq!(produced, 3);
}
