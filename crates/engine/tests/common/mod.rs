//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hazrisk_core::execution::{ExecutionMode, LogLevel};
use hazrisk_db::models::output::NewOutput;
use hazrisk_db::DbPool;
use hazrisk_engine::{
    ComputationEngine, EngineContext, EngineError, Orchestrator, OrchestratorConfig,
    SupervisorConfig, WorkUnit,
};
use serde_json::json;

pub const OWNER: &str = "tester";

pub const CLASSICAL_HAZARD: &str = r#"
[general]
description = "Classical PSHA"
calculation_mode = "classical"

[logic_tree]
number_of_logic_tree_samples = 0
source_model_logic_tree_file = "source_model_logic_tree.xml"
gsim_logic_tree_file = "gmpe_logic_tree.xml"

[calculation]
investigation_time = 50.0
intensity_measure_types = ["PGA"]
"#;

pub const CLASSICAL_RISK: &str = r#"
[general]
description = "Classical risk"
calculation_mode = "classical"

[exposure]
exposure_file = "exposure_model.xml"

[vulnerability]
vulnerability_file = "vulnerability_model.xml"
"#;

/// A fresh, migrated in-memory database.
pub async fn test_pool() -> DbPool {
    let pool = hazrisk_db::create_pool("sqlite::memory:", 1)
        .await
        .expect("in-memory pool");
    hazrisk_db::run_migrations(&pool).await.expect("migrations");
    pool
}

pub fn supervisor_config(mode: ExecutionMode) -> SupervisorConfig {
    SupervisorConfig {
        mode,
        concurrency: 2,
        heartbeat_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(20),
    }
}

pub fn orchestrator(pool: &DbPool, mode: ExecutionMode) -> Orchestrator {
    orchestrator_with(pool, supervisor_config(mode))
}

pub fn orchestrator_with(pool: &DbPool, supervisor: SupervisorConfig) -> Orchestrator {
    Orchestrator::new(
        pool.clone(),
        OrchestratorConfig {
            owner: OWNER.to_string(),
            log_level: LogLevel::Debug,
            supervisor,
        },
    )
}

/// Write a job configuration and the input files it names into `dir`.
pub fn write_job(dir: &Path, config: &str, files: &[&str]) -> PathBuf {
    for file in files {
        std::fs::write(dir.join(file), format!("<nrml><!-- {file} --></nrml>\n"))
            .expect("write input file");
    }
    let path = dir.join("job.toml");
    std::fs::write(&path, config).expect("write job config");
    path
}

pub fn write_classical_hazard(dir: &Path) -> PathBuf {
    write_job(
        dir,
        CLASSICAL_HAZARD,
        &["source_model_logic_tree.xml", "gmpe_logic_tree.xml"],
    )
}

pub fn write_classical_risk(dir: &Path) -> PathBuf {
    write_job(
        dir,
        CLASSICAL_RISK,
        &["exposure_model.xml", "vulnerability_model.xml"],
    )
}

// ---------------------------------------------------------------------------
// Scripted engine
// ---------------------------------------------------------------------------

/// What a scripted work unit does when executed.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Succeed,
    Fail,
    Panic,
    /// Block the worker thread without yielding.
    Block(Duration),
}

/// An engine whose units behave as scripted, one unit per step.
pub struct ScriptedEngine {
    pub steps: Vec<Step>,
    pub fail_plan: bool,
    pub fail_finalize: bool,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            fail_plan: false,
            fail_finalize: false,
        }
    }
}

#[async_trait]
impl ComputationEngine for ScriptedEngine {
    fn operation(&self) -> &str {
        "scripted"
    }

    async fn plan(&self, _ctx: &EngineContext) -> Result<Vec<WorkUnit>, EngineError> {
        if self.fail_plan {
            return Err(EngineError::new("cannot plan"));
        }
        Ok((0..self.steps.len())
            .map(|i| WorkUnit::new(format!("unit-{i}"), json!({ "index": i })))
            .collect())
    }

    async fn execute(
        &self,
        unit: &WorkUnit,
        _ctx: &EngineContext,
    ) -> Result<Vec<NewOutput>, EngineError> {
        let index = unit.payload["index"].as_u64().expect("index") as usize;
        match self.steps[index] {
            Step::Succeed => Ok(vec![NewOutput::new(
                "hazard_curve",
                unit.id.clone(),
                json!({ "unit": unit.id }),
            )]),
            Step::Fail => Err(EngineError::new(format!("{} exploded", unit.id))),
            Step::Panic => panic!("bug in {}", unit.id),
            Step::Block(duration) => {
                std::thread::sleep(duration);
                Ok(Vec::new())
            }
        }
    }

    async fn finalize(&self, _ctx: &EngineContext) -> Result<Vec<NewOutput>, EngineError> {
        if self.fail_finalize {
            return Err(EngineError::new("cannot finalize"));
        }
        Ok(vec![NewOutput::new("hazard_map", "final", json!({ "final": true }))])
    }
}
