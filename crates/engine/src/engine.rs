//! The computation engine boundary.
//!
//! The supervisor knows nothing about hazard or risk numerics. An engine
//! splits a calculation into [`WorkUnit`]s, executes them one at a time
//! (possibly concurrently), and produces any final outputs once all units
//! have succeeded.

use std::sync::Arc;

use async_trait::async_trait;
use hazrisk_core::params::CalculationParams;
use hazrisk_core::types::DbId;
use hazrisk_db::models::input::Input;
use hazrisk_db::models::output::{NewOutput, Output};
use serde::{Deserialize, Serialize};

/// Everything an engine may read while running one job.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub job_id: DbId,
    pub calculation_id: DbId,
    pub params: Arc<CalculationParams>,
    /// Inputs linked to the calculation.
    pub inputs: Arc<Vec<Input>>,
    /// Hazard outputs a risk calculation consumes; empty for hazard.
    pub hazard_outputs: Arc<Vec<Output>>,
}

/// One independently executable slice of a calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Stable identifier, unique within a job.
    pub id: String,
    pub payload: serde_json::Value,
}

impl WorkUnit {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// A failure reported by an engine. Captured into the job, never re-raised.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ComputationEngine: Send + Sync {
    /// Operation name recorded against performance records.
    fn operation(&self) -> &str;

    async fn plan(&self, ctx: &EngineContext) -> Result<Vec<WorkUnit>, EngineError>;

    async fn execute(
        &self,
        unit: &WorkUnit,
        ctx: &EngineContext,
    ) -> Result<Vec<NewOutput>, EngineError>;

    /// Runs once, after every unit succeeded.
    async fn finalize(&self, ctx: &EngineContext) -> Result<Vec<NewOutput>, EngineError>;
}
