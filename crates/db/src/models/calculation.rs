//! Calculation rows and listing summaries.

use hazrisk_core::error::CoreError;
use hazrisk_core::params::{CalculationDomain, CalculationParams};
use hazrisk_core::status::{CalculationStatus, JobState, StatusId};
use hazrisk_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `calculations` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Calculation {
    pub id: DbId,
    pub owner: String,
    pub domain: String,
    pub calculation_mode: String,
    pub description: String,
    pub parameters: Json<CalculationParams>,
    pub hazard_calculation_id: Option<DbId>,
    pub hazard_output_id: Option<DbId>,
    pub export_dir: Option<String>,
    pub created_at: Timestamp,
}

impl Calculation {
    pub fn domain(&self) -> Result<CalculationDomain, CoreError> {
        CalculationDomain::from_str_value(&self.domain)
    }

    pub fn params(&self) -> &CalculationParams {
        &self.parameters.0
    }
}

/// One line of a calculation listing with its latest job folded in.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CalculationSummary {
    pub id: DbId,
    pub domain: String,
    pub calculation_mode: String,
    pub description: String,
    pub created_at: Timestamp,
    pub latest_job_id: Option<DbId>,
    pub latest_is_running: Option<bool>,
    pub latest_state_id: Option<StatusId>,
}

impl CalculationSummary {
    /// Status derived from the latest job; never stored.
    pub fn status(&self) -> CalculationStatus {
        let latest = self
            .latest_is_running
            .zip(self.latest_state_id.and_then(JobState::from_id));
        CalculationStatus::derive(latest)
    }
}
