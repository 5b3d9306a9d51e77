//! Admission gate for a freshly created calculation.
//!
//! Evaluation is pure: the orchestrator loads the linked inputs and the
//! state of any referenced hazard source, then asks [`validate`] whether
//! the job may run. A `Some(diagnostic)` result means the job is failed
//! before it is ever dispatched.

use crate::execution::ExportFormat;
use crate::inputs::InputKind;
use crate::params::{CalculationParams, HazardMode, HazardParams, RiskMode, RiskParams};
use crate::status::{CalculationStatus, JobState};

/// What the store knows about the hazard source a risk calculation links to.
#[derive(Debug, Clone, PartialEq)]
pub enum HazardSource {
    /// `hazard_calculation_id` was given.
    Calculation {
        is_hazard: bool,
        status: CalculationStatus,
        /// Types of the outputs of its latest complete job.
        output_types: Vec<String>,
    },
    /// `hazard_output_id` was given.
    Output {
        is_hazard: bool,
        output_type: String,
        job_state: JobState,
    },
}

/// Everything the validator looks at.
#[derive(Debug, Clone, Copy)]
pub struct ValidationRequest<'a> {
    pub params: &'a CalculationParams,
    pub inputs: &'a [InputKind],
    pub requested_exports: &'a [String],
    /// Resolved hazard source; `None` for hazard calculations.
    pub hazard_source: Option<&'a HazardSource>,
}

/// Return `None` if the calculation is admissible, else a diagnostic.
pub fn validate(request: &ValidationRequest<'_>) -> Option<String> {
    check_exports(request.requested_exports)
        .or_else(|| match request.params {
            CalculationParams::Hazard(p) => check_hazard(p, request.inputs),
            CalculationParams::Risk(p) => check_risk(p, request.inputs, request.hazard_source),
        })
}

fn check_exports(requested: &[String]) -> Option<String> {
    let unsupported: Vec<&str> = requested
        .iter()
        .filter(|f| ExportFormat::from_str_value(f).is_none())
        .map(String::as_str)
        .collect();
    if unsupported.is_empty() {
        None
    } else {
        Some(format!(
            "Unsupported export format(s): {}. Supported: xml, json",
            unsupported.join(", ")
        ))
    }
}

/// Input kinds a hazard mode cannot run without.
pub fn required_hazard_inputs(mode: HazardMode) -> &'static [InputKind] {
    match mode {
        HazardMode::Scenario => &[InputKind::RuptureModel],
        HazardMode::Classical
        | HazardMode::EventBased
        | HazardMode::Disaggregation
        | HazardMode::Uhs => &[InputKind::SourceModelLogicTree, InputKind::GsimLogicTree],
    }
}

/// Input kinds a risk mode cannot run without.
pub fn required_risk_inputs(mode: RiskMode) -> &'static [InputKind] {
    match mode {
        RiskMode::ScenarioDamage => &[InputKind::Exposure, InputKind::Fragility],
        _ => &[InputKind::Exposure, InputKind::Vulnerability],
    }
}

fn check_required(mode: &str, required: &[InputKind], present: &[InputKind]) -> Option<String> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|k| !present.contains(k))
        .map(|k| k.as_str())
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(format!(
            "{mode} calculation is missing required input(s): {}",
            missing.join(", ")
        ))
    }
}

fn check_hazard(params: &HazardParams, inputs: &[InputKind]) -> Option<String> {
    let mode = params.calculation_mode;
    check_required(mode.as_str(), required_hazard_inputs(mode), inputs)
}

fn check_risk(
    params: &RiskParams,
    inputs: &[InputKind],
    source: Option<&HazardSource>,
) -> Option<String> {
    let mode = params.calculation_mode;
    if let Some(diagnostic) = check_required(mode.as_str(), required_risk_inputs(mode), inputs) {
        return Some(diagnostic);
    }

    let wanted = mode.hazard_output_type();
    match source {
        None => Some("Linked hazard source does not exist".to_string()),
        Some(HazardSource::Calculation { is_hazard: false, .. }) => {
            Some("hazard_calculation_id must reference a hazard calculation".to_string())
        }
        Some(HazardSource::Calculation { status, output_types, .. }) => {
            if *status != CalculationStatus::Successful {
                Some(format!(
                    "Linked hazard calculation is not successful (status: {status})"
                ))
            } else if !output_types.iter().any(|t| t == wanted) {
                Some(format!(
                    "Linked hazard calculation has no '{wanted}' output required by {} risk",
                    mode.as_str()
                ))
            } else {
                None
            }
        }
        Some(HazardSource::Output { is_hazard: false, .. }) => {
            Some("hazard_output_id must reference an output of a hazard calculation".to_string())
        }
        Some(HazardSource::Output { output_type, job_state, .. }) => {
            if *job_state != JobState::Complete {
                Some(format!(
                    "Linked hazard output belongs to a job that is not complete (state: {job_state})"
                ))
            } else if output_type != wanted {
                Some(format!(
                    "Linked hazard output is a '{output_type}', {} risk requires '{wanted}'",
                    mode.as_str()
                ))
            } else {
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
