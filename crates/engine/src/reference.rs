//! Reference engines.
//!
//! These drive the full lifecycle without computing anything: each mode
//! plans a deterministic set of work units and emits outputs of the types
//! the real calculator would, with JSON payloads summarizing what the unit
//! was given.

use async_trait::async_trait;
use hazrisk_core::outputs;
use hazrisk_core::params::{CalculationParams, HazardMode, HazardParams, RiskMode};
use hazrisk_db::models::output::NewOutput;
use serde_json::{json, Value};

use crate::engine::{ComputationEngine, EngineContext, EngineError, WorkUnit};

/// How a mode splits its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitBasis {
    /// One unit per intensity measure type.
    PerImt,
    /// One unit per logic tree sample (at least one).
    PerSample,
    /// One unit per consumed hazard output.
    PerHazardOutput,
    Single,
}

#[derive(Debug, Clone)]
pub struct ReferenceEngine {
    operation: String,
    basis: UnitBasis,
    unit_output: Option<&'static str>,
    final_outputs: &'static [&'static str],
}

impl ReferenceEngine {
    fn build(
        operation: String,
        basis: UnitBasis,
        unit_output: Option<&'static str>,
        final_outputs: &'static [&'static str],
    ) -> Self {
        Self {
            operation,
            basis,
            unit_output,
            final_outputs,
        }
    }

    pub fn hazard(mode: HazardMode) -> Self {
        use outputs::*;
        let operation = format!("hazard_{}", mode.as_str());
        match mode {
            HazardMode::Classical => Self::build(operation, UnitBasis::PerImt, None, &[HAZARD_CURVE]),
            HazardMode::EventBased => Self::build(operation, UnitBasis::PerSample, Some(GMF), &[]),
            HazardMode::Disaggregation => {
                Self::build(operation, UnitBasis::PerImt, None, &[HAZARD_CURVE, DISAGG_MATRIX])
            }
            HazardMode::Uhs => {
                Self::build(operation, UnitBasis::PerImt, None, &[HAZARD_CURVE, UH_SPECTRA])
            }
            HazardMode::Scenario => {
                Self::build(operation, UnitBasis::Single, Some(GMF_SCENARIO), &[])
            }
        }
    }

    pub fn risk(mode: RiskMode) -> Self {
        use outputs::*;
        let operation = format!("risk_{}", mode.as_str());
        let per_output = UnitBasis::PerHazardOutput;
        match mode {
            RiskMode::Classical => Self::build(operation, per_output, Some(LOSS_CURVE), &[LOSS_MAP]),
            RiskMode::ClassicalBcr => Self::build(operation, per_output, None, &[BCR_DISTRIBUTION]),
            RiskMode::EventBased => {
                Self::build(operation, per_output, Some(LOSS_CURVE), &[AGGREGATE_LOSS_CURVE])
            }
            RiskMode::EventBasedBcr => Self::build(operation, per_output, None, &[BCR_DISTRIBUTION]),
            RiskMode::Scenario => Self::build(operation, UnitBasis::Single, Some(LOSS_MAP), &[]),
            RiskMode::ScenarioDamage => Self::build(
                operation,
                UnitBasis::Single,
                Some(DMG_DIST_PER_ASSET),
                &[COLLAPSE_MAP],
            ),
        }
    }

    fn final_payload(output_type: &str, ctx: &EngineContext) -> Value {
        let consumed: Vec<_> = ctx.hazard_outputs.iter().map(|o| o.id).collect();
        let mut payload = json!({
            "calculation_id": ctx.calculation_id,
            "mode": ctx.params.calculation_mode(),
            "inputs": Self::input_summary(ctx),
            "hazard_outputs": consumed,
        });
        if output_type == outputs::UH_SPECTRA {
            if let (Value::Object(fields), CalculationParams::Hazard(params)) =
                (&mut payload, ctx.params.as_ref())
            {
                fields.extend(uh_spectra(params));
            }
        }
        payload
    }

    fn input_summary(ctx: &EngineContext) -> Value {
        ctx.inputs
            .iter()
            .map(|i| json!({"kind": i.kind, "digest": i.digest, "size": i.size}))
            .collect()
    }
}

#[async_trait]
impl ComputationEngine for ReferenceEngine {
    fn operation(&self) -> &str {
        &self.operation
    }

    async fn plan(&self, ctx: &EngineContext) -> Result<Vec<WorkUnit>, EngineError> {
        let units: Vec<WorkUnit> = match self.basis {
            UnitBasis::PerImt => {
                let CalculationParams::Hazard(params) = ctx.params.as_ref() else {
                    return Err(EngineError::new("per-IMT planning needs hazard parameters"));
                };
                params
                    .intensity_measure_types
                    .iter()
                    .enumerate()
                    .map(|(i, imt)| WorkUnit::new(format!("imt-{i}"), json!({"imt": imt})))
                    .collect()
            }
            UnitBasis::PerSample => {
                let samples = match ctx.params.as_ref() {
                    CalculationParams::Hazard(p) => p.number_of_logic_tree_samples.max(1),
                    CalculationParams::Risk(_) => 1,
                };
                (0..samples)
                    .map(|i| WorkUnit::new(format!("sample-{i}"), json!({"sample": i})))
                    .collect()
            }
            UnitBasis::PerHazardOutput => {
                if ctx.hazard_outputs.is_empty() {
                    return Err(EngineError::new("no hazard outputs to consume"));
                }
                ctx.hazard_outputs
                    .iter()
                    .map(|o| {
                        WorkUnit::new(
                            format!("hazard-output-{}", o.id),
                            json!({"hazard_output_id": o.id, "output_type": o.output_type}),
                        )
                    })
                    .collect()
            }
            UnitBasis::Single => vec![WorkUnit::new("all", json!({}))],
        };
        tracing::debug!(job_id = ctx.job_id, operation = %self.operation, units = ?units.len(), "Planned work units");
        Ok(units)
    }

    async fn execute(
        &self,
        unit: &WorkUnit,
        ctx: &EngineContext,
    ) -> Result<Vec<NewOutput>, EngineError> {
        let Some(output_type) = self.unit_output else {
            return Ok(Vec::new());
        };
        Ok(vec![NewOutput::new(
            output_type,
            format!("{output_type} ({})", unit.id),
            json!({
                "calculation_id": ctx.calculation_id,
                "unit": unit.id,
                "basis": unit.payload,
                "inputs": Self::input_summary(ctx),
            }),
        )])
    }

    async fn finalize(&self, ctx: &EngineContext) -> Result<Vec<NewOutput>, EngineError> {
        Ok(self
            .final_outputs
            .iter()
            .map(|output_type| {
                NewOutput::new(
                    *output_type,
                    output_type.replace('_', " "),
                    Self::final_payload(output_type, ctx),
                )
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Uniform hazard spectra
// ---------------------------------------------------------------------------

/// Probabilities of exceedance used when a configuration names none.
const DEFAULT_UHS_POES: [f64; 2] = [0.1, 0.02];

/// Spectral period of an intensity measure type: `PGA` is period zero,
/// `SA(T)` is period `T`, anything else has none.
fn spectral_period(imt: &str) -> Option<f64> {
    if imt == "PGA" {
        return Some(0.0);
    }
    imt.strip_prefix("SA(")?.strip_suffix(')')?.parse().ok()
}

/// One spectrum per PoE over the spectral periods of the configured IMTs.
///
/// PoEs come from the `poes` extra. Spectral ordinates stay at zero; the
/// reference engine computes nothing.
fn uh_spectra(params: &HazardParams) -> serde_json::Map<String, Value> {
    let poes: Vec<f64> = match params.extras.get("poes") {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_f64).collect(),
        _ => DEFAULT_UHS_POES.to_vec(),
    };
    let periods: Vec<f64> = params
        .intensity_measure_types
        .iter()
        .filter_map(|imt| spectral_period(imt))
        .collect();
    let spectra: Vec<Value> = poes
        .iter()
        .map(|poe| json!({"poe": poe, "imls": vec![0.0; periods.len()]}))
        .collect();

    let mut fields = serde_json::Map::new();
    fields.insert("periods".into(), json!(periods));
    fields.insert("spectra".into(), Value::Array(spectra));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uhs_params(imts: &[&str]) -> HazardParams {
        HazardParams {
            calculation_mode: HazardMode::Uhs,
            description: String::new(),
            investigation_time: Some(50.0),
            intensity_measure_types: imts.iter().map(|s| s.to_string()).collect(),
            number_of_logic_tree_samples: 0,
            random_seed: 42,
            export_dir: None,
            extras: Default::default(),
        }
    }

    #[test]
    fn spectral_periods_come_from_pga_and_sa() {
        assert_eq!(spectral_period("PGA"), Some(0.0));
        assert_eq!(spectral_period("SA(0.1)"), Some(0.1));
        assert_eq!(spectral_period("SA(2)"), Some(2.0));
        assert_eq!(spectral_period("PGV"), None);
        assert_eq!(spectral_period("SA(x)"), None);
    }

    #[test]
    fn uh_spectra_has_one_spectrum_per_poe() {
        let mut params = uhs_params(&["PGA", "SA(0.5)"]);
        params.extras.insert("poes".into(), json!([0.1, 0.05, 0.01]));

        let fields = uh_spectra(&params);

        assert_eq!(fields["periods"], json!([0.0, 0.5]));
        let spectra = fields["spectra"].as_array().unwrap();
        assert_eq!(spectra.len(), 3);
        assert_eq!(spectra[1], json!({"poe": 0.05, "imls": [0.0, 0.0]}));
    }

    #[test]
    fn uh_spectra_defaults_poes() {
        let params = uhs_params(&["SA(1.0)"]);
        let poes: Vec<_> = uh_spectra(&params)["spectra"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["poe"].as_f64().unwrap())
            .collect();
        assert_eq!(poes, DEFAULT_UHS_POES);
    }
}
