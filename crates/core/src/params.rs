//! Typed calculation parameters.
//!
//! Flat configuration mappings are converted into a per-domain schema
//! here, once. Downstream code (store, validator, supervisor, engines)
//! only ever sees [`CalculationParams`]. Keys the schema does not know are
//! kept in `extras` for the computation engine.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::error::CoreError;
use crate::types::DbId;

/// Default seed used when a configuration does not provide one.
pub const DEFAULT_RANDOM_SEED: i64 = 42;

/// Recognised intensity measure types.
static IMT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(PGA|PGV|PGD|MMI|SA\(\d+(\.\d+)?\))$").expect("IMT pattern is valid")
});

// ---------------------------------------------------------------------------
// Domain and modes
// ---------------------------------------------------------------------------

/// Whether a calculation computes hazard or risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationDomain {
    Hazard,
    Risk,
}

impl CalculationDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hazard => "hazard",
            Self::Risk => "risk",
        }
    }

    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            "hazard" => Ok(Self::Hazard),
            "risk" => Ok(Self::Risk),
            _ => Err(CoreError::parameter(format!(
                "Invalid calculation domain '{s}'. Must be one of: hazard, risk"
            ))),
        }
    }
}

impl std::fmt::Display for CalculationDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardMode {
    Classical,
    EventBased,
    Disaggregation,
    Uhs,
    Scenario,
}

impl HazardMode {
    pub const ALL: [HazardMode; 5] = [
        HazardMode::Classical,
        HazardMode::EventBased,
        HazardMode::Disaggregation,
        HazardMode::Uhs,
        HazardMode::Scenario,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classical => "classical",
            Self::EventBased => "event_based",
            Self::Disaggregation => "disaggregation",
            Self::Uhs => "uhs",
            Self::Scenario => "scenario",
        }
    }

    /// Scenario calculations model one rupture and have no time window.
    pub fn needs_investigation_time(self) -> bool {
        !matches!(self, Self::Scenario)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskMode {
    Classical,
    ClassicalBcr,
    EventBased,
    EventBasedBcr,
    Scenario,
    ScenarioDamage,
}

impl RiskMode {
    pub const ALL: [RiskMode; 6] = [
        RiskMode::Classical,
        RiskMode::ClassicalBcr,
        RiskMode::EventBased,
        RiskMode::EventBasedBcr,
        RiskMode::Scenario,
        RiskMode::ScenarioDamage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classical => "classical",
            Self::ClassicalBcr => "classical_bcr",
            Self::EventBased => "event_based",
            Self::EventBasedBcr => "event_based_bcr",
            Self::Scenario => "scenario",
            Self::ScenarioDamage => "scenario_damage",
        }
    }
}

fn parse_mode<T: Copy>(
    raw: &str,
    all: &[T],
    as_str: impl Fn(T) -> &'static str,
    domain: CalculationDomain,
) -> Result<T, CoreError> {
    all.iter().copied().find(|m| as_str(*m) == raw).ok_or_else(|| {
        let known: Vec<&str> = all.iter().map(|m| as_str(*m)).collect();
        CoreError::parameter(format!(
            "Unknown {domain} calculation_mode '{raw}'. Must be one of: {}",
            known.join(", ")
        ))
    })
}

// ---------------------------------------------------------------------------
// Hazard link
// ---------------------------------------------------------------------------

/// The single hazard source a risk calculation consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardLink {
    Calculation(DbId),
    Output(DbId),
}

impl HazardLink {
    /// Build a link from the two optional ids; exactly one must be set.
    pub fn from_ids(
        hazard_calculation_id: Option<DbId>,
        hazard_output_id: Option<DbId>,
    ) -> Result<Self, CoreError> {
        match (hazard_calculation_id, hazard_output_id) {
            (Some(id), None) => Ok(Self::Calculation(id)),
            (None, Some(id)) => Ok(Self::Output(id)),
            (Some(_), Some(_)) => Err(CoreError::parameter(
                "hazard_calculation_id and hazard_output_id are mutually exclusive",
            )),
            (None, None) => Err(CoreError::parameter(
                "A risk calculation requires one of hazard_calculation_id or hazard_output_id",
            )),
        }
    }

    pub fn calculation_id(&self) -> Option<DbId> {
        match self {
            Self::Calculation(id) => Some(*id),
            Self::Output(_) => None,
        }
    }

    pub fn output_id(&self) -> Option<DbId> {
        match self {
            Self::Output(id) => Some(*id),
            Self::Calculation(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter schemas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct HazardParams {
    pub calculation_mode: HazardMode,
    pub description: String,
    pub investigation_time: Option<f64>,
    #[validate(length(min = 1, message = "at least one intensity measure type is required"))]
    pub intensity_measure_types: Vec<String>,
    /// Zero means full logic tree enumeration.
    pub number_of_logic_tree_samples: u32,
    pub random_seed: i64,
    pub export_dir: Option<PathBuf>,
    #[serde(default)]
    pub extras: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RiskParams {
    pub calculation_mode: RiskMode,
    pub description: String,
    pub hazard: HazardLink,
    #[validate(range(min = 0.0, max = 1.0, message = "asset_correlation must be within [0, 1]"))]
    pub asset_correlation: Option<f64>,
    pub export_dir: Option<PathBuf>,
    #[serde(default)]
    pub extras: BTreeMap<String, Value>,
}

/// Parameters of a calculation, typed by domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "snake_case")]
pub enum CalculationParams {
    Hazard(HazardParams),
    Risk(RiskParams),
}

impl CalculationParams {
    /// Convert a flat parameter mapping into the schema for `domain`.
    pub fn parse(
        domain: CalculationDomain,
        params: &BTreeMap<String, Value>,
    ) -> Result<Self, CoreError> {
        let mut fields = Fields(params.clone());
        let parsed = match domain {
            CalculationDomain::Hazard => Self::Hazard(HazardParams::from_fields(&mut fields)?),
            CalculationDomain::Risk => Self::Risk(RiskParams::from_fields(&mut fields)?),
        };
        Ok(parsed.with_extras(fields.0))
    }

    fn with_extras(mut self, extras: BTreeMap<String, Value>) -> Self {
        match &mut self {
            Self::Hazard(p) => p.extras = extras,
            Self::Risk(p) => p.extras = extras,
        }
        self
    }

    pub fn domain(&self) -> CalculationDomain {
        match self {
            Self::Hazard(_) => CalculationDomain::Hazard,
            Self::Risk(_) => CalculationDomain::Risk,
        }
    }

    pub fn calculation_mode(&self) -> &'static str {
        match self {
            Self::Hazard(p) => p.calculation_mode.as_str(),
            Self::Risk(p) => p.calculation_mode.as_str(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Hazard(p) => &p.description,
            Self::Risk(p) => &p.description,
        }
    }

    pub fn export_dir(&self) -> Option<&PathBuf> {
        match self {
            Self::Hazard(p) => p.export_dir.as_ref(),
            Self::Risk(p) => p.export_dir.as_ref(),
        }
    }

    pub fn hazard_link(&self) -> Option<HazardLink> {
        match self {
            Self::Hazard(_) => None,
            Self::Risk(p) => Some(p.hazard),
        }
    }
}

impl HazardParams {
    fn from_fields(fields: &mut Fields) -> Result<Self, CoreError> {
        let domain = CalculationDomain::Hazard;
        let mode_raw = fields.required_string("calculation_mode")?;
        let calculation_mode = parse_mode(&mode_raw, &HazardMode::ALL, HazardMode::as_str, domain)?;

        let params = Self {
            calculation_mode,
            description: fields.string("description")?.unwrap_or_default(),
            investigation_time: fields.f64("investigation_time")?,
            intensity_measure_types: fields.string_list("intensity_measure_types")?,
            number_of_logic_tree_samples: fields.u32("number_of_logic_tree_samples")?.unwrap_or(0),
            random_seed: fields.i64("random_seed")?.unwrap_or(DEFAULT_RANDOM_SEED),
            export_dir: fields.string("export_dir")?.map(PathBuf::from),
            extras: BTreeMap::new(),
        };
        params.check()?;
        Ok(params)
    }

    fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::parameter(e.to_string()))?;

        match self.investigation_time {
            Some(t) if t <= 0.0 || !t.is_finite() => {
                return Err(CoreError::parameter(format!(
                    "investigation_time must be a positive number, got {t}"
                )));
            }
            None if self.calculation_mode.needs_investigation_time() => {
                return Err(CoreError::parameter(format!(
                    "investigation_time is required for {} calculations",
                    self.calculation_mode.as_str()
                )));
            }
            _ => {}
        }

        for imt in &self.intensity_measure_types {
            if !IMT_PATTERN.is_match(imt) {
                return Err(CoreError::parameter(format!(
                    "Unknown intensity measure type '{imt}'"
                )));
            }
        }
        Ok(())
    }
}

impl RiskParams {
    fn from_fields(fields: &mut Fields) -> Result<Self, CoreError> {
        let domain = CalculationDomain::Risk;
        let mode_raw = fields.required_string("calculation_mode")?;
        let calculation_mode = parse_mode(&mode_raw, &RiskMode::ALL, RiskMode::as_str, domain)?;
        let hazard = HazardLink::from_ids(
            fields.i64("hazard_calculation_id")?,
            fields.i64("hazard_output_id")?,
        )?;

        let params = Self {
            calculation_mode,
            description: fields.string("description")?.unwrap_or_default(),
            hazard,
            asset_correlation: fields.f64("asset_correlation")?,
            export_dir: fields.string("export_dir")?.map(PathBuf::from),
            extras: BTreeMap::new(),
        };
        params
            .validate()
            .map_err(|e| CoreError::parameter(e.to_string()))?;
        Ok(params)
    }
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

/// Consumes known keys out of a flat mapping; what remains are extras.
struct Fields(BTreeMap<String, Value>);

impl Fields {
    fn take(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key).filter(|v| !v.is_null())
    }

    fn string(&mut self, key: &str) -> Result<Option<String>, CoreError> {
        match self.take(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(other) => Err(type_error(key, "a string", &other)),
        }
    }

    fn required_string(&mut self, key: &str) -> Result<String, CoreError> {
        self.string(key)?
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::parameter(format!("Missing required parameter '{key}'")))
    }

    fn f64(&mut self, key: &str) -> Result<Option<f64>, CoreError> {
        match self.take(key) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| type_error(key, "a number", &v)),
        }
    }

    fn i64(&mut self, key: &str) -> Result<Option<i64>, CoreError> {
        match self.take(key) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| type_error(key, "an integer", &v)),
        }
    }

    fn u32(&mut self, key: &str) -> Result<Option<u32>, CoreError> {
        match self.take(key) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| type_error(key, "a non-negative integer", &v)),
        }
    }

    /// Accepts either a list of strings or a comma-separated string.
    fn string_list(&mut self, key: &str) -> Result<Vec<String>, CoreError> {
        match self.take(key) {
            None => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(s
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.trim().to_string()),
                    other => Err(type_error(key, "a list of strings", &other)),
                })
                .collect(),
            Some(other) => Err(type_error(key, "a list of strings", &other)),
        }
    }
}

fn type_error(key: &str, expected: &str, got: &Value) -> CoreError {
    CoreError::parameter(format!("'{key}' must be {expected}, got {got}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
