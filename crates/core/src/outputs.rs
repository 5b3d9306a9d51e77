//! Output type names produced by the reference engines.
//!
//! Output types are free-form strings in storage; these constants name the
//! ones the built-in engines emit and the validator and serializers match on.

use crate::params::RiskMode;

pub const HAZARD_CURVE: &str = "hazard_curve";
pub const HAZARD_MAP: &str = "hazard_map";
pub const UH_SPECTRA: &str = "uh_spectra";
pub const GMF: &str = "gmf";
pub const GMF_SCENARIO: &str = "gmf_scenario";
pub const DISAGG_MATRIX: &str = "disagg_matrix";
pub const LOSS_CURVE: &str = "loss_curve";
pub const LOSS_MAP: &str = "loss_map";
pub const BCR_DISTRIBUTION: &str = "bcr_distribution";
pub const AGGREGATE_LOSS_CURVE: &str = "aggregate_loss_curve";
pub const DMG_DIST_PER_ASSET: &str = "dmg_dist_per_asset";
pub const COLLAPSE_MAP: &str = "collapse_map";

impl RiskMode {
    /// The hazard output type this risk mode consumes.
    pub fn hazard_output_type(self) -> &'static str {
        match self {
            Self::Classical | Self::ClassicalBcr => HAZARD_CURVE,
            Self::EventBased | Self::EventBasedBcr => GMF,
            Self::Scenario | Self::ScenarioDamage => GMF_SCENARIO,
        }
    }
}
