//! Model input kinds accepted by the input registry.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Suffix marking a configuration key as an input file reference.
pub const FILE_KEY_SUFFIX: &str = "_file";

/// Kind of an uploaded model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    SourceModel,
    SourceModelLogicTree,
    GsimLogicTree,
    SiteModel,
    RuptureModel,
    Exposure,
    Vulnerability,
    Fragility,
}

impl InputKind {
    pub const ALL: [InputKind; 8] = [
        InputKind::SourceModel,
        InputKind::SourceModelLogicTree,
        InputKind::GsimLogicTree,
        InputKind::SiteModel,
        InputKind::RuptureModel,
        InputKind::Exposure,
        InputKind::Vulnerability,
        InputKind::Fragility,
    ];

    /// Convert to the database string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceModel => "source_model",
            Self::SourceModelLogicTree => "source_model_logic_tree",
            Self::GsimLogicTree => "gsim_logic_tree",
            Self::SiteModel => "site_model",
            Self::RuptureModel => "rupture_model",
            Self::Exposure => "exposure",
            Self::Vulnerability => "vulnerability",
            Self::Fragility => "fragility",
        }
    }

    /// Convert from a database string value.
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::parameter(format!("Unknown input kind '{s}'")))
    }

    /// Resolve a `<kind>_file` configuration key to its input kind.
    ///
    /// Returns `None` for keys that are not file references.
    pub fn from_config_key(key: &str) -> Option<Result<Self, CoreError>> {
        let stem = key.strip_suffix(FILE_KEY_SUFFIX)?;
        Some(Self::from_str_value(stem).map_err(|_| {
            CoreError::parameter(format!("Configuration key '{key}' names an unknown input kind"))
        }))
    }
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
