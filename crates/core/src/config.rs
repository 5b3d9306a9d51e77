//! Job configuration ingestion.
//!
//! A job configuration is a TOML document with an arbitrary section
//! layout. Sections only exist for the reader's convenience: every key is
//! flattened into a single namespace. Keys ending in `_file` reference
//! model inputs and are split out as [`InputFile`]s, resolved relative to
//! the configuration's directory. Everything else is a parameter.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::CoreError;
use crate::inputs::InputKind;

/// A model input referenced by a job configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// The configuration key that referenced the file.
    pub key: String,
    pub kind: InputKind,
    /// Absolute (or base-relative) path to the file.
    pub path: PathBuf,
}

/// A configuration split into flat parameters and input file references.
#[derive(Debug, Clone, Default)]
pub struct ParsedConfig {
    pub params: BTreeMap<String, Value>,
    pub files: Vec<InputFile>,
}

impl ParsedConfig {
    /// Insert a parameter that overrides whatever the file specified.
    pub fn override_param(&mut self, key: &str, value: Value) {
        self.params.insert(key.to_string(), value);
    }
}

/// Read and parse the configuration at `path`.
pub fn load_config(path: &Path) -> Result<ParsedConfig, CoreError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CoreError::parameter(format!("Cannot read job configuration {}: {e}", path.display()))
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_config(&text, base_dir)
}

/// Parse configuration text, resolving input paths against `base_dir`.
pub fn parse_config(text: &str, base_dir: &Path) -> Result<ParsedConfig, CoreError> {
    let table: toml::Table = toml::from_str(text)
        .map_err(|e| CoreError::parameter(format!("Malformed job configuration: {e}")))?;

    let mut flat = BTreeMap::new();
    flatten(table, &mut flat)?;

    let mut parsed = ParsedConfig::default();
    for (key, value) in flat {
        match InputKind::from_config_key(&key) {
            Some(kind) => {
                let kind = kind?;
                for path in file_paths(&key, &value)? {
                    parsed.files.push(InputFile {
                        key: key.clone(),
                        kind,
                        path: base_dir.join(path),
                    });
                }
            }
            None => {
                parsed.params.insert(key, value);
            }
        }
    }

    Ok(parsed)
}

/// Flatten top-level sections into one key space. Duplicate keys across
/// sections are ambiguous and rejected.
fn flatten(table: toml::Table, out: &mut BTreeMap<String, Value>) -> Result<(), CoreError> {
    for (key, value) in table {
        match value {
            toml::Value::Table(section) => flatten(section, out)?,
            other => {
                let json = serde_json::to_value(&other).map_err(|e| {
                    CoreError::parameter(format!("Unsupported value for '{key}': {e}"))
                })?;
                if out.insert(key.clone(), json).is_some() {
                    return Err(CoreError::parameter(format!(
                        "Parameter '{key}' is defined more than once"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// A file key holds either one path or a list of paths.
fn file_paths(key: &str, value: &Value) -> Result<Vec<String>, CoreError> {
    let not_a_path =
        || CoreError::parameter(format!("'{key}' must be a path or a list of paths"));
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(vec![s.trim().to_string()]),
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(not_a_path))
            .collect(),
        _ => Err(not_a_path()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const CLASSICAL: &str = r#"
[general]
description = "Classical PSHA"
calculation_mode = "classical"
random_seed = 23

[logic_tree]
number_of_logic_tree_samples = 0
source_model_logic_tree_file = "source_model_logic_tree.xml"
gsim_logic_tree_file = "gmpe_logic_tree.xml"

[calculation]
investigation_time = 50.0
intensity_measure_types = ["PGA", "SA(0.1)"]
"#;

    #[test]
    fn sections_are_flattened() {
        let parsed = parse_config(CLASSICAL, Path::new("/jobs/case_1")).unwrap();
        assert_eq!(parsed.params["calculation_mode"], "classical");
        assert_eq!(parsed.params["random_seed"], 23);
        assert_eq!(parsed.params["investigation_time"], 50.0);
        assert!(!parsed.params.contains_key("gsim_logic_tree_file"));
    }

    #[test]
    fn file_keys_become_inputs_relative_to_base_dir() {
        let parsed = parse_config(CLASSICAL, Path::new("/jobs/case_1")).unwrap();
        assert_eq!(parsed.files.len(), 2);
        let gsim = parsed
            .files
            .iter()
            .find(|f| f.kind == InputKind::GsimLogicTree)
            .unwrap();
        assert_eq!(gsim.path, PathBuf::from("/jobs/case_1/gmpe_logic_tree.xml"));
    }

    #[test]
    fn file_key_accepts_a_list() {
        let text = r#"source_model_file = ["a.xml", "b.xml"]"#;
        let parsed = parse_config(text, Path::new(".")).unwrap();
        assert_eq!(parsed.files.len(), 2);
        assert!(parsed.files.iter().all(|f| f.kind == InputKind::SourceModel));
    }

    #[test]
    fn duplicate_key_across_sections_rejected() {
        let text = "[a]\nrandom_seed = 1\n[b]\nrandom_seed = 2\n";
        assert_matches!(parse_config(text, Path::new(".")), Err(CoreError::Parameter(_)));
    }

    #[test]
    fn malformed_toml_rejected() {
        assert_matches!(
            parse_config("calculation_mode = ", Path::new(".")),
            Err(CoreError::Parameter(_))
        );
    }

    #[test]
    fn empty_file_reference_rejected() {
        assert_matches!(
            parse_config("exposure_file = \"\"", Path::new(".")),
            Err(CoreError::Parameter(_))
        );
    }

    #[test]
    fn load_config_resolves_against_file_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        std::fs::write(&path, "exposure_file = \"exposure.xml\"\n").unwrap();

        let parsed = load_config(&path).unwrap();
        assert_eq!(parsed.files[0].path, dir.path().join("exposure.xml"));
    }

    #[test]
    fn override_replaces_file_value() {
        let mut parsed = parse_config("hazard_output_id = 3", Path::new(".")).unwrap();
        parsed.override_param("hazard_output_id", Value::from(9));
        assert_eq!(parsed.params["hazard_output_id"], 9);
    }
}
