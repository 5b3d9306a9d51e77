//! Export dispatcher and reference serializers.
//!
//! Serializers are keyed by output type. The dispatcher resolves the output,
//! picks the serializer and writes into the destination directory; the
//! file name depends only on the output, so repeated exports overwrite.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hazrisk_core::execution::ExportFormat;
use hazrisk_core::outputs;
use hazrisk_core::types::DbId;
use hazrisk_db::models::output::Output;
use hazrisk_db::repositories::OutputRepo;
use hazrisk_db::DbPool;
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Output {0} not found")]
    NotFound(DbId),

    #[error("No serializer for output type '{output_type}'")]
    Unsupported { output_type: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Writes one output into a destination directory.
#[async_trait]
pub trait OutputSerializer: Send + Sync {
    fn format(&self) -> ExportFormat;

    /// Write `output` under `dest` and return the files written.
    async fn serialize(&self, output: &Output, dest: &Path) -> std::io::Result<Vec<PathBuf>>;
}

fn file_name(output: &Output, format: ExportFormat) -> String {
    format!("{}-{}.{}", output.output_type, output.id, format.as_str())
}

/// `null`, `[]` and `{}` carry nothing to export.
fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ExportDispatcher {
    pool: DbPool,
    serializers: HashMap<String, Arc<dyn OutputSerializer>>,
}

impl ExportDispatcher {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            serializers: HashMap::new(),
        }
    }

    /// A dispatcher covering every output type the reference engines emit.
    pub fn with_reference_serializers(pool: DbPool) -> Self {
        let mut dispatcher = Self::new(pool);
        let xml: Arc<dyn OutputSerializer> = Arc::new(XmlSerializer);
        let json: Arc<dyn OutputSerializer> = Arc::new(JsonSerializer);
        for output_type in [
            outputs::HAZARD_CURVE,
            outputs::HAZARD_MAP,
            outputs::GMF,
            outputs::GMF_SCENARIO,
            outputs::LOSS_CURVE,
            outputs::LOSS_MAP,
            outputs::AGGREGATE_LOSS_CURVE,
            outputs::COLLAPSE_MAP,
        ] {
            dispatcher.register(output_type, xml.clone());
        }
        for output_type in [
            outputs::DISAGG_MATRIX,
            outputs::BCR_DISTRIBUTION,
            outputs::DMG_DIST_PER_ASSET,
        ] {
            dispatcher.register(output_type, json.clone());
        }
        dispatcher.register(outputs::UH_SPECTRA, Arc::new(UhsSerializer));
        dispatcher
    }

    pub fn register(&mut self, output_type: &str, serializer: Arc<dyn OutputSerializer>) {
        self.serializers.insert(output_type.to_string(), serializer);
    }

    /// Format the serializer for `output_type` writes, if any.
    pub fn format_for(&self, output_type: &str) -> Option<ExportFormat> {
        self.serializers.get(output_type).map(|s| s.format())
    }

    pub async fn export(&self, output_id: DbId, dest: &Path) -> Result<Vec<PathBuf>, ExportError> {
        let output = OutputRepo::find_by_id(&self.pool, output_id)
            .await?
            .ok_or(ExportError::NotFound(output_id))?;
        self.export_output(&output, dest).await
    }

    /// Export an already loaded output.
    pub async fn export_output(
        &self,
        output: &Output,
        dest: &Path,
    ) -> Result<Vec<PathBuf>, ExportError> {
        let serializer = self.serializers.get(&output.output_type).ok_or_else(|| {
            ExportError::Unsupported {
                output_type: output.output_type.clone(),
            }
        })?;

        if is_empty_payload(&output.payload) {
            tracing::info!(output_id = output.id, "Output has no content; nothing exported");
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(dest).await?;
        let files = serializer.serialize(output, dest).await?;
        tracing::info!(
            output_id = output.id,
            output_type = %output.output_type,
            format = %serializer.format(),
            files = files.len(),
            "Output exported",
        );
        Ok(files)
    }
}

impl std::fmt::Debug for ExportDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.serializers.keys().collect();
        types.sort();
        f.debug_struct("ExportDispatcher")
            .field("output_types", &types)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

pub struct JsonSerializer;

#[async_trait]
impl OutputSerializer for JsonSerializer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    async fn serialize(&self, output: &Output, dest: &Path) -> std::io::Result<Vec<PathBuf>> {
        let document = json!({
            "id": output.id,
            "output_type": output.output_type,
            "display_name": output.display_name,
            "payload": output.payload,
        });
        let mut bytes = serde_json::to_vec_pretty(&document)?;
        bytes.push(b'\n');
        let path = dest.join(file_name(output, ExportFormat::Json));
        tokio::fs::write(&path, bytes).await?;
        Ok(vec![path])
    }
}

// ---------------------------------------------------------------------------
// XML
// ---------------------------------------------------------------------------

const NRML_NAMESPACE: &str = "http://openquake.org/xmlns/nrml/0.4";

pub struct XmlSerializer;

#[async_trait]
impl OutputSerializer for XmlSerializer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Xml
    }

    async fn serialize(&self, output: &Output, dest: &Path) -> std::io::Result<Vec<PathBuf>> {
        let path = dest.join(file_name(output, ExportFormat::Xml));
        tokio::fs::write(&path, render_xml(output)).await?;
        Ok(vec![path])
    }
}

// ---------------------------------------------------------------------------
// Uniform hazard spectra
// ---------------------------------------------------------------------------

/// Writes one XML file per probability of exceedance.
///
/// Expects a payload with `periods` and a `spectra` array of
/// `{"poe", "imls"}` entries.
pub struct UhsSerializer;

#[async_trait]
impl OutputSerializer for UhsSerializer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Xml
    }

    async fn serialize(&self, output: &Output, dest: &Path) -> std::io::Result<Vec<PathBuf>> {
        let periods = output.payload.get("periods").unwrap_or(&Value::Null);
        let spectra = match output.payload.get("spectra") {
            Some(Value::Array(spectra)) => spectra.as_slice(),
            _ => &[],
        };

        let mut files = Vec::with_capacity(spectra.len());
        for spectrum in spectra {
            let poe = spectrum.get("poe").and_then(Value::as_f64).ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Output {} has a spectrum without a PoE", output.id),
                )
            })?;
            let path = dest.join(format!(
                "{}-{}-poe-{poe}.{}",
                output.output_type,
                output.id,
                ExportFormat::Xml.as_str()
            ));
            tokio::fs::write(&path, render_uhs_xml(output, poe, periods, spectrum)).await?;
            files.push(path);
        }
        Ok(files)
    }
}

fn render_uhs_xml(output: &Output, poe: f64, periods: &Value, spectrum: &Value) -> String {
    let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    doc.push_str(&format!("<nrml xmlns=\"{NRML_NAMESPACE}\">\n"));
    doc.push_str(&format!(
        "  <uniformHazardSpectra id=\"{}\" name=\"{}\" poe=\"{poe}\">\n",
        output.id,
        escape(&output.display_name)
    ));
    write_value(&mut doc, "periods", periods, 2);
    write_value(&mut doc, "imls", spectrum.get("imls").unwrap_or(&Value::Null), 2);
    doc.push_str("  </uniformHazardSpectra>\n</nrml>\n");
    doc
}

/// Render an output as an NRML-style document.
///
/// Objects become nested elements, arrays repeat an `<item>` element and
/// scalars become escaped text.
fn render_xml(output: &Output) -> String {
    let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    doc.push_str(&format!("<nrml xmlns=\"{NRML_NAMESPACE}\">\n"));
    doc.push_str(&format!(
        "  <output id=\"{}\" type=\"{}\" name=\"{}\">\n",
        output.id,
        escape(&output.output_type),
        escape(&output.display_name)
    ));
    write_value(&mut doc, "payload", &output.payload, 2);
    doc.push_str("  </output>\n</nrml>\n");
    doc
}

fn write_value(doc: &mut String, name: &str, value: &Value, depth: usize) {
    let indent = "  ".repeat(depth);
    let tag = element_name(name);
    match value {
        Value::Null => doc.push_str(&format!("{indent}<{tag}/>\n")),
        Value::Object(fields) => {
            doc.push_str(&format!("{indent}<{tag}>\n"));
            for (key, field) in fields {
                write_value(doc, key, field, depth + 1);
            }
            doc.push_str(&format!("{indent}</{tag}>\n"));
        }
        Value::Array(items) => {
            doc.push_str(&format!("{indent}<{tag}>\n"));
            for item in items {
                write_value(doc, "item", item, depth + 1);
            }
            doc.push_str(&format!("{indent}</{tag}>\n"));
        }
        Value::String(s) => doc.push_str(&format!("{indent}<{tag}>{}</{tag}>\n", escape(s))),
        Value::Bool(_) | Value::Number(_) => {
            doc.push_str(&format!("{indent}<{tag}>{value}</{tag}>\n"))
        }
    }
}

/// Map a JSON key onto a valid XML element name.
fn element_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn output(output_type: &str, payload: Value) -> Output {
        Output {
            id: 7,
            job_id: 1,
            output_type: output_type.to_string(),
            display_name: "Curves <PGA>".to_string(),
            payload,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn element_names_are_sanitized() {
        assert_eq!(element_name("hazard_output_id"), "hazard_output_id");
        assert_eq!(element_name("SA(0.1)"), "SA_0.1_");
        assert_eq!(element_name("0.1"), "_0.1");
        assert_eq!(element_name(""), "_");
    }

    #[test]
    fn xml_escapes_text_and_attributes() {
        let xml = render_xml(&output("hazard_curve", json!({"imt": "a&b"})));
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<nrml"));
        assert!(xml.contains("name=\"Curves &lt;PGA&gt;\""));
        assert!(xml.contains("<imt>a&amp;b</imt>"));
        assert!(xml.ends_with("</nrml>\n"));
    }

    #[test]
    fn xml_arrays_repeat_items() {
        let xml = render_xml(&output("gmf", json!({"values": [1, 2]})));
        assert!(xml.contains("<item>1</item>"));
        assert!(xml.contains("<item>2</item>"));
    }

    #[test]
    fn empty_payloads_are_detected() {
        assert!(is_empty_payload(&Value::Null));
        assert!(is_empty_payload(&json!([])));
        assert!(is_empty_payload(&json!({})));
        assert!(!is_empty_payload(&json!({"a": 1})));
        assert!(!is_empty_payload(&json!(0)));
    }

    #[tokio::test]
    async fn uhs_writes_one_file_per_poe() {
        let dir = tempfile::tempdir().unwrap();
        let spectra = output(
            "uh_spectra",
            json!({
                "periods": [0.0, 0.5],
                "spectra": [
                    {"poe": 0.1, "imls": [0.3, 0.2]},
                    {"poe": 0.02, "imls": [0.6, 0.4]},
                ],
            }),
        );

        let files = UhsSerializer.serialize(&spectra, dir.path()).await.unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["uh_spectra-7-poe-0.1.xml", "uh_spectra-7-poe-0.02.xml"]);
        let second = std::fs::read_to_string(&files[1]).unwrap();
        assert!(second.contains("poe=\"0.02\""));
        assert!(second.contains("<item>0.6</item>"));
        assert!(!second.contains("<item>0.3</item>"));
    }

    #[tokio::test]
    async fn uhs_spectrum_without_poe_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let spectra = output("uh_spectra", json!({"spectra": [{"imls": [0.1]}]}));

        let err = UhsSerializer.serialize(&spectra, dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn file_name_depends_only_on_output() {
        let o = output("loss_map", json!({"a": 1}));
        assert_eq!(file_name(&o, ExportFormat::Xml), "loss_map-7.xml");
        assert_eq!(file_name(&o, ExportFormat::Json), "loss_map-7.json");
    }
}
