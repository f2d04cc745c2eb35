use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

/// Free-form JSON object, as sent in the request `context` field.
pub type ContextMap = serde_json::Map<String, Value>;

/// Privacy-trimmed summary of the most recent screening result.
///
/// Only scalar and derived fields are carried; images and landmark geometry never are.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiagnosisContext {
    Photo(PhotoContext),
    Xray(XrayContext),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoContext {
    pub risk_level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asymmetry_metrics: Option<ContextMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XrayContext {
    pub cobb_angle: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_location: Option<CurveLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_direction: Option<CurveDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schroth_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cobb_angles: Option<Vec<CurveSummary>>,
}

/// One measured curve without vertebra geometry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurveSummary {
    pub angle: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_location: Option<CurveLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_direction: Option<CurveDirection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
    VerySevere,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveLocation {
    Thoracic,
    Lumbar,
    Thoracolumbar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveDirection {
    Left,
    Right,
    #[serde(rename = "none")]
    Straight,
}

impl RiskLevel {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            _ => None,
        }
    }
}

impl Severity {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mild" => Some(Self::Mild),
            "moderate" => Some(Self::Moderate),
            "severe" => Some(Self::Severe),
            "very_severe" | "very severe" => Some(Self::VerySevere),
            _ => None,
        }
    }
}

impl CurveLocation {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "thoracic" => Some(Self::Thoracic),
            "lumbar" => Some(Self::Lumbar),
            "thoracolumbar" => Some(Self::Thoracolumbar),
            _ => None,
        }
    }
}

impl CurveDirection {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "none" => Some(Self::Straight),
            _ => None,
        }
    }
}

impl DiagnosisContext {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Photo(_) => "photo",
            Self::Xray(_) => "xray",
        }
    }

    /// Flattens the context into the request's `context` object.
    pub fn to_context_map(&self) -> ContextMap {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                tracing::warn!(kind = self.kind(), value = %other, "diagnosis context did not serialize to an object");
                ContextMap::new()
            }
            Err(error) => {
                tracing::warn!(kind = self.kind(), error = %error, "failed to serialize diagnosis context");
                ContextMap::new()
            }
        }
    }
}

/// Derives a context from a loosely typed persisted result.
///
/// Missing or malformed records yield `None`; this never fails.
pub fn extract_context(record: &Value) -> Option<DiagnosisContext> {
    let record = record.as_object()?;
    let kind = record
        .get("type")
        .or_else(|| record.get("analysis_type"))
        .and_then(Value::as_str)?;

    match kind.trim().to_ascii_lowercase().as_str() {
        "photo" => extract_photo(record).map(DiagnosisContext::Photo),
        "xray" | "x-ray" => extract_xray(record).map(DiagnosisContext::Xray),
        other => {
            tracing::debug!(kind = other, "ignoring persisted result with unknown type");
            None
        }
    }
}

/// Same as [`extract_context`] for raw JSON text.
pub fn extract_context_from_str(raw: &str) -> Option<DiagnosisContext> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => extract_context(&value),
        Err(error) => {
            tracing::debug!(error = %error, "persisted result is not valid JSON");
            None
        }
    }
}

fn extract_photo(record: &ContextMap) -> Option<PhotoContext> {
    let risk_level = record
        .get("risk_level")
        .and_then(Value::as_str)
        .and_then(RiskLevel::parse)?;

    let asymmetry_metrics = record
        .get("asymmetry_metrics")
        .or_else(|| record.get("metrics"))
        .and_then(Value::as_object)
        .map(scalar_entries);

    Some(PhotoContext {
        risk_level,
        asymmetry_metrics,
        recommendations: string_list(record.get("recommendations")),
    })
}

fn extract_xray(record: &ContextMap) -> Option<XrayContext> {
    let cobb_angle = record.get("primary_cobb_angle").and_then(Value::as_f64)?;

    let cobb_angles = record
        .get("cobb_angles")
        .and_then(Value::as_array)
        .map(|angles| {
            angles
                .iter()
                .filter_map(|entry| {
                    let entry = entry.as_object()?;
                    Some(CurveSummary {
                        angle: entry.get("angle").and_then(Value::as_f64)?,
                        curve_location: enum_field(entry, "curve_location", CurveLocation::parse),
                        curve_direction: enum_field(
                            entry,
                            "curve_direction",
                            CurveDirection::parse,
                        ),
                    })
                })
                .collect::<Vec<_>>()
        });

    Some(XrayContext {
        cobb_angle,
        severity: enum_field(record, "severity", Severity::parse),
        curve_location: enum_field(record, "curve_location", CurveLocation::parse),
        curve_direction: enum_field(record, "curve_direction", CurveDirection::parse),
        schroth_type: record
            .get("schroth_type")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string),
        cobb_angles,
    })
}

fn enum_field<T>(record: &ContextMap, key: &str, parse: fn(&str) -> Option<T>) -> Option<T> {
    record.get(key).and_then(Value::as_str).and_then(parse)
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

// Nested objects and arrays are dropped so no payload can ride along inside the metrics.
fn scalar_entries(metrics: &ContextMap) -> ContextMap {
    metrics
        .iter()
        .filter(|(_, value)| {
            matches!(
                value,
                Value::Number(_) | Value::String(_) | Value::Bool(_) | Value::Null
            )
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Overlays `overrides` on `base`; override values win on key collisions.
pub fn merge_context_maps(mut base: ContextMap, overrides: &ContextMap) -> ContextMap {
    for (key, value) in overrides {
        base.insert(key.clone(), value.clone());
    }
    base
}

pub fn merge_context(extracted: Option<&DiagnosisContext>, overrides: &ContextMap) -> ContextMap {
    let base = extracted
        .map(DiagnosisContext::to_context_map)
        .unwrap_or_default();
    merge_context_maps(base, overrides)
}

/// Where the latest persisted screening result comes from.
pub trait ContextSource {
    fn load_latest(&self) -> Option<Value>;
}

/// Reads the persisted result from a JSON file.
#[derive(Debug, Clone)]
pub struct FileContextSource {
    path: PathBuf,
}

impl FileContextSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ContextSource for FileContextSource {
    fn load_latest(&self) -> Option<Value> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = ?self.path, "no persisted screening result");
                return None;
            }
            Err(error) => {
                tracing::warn!(path = ?self.path, error = %error, "failed to read persisted screening result");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(path = ?self.path, error = %error, "persisted screening result is not valid JSON");
                None
            }
        }
    }
}

/// Fixed in-memory record, for hosts that already hold the result.
#[derive(Debug, Clone, Default)]
pub struct StaticContextSource(pub Option<Value>);

impl ContextSource for StaticContextSource {
    fn load_latest(&self) -> Option<Value> {
        self.0.clone()
    }
}

/// Reads the source once and extracts a context from it.
pub fn load_context(source: &dyn ContextSource) -> Option<DiagnosisContext> {
    let record = source.load_latest()?;
    let context = extract_context(&record);
    if context.is_none() {
        tracing::debug!("persisted screening result is malformed; continuing without context");
    }
    context
}
