//! Output types: extracted records and batch results.

use crate::error::ImageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One extracted value: text, a number, or explicitly absent.
///
/// The model is asked for strings, numbers, or `null`. Anything else it
/// returns (booleans, nested arrays or objects) is kept as its compact JSON
/// text so no information is silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum FieldValue {
    Text(String),
    Number(serde_json::Number),
    Absent,
}

impl FieldValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    /// Cell text for tabular display: absent → empty string.
    pub fn display_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Absent => String::new(),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => FieldValue::Absent,
            Value::String(s) => FieldValue::Text(s),
            Value::Number(n) => FieldValue::Number(n),
            Value::Bool(b) => FieldValue::Text(b.to_string()),
            other => FieldValue::Text(other.to_string()),
        }
    }
}

impl From<FieldValue> for Value {
    fn from(v: FieldValue) -> Self {
        match v {
            FieldValue::Text(s) => Value::String(s),
            FieldValue::Number(n) => Value::Number(n),
            FieldValue::Absent => Value::Null,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

/// One entity extracted from an image: field name → value.
///
/// The key set is whatever the model returned; it is not reconciled against
/// the requested [`crate::schema::FieldSchema`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedRecord(BTreeMap<String, FieldValue>);

impl ExtractedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Build a record from a JSON object. Returns `None` for non-objects.
    pub fn from_json_object(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(
                map.into_iter().map(|(k, v)| (k, FieldValue::from(v))).collect(),
            )),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Outcome of analysing one image inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    /// Position of the image in the caller's input list (0-based).
    pub index: usize,
    pub label: String,
    /// Extracted records; empty when `error` is set.
    pub records: Vec<ExtractedRecord>,
    /// Remote attempts made (1 = no retry). 0 when the request never reached
    /// the backend.
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ImageError>,
}

impl ImageResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate counters for a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_images: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_records: usize,
    pub total_duration_ms: u64,
}

/// Results of [`crate::analyze::analyze_batch`], in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    pub results: Vec<ImageResult>,
    pub stats: BatchStats,
}

impl BatchOutput {
    /// Assemble from unordered results; sorts by input index.
    pub fn from_results(mut results: Vec<ImageResult>, total_duration_ms: u64) -> Self {
        results.sort_by_key(|r| r.index);
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let stats = BatchStats {
            total_images: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            total_records: results.iter().map(|r| r.records.len()).sum(),
            total_duration_ms,
        };
        Self { results, stats }
    }
}
