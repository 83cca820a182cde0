//! Caller-side inputs to the pipeline: the field schema, reference examples,
//! and the per-image analysis request.

use crate::output::ExtractedRecord;
use crate::pipeline::normalize::NormalizedImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered, de-duplicated list of field names to extract.
///
/// Order is significant: it is the order fields are named in the prompt and
/// the column order of exported tables. Names are trimmed; blank names and
/// repeats of an earlier name are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct FieldSchema {
    fields: Vec<String>,
}

impl FieldSchema {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fields: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() || fields.iter().any(|f| f == name) {
                continue;
            }
            fields.push(name.to_string());
        }
        Self { fields }
    }

    /// Parse a comma-separated list such as `"name, amount,date"`.
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn names(&self) -> &[String] {
        &self.fields
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The field list as a JSON array literal, e.g. `["name","amount"]`.
    pub fn to_json_list(&self) -> String {
        serde_json::to_string(&self.fields).unwrap_or_else(|_| "[]".to_string())
    }
}

impl From<Vec<String>> for FieldSchema {
    fn from(v: Vec<String>) -> Self {
        Self::new(v)
    }
}

impl From<FieldSchema> for Vec<String> {
    fn from(s: FieldSchema) -> Self {
        s.fields
    }
}

impl fmt::Display for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fields.join(", "))
    }
}

/// A verified past extraction promoted for few-shot guidance.
///
/// Immutable once built: the image is already normalised and the records are
/// the ground truth the user accepted. Build one with
/// [`crate::analyze::promote_example`] or [`ReferenceExample::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceExample {
    id: String,
    image: NormalizedImage,
    records: Vec<ExtractedRecord>,
}

impl ReferenceExample {
    pub fn new(id: impl Into<String>, image: NormalizedImage, records: Vec<ExtractedRecord>) -> Self {
        Self {
            id: id.into(),
            image,
            records,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image(&self) -> &NormalizedImage {
        &self.image
    }

    pub fn records(&self) -> &[ExtractedRecord] {
        &self.records
    }

    /// Ground-truth records as the compact JSON array shown to the model.
    pub fn records_json(&self) -> String {
        serde_json::to_string(&self.records).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Everything shared by the images of one analysis session.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    /// User-supplied credential; blank means "fall back to the deployment key".
    pub credential: Option<String>,
    pub schema: FieldSchema,
    /// Free-text instructions appended verbatim to the system instruction.
    pub instructions: String,
    /// Reference examples in the order they were added (oldest first).
    pub examples: Vec<ReferenceExample>,
}

impl AnalysisContext {
    pub fn new(schema: FieldSchema) -> Self {
        Self {
            schema,
            ..Default::default()
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_examples(mut self, examples: Vec<ReferenceExample>) -> Self {
        self.examples = examples;
        self
    }
}

/// Raw bytes of one image to analyse, with a display label.
#[derive(Clone)]
pub struct ImageInput {
    pub label: String,
    pub bytes: Vec<u8>,
}

impl ImageInput {
    pub fn new(label: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            label: label.into(),
            bytes,
        }
    }
}

impl fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageInput")
            .field("label", &self.label)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// A single transient analysis request: one image plus its session context.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub context: AnalysisContext,
    pub image: ImageInput,
}

impl AnalysisRequest {
    pub fn new(context: AnalysisContext, image: ImageInput) -> Self {
        Self { context, image }
    }
}
