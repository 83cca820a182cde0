//! Request composition: schema + examples + target image → ordered parts.
//!
//! ## Part Layout
//!
//! ```text
//! system instruction   field list, multi-entity rules, user instructions
//! [few-shot]           "Example input image:" · example image · expected JSON
//! target image
//! closing instruction  names the exact field list again
//! ```
//!
//! Only the most recent `max_examples` reference examples are sent (one by
//! default).

use crate::config::AnalysisConfig;
use crate::pipeline::normalize::NormalizedImage;
use crate::prompts;
use crate::schema::{FieldSchema, ReferenceExample};
use tracing::debug;

/// MIME type the model is asked to respond with.
pub const JSON_MIME_TYPE: &str = "application/json";

/// One element of the request content.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    /// Base64-encoded inline image.
    InlineImage { mime_type: String, data: String },
}

impl Part {
    pub fn image(img: &NormalizedImage) -> Self {
        Part::InlineImage {
            mime_type: img.mime_type().to_string(),
            data: img.to_base64(),
        }
    }
}

/// Sampling and output constraints for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    /// Constrain the response format, e.g. `application/json`.
    pub response_mime_type: Option<String>,
    pub max_output_tokens: Option<u32>,
}

/// A fully composed model request, independent of any wire format.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    pub system_instruction: Option<String>,
    pub parts: Vec<Part>,
    pub generation: GenerationParams,
}

impl ExtractionRequest {
    /// Inline images in request order.
    pub fn images(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::InlineImage { data, .. } => Some(data.as_str()),
            Part::Text(_) => None,
        })
    }
}

/// The most recent `limit` examples, oldest first.
pub fn select_examples(examples: &[ReferenceExample], limit: usize) -> &[ReferenceExample] {
    &examples[examples.len().saturating_sub(limit)..]
}

/// Build the extraction request for one target image.
pub fn compose_request(
    schema: &FieldSchema,
    instructions: &str,
    examples: &[ReferenceExample],
    target: &NormalizedImage,
    config: &AnalysisConfig,
) -> ExtractionRequest {
    let selected = select_examples(examples, config.max_examples);
    if selected.len() < examples.len() {
        debug!(
            "Using {} of {} reference examples (most recent)",
            selected.len(),
            examples.len()
        );
    }

    let mut parts = Vec::with_capacity(selected.len() * 3 + 2);
    for example in selected {
        parts.push(Part::Text(prompts::EXAMPLE_INPUT_LABEL.to_string()));
        parts.push(Part::image(example.image()));
        parts.push(Part::Text(prompts::example_output_label(
            &example.records_json(),
        )));
    }
    parts.push(Part::image(target));
    parts.push(Part::Text(prompts::closing_instruction(schema)));

    ExtractionRequest {
        system_instruction: Some(prompts::system_instruction(schema, instructions)),
        parts,
        generation: GenerationParams {
            temperature: config.temperature,
            response_mime_type: Some(JSON_MIME_TYPE.to_string()),
            max_output_tokens: config.max_output_tokens,
        },
    }
}
