//! Saved analysis profiles.
//!
//! A profile bundles what a caller would otherwise re-enter for every
//! analysis: the field schema, free-text instructions, and the reference
//! examples promoted from verified extractions. Profiles are plain JSON
//! (example images as base64) so they can be inspected and versioned.

use crate::error::FieldScanError;
use crate::export::write_atomic;
use crate::schema::{AnalysisContext, FieldSchema, ReferenceExample};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Schema, instructions and reference examples for one kind of document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub fields: FieldSchema,
    #[serde(default)]
    pub instructions: String,
    /// Oldest first. Only the most recent few are sent with a request.
    #[serde(default)]
    pub examples: Vec<ReferenceExample>,
}

impl Profile {
    pub fn new(fields: FieldSchema, instructions: impl Into<String>) -> Self {
        Self {
            fields,
            instructions: instructions.into(),
            examples: Vec::new(),
        }
    }

    /// Load a profile from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FieldScanError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FieldScanError::ProfileError {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        let profile: Profile =
            serde_json::from_str(&text).map_err(|e| FieldScanError::ProfileError {
                path: path.to_path_buf(),
                detail: format!("invalid profile JSON: {e}"),
            })?;
        debug!(
            "Loaded profile {} ({} fields, {} examples)",
            path.display(),
            profile.fields.len(),
            profile.examples.len()
        );
        Ok(profile)
    }

    /// Save as pretty JSON, replacing any existing file atomically.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), FieldScanError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|e| FieldScanError::ProfileError {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        write_atomic(path, json).await?;
        info!("Saved profile {}", path.display());
        Ok(())
    }

    /// Append a reference example. Existing examples are kept; the composer
    /// picks the most recent ones.
    pub fn add_example(&mut self, example: ReferenceExample) {
        self.examples.push(example);
    }

    /// An id not yet used by any example of this profile.
    pub fn next_example_id(&self) -> String {
        let mut n = self.examples.len() + 1;
        loop {
            let id = format!("example-{n}");
            if !self.examples.iter().any(|e| e.id() == id) {
                return id;
            }
            n += 1;
        }
    }

    /// An analysis context carrying this profile's schema, instructions and
    /// examples, with no credential.
    pub fn context(&self) -> AnalysisContext {
        AnalysisContext::new(self.fields.clone())
            .with_instructions(self.instructions.clone())
            .with_examples(self.examples.clone())
    }
}
