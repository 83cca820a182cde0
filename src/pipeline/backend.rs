//! Remote model backends.
//!
//! [`ExtractionBackend`] is the single seam between the pipeline and the
//! network. The pipeline composes an [`ExtractionRequest`], the backend turns
//! it into one wire call and hands back the raw response text, or a
//! [`BackendError`] carrying whatever the transport knew about the failure.
//! Classification and retry happen above this layer in
//! [`crate::pipeline::retry`].

use crate::config::AnalysisConfig;
use crate::error::FieldScanError;
use crate::pipeline::compose::{ExtractionRequest, Part};
use crate::pipeline::credential::Credential;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// A failed remote call.
///
/// `status` is set when the failure came with an HTTP status; `message` is
/// the response body or transport error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub status: Option<u16>,
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => {
                let reason = reqwest::StatusCode::from_u16(code)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("");
                write!(f, "[{code} {reason}] {}", self.message)
            }
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for BackendError {}

/// A generative multimodal model that can answer an [`ExtractionRequest`].
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Issue exactly one remote call and return the raw response text.
    async fn generate(
        &self,
        credential: &Credential,
        request: &ExtractionRequest,
    ) -> Result<String, BackendError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Google Gemini `generateContent` over REST.
pub struct GeminiBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl GeminiBackend {
    /// # Errors
    /// [`FieldScanError::BackendUnavailable`] when the HTTP client cannot be
    /// built (e.g. TLS backend initialisation failed).
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FieldScanError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FieldScanError::BackendUnavailable {
                detail: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self, FieldScanError> {
        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            Duration::from_secs(config.api_timeout_secs),
        )
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

impl fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

#[async_trait]
impl ExtractionBackend for GeminiBackend {
    async fn generate(
        &self,
        credential: &Credential,
        request: &ExtractionRequest,
    ) -> Result<String, BackendError> {
        let body = build_gemini_body(request);
        debug!(
            "POST {} ({} parts)",
            self.url(),
            request.parts.len()
        );

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::new(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::new(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(BackendError::with_status(status.as_u16(), text));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| BackendError::new(format!("invalid response envelope: {e}")))?;
        Ok(extract_candidate_text(&json))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Serialise a request into the Gemini `generateContent` JSON body.
pub fn build_gemini_body(request: &ExtractionRequest) -> Value {
    let parts: Vec<Value> = request
        .parts
        .iter()
        .map(|p| match p {
            Part::Text(text) => json!({ "text": text }),
            Part::InlineImage { mime_type, data } => json!({
                "inlineData": { "mimeType": mime_type, "data": data }
            }),
        })
        .collect();

    let mut generation = json!({ "temperature": request.generation.temperature });
    if let Some(ref mime) = request.generation.response_mime_type {
        generation["responseMimeType"] = json!(mime);
    }
    if let Some(max) = request.generation.max_output_tokens {
        generation["maxOutputTokens"] = json!(max);
    }

    let mut body = json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation,
    });
    if let Some(ref system) = request.system_instruction {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    body
}

/// Concatenated text of the first candidate; empty when there is none.
pub fn extract_candidate_text(response: &Value) -> String {
    response["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}
