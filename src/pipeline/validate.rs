//! Credential validation probe.
//!
//! Sends one tiny text-only request to the same backend used for extraction
//! and classifies the outcome. The probe bypasses the retry controller.

use crate::pipeline::backend::{BackendError, ExtractionBackend};
use crate::pipeline::compose::{ExtractionRequest, GenerationParams, Part};
use crate::pipeline::credential::Credential;
use crate::pipeline::retry::{classify, FailureClass};
use crate::prompts::{VALIDATION_PROBE_MAX_TOKENS, VALIDATION_PROBE_PROMPT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{info, warn};

/// Verdict of a validation probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
    QuotaExhausted,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidationStatus::Valid => "valid",
            ValidationStatus::Invalid => "invalid",
            ValidationStatus::QuotaExhausted => "quota-exhausted",
        })
    }
}

/// Result of a validation probe, with an optional human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            status: ValidationStatus::Valid,
            detail: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == ValidationStatus::Valid
    }
}

/// The fixed low-cost probe request.
pub fn probe_request() -> ExtractionRequest {
    ExtractionRequest {
        system_instruction: None,
        parts: vec![Part::Text(VALIDATION_PROBE_PROMPT.to_string())],
        generation: GenerationParams {
            temperature: 0.0,
            response_mime_type: None,
            max_output_tokens: Some(VALIDATION_PROBE_MAX_TOKENS),
        },
    }
}

/// Probe `key` against `backend`. Never retries and never persists anything.
pub async fn validate_credential(backend: &dyn ExtractionBackend, key: &str) -> ValidationResult {
    let Some(credential) = Credential::new(key) else {
        return ValidationResult {
            status: ValidationStatus::Invalid,
            detail: Some("API key is empty".to_string()),
        };
    };

    match backend.generate(&credential, &probe_request()).await {
        Ok(_) => {
            info!("Credential probe against {} succeeded", backend.name());
            ValidationResult::valid()
        }
        Err(e) => {
            let result = classify_probe_failure(&e);
            warn!(
                "Credential probe against {} failed: {}",
                backend.name(),
                result.status
            );
            result
        }
    }
}

/// Map a probe failure to a verdict. Rate-limit and overload signatures mean
/// the key works but is throttled; everything else counts as invalid.
pub fn classify_probe_failure(err: &BackendError) -> ValidationResult {
    let status = match classify(err) {
        FailureClass::RateLimited | FailureClass::Overloaded => ValidationStatus::QuotaExhausted,
        FailureClass::InvalidCredential | FailureClass::Unclassified => ValidationStatus::Invalid,
    };
    ValidationResult {
        status,
        detail: Some(extract_error_detail(&err.message)),
    }
}

/// Pull a nested human-readable message out of an error text that embeds a
/// JSON payload, e.g. `got status 400: {"error":{"message":"API key not valid"}}`.
///
/// Looks for `error.message`, then `message`, then `error` as a string. Falls
/// back to the trimmed raw text when no JSON object parses.
pub fn extract_error_detail(text: &str) -> String {
    let raw = text.trim();
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return raw.to_string();
    };
    if end <= start {
        return raw.to_string();
    }
    let Ok(json) = serde_json::from_str::<Value>(&raw[start..=end]) else {
        return raw.to_string();
    };

    let nested = json
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| json.get("message").and_then(Value::as_str))
        .or_else(|| json.get("error").and_then(Value::as_str));

    match nested {
        Some(msg) if !msg.trim().is_empty() => msg.trim().to_string(),
        _ => raw.to_string(),
    }
}
