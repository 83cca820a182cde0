//! Error types for the fieldscan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FieldScanError`]: **Fatal for one request**: the analysis of an image
//!   cannot produce records (no credential, key rejected, quota exhausted,
//!   unparseable model output). Returned as `Err(FieldScanError)` from
//!   [`crate::analyze::analyze_image`] and friends.
//!
//! * [`ImageError`]: **Non-fatal for a batch**: one image failed but the
//!   others are fine. Stored inside [`crate::output::ImageResult`] so callers
//!   can render partial success instead of losing a whole batch to one photo.
//!
//! Messages are short and written for direct display to an end user.

use std::path::PathBuf;
use thiserror::Error;

/// All errors a single analysis request can end in.
///
/// Remote failures are classified by [`crate::pipeline::retry`]; parsing
/// failures by [`crate::pipeline::response`]. Nothing is ever downgraded to
/// an empty record list.
#[derive(Debug, Error)]
pub enum FieldScanError {
    // ── Credential errors ─────────────────────────────────────────────────
    /// Neither the caller nor the deployment supplied a credential.
    #[error("No API key configured.\nEnter an API key or set FIELDSCAN_API_KEY.")]
    MissingCredential,

    /// The backend rejected the credential. Never retried.
    #[error("The API key was rejected: {detail}\nPlease re-enter a valid API key.")]
    InvalidCredential { detail: String },

    // ── Transient remote errors (retried, then terminal) ─────────────────
    /// Rate limit or quota hit; the key itself may be fine.
    #[error("API quota or rate limit exceeded after {attempts} attempts. Please try again shortly.")]
    QuotaExceeded { attempts: u32, detail: String },

    /// The model backend reported it is overloaded.
    #[error("The model service is overloaded ({attempts} attempts). Please try again shortly.")]
    ServerOverload { attempts: u32, detail: String },

    // ── Response errors ───────────────────────────────────────────────────
    /// Response text was present but was not valid JSON after fence stripping.
    #[error("The model returned a malformed response: {detail}")]
    MalformedResponse { detail: String },

    /// The model returned no text at all.
    #[error("The model returned no response for this image.")]
    NoResponse,

    // ── Local errors ──────────────────────────────────────────────────────
    /// The image could not be decoded or re-encoded locally.
    #[error("Image normalization unavailable: {detail}")]
    NormalizationUnavailable { detail: String },

    /// Input image path does not exist.
    #[error("Image file not found: '{path}'")]
    ImageNotFound { path: PathBuf },

    /// Input image exists but could not be read.
    #[error("Failed to read image '{path}': {source}")]
    ImageReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote backend client could not be constructed.
    #[error("Model backend unavailable: {detail}")]
    BackendUnavailable { detail: String },

    /// A profile file could not be loaded or parsed.
    #[error("Profile '{path}' is unusable: {detail}")]
    ProfileError { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Remote failure that matched no known signature. Propagated verbatim.
    #[error("{message}")]
    Unclassified { message: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FieldScanError {
    /// Whether the retry controller treats this failure as transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FieldScanError::QuotaExceeded { .. } | FieldScanError::ServerOverload { .. }
        )
    }

    /// Short machine-readable kind, used in JSON output and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldScanError::MissingCredential => "missing_credential",
            FieldScanError::InvalidCredential { .. } => "invalid_credential",
            FieldScanError::QuotaExceeded { .. } => "quota_exceeded",
            FieldScanError::ServerOverload { .. } => "server_overload",
            FieldScanError::MalformedResponse { .. } => "malformed_response",
            FieldScanError::NoResponse => "no_response",
            FieldScanError::NormalizationUnavailable { .. } => "normalization_unavailable",
            FieldScanError::ImageNotFound { .. } | FieldScanError::ImageReadFailed { .. } => {
                "image_unreadable"
            }
            FieldScanError::OutputWriteFailed { .. } => "output_write_failed",
            FieldScanError::BackendUnavailable { .. } => "backend_unavailable",
            FieldScanError::ProfileError { .. } => "profile_error",
            FieldScanError::InvalidConfig(_) => "invalid_config",
            FieldScanError::Unclassified { .. } => "unclassified",
            FieldScanError::Internal(_) => "internal",
        }
    }
}

/// A non-fatal error for a single image inside a batch.
///
/// Stored alongside [`crate::output::ImageResult`] when an image fails.
/// The batch continues with the remaining images.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[error("{label}: {message}")]
pub struct ImageError {
    /// Display label of the image (usually its file name).
    pub label: String,
    /// Machine-readable kind, see [`FieldScanError::kind`].
    pub kind: String,
    /// Human-readable message from the underlying [`FieldScanError`].
    pub message: String,
    /// Whether the failure was transient (quota / overload).
    pub retryable: bool,
}

impl ImageError {
    pub fn from_error(label: impl Into<String>, err: &FieldScanError) -> Self {
        Self {
            label: label.into(),
            kind: err.kind().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}
