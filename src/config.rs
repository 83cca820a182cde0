//! Configuration types for image analysis.
//!
//! All pipeline behaviour is controlled through [`AnalysisConfig`], built via
//! its [`AnalysisConfigBuilder`]. One struct holds every knob so configs can
//! be shared across concurrent requests and logged as a whole.

use crate::error::FieldScanError;
use crate::pipeline::backend::ExtractionBackend;
use crate::progress::AnalysisProgressCallback;
use std::fmt;
use std::sync::Arc;

/// Default model for the built-in Gemini backend.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default REST base URL for the built-in Gemini backend.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Configuration for image analysis.
///
/// Built via [`AnalysisConfig::builder()`] or using
/// [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use fieldscan::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .model("gemini-2.0-flash")
///     .max_retries(3)
///     .retry_backoff_ms(2000)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Model identifier used by the Gemini backend. Default: `gemini-2.0-flash`.
    pub model: String,

    /// REST base URL of the Gemini backend.
    pub endpoint: String,

    /// Pre-constructed backend. Takes precedence over `model`/`endpoint`.
    pub backend: Option<Arc<dyn ExtractionBackend>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Transcription wants the model to copy what it sees, not improvise.
    pub temperature: f32,

    /// Optional output-token cap for extraction calls. Default: none.
    pub max_output_tokens: Option<u32>,

    /// Retries after the first attempt on quota/overload failures. Default: 3.
    pub max_retries: u32,

    /// Base backoff in milliseconds, doubled after each retryable failure.
    /// Default: 2000 (2 s → 4 s → 8 s).
    pub retry_backoff_ms: u64,

    /// How many of the most recent reference examples are sent. Default: 1.
    ///
    /// Every example adds an image to the request, so this bounds token cost
    /// and quota use. 0 disables few-shot prompting.
    pub max_examples: usize,

    /// Longest image side after normalisation, in pixels. Default: 1024.
    pub max_dimension: u32,

    /// Lossy encoding quality on a 0–1 scale. Default: 0.7.
    pub jpeg_quality: f32,

    /// Images analysed concurrently in batch mode. Default: 4.
    pub concurrency: usize,

    /// Per-HTTP-call timeout of the Gemini backend in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Operator-provisioned credential, used when the caller supplies none.
    /// When unset, the environment is consulted (see
    /// [`crate::pipeline::credential::deployment_credential`]).
    pub deployment_credential: Option<String>,

    /// Optional per-image progress events.
    pub progress_callback: Option<Arc<dyn AnalysisProgressCallback>>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            backend: None,
            temperature: 0.1,
            max_output_tokens: None,
            max_retries: 3,
            retry_backoff_ms: 2000,
            max_examples: 1,
            max_dimension: 1024,
            jpeg_quality: 0.7,
            concurrency: 4,
            api_timeout_secs: 60,
            deployment_credential: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_examples", &self.max_examples)
            .field("max_dimension", &self.max_dimension)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("concurrency", &self.concurrency)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "deployment_credential",
                &self.deployment_credential.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// JPEG quality as the 1–100 integer the encoder expects.
    pub fn jpeg_quality_percent(&self) -> u8 {
        (self.jpeg_quality * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ExtractionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = Some(n);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_examples(mut self, n: usize) -> Self {
        self.config.max_examples = n;
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px.max(64);
        self
    }

    pub fn jpeg_quality(mut self, q: f32) -> Self {
        self.config.jpeg_quality = q.clamp(0.05, 1.0);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn deployment_credential(mut self, key: impl Into<String>) -> Self {
        self.config.deployment_credential = Some(key.into());
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn AnalysisProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, FieldScanError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(FieldScanError::InvalidConfig("model must not be empty".into()));
        }
        if !(c.endpoint.starts_with("http://") || c.endpoint.starts_with("https://")) {
            return Err(FieldScanError::InvalidConfig(format!(
                "endpoint must be an http(s) URL, got '{}'",
                c.endpoint
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(FieldScanError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = AnalysisConfig::default();
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_backoff_ms, 2000);
        assert_eq!(c.max_examples, 1);
        assert_eq!(c.max_dimension, 1024);
        assert_eq!(c.jpeg_quality_percent(), 70);
        assert!((c.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn builder_clamps() {
        let c = AnalysisConfig::builder()
            .temperature(9.0)
            .concurrency(0)
            .max_dimension(1)
            .jpeg_quality(3.0)
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.max_dimension, 64);
        assert_eq!(c.jpeg_quality_percent(), 100);
    }

    #[test]
    fn builder_rejects_bad_endpoint() {
        let err = AnalysisConfig::builder()
            .endpoint("ftp://nope")
            .build()
            .unwrap_err();
        assert!(matches!(err, FieldScanError::InvalidConfig(_)));
    }

    #[test]
    fn debug_redacts_credential() {
        let c = AnalysisConfig::builder()
            .deployment_credential("secret-key")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("<redacted>"));
    }
}
