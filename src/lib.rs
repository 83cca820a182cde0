//! # fieldscan
//!
//! Extract structured records from photos and scans using a multimodal
//! model.
//!
//! ## Why this crate?
//!
//! Receipts, labels and forms rarely share a layout, so template-based OCR
//! needs a new template for every vendor. Instead the caller names the fields
//! it wants (`name, date, amount`) and the model finds every entity in the
//! image that carries them, returning one record per entity. Verified results
//! can be promoted to reference examples that steer later requests.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image bytes
//!  │
//!  ├─ 1. Credential  user key, else deployment key
//!  ├─ 2. Normalise   decode, downscale to ≤1024 px, JPEG q=0.7 (spawn_blocking)
//!  ├─ 3. Compose     system instruction + last reference example + target
//!  ├─ 4. Remote      one generateContent call, JSON response MIME type
//!  │                 retried with exponential backoff on quota/overload
//!  └─ 5. Response    strip fences, parse JSON, wrap bare objects
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fieldscan::{analyze_image, AnalysisConfig, AnalysisContext, FieldSchema, ImageInput};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credential falls back to FIELDSCAN_API_KEY / GEMINI_API_KEY
//!     let config = AnalysisConfig::default();
//!     let context = AnalysisContext::new(FieldSchema::parse_list("name, date, amount"))
//!         .with_instructions("Amounts are in EUR.");
//!     let image = ImageInput::new("receipt.jpg", std::fs::read("receipt.jpg")?);
//!
//!     for record in analyze_image(&context, &image, &config).await? {
//!         println!("{:?}", record);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fieldscan` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! fieldscan = { version = "0.1", default-features = false }
//! ```
//!
//! ## Failure Model
//!
//! | Failure | Retried | Error |
//! |---------|---------|-------|
//! | no key anywhere | no | [`FieldScanError::MissingCredential`] |
//! | HTTP client cannot be built | no | [`FieldScanError::BackendUnavailable`] |
//! | key rejected | no | [`FieldScanError::InvalidCredential`] |
//! | 429 / quota / exhausted | up to 3× (2 s, 4 s, 8 s) | [`FieldScanError::QuotaExceeded`] |
//! | 503 / overloaded | up to 3× | [`FieldScanError::ServerOverload`] |
//! | not JSON | no | [`FieldScanError::MalformedResponse`] |
//! | empty text | no | [`FieldScanError::NoResponse`] |
//! | anything else | no | [`FieldScanError::Unclassified`] |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod export;
pub mod output;
pub mod pipeline;
pub mod profile;
pub mod progress;
pub mod prompts;
pub mod schema;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{
    analyze_batch, analyze_file, analyze_image, analyze_image_sync, analyze_request, load_image,
    promote_example, validate_key,
};
pub use config::{AnalysisConfig, AnalysisConfigBuilder};
pub use error::{FieldScanError, ImageError};
pub use export::{records_to_csv, records_to_json};
pub use output::{BatchOutput, BatchStats, ExtractedRecord, FieldValue, ImageResult};
pub use pipeline::backend::{BackendError, ExtractionBackend, GeminiBackend};
pub use pipeline::normalize::NormalizedImage;
pub use pipeline::validate::{ValidationResult, ValidationStatus};
pub use profile::Profile;
pub use progress::{AnalysisProgressCallback, NoopProgressCallback};
pub use schema::{AnalysisContext, AnalysisRequest, FieldSchema, ImageInput, ReferenceExample};
pub use stream::analyze_stream;
