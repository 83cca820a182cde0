//! Eager analysis entry points.
//!
//! [`analyze_image`] runs the full pipeline for one image and returns its
//! records or a classified error. [`analyze_batch`] runs many independent
//! pipelines concurrently and collects per-image results; use
//! [`crate::stream::analyze_stream`] to receive them as they complete.
//!
//! Within one request the steps always run in this order:
//! resolve credential → normalise image → compose prompt → remote call
//! (retry-wrapped) → normalise response.

use crate::config::AnalysisConfig;
use crate::error::{FieldScanError, ImageError};
use crate::output::{BatchOutput, ExtractedRecord, ImageResult};
use crate::pipeline::backend::{ExtractionBackend, GeminiBackend};
use crate::pipeline::compose::compose_request;
use crate::pipeline::credential::{deployment_credential, resolve_credential, Credential};
use crate::pipeline::normalize::normalize_image;
use crate::pipeline::response::normalize_response;
use crate::pipeline::retry::{with_retry_observed, RetryPolicy};
use crate::pipeline::validate::{validate_credential, ValidationResult};
use crate::schema::{AnalysisContext, AnalysisRequest, ImageInput, ReferenceExample};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Analyse one image and return every entity found in it.
///
/// # Errors
/// Any [`FieldScanError`]; remote failures are already classified and
/// quota/overload failures have already been retried.
pub async fn analyze_image(
    context: &AnalysisContext,
    image: &ImageInput,
    config: &AnalysisConfig,
) -> Result<Vec<ExtractedRecord>, FieldScanError> {
    let credential = effective_credential(context, config)?;
    let backend = resolve_backend(config)?;
    let (result, attempts) =
        run_pipeline(backend.as_ref(), &credential, 0, image, context, config).await;
    debug!("{}: finished after {} attempts", image.label, attempts);
    result
}

/// Analyse the image of an [`AnalysisRequest`].
pub async fn analyze_request(
    request: &AnalysisRequest,
    config: &AnalysisConfig,
) -> Result<Vec<ExtractedRecord>, FieldScanError> {
    analyze_image(&request.context, &request.image, config).await
}

/// Read an image file and analyse it.
pub async fn analyze_file(
    path: impl AsRef<Path>,
    context: &AnalysisContext,
    config: &AnalysisConfig,
) -> Result<Vec<ExtractedRecord>, FieldScanError> {
    let image = load_image(path).await?;
    analyze_image(context, &image, config).await
}

/// Synchronous wrapper around [`analyze_image`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_image_sync(
    context: &AnalysisContext,
    image: &ImageInput,
    config: &AnalysisConfig,
) -> Result<Vec<ExtractedRecord>, FieldScanError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FieldScanError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze_image(context, image, config))
}

/// Analyse many images concurrently.
///
/// Each image runs its own independent pipeline, including its own retry
/// and backoff timeline; up to `config.concurrency` are in flight at once.
///
/// # Returns
/// `Ok(BatchOutput)` with one [`ImageResult`] per input, in input order,
/// even when some images failed (check `result.error`).
///
/// # Errors
/// Only [`FieldScanError::MissingCredential`] or
/// [`FieldScanError::BackendUnavailable`]: without a credential or a backend
/// no image can succeed, so the batch is refused up front.
pub async fn analyze_batch(
    images: &[ImageInput],
    context: &AnalysisContext,
    config: &AnalysisConfig,
) -> Result<BatchOutput, FieldScanError> {
    let total_start = Instant::now();
    let credential = effective_credential(context, config)?;
    let backend = resolve_backend(config)?;
    info!(
        "Starting batch of {} images via {} (concurrency {})",
        images.len(),
        backend.name(),
        config.concurrency
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(images.len());
    }

    let results: Vec<ImageResult> = stream::iter(images.iter().enumerate().map(|(index, image)| {
        let backend = Arc::clone(&backend);
        let credential = credential.clone();
        async move {
            process_image(backend.as_ref(), &credential, index, image, context, config).await
        }
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect()
    .await;

    let output = BatchOutput::from_results(results, total_start.elapsed().as_millis() as u64);
    info!(
        "Batch complete: {}/{} images, {} records, {}ms",
        output.stats.succeeded,
        output.stats.total_images,
        output.stats.total_records,
        output.stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(output.stats.total_images, output.stats.succeeded);
    }

    Ok(output)
}

/// Turn a verified extraction into a reusable few-shot example.
///
/// The image is normalised exactly like an analysis target so stored
/// examples stay small.
pub async fn promote_example(
    id: impl Into<String>,
    image_bytes: Vec<u8>,
    records: Vec<ExtractedRecord>,
    config: &AnalysisConfig,
) -> Result<ReferenceExample, FieldScanError> {
    let image = normalize_image(image_bytes, config.max_dimension, config.jpeg_quality_percent())
        .await?;
    Ok(ReferenceExample::new(id, image, records))
}

/// Probe whether `key` is accepted by the configured backend.
///
/// Does not consult the deployment credential: the point is to check the
/// key the user just typed.
///
/// # Errors
/// [`FieldScanError::BackendUnavailable`] when no backend can be built; a
/// rejected key is an `Ok` verdict, not an error.
pub async fn validate_key(
    key: &str,
    config: &AnalysisConfig,
) -> Result<ValidationResult, FieldScanError> {
    let backend = resolve_backend(config)?;
    Ok(validate_credential(backend.as_ref(), key).await)
}

/// Read an image file into an [`ImageInput`] labelled with its file name.
pub async fn load_image(path: impl AsRef<Path>) -> Result<ImageInput, FieldScanError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FieldScanError::ImageNotFound {
                path: path.to_path_buf(),
            }
        } else {
            FieldScanError::ImageReadFailed {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(ImageInput::new(label, bytes))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Effective credential for `context`: the user key, else the deployment key.
pub(crate) fn effective_credential(
    context: &AnalysisContext,
    config: &AnalysisConfig,
) -> Result<Credential, FieldScanError> {
    let deployment = deployment_credential(config.deployment_credential.as_deref());
    resolve_credential(context.credential.as_deref(), deployment.as_deref())
}

/// The pre-built backend if one was configured, else Gemini over REST.
pub(crate) fn resolve_backend(
    config: &AnalysisConfig,
) -> Result<Arc<dyn ExtractionBackend>, FieldScanError> {
    match config.backend {
        Some(ref backend) => Ok(Arc::clone(backend)),
        None => Ok(Arc::new(GeminiBackend::from_config(config)?)),
    }
}

/// Run one image through the pipeline and wrap the outcome as an
/// [`ImageResult`]. Never fails: errors are stored in the result.
pub(crate) async fn process_image(
    backend: &dyn ExtractionBackend,
    credential: &Credential,
    index: usize,
    image: &ImageInput,
    context: &AnalysisContext,
    config: &AnalysisConfig,
) -> ImageResult {
    let start = Instant::now();
    if let Some(ref cb) = config.progress_callback {
        cb.on_image_start(index, &image.label);
    }

    let (outcome, attempts) =
        run_pipeline(backend, credential, index, image, context, config).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(records) => {
            if let Some(ref cb) = config.progress_callback {
                cb.on_image_complete(index, &image.label, records.len());
            }
            ImageResult {
                index,
                label: image.label.clone(),
                records,
                attempts,
                duration_ms,
                error: None,
            }
        }
        Err(e) => {
            warn!("{}: analysis failed: {}", image.label, e);
            if let Some(ref cb) = config.progress_callback {
                cb.on_image_error(index, &image.label, &e.to_string());
            }
            ImageResult {
                index,
                label: image.label.clone(),
                records: Vec::new(),
                attempts,
                duration_ms,
                error: Some(ImageError::from_error(image.label.clone(), &e)),
            }
        }
    }
}

/// The pipeline proper. Returns the outcome and the number of remote
/// attempts made (0 when normalisation failed before any call).
async fn run_pipeline(
    backend: &dyn ExtractionBackend,
    credential: &Credential,
    index: usize,
    image: &ImageInput,
    context: &AnalysisContext,
    config: &AnalysisConfig,
) -> (Result<Vec<ExtractedRecord>, FieldScanError>, u32) {
    let mut attempts = 0u32;
    let outcome = async {
        info!(
            "{}: analysing {} bytes for {} fields",
            image.label,
            image.bytes.len(),
            context.schema.len()
        );

        // ── Step 1: Normalise image ──────────────────────────────────────
        let target = normalize_image(
            image.bytes.clone(),
            config.max_dimension,
            config.jpeg_quality_percent(),
        )
        .await?;

        // ── Step 2: Compose request ──────────────────────────────────────
        let request = compose_request(
            &context.schema,
            &context.instructions,
            &context.examples,
            &target,
            config,
        );
        debug!("{}: request has {} parts", image.label, request.parts.len());

        // ── Step 3: Remote call with retry ───────────────────────────────
        let policy = RetryPolicy::from_config(config);
        let raw = with_retry_observed(
            &policy,
            &image.label,
            |retry, delay, err| {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_image_retry(index, &image.label, retry, delay, &err.to_string());
                }
            },
            || {
                attempts += 1;
                backend.generate(credential, &request)
            },
        )
        .await?;

        // ── Step 4: Normalise response ───────────────────────────────────
        let records = normalize_response(&raw.value)?;
        info!(
            "{}: {} records after {} attempt(s)",
            image.label,
            records.len(),
            raw.attempts
        );
        Ok(records)
    }
    .await;
    (outcome, attempts)
}
