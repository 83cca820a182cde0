//! Streaming analysis API: emit image results as they complete.
//!
//! Unlike the eager [`crate::analyze::analyze_batch`], which returns only
//! after every image has finished (including any backoff sleeps),
//! [`analyze_stream`] yields [`ImageResult`] items as each image completes.
//! Results may arrive out of order; sort by `index` if order matters.

use crate::analyze::{effective_credential, process_image, resolve_backend};
use crate::config::AnalysisConfig;
use crate::error::FieldScanError;
use crate::output::ImageResult;
use crate::schema::{AnalysisContext, ImageInput};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-image results.
pub type ResultStream = Pin<Box<dyn Stream<Item = ImageResult> + Send>>;

/// Analyse many images, streaming results in completion order.
///
/// Failed images are yielded too, with `error` set.
///
/// # Errors
/// [`FieldScanError::MissingCredential`] before anything is started.
///
/// # Example
/// ```rust,no_run
/// use fieldscan::{analyze_stream, AnalysisConfig, AnalysisContext, FieldSchema, ImageInput};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let images = vec![ImageInput::new("r1.jpg", std::fs::read("r1.jpg")?)];
/// let context = AnalysisContext::new(FieldSchema::parse_list("name, amount"));
/// let mut results = analyze_stream(images, context, AnalysisConfig::default())?;
/// while let Some(result) = results.next().await {
///     match result.error {
///         None => println!("{}: {} records", result.label, result.records.len()),
///         Some(e) => eprintln!("{e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn analyze_stream(
    images: Vec<ImageInput>,
    context: AnalysisContext,
    config: AnalysisConfig,
) -> Result<ResultStream, FieldScanError> {
    let credential = effective_credential(&context, &config)?;
    let backend = resolve_backend(&config)?;
    info!(
        "Starting streaming analysis of {} images via {}",
        images.len(),
        backend.name()
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(images.len());
    }

    let concurrency = config.concurrency.max(1);
    let context = Arc::new(context);
    let config = Arc::new(config);

    let s = stream::iter(images.into_iter().enumerate().map(move |(index, image)| {
        let backend = Arc::clone(&backend);
        let credential = credential.clone();
        let context = Arc::clone(&context);
        let config = Arc::clone(&config);
        async move {
            process_image(
                backend.as_ref(),
                &credential,
                index,
                &image,
                &context,
                &config,
            )
            .await
        }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}
