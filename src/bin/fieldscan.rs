//! CLI binary for fieldscan.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AnalysisConfig`, runs a batch, and prints or writes the results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fieldscan::config::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use fieldscan::export::write_atomic;
use fieldscan::pipeline::credential::deployment_credential;
use fieldscan::pipeline::response::normalize_response;
use fieldscan::progress::ProgressCallback;
use fieldscan::{
    analyze_batch, load_image, promote_example, records_to_csv, records_to_json, validate_key,
    AnalysisConfig, AnalysisProgressCallback, FieldSchema, Profile, ValidationStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar plus a log line per finished image.
/// Images complete out of order, so start times are keyed by index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Analysing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&index)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_images: usize) {
        self.bar.set_length(total_images as u64);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Analysing {total_images} images…"))
        ));
    }

    fn on_image_start(&self, index: usize, label: &str) {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(index, Instant::now());
        self.bar.set_message(label.to_string());
    }

    fn on_image_retry(&self, _index: usize, label: &str, retry: u32, delay: Duration, reason: &str) {
        self.bar.println(format!(
            "  {} {}  retry {} in {:.1}s  {}",
            yellow("↻"),
            label,
            retry,
            delay.as_secs_f64(),
            dim(&truncate(reason, 60)),
        ));
    }

    fn on_image_complete(&self, index: usize, label: &str, records: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:<32}  {:<12}  {}",
            green("✓"),
            label,
            dim(&format!("{records:>3} records")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, index: usize, label: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:<32}  {}  {}",
            red("✗"),
            label,
            red(&truncate(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_images: usize, succeeded: usize) {
        let failed = total_images.saturating_sub(succeeded);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} images analysed successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} images analysed  ({} failed)",
                if failed == total_images {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&succeeded.to_string()),
                total_images,
                red(&failed.to_string()),
            );
        }
    }
}

/// First line of `s`, cut to `max` characters.
fn truncate(s: &str, max: usize) -> String {
    let line = s.lines().next().unwrap_or_default();
    if line.chars().count() > max {
        let cut: String = line.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}\u{2026}")
    } else {
        line.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract line items from two receipts (JSON on stdout)
  fieldscan analyze --fields "name, date, amount" r1.jpg r2.jpg

  # CSV file, with extra guidance for the model
  fieldscan analyze --fields "name, amount" --instructions "Amounts are in EUR" \
      --format csv -o receipts.csv scans/*.jpg

  # Save a reusable profile, then promote a verified result into it
  fieldscan init-profile --fields "name, date, amount" --profile receipts.json
  fieldscan promote r1.jpg --records r1.records.json --profile receipts.json
  fieldscan analyze --profile receipts.json r3.jpg

  # Check an API key before using it
  fieldscan validate-key --api-key AIza...

ENVIRONMENT VARIABLES:
  FIELDSCAN_API_KEY    Deployment API key, used when --api-key is not given
  GEMINI_API_KEY       Fallback deployment API key
  FIELDSCAN_MODEL      Override model ID (default gemini-2.0-flash)
  FIELDSCAN_ENDPOINT   Override REST base URL
  RUST_LOG             Override log filter (e.g. fieldscan=debug)

RETRIES:
  Rate-limit (429, quota, exhausted) and overload (503, overloaded) failures
  are retried with exponential backoff: 2 s, 4 s, 8 s by default. A rejected
  key is never retried.
"#;

/// Extract structured records from images using a multimodal model.
#[derive(Parser, Debug)]
#[command(
    name = "fieldscan",
    version,
    about = "Extract structured records from images using a multimodal model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FIELDSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true, env = "FIELDSCAN_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse images and print the extracted records.
    Analyze(AnalyzeArgs),
    /// Check whether an API key is accepted.
    ValidateKey(ValidateKeyArgs),
    /// Add a verified extraction to a profile as a reference example.
    Promote(PromoteArgs),
    /// Create a new profile file.
    InitProfile(InitProfileArgs),
}

/// Backend selection shared by every subcommand that talks to the model.
#[derive(Args, Debug)]
struct BackendArgs {
    /// Model ID.
    #[arg(long, env = "FIELDSCAN_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// REST base URL of the generative API.
    #[arg(long, env = "FIELDSCAN_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Per-call API timeout in seconds.
    #[arg(long, env = "FIELDSCAN_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Image files to analyse.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Comma-separated field names, e.g. "name, date, amount".
    #[arg(long)]
    fields: Option<String>,

    /// Extra free-text guidance for the model.
    #[arg(long)]
    instructions: Option<String>,

    /// Profile file supplying fields, instructions and reference examples.
    #[arg(long, env = "FIELDSCAN_PROFILE")]
    profile: Option<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value = "json")]
    format: FormatArg,

    /// Write results to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// API key for this run. Falls back to FIELDSCAN_API_KEY / GEMINI_API_KEY.
    #[arg(long)]
    api_key: Option<String>,

    #[command(flatten)]
    backend: BackendArgs,

    /// Number of images analysed concurrently.
    #[arg(short, long, env = "FIELDSCAN_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per image on quota or overload failures.
    #[arg(long, env = "FIELDSCAN_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Base backoff in milliseconds; doubles on every retry.
    #[arg(long, env = "FIELDSCAN_RETRY_BACKOFF_MS", default_value_t = 2000)]
    retry_backoff_ms: u64,

    /// How many of the profile's most recent examples to send.
    #[arg(long, default_value_t = 1)]
    max_examples: usize,

    /// Disable progress bar.
    #[arg(long, env = "FIELDSCAN_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Json,
    Csv,
}

#[derive(Args, Debug)]
struct ValidateKeyArgs {
    /// Key to check. Falls back to FIELDSCAN_API_KEY / GEMINI_API_KEY.
    #[arg(long)]
    api_key: Option<String>,

    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Args, Debug)]
struct PromoteArgs {
    /// The image the records were extracted from.
    image: PathBuf,

    /// JSON file holding the verified records (an array of objects).
    #[arg(long)]
    records: PathBuf,

    /// Profile to add the example to.
    #[arg(long)]
    profile: PathBuf,

    /// Example id. Defaults to the next free "example-N".
    #[arg(long)]
    id: Option<String>,
}

#[derive(Args, Debug)]
struct InitProfileArgs {
    /// Comma-separated field names.
    #[arg(long)]
    fields: String,

    /// Extra free-text guidance for the model.
    #[arg(long, default_value = "")]
    instructions: String,

    /// Where to write the profile.
    #[arg(long)]
    profile: PathBuf,

    /// Overwrite an existing profile.
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs while it is shown.
    let show_progress = match cli.command {
        Command::Analyze(ref args) => !cli.quiet && !args.no_progress,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Analyze(args) => run_analyze(args, cli.quiet, show_progress).await,
        Command::ValidateKey(args) => run_validate_key(args).await,
        Command::Promote(args) => run_promote(args, cli.quiet).await,
        Command::InitProfile(args) => run_init_profile(args, cli.quiet).await,
    }
}

async fn run_analyze(args: AnalyzeArgs, quiet: bool, show_progress: bool) -> Result<ExitCode> {
    // ── Build context ────────────────────────────────────────────────────
    let profile = match args.profile {
        Some(ref path) => Some(Profile::load(path).await.context("Failed to load profile")?),
        None => None,
    };
    let mut context = match (&profile, &args.fields) {
        (_, Some(fields)) => {
            let mut context = profile.as_ref().map(Profile::context).unwrap_or_default();
            context.schema = FieldSchema::parse_list(fields);
            context
        }
        (Some(profile), None) => profile.context(),
        (None, None) => bail!("Provide --fields or a --profile that defines them"),
    };
    if context.schema.is_empty() {
        bail!("No field names given");
    }
    if let Some(ref instructions) = args.instructions {
        context.instructions = instructions.clone();
    }
    if let Some(ref key) = args.api_key {
        context.credential = Some(key.clone());
    }

    // ── Load images ──────────────────────────────────────────────────────
    let mut images = Vec::with_capacity(args.images.len());
    for path in &args.images {
        images.push(load_image(path).await.context("Failed to load image")?);
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn AnalysisProgressCallback>)
    } else {
        None
    };
    let config = build_config(&args, progress_cb)?;

    // ── Run analysis ─────────────────────────────────────────────────────
    let output = analyze_batch(&images, &context, &config)
        .await
        .context("Analysis failed")?;

    let rendered = match args.format {
        FormatArg::Json => records_to_json(&context.schema, &output.results)?,
        FormatArg::Csv => records_to_csv(&context.schema, &output.results)?,
    };

    if let Some(ref path) = args.output {
        write_atomic(path, &rendered).await?;
        if !quiet {
            eprintln!("   {}  →  {}", dim("results"), bold(&path.display().to_string()));
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(rendered.as_bytes())
            .context("Failed to write to stdout")?;
        if !rendered.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    // Summary (the callback already printed the final tick when shown).
    if !quiet && !show_progress {
        eprintln!(
            "Analysed {}/{} images, {} records in {}ms",
            output.stats.succeeded,
            output.stats.total_images,
            output.stats.total_records,
            output.stats.total_duration_ms
        );
        for result in output.results.iter().filter(|r| !r.is_success()) {
            if let Some(ref e) = result.error {
                eprintln!("  {} {}", red("✗"), e);
            }
        }
    }

    if output.stats.succeeded == 0 && output.stats.total_images > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_validate_key(args: ValidateKeyArgs) -> Result<ExitCode> {
    let key = args
        .api_key
        .clone()
        .or_else(|| deployment_credential(None))
        .unwrap_or_default();

    let config = AnalysisConfig::builder()
        .model(args.backend.model.clone())
        .endpoint(args.backend.endpoint.clone())
        .api_timeout_secs(args.backend.api_timeout)
        .build()
        .context("Invalid configuration")?;

    let result = validate_key(&key, &config)
        .await
        .context("Cannot reach the model backend")?;
    let status = match result.status {
        ValidationStatus::Valid => green("valid"),
        ValidationStatus::Invalid => red("invalid"),
        ValidationStatus::QuotaExhausted => yellow("quota-exhausted"),
    };
    match result.detail {
        Some(ref detail) => println!("{status}: {detail}"),
        None => println!("{status}"),
    }

    Ok(if result.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_promote(args: PromoteArgs, quiet: bool) -> Result<ExitCode> {
    let mut profile = Profile::load(&args.profile)
        .await
        .context("Failed to load profile")?;

    let text = tokio::fs::read_to_string(&args.records)
        .await
        .with_context(|| format!("Failed to read records from {:?}", args.records))?;
    let records = normalize_response(&text)
        .with_context(|| format!("Records in {:?} are not usable", args.records))?;

    let image = load_image(&args.image).await.context("Failed to load image")?;
    let id = args.id.clone().unwrap_or_else(|| profile.next_example_id());
    let example = promote_example(id.clone(), image.bytes, records, &AnalysisConfig::default())
        .await
        .context("Failed to normalise example image")?;

    profile.add_example(example);
    profile.save(&args.profile).await?;

    if !quiet {
        eprintln!(
            "{} added {} to {}  ({} examples)",
            green("✔"),
            bold(&id),
            args.profile.display(),
            profile.examples.len()
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_init_profile(args: InitProfileArgs, quiet: bool) -> Result<ExitCode> {
    if args.profile.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            args.profile.display()
        );
    }
    let fields = FieldSchema::parse_list(&args.fields);
    if fields.is_empty() {
        bail!("No field names given");
    }

    let profile = Profile::new(fields, args.instructions);
    profile.save(&args.profile).await?;

    if !quiet {
        eprintln!(
            "{} wrote {}  (fields: {})",
            green("✔"),
            bold(&args.profile.display().to_string()),
            profile.fields
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Map CLI args to `AnalysisConfig`.
fn build_config(args: &AnalyzeArgs, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .model(args.backend.model.clone())
        .endpoint(args.backend.endpoint.clone())
        .api_timeout_secs(args.backend.api_timeout)
        .concurrency(args.concurrency)
        .max_retries(args.max_retries)
        .retry_backoff_ms(args.retry_backoff_ms)
        .max_examples(args.max_examples);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
