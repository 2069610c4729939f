//! CLI binary for edgequake-pdftools.
//!
//! A thin shim over the library crate that maps CLI flags to an
//! `OperationRequest`, runs it through the `Dispatcher` and writes the
//! result next to the caller.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdftools::{
    DispatchObserver, DispatchState, Dispatcher, ErrorBody, OperationOutput, OperationRequest,
    PipelineConfig, RemoteConfig, TransformError,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Spinner driven by dispatch events ────────────────────────────────────────

struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Staging");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl DispatchObserver for CliObserver {
    fn on_state(&self, _request_id: Uuid, operation: &str, state: DispatchState) {
        let prefix = match state {
            DispatchState::Received => "Staging",
            DispatchState::Validated => "Validated",
            DispatchState::Executing => "Running",
            DispatchState::Completed | DispatchState::Failed => return,
        };
        self.bar.set_prefix(prefix);
        self.bar.set_message(operation.to_string());
    }

    fn on_complete(&self, _request_id: Uuid, _operation: &str, _output_bytes: usize) {
        self.bar.finish_and_clear();
    }

    fn on_error(&self, _request_id: Uuid, _operation: &str, _error: &TransformError) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"OPERATIONS:
  Local       merge, split, rotate, compress, protect, unlock, watermark,
              page-numbers, organize, image-to-pdf, image-compress
  Remote      office-to-pdf, repair, html-to-pdf, pdfa
  Not served  ocr, pdf-to-word, pdf-to-image, word-to-pdf

EXAMPLES:
  pdftools merge a.pdf b.pdf -o merged.pdf
  pdftools split report.pdf -o pages/
  pdftools rotate --angle 270 scan.pdf
  pdftools compress --level high --strip-metadata big.pdf
  pdftools protect --password s3cret contract.pdf
  pdftools watermark --text CONFIDENTIAL draft.pdf
  pdftools organize --pages 3,1,2 deck.pdf
  pdftools image-to-pdf front.jpg back.png -o scan.pdf
  pdftools html-to-pdf --url https://example.com

ENVIRONMENT VARIABLES:
  ILOVEPDF_PUBLIC_KEY     Project public key for remote conversions
  ILOVEPDF_SECRET_KEY     Project secret key
  ILOVEPDF_BASE_URL       Override the conversion API endpoint
  PDFTOOLS_STAGING_DIR    Staging root (default: a fresh temp directory)
"#;

/// Transform PDF documents and images.
#[derive(Parser, Debug)]
#[command(
    name = "pdftools",
    version,
    about = "Merge, split, rotate, compress, protect, stamp and convert PDF files",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Operation name, e.g. merge, split, page-numbers, office-to-pdf.
    operation: String,

    /// Input files, in order.
    files: Vec<PathBuf>,

    /// Output file, or directory for split; a `.zip` path packs split pages into one archive.
    #[arg(short, long, env = "PDFTOOLS_OUTPUT")]
    output: Option<PathBuf>,

    /// Rotation in degrees (rotate). Default 90.
    #[arg(long, allow_hyphen_values = true)]
    angle: Option<i64>,

    /// Compression level: low, medium, high.
    #[arg(long, env = "PDFTOOLS_LEVEL")]
    level: Option<String>,

    /// JPEG quality 1–100 (compress, image-compress).
    #[arg(long, env = "PDFTOOLS_QUALITY",
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// Remove document metadata while compressing.
    #[arg(long)]
    strip_metadata: bool,

    /// Password (protect, unlock).
    #[arg(long, env = "PDFTOOLS_PASSWORD")]
    password: Option<String>,

    /// Watermark text.
    #[arg(long)]
    text: Option<String>,

    /// Page order for organize: "3,1,2" or "[3,1,2]".
    #[arg(long)]
    pages: Option<String>,

    /// Web page to convert (html-to-pdf).
    #[arg(long)]
    url: Option<String>,

    /// PDF/A conformance level, e.g. pdfa-2b.
    #[arg(long)]
    conformance: Option<String>,

    /// Staging root for request artifacts.
    #[arg(long, env = "PDFTOOLS_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Time limit for local transforms, in seconds.
    #[arg(long, env = "PDFTOOLS_LOCAL_TIMEOUT", default_value_t = 60)]
    local_timeout: u64,

    /// Time limit for remote conversions, in seconds.
    #[arg(long, env = "PDFTOOLS_REMOTE_TIMEOUT", default_value_t = 120)]
    remote_timeout: u64,

    /// Print a JSON summary (or the JSON error) on stdout.
    #[arg(long, env = "PDFTOOLS_JSON")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, env = "PDFTOOLS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFTOOLS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFTOOLS_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives enough feedback; library INFO logs would tear it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build dispatcher ─────────────────────────────────────────────────
    // Without an explicit root, stage into a throwaway directory that is
    // removed on exit.
    let scratch = match cli.staging_dir {
        Some(_) => None,
        None => Some(
            tempfile::Builder::new()
                .prefix("pdftools-")
                .tempdir()
                .context("Failed to create staging directory")?,
        ),
    };
    let staging_dir = cli
        .staging_dir
        .clone()
        .or_else(|| scratch.as_ref().map(|tmp| tmp.path().to_path_buf()))
        .unwrap_or_else(|| std::env::temp_dir().join("pdftools-staging"));

    let mut builder = PipelineConfig::builder()
        .staging_dir(staging_dir)
        .local_timeout_secs(cli.local_timeout)
        .remote_timeout_secs(cli.remote_timeout);
    if let Some(remote) = RemoteConfig::from_env() {
        builder = builder.remote(remote);
    }
    let config = builder.build().context("Invalid configuration")?;

    let mut dispatcher = Dispatcher::new(&config).context("Failed to open staging directory")?;
    if show_progress {
        dispatcher = dispatcher.with_observer(CliObserver::new());
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let request = build_request(&cli);
    match dispatcher.dispatch(request).await {
        Ok(output) => {
            write_output(&cli, &output).await?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            report_error(&cli, &e)?;
            Ok(if e.is_client_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Map CLI args to an `OperationRequest`.
fn build_request(cli: &Cli) -> OperationRequest {
    let mut request = OperationRequest::new(&cli.operation);
    let params = [
        ("angle", cli.angle.map(|a| a.to_string())),
        ("level", cli.level.clone()),
        ("quality", cli.quality.map(|q| q.to_string())),
        ("remove_metadata", cli.strip_metadata.then(|| "true".to_string())),
        ("password", cli.password.clone()),
        ("text", cli.text.clone()),
        ("pages", cli.pages.clone()),
        ("url", cli.url.clone()),
        ("conformance", cli.conformance.clone()),
    ];
    for (key, value) in params {
        if let Some(value) = value {
            request = request.param(key, value);
        }
    }
    for file in &cli.files {
        request = request.upload_path(file);
    }
    request
}

async fn write_output(cli: &Cli, output: &OperationOutput) -> Result<()> {
    match output {
        OperationOutput::Document { file, report } => {
            let path = match &cli.output {
                Some(p) if p.is_dir() => p.join(&file.name),
                Some(p) => p.clone(),
                None => PathBuf::from(&file.name),
            };
            write_file(&path, &file.bytes).await?;

            if cli.json {
                let summary = serde_json::json!({
                    "file": path.display().to_string(),
                    "contentType": file.content_type(),
                    "bytes": file.bytes.len(),
                    "report": report,
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
                );
            } else if !cli.quiet {
                eprintln!(
                    "{}  {}  {}",
                    green("✔"),
                    bold(&path.display().to_string()),
                    dim(&format!("{} bytes", file.bytes.len())),
                );
                if let Some(r) = report {
                    eprintln!(
                        "   {} -> {} bytes  ({:.1}% reduction)",
                        r.original_size, r.new_size, r.reduction_percent
                    );
                }
            }
        }
        OperationOutput::Split { manifest, files } => {
            // `-o pages.zip` keeps the pages and manifest together in one archive.
            if let Some(target) = cli.output.as_ref().filter(|p| {
                p.extension().is_some_and(|e| e.eq_ignore_ascii_case("zip"))
            }) {
                let archive = manifest.archive(files)?;
                write_file(target, &archive).await?;
                if !cli.quiet && !cli.json {
                    eprintln!(
                        "{}  {} pages  →  {}",
                        green("✔"),
                        files.len(),
                        bold(&target.display().to_string())
                    );
                }
                return Ok(());
            }
            let dir = cli.output.clone().unwrap_or_else(|| PathBuf::from("."));
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
            for file in files {
                write_file(&dir.join(&file.name), &file.bytes).await?;
            }
            println!(
                "{}",
                serde_json::to_string_pretty(manifest).context("Failed to serialise manifest")?
            );
            if !cli.quiet && !cli.json {
                eprintln!(
                    "{}  {} pages  →  {}",
                    green("✔"),
                    files.len(),
                    bold(&dir.display().to_string())
                );
            }
        }
    }
    Ok(())
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// The JSON error body always goes to stdout so scripts can parse it.
fn report_error(cli: &Cli, error: &TransformError) -> Result<()> {
    let body = ErrorBody::from(error);
    println!(
        "{}",
        serde_json::to_string_pretty(&body).context("Failed to serialise error")?
    );
    if !cli.quiet && !cli.json {
        eprintln!("{} {}  {}", red("✘"), error, dim(&format!("[{}]", error.kind())));
    }
    Ok(())
}
